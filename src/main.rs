use log::{error, info};
use sml2mqtt::{MeterStore, MqttPublisher, SmlManager, TimeoutPolicy, CONFIG};
use std::env;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> std::io::Result<()> {
    // Initialize logging
    let default_filter = std::env::var("SML2MQTT_LOG_LEVEL").unwrap_or("info".to_string());
    env_logger::init_from_env(env_logger::Env::new().default_filter_or(default_filter));

    let device = match env::args().nth(1) {
        Some(device) => device,
        None => {
            error!("no port argument");
            std::process::exit(1);
        }
    };

    let (timeout, policy) = {
        let config = CONFIG.read().unwrap();
        let policy = match config.meter.terminate_on_timeout {
            true => TimeoutPolicy::Terminate,
            false => TimeoutPolicy::Degrade,
        };
        (Duration::from_secs(config.meter.timeout_secs), policy)
    };

    let store = Arc::new(MeterStore::new(timeout, policy));
    let running = Arc::new(AtomicBool::new(true));

    // Ingest side: the serial reader blocks, so it gets its own thread
    let mut reader = SmlManager::new(device, running.clone(), store.clone());
    let ingest = tokio::task::spawn_blocking(move || reader.run());

    // Publishing side: periodic MQTT snapshots
    let mut publisher = MqttPublisher::new(store);
    let publish = tokio::spawn(async move {
        publisher.start_thread().await;
    });

    info!("All modules started, now waiting for a signal to exit");
    tokio::signal::ctrl_c().await?;

    info!("Shutdown requested, stopping the reader");
    running.store(false, Ordering::SeqCst);
    publish.abort();
    let _ = ingest.await;

    Ok(())
}
