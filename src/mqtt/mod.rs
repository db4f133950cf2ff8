use crate::config::CONFIG;
use crate::store::MeterStore;
use log::{debug, error, info};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;

/// Periodic consumer of the measurement store: snapshots it on a fixed
/// cadence and publishes the result. Whether the snapshot holds live data
/// or the zero fallback is the store's decision, not ours.
pub struct MqttPublisher {
    client: AsyncClient,
    store: Arc<MeterStore>,
    interval: Duration,
    base_topic: String,
    update_index: u8,
}

impl MqttPublisher {
    pub fn new(store: Arc<MeterStore>) -> Self {
        let config = CONFIG.read().unwrap().mqtt.clone();

        info!("MQTT connection starting up");
        let mut mqttoptions = MqttOptions::new(
            config.client_name.clone(),
            config.host.clone(),
            config.port,
        );
        mqttoptions.set_keep_alive(Duration::from_secs(5));
        if !config.user.is_empty() {
            mqttoptions.set_credentials(config.user.clone(), config.pass.clone());
        }

        let (client, mut eventloop) = AsyncClient::new(mqttoptions, 10);

        // rumqttc needs its event loop polled or publishes stall
        tokio::spawn(async move {
            info!("MQTT Eventloop started");
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("Connected to MQTT broker");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!("Error in MQTT {:?}, reconnecting", e);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        return MqttPublisher {
            client,
            store,
            interval: Duration::from_millis(config.publish_interval_ms),
            base_topic: config.base_topic,
            update_index: 0,
        };
    }

    pub async fn start_thread(&mut self) {
        info!(
            "Publishing meter data every {} ms to {}/grid",
            self.interval.as_millis(),
            self.base_topic
        );

        let mut interval = tokio::time::interval(self.interval);
        loop {
            interval.tick().await;

            let data = self.store.snapshot();
            let payload = match serde_json::to_string(&data) {
                Ok(payload) => payload,
                Err(e) => {
                    error!("Unable to serialize meter data: {}", e);
                    continue;
                }
            };

            let topic = format!("{}/grid", self.base_topic);
            match self.client.publish(topic, QoS::AtLeastOnce, false, payload).await {
                Ok(_) => debug!("Published meter data"),
                Err(e) => {
                    error!("Error sending: {}", e);
                    continue;
                }
            }

            // rolling counter so consumers can tell publishes apart even
            // when the values repeat
            let _ = self
                .client
                .publish(
                    format!("{}/grid/update_index", self.base_topic),
                    QoS::AtLeastOnce,
                    false,
                    self.update_index.to_string(),
                )
                .await;
            self.update_index = self.update_index.wrapping_add(1);
        }
    }
}
