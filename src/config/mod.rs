use lazy_static::lazy_static;
use log::{error, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::sync::RwLock;

fn serial_baud_default() -> u32 { return 9600 }
fn serial_read_timeout_ms_default() -> u64 { return 50 }

#[derive(Deserialize, Serialize, Clone)]
pub struct SerialConfig {
    #[serde(default = "serial_baud_default")]
    pub baud: u32,
    #[serde(default = "serial_read_timeout_ms_default")]
    pub read_timeout_ms: u64,
}

fn meter_timeout_secs_default() -> u64 { return 5 }
fn meter_terminate_on_timeout_default() -> bool { return true }

#[derive(Deserialize, Serialize, Clone)]
pub struct MeterConfig {
    /// Readings older than this are stale and reported as all zero.
    #[serde(default = "meter_timeout_secs_default")]
    pub timeout_secs: u64,
    /// true: stale data stops the process; false: publish zeros and resume.
    #[serde(default = "meter_terminate_on_timeout_default")]
    pub terminate_on_timeout: bool,
}

fn mqtt_host_default() -> String { return "localhost".to_string() }
fn mqtt_port_default() -> u16 { return 1883 }
fn mqtt_user_default() -> String { return "".to_string() }
fn mqtt_pass_default() -> String { return "".to_string() }
fn mqtt_client_name_default() -> String { return "sml2mqtt".to_string() }
fn mqtt_base_topic_default() -> String { return "sml2mqtt".to_string() }
fn mqtt_publish_interval_ms_default() -> u64 { return 200 }

#[derive(Deserialize, Serialize, Clone)]
pub struct MqttConfig {
    #[serde(default = "mqtt_host_default")]
    pub host: String,
    #[serde(default = "mqtt_port_default")]
    pub port: u16,
    #[serde(default = "mqtt_user_default")]
    pub user: String,
    #[serde(default = "mqtt_pass_default")]
    pub pass: String,
    #[serde(default = "mqtt_client_name_default")]
    pub client_name: String,
    #[serde(default = "mqtt_base_topic_default")]
    pub base_topic: String,
    #[serde(default = "mqtt_publish_interval_ms_default")]
    pub publish_interval_ms: u64,
}

fn serial_default() -> SerialConfig {
    return SerialConfig {
        baud: serial_baud_default(),
        read_timeout_ms: serial_read_timeout_ms_default(),
    };
}

fn meter_default() -> MeterConfig {
    return MeterConfig {
        timeout_secs: meter_timeout_secs_default(),
        terminate_on_timeout: meter_terminate_on_timeout_default(),
    };
}

fn mqtt_default() -> MqttConfig {
    return MqttConfig {
        host: mqtt_host_default(),
        port: mqtt_port_default(),
        user: mqtt_user_default(),
        pass: mqtt_pass_default(),
        client_name: mqtt_client_name_default(),
        base_topic: mqtt_base_topic_default(),
        publish_interval_ms: mqtt_publish_interval_ms_default(),
    };
}

#[derive(Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default = "serial_default")]
    pub serial: SerialConfig,
    #[serde(default = "meter_default")]
    pub meter: MeterConfig,
    #[serde(default = "mqtt_default")]
    pub mqtt: MqttConfig,
}

impl Config {
    /// Check the two usual locations for the config file. Unlike a broker
    /// connection there is nothing here the defaults cannot cover, so a
    /// missing file is not an error.
    pub fn load() -> Self {
        for path in ["config/sml2mqtt.yaml", "sml2mqtt.yaml"] {
            if let Some(config) = Self::load_path(path) {
                return config;
            }
        }

        info!("No config file found, running with defaults");
        return Config::defaults();
    }

    pub fn load_path(path: &str) -> Option<Self> {
        let contents = fs::read_to_string(path).ok()?;
        match serde_yml::from_str(&contents) {
            Ok(config) => {
                info!("Loaded configuration from {}", path);
                Some(config)
            }
            Err(e) => {
                error!("Unable to parse config file {}: {}", path, e);
                panic!("Unable to parse config file {}", path);
            }
        }
    }

    pub fn defaults() -> Self {
        return Config {
            serial: serial_default(),
            meter: meter_default(),
            mqtt: mqtt_default(),
        };
    }
}

lazy_static! {
    pub static ref CONFIG: RwLock<Config> = RwLock::new(Config::load());
}
