//! SML smart meter to MQTT bridge.
//!
//! Reads SML telegrams from a serial port, keeps the latest decoded
//! measurement set behind a staleness guard and publishes snapshots to
//! MQTT on a fixed cadence.

pub mod config;
pub mod metering_sml;
pub mod models;
pub mod mqtt;
pub mod store;

// Re-export common types for easier access
pub use config::CONFIG;
pub use metering_sml::SmlManager;
pub use models::MeterData;
pub use mqtt::MqttPublisher;
pub use store::{MeterStore, TimeoutPolicy};
