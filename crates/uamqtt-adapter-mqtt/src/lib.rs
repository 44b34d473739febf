//! # MQTT Adapter
//!
//! Broker session for the gateway, built on the synchronous `rumqttc` client.
//!
//! The session is driven from the broker worker thread: `poll` services the
//! event loop for one bounded slice, publishing goes through a cloned client
//! handle and never waits on the network.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod address;
pub mod session;

pub use address::{parse_mqtt_url, AddressError};
pub use session::{MqttConnector, MqttPublisher, MqttSession};
