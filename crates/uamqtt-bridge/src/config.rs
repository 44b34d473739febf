//! Client configuration.

use std::time::Duration;
use uamqtt_core::{QualityOfService, DEFAULT_BASE_TOPIC};

/// Default bootstrap URL for endpoint discovery.
pub const DEFAULT_ENDPOINT_URL: &str = "opc.tcp://localhost:4841/";

/// Default bound on consecutive broker reconnect attempts.
pub const DEFAULT_MAX_RECONNECT_ATTEMPTS: u32 = 100;

/// Source client configuration.
#[derive(Debug, Clone)]
pub struct SourceConfig {
    /// URL endpoint discovery starts from
    pub initial_endpoint: String,
    /// Depth bound for discovery walks
    pub max_walk_depth: usize,
    /// How often the worker checks the session and stop requests
    pub poll_interval: Duration,
    /// Progress log interval while waiting for the worker on shutdown
    pub shutdown_progress_interval: Duration,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            initial_endpoint: DEFAULT_ENDPOINT_URL.to_string(),
            max_walk_depth: crate::walker::DEFAULT_MAX_DEPTH,
            poll_interval: Duration::from_millis(100),
            shutdown_progress_interval: Duration::from_secs(1),
        }
    }
}

/// Broker client configuration.
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Broker host
    pub host: String,
    /// Broker port
    pub port: u16,
    /// MQTT client identifier
    pub client_id: String,
    /// Base topic of derived link topics
    pub base_topic: String,
    /// Keep-alive interval
    pub keep_alive: Duration,
    /// Delivery tier for published values
    pub qos: QualityOfService,
    /// Ask the broker to retain the last value per topic
    pub retain: bool,
    /// Consecutive failed reconnects after which the worker gives up
    pub max_reconnect_attempts: u32,
    /// Pause between failed reconnect attempts
    pub reconnect_delay: Duration,
    /// Time slice of each network-service call
    pub poll_interval: Duration,
    /// Progress log interval while waiting for the worker on shutdown
    pub shutdown_progress_interval: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: "uamqtt-gateway".to_string(),
            base_topic: DEFAULT_BASE_TOPIC.to_string(),
            keep_alive: Duration::from_secs(60),
            qos: QualityOfService::AtLeastOnce,
            retain: true,
            max_reconnect_attempts: DEFAULT_MAX_RECONNECT_ATTEMPTS,
            reconnect_delay: Duration::from_millis(100),
            poll_interval: Duration::from_millis(100),
            shutdown_progress_interval: Duration::from_secs(1),
        }
    }
}
