//! Agent configuration.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::time::Duration;
use uamqtt_adapter_mqtt::parse_mqtt_url;
use uamqtt_bridge::{BrokerConfig, SourceConfig};
use uamqtt_core::{NodeIdentity, QualityOfService, SecurityLevel};
use uuid::Uuid;

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Source client configuration (initial endpoint URL included)
    pub source: SourceConfig,

    /// Security level of the endpoint to connect to
    pub security_level: SecurityLevel,

    /// Broker client configuration
    pub broker: BrokerConfig,

    /// How long to wait for each session to come up
    pub connect_timeout: Duration,

    /// Nodes to link once the source is connected
    pub links: Vec<LinkConfig>,
}

/// One node to link.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LinkConfig {
    /// Source node, e.g. `ns=2;i=5001`
    pub node: NodeIdentity,

    /// Publishing interval in milliseconds
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
}

impl LinkConfig {
    /// Requested publishing interval.
    #[must_use]
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

fn default_interval_ms() -> u64 {
    1000
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            source: SourceConfig::default(),
            security_level: SecurityLevel::None,
            broker: BrokerConfig {
                client_id: format!("uamqtt-{}", Uuid::new_v4().simple()),
                ..BrokerConfig::default()
            },
            connect_timeout: Duration::from_secs(10),
            links: Vec::new(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `UAMQTT_OPCUA_ENDPOINT`: discovery URL of the OPC UA server
    /// - `UAMQTT_SECURITY_LEVEL`: `None`, `Basic128`, `Basic256` or a level number
    /// - `UAMQTT_MQTT_BROKER`: MQTT broker URL (`tcp://host:port` or `host:port`)
    /// - `UAMQTT_MQTT_CLIENT_ID`: MQTT client identifier
    /// - `UAMQTT_TOPIC`: base topic
    /// - `UAMQTT_RETAIN`: `true` or `false`
    /// - `UAMQTT_QOS`: 0, 1 or 2
    /// - `UAMQTT_MAX_RECONNECTS`: reconnect attempts before giving up
    /// - `UAMQTT_CONNECT_TIMEOUT_SECS`: wait for each session to come up
    /// - `UAMQTT_LINKS`: JSON list of `{"node": "ns=2;i=5001", "interval_ms": 1000}`
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set to an unparseable value.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key lookup, with the keys of [`Self::from_env`].
    ///
    /// # Errors
    ///
    /// Returns error if a key holds an unparseable value.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(url) = lookup("UAMQTT_OPCUA_ENDPOINT") {
            config.source.initial_endpoint = url;
        }

        if let Some(level) = lookup("UAMQTT_SECURITY_LEVEL") {
            config.security_level = level
                .parse()
                .map_err(|e: String| anyhow!(e))
                .context("Invalid UAMQTT_SECURITY_LEVEL")?;
        }

        if let Some(broker) = lookup("UAMQTT_MQTT_BROKER") {
            let (host, port) = parse_mqtt_url(&broker).context("Invalid UAMQTT_MQTT_BROKER")?;
            config.broker.host = host;
            config.broker.port = port;
        }

        if let Some(client_id) = lookup("UAMQTT_MQTT_CLIENT_ID") {
            config.broker.client_id = client_id;
        }

        if let Some(topic) = lookup("UAMQTT_TOPIC") {
            config.broker.base_topic = topic;
        }

        if let Some(retain) = lookup("UAMQTT_RETAIN") {
            config.broker.retain = parse_bool(&retain).context("Invalid UAMQTT_RETAIN")?;
        }

        if let Some(qos) = lookup("UAMQTT_QOS") {
            config.broker.qos = qos
                .trim()
                .parse::<u8>()
                .ok()
                .and_then(QualityOfService::from_level)
                .ok_or_else(|| anyhow!("expected 0, 1 or 2, got '{qos}'"))
                .context("Invalid UAMQTT_QOS")?;
        }

        if let Some(max) = lookup("UAMQTT_MAX_RECONNECTS") {
            config.broker.max_reconnect_attempts =
                max.trim().parse().context("Invalid UAMQTT_MAX_RECONNECTS")?;
        }

        if let Some(secs) = lookup("UAMQTT_CONNECT_TIMEOUT_SECS") {
            config.connect_timeout = Duration::from_secs(
                secs.trim().parse().context("Invalid UAMQTT_CONNECT_TIMEOUT_SECS")?,
            );
        }

        // Parse links from JSON env var
        if let Some(links_json) = lookup("UAMQTT_LINKS") {
            config.links =
                serde_json::from_str(&links_json).context("Invalid UAMQTT_LINKS JSON")?;
        }

        Ok(config)
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        other => Err(anyhow!("expected true or false, got '{other}'")),
    }
}
