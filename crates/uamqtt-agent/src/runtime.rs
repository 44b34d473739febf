//! Agent runtime orchestration.

use crate::config::AgentConfig;
use anyhow::{anyhow, bail, Context, Result};
use std::sync::Arc;
use std::time::Duration;
use uamqtt_adapter_mqtt::MqttConnector;
use uamqtt_adapter_opcua::OpcUaTransport;
use uamqtt_bridge::Bridge;
use uamqtt_core::{ClientStatus, EndpointDescriptor, RunState};

/// How often the main loop checks both clients.
const HEALTH_INTERVAL: Duration = Duration::from_secs(1);

/// The gateway agent: one bridge, configured from the environment.
pub struct Agent {
    config: AgentConfig,
    bridge: Arc<Bridge>,
}

impl Agent {
    /// Create the agent with idle clients.
    #[must_use]
    pub fn new(config: AgentConfig) -> Self {
        let bridge = Bridge::new(
            Arc::new(OpcUaTransport::default()),
            config.source.clone(),
            Arc::new(MqttConnector),
            config.broker.clone(),
        );
        Self {
            config,
            bridge: Arc::new(bridge),
        }
    }

    /// Run the agent until Ctrl+C or until the source session ends.
    ///
    /// # Errors
    ///
    /// Returns error if the source cannot be connected, or if its session is
    /// lost while running.
    pub async fn run(self) -> Result<()> {
        tracing::info!("Starting agent runtime");

        let bridge = Arc::clone(&self.bridge);
        let config = self.config.clone();
        let setup = tokio::task::spawn_blocking(move || start_bridge(&bridge, &config))
            .await
            .context("Bridge setup task failed")?;

        let outcome = match setup {
            Ok(()) => {
                tracing::info!("Agent running, press Ctrl+C to stop");
                self.supervise().await
            }
            Err(e) => Err(e),
        };

        // Clients own library runtimes that must not be torn down on an async worker.
        let bridge = self.bridge;
        tokio::task::spawn_blocking(move || {
            bridge.shutdown();
            drop(bridge);
        })
        .await
        .context("Bridge shutdown task failed")?;

        tracing::info!("Agent stopped");
        outcome
    }

    async fn supervise(&self) -> Result<()> {
        let mut health = tokio::time::interval(HEALTH_INTERVAL);
        let mut broker_status = self.bridge.broker().status();

        loop {
            tokio::select! {
                _ = health.tick() => {
                    let source = self.bridge.source();
                    if source.run_state() == RunState::Finished {
                        let reason = source
                            .last_error()
                            .map_or_else(|| "session ended".to_string(), |e| e.to_string());
                        bail!("OPC UA session lost: {reason}");
                    }

                    let status = self.bridge.broker().status();
                    if status != broker_status {
                        tracing::info!(from = %broker_status, to = %status, "Broker status changed");
                        broker_status = status;
                    }
                }

                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutdown signal received");
                    return Ok(());
                }
            }
        }
    }
}

fn start_bridge(bridge: &Bridge, config: &AgentConfig) -> Result<()> {
    let broker = bridge.broker();
    tracing::info!(
        host = %config.broker.host,
        port = config.broker.port,
        client_id = %config.broker.client_id,
        "Connecting to MQTT broker"
    );
    if !broker.start() {
        bail!("MQTT broker client is already running");
    }
    let status = broker.wait_for_connection(config.connect_timeout);
    if status != ClientStatus::Connected {
        // Values are dropped until the broker client reconnects.
        tracing::warn!(%status, "MQTT broker not connected yet, continuing");
    }

    let source = bridge.source();
    let endpoints = source
        .discover_endpoints(&config.source.initial_endpoint)
        .context("Endpoint discovery failed")?;
    for endpoint in &endpoints {
        tracing::info!(endpoint = %endpoint.label(), "Discovered endpoint");
    }
    let endpoint = select_endpoint(&endpoints, config)?;

    source.connect(endpoint).context("Failed to start OPC UA session")?;
    let status = source.wait_for_connection(config.connect_timeout);
    if status != ClientStatus::Connected {
        let reason = source
            .last_error()
            .map_or_else(|| format!("status {status}"), |e| e.to_string());
        bail!("OPC UA session not established: {reason}");
    }

    for link in &config.links {
        match source.create_link(&link.node, link.interval()) {
            Ok(created) => {
                tracing::info!(node = %link.node, topic = %created.topic, "Link created");
            }
            Err(e) => {
                tracing::warn!(node = %link.node, error = %e, "Failed to create link");
            }
        }
    }

    tracing::info!(
        links = source.links().len(),
        configured = config.links.len(),
        "Bridge started"
    );
    Ok(())
}

fn select_endpoint<'a>(
    endpoints: &'a [EndpointDescriptor],
    config: &AgentConfig,
) -> Result<&'a EndpointDescriptor> {
    endpoints
        .iter()
        .find(|endpoint| endpoint.security_level == config.security_level)
        .ok_or_else(|| {
            anyhow!(
                "no endpoint with security level {} at {}",
                config.security_level,
                config.source.initial_endpoint
            )
        })
}
