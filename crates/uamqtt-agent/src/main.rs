//! # uamqtt Agent
//!
//! Headless OPC UA to MQTT gateway.
//!
//! ## Lifecycle
//!
//! 1. **Broker**: connect the MQTT client; it keeps reconnecting on its own
//! 2. **Source**: discover endpoints, connect the one matching the configured security level
//! 3. **Links**: subscribe the configured nodes, publishing each change on its derived topic
//! 4. **Shutdown**: on Ctrl+C stop the source first, then the broker

use anyhow::Result;
use tracing_subscriber::EnvFilter;

mod config;
mod runtime;

pub use config::AgentConfig;
pub use runtime::Agent;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting uamqtt agent"
    );

    // Load configuration
    let config = AgentConfig::from_env()?;

    tracing::info!(
        endpoint = %config.source.initial_endpoint,
        security_level = %config.security_level,
        broker = %format!("{}:{}", config.broker.host, config.broker.port),
        base_topic = %config.broker.base_topic,
        links = config.links.len(),
        "Agent configured"
    );

    let agent = Agent::new(config);

    // Run agent
    agent.run().await?;

    Ok(())
}
