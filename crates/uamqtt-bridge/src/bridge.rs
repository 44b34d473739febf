//! Wiring of one source client to one broker client.

use crate::broker::BrokerClient;
use crate::config::{BrokerConfig, SourceConfig};
use crate::source::SourceClient;
use std::sync::Arc;
use uamqtt_core::{BrokerConnector, SourceTransport};

/// A source client whose links publish through a broker client.
///
/// The two connection lifecycles stay independent; the only coupling is the
/// change forwarder, which publishes through the broker's handle.
pub struct Bridge {
    // Dropped first: no data-change callback may outlive the broker.
    source: SourceClient,
    broker: BrokerClient,
}

impl Bridge {
    /// Create both clients, idle.
    #[must_use]
    pub fn new(
        transport: Arc<dyn SourceTransport>,
        source_config: SourceConfig,
        connector: Arc<dyn BrokerConnector>,
        broker_config: BrokerConfig,
    ) -> Self {
        let broker = BrokerClient::new(connector, broker_config);
        let source = SourceClient::new(transport, source_config, Arc::new(broker.handle()));
        Self { source, broker }
    }

    /// The source client.
    #[must_use]
    pub fn source(&self) -> &SourceClient {
        &self.source
    }

    /// The broker client.
    #[must_use]
    pub fn broker(&self) -> &BrokerClient {
        &self.broker
    }

    /// Stop the source first so no more changes arrive, then the broker.
    pub fn shutdown(&self) {
        tracing::info!("Shutting down bridge");
        self.source.shutdown();
        self.broker.shutdown();
        tracing::info!(
            forwarded = self.source.forwarder().forwarded(),
            published = self.broker.published(),
            dropped = self.broker.dropped(),
            "Bridge stopped"
        );
    }
}
