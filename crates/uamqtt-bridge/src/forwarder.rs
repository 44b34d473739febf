//! Data-change forwarding from the source callback thread to the broker.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use uamqtt_core::{DataChangeHandler, MonitorHandle, NodeIdentity, SubscriptionRegistry, Variant};

/// Where forwarded values go.
///
/// Implemented by the broker client's handle; must never block on network
/// I/O or on the source client.
pub trait TopicPublisher: Send + Sync {
    /// Base topic link topics are derived from.
    fn base_topic(&self) -> String;

    /// Fire-and-forget publish.
    fn publish(&self, topic: &str, payload: &[u8]);
}

/// Publisher that drops everything. Useful for browsing without a broker.
#[derive(Debug, Clone)]
pub struct DiscardingPublisher {
    base_topic: String,
}

impl DiscardingPublisher {
    /// Create a publisher reporting `base_topic`.
    #[must_use]
    pub fn new(base_topic: impl Into<String>) -> Self {
        Self {
            base_topic: base_topic.into(),
        }
    }
}

impl Default for DiscardingPublisher {
    fn default() -> Self {
        Self::new(uamqtt_core::DEFAULT_BASE_TOPIC)
    }
}

impl TopicPublisher for DiscardingPublisher {
    fn base_topic(&self) -> String {
        self.base_topic.clone()
    }

    fn publish(&self, topic: &str, _payload: &[u8]) {
        tracing::trace!(topic, "Discarding value");
    }
}

/// Looks up the topic of a changed node and publishes the new value.
///
/// Safe to call concurrently for different nodes. A change for a node whose
/// link was removed in the meantime is dropped.
pub struct ChangeForwarder {
    registry: Arc<SubscriptionRegistry>,
    publisher: Arc<dyn TopicPublisher>,
    forwarded: AtomicU64,
    dropped: AtomicU64,
}

impl ChangeForwarder {
    /// Create a forwarder reading `registry` and writing to `publisher`.
    #[must_use]
    pub fn new(registry: Arc<SubscriptionRegistry>, publisher: Arc<dyn TopicPublisher>) -> Self {
        Self {
            registry,
            publisher,
            forwarded: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// Publisher the forwarder writes to.
    #[must_use]
    pub fn publisher(&self) -> &Arc<dyn TopicPublisher> {
        &self.publisher
    }

    /// Number of changes handed to the publisher.
    #[must_use]
    pub fn forwarded(&self) -> u64 {
        self.forwarded.load(Ordering::Relaxed)
    }

    /// Number of changes dropped because the node was no longer linked.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl DataChangeHandler for ChangeForwarder {
    fn on_data_change(&self, item: MonitorHandle, node: &NodeIdentity, value: &Variant) {
        let Some(topic) = self.registry.topic_for(node, item) else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(node = %node, item = %item, "Dropping change for unlinked node");
            return;
        };

        let payload = value.to_string();
        tracing::debug!(topic = %topic, payload = %payload, "Forwarding value change");
        self.publisher.publish(&topic, payload.as_bytes());
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }
}
