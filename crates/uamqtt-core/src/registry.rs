//! Node to (subscription handle, topic) mapping.
//!
//! Writers are operator calls on the source client; readers include the
//! data-change callback running on the protocol library's thread. Every
//! access takes the same lock, so a lookup never sees half of an insert.

use crate::error::LinkError;
use crate::node::NodeIdentity;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::num::NonZeroU32;
use std::time::Duration;

/// Server-assigned id of a protocol subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u32);

/// Non-zero handle of a monitored item.
///
/// Zero is never a valid handle; "no link" is expressed as `Option::None`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MonitorHandle(NonZeroU32);

impl MonitorHandle {
    /// Wrap a raw handle, rejecting the zero sentinel.
    #[must_use]
    pub fn new(raw: u32) -> Option<Self> {
        NonZeroU32::new(raw).map(Self)
    }

    /// Raw handle value.
    #[must_use]
    pub fn get(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for MonitorHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything needed to tear a link down again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LinkHandle {
    /// Subscription that owns the monitored item
    pub subscription: SubscriptionId,
    /// Monitored item within the subscription
    pub item: MonitorHandle,
}

/// One live node to topic association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionLink {
    /// Source node
    pub node: NodeIdentity,
    /// Subscription handle
    pub handle: LinkHandle,
    /// Broker topic the node's changes are published to
    pub topic: String,
    /// Requested publishing interval
    pub publish_interval: Duration,
}

#[derive(Debug, Default)]
struct Entries {
    live: HashMap<NodeIdentity, SubscriptionLink>,
    /// Links being created, with the topic they will publish to.
    pending: HashMap<NodeIdentity, String>,
}

impl Entries {
    fn is_taken(&self, node: &NodeIdentity) -> bool {
        self.live.contains_key(node) || self.pending.contains_key(node)
    }
}

/// Registry of live links, at most one per node.
///
/// A link is first reserved, then subscribed, then inserted. Changes for a
/// reserved node are forwarded to its topic before the handle is known, since
/// servers report the current value as soon as the monitored item exists.
#[derive(Debug, Default)]
pub struct SubscriptionRegistry {
    entries: Mutex<Entries>,
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `node` for a link that will publish to `topic`.
    ///
    /// # Errors
    ///
    /// `LinkError::AlreadyLinked` if the node is linked or already reserved.
    pub fn reserve(
        &self,
        node: &NodeIdentity,
        topic: impl Into<String>,
    ) -> Result<(), LinkError> {
        let mut entries = self.entries.lock();
        if entries.is_taken(node) {
            return Err(LinkError::AlreadyLinked(node.clone()));
        }
        entries.pending.insert(node.clone(), topic.into());
        Ok(())
    }

    /// Drop a reservation that did not become a link.
    pub fn release(&self, node: &NodeIdentity) {
        self.entries.lock().pending.remove(node);
    }

    /// Register a link, completing the node's reservation if it has one.
    ///
    /// # Errors
    ///
    /// `LinkError::AlreadyLinked` if the node already has a live link; the
    /// registry is left unchanged.
    pub fn insert(&self, link: SubscriptionLink) -> Result<(), LinkError> {
        let mut entries = self.entries.lock();
        if entries.live.contains_key(&link.node) {
            return Err(LinkError::AlreadyLinked(link.node));
        }
        entries.pending.remove(&link.node);
        entries.live.insert(link.node.clone(), link);
        Ok(())
    }

    /// Remove and return a node's link.
    ///
    /// # Errors
    ///
    /// `LinkError::NotLinked` if the node has no link.
    pub fn remove(&self, node: &NodeIdentity) -> Result<SubscriptionLink, LinkError> {
        self.entries
            .lock()
            .live
            .remove(node)
            .ok_or_else(|| LinkError::NotLinked(node.clone()))
    }

    /// Copy of a node's link.
    #[must_use]
    pub fn get(&self, node: &NodeIdentity) -> Option<SubscriptionLink> {
        self.entries.lock().live.get(node).cloned()
    }

    /// Topic for a data change, if the node is still linked through `item`
    /// or its link is being created.
    ///
    /// A change carrying a stale handle (the node was unlinked and relinked)
    /// yields `None`.
    #[must_use]
    pub fn topic_for(&self, node: &NodeIdentity, item: MonitorHandle) -> Option<String> {
        let entries = self.entries.lock();
        match entries.live.get(node) {
            Some(link) => (link.handle.item == item).then(|| link.topic.clone()),
            None => entries.pending.get(node).cloned(),
        }
    }

    /// Handle of a node's link.
    #[must_use]
    pub fn handle_of(&self, node: &NodeIdentity) -> Option<LinkHandle> {
        self.entries.lock().live.get(node).map(|link| link.handle)
    }

    /// Whether the node has a link.
    #[must_use]
    pub fn contains(&self, node: &NodeIdentity) -> bool {
        self.entries.lock().live.contains_key(node)
    }

    /// Number of links.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().live.len()
    }

    /// Whether there are no links.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().live.is_empty()
    }

    /// All links, ordered by node.
    #[must_use]
    pub fn links(&self) -> Vec<SubscriptionLink> {
        let mut links: Vec<_> = self.entries.lock().live.values().cloned().collect();
        links.sort_by(|a, b| a.node.cmp(&b.node));
        links
    }

    /// Remove every link and reservation, returning the links removed.
    pub fn clear(&self) -> Vec<SubscriptionLink> {
        let mut entries = self.entries.lock();
        entries.pending.clear();
        let drained: Vec<_> = entries.live.drain().map(|(_, link)| link).collect();
        drop(entries);
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), "Cleared subscription registry");
        }
        drained
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn link(ns: u16, id: u32, item: u32) -> SubscriptionLink {
        SubscriptionLink {
            node: NodeIdentity::numeric(ns, id),
            handle: LinkHandle {
                subscription: SubscriptionId(1),
                item: MonitorHandle::new(item).unwrap(),
            },
            topic: format!("opcuamqtt/{ns}/N{id}"),
            publish_interval: Duration::from_millis(60),
        }
    }

    #[test]
    fn zero_is_not_a_handle() {
        assert!(MonitorHandle::new(0).is_none());
        assert_eq!(MonitorHandle::new(7).map(MonitorHandle::get), Some(7));
    }

    #[test]
    fn at_most_one_link_per_node() {
        let registry = SubscriptionRegistry::new();
        registry.insert(link(2, 5001, 1)).unwrap();

        let err = registry.insert(link(2, 5001, 2)).unwrap_err();
        assert_eq!(err, LinkError::AlreadyLinked(NodeIdentity::numeric(2, 5001)));
        assert_eq!(registry.len(), 1);
        assert_eq!(
            registry.handle_of(&NodeIdentity::numeric(2, 5001)).map(|h| h.item.get()),
            Some(1)
        );
    }

    #[test]
    fn remove_absent_fails() {
        let registry = SubscriptionRegistry::new();
        let node = NodeIdentity::numeric(2, 1);
        assert_eq!(registry.remove(&node), Err(LinkError::NotLinked(node.clone())));

        registry.insert(link(2, 1, 3)).unwrap();
        assert!(registry.remove(&node).is_ok());
        assert!(registry.remove(&node).is_err());
        assert!(registry.is_empty());
    }

    #[test]
    fn stale_handle_has_no_topic() {
        let registry = SubscriptionRegistry::new();
        registry.insert(link(2, 9, 4)).unwrap();
        let node = NodeIdentity::numeric(2, 9);

        assert_eq!(
            registry.topic_for(&node, MonitorHandle::new(4).unwrap()).as_deref(),
            Some("opcuamqtt/2/N9")
        );
        assert_eq!(registry.topic_for(&node, MonitorHandle::new(5).unwrap()), None);
    }

    #[test]
    fn reserved_node_takes_changes_before_insert() {
        let registry = SubscriptionRegistry::new();
        let node = NodeIdentity::numeric(2, 9);
        let item = MonitorHandle::new(4).unwrap();

        registry.reserve(&node, "opcuamqtt/2/N9").unwrap();
        assert_eq!(registry.topic_for(&node, item).as_deref(), Some("opcuamqtt/2/N9"));
        assert!(!registry.contains(&node));
        assert_eq!(
            registry.reserve(&node, "opcuamqtt/2/N9"),
            Err(LinkError::AlreadyLinked(node.clone()))
        );

        registry.insert(link(2, 9, 4)).unwrap();
        assert!(registry.contains(&node));
        assert_eq!(registry.topic_for(&node, MonitorHandle::new(5).unwrap()), None);
    }

    #[test]
    fn released_reservation_drops_changes() {
        let registry = SubscriptionRegistry::new();
        let node = NodeIdentity::numeric(2, 9);

        registry.reserve(&node, "opcuamqtt/2/N9").unwrap();
        registry.release(&node);
        assert_eq!(registry.topic_for(&node, MonitorHandle::new(4).unwrap()), None);
        assert!(registry.reserve(&node, "opcuamqtt/2/N9").is_ok());
    }

    #[test]
    fn clear_drains_everything() {
        let registry = SubscriptionRegistry::new();
        registry.insert(link(2, 2, 1)).unwrap();
        registry.insert(link(2, 1, 2)).unwrap();

        let ordered: Vec<_> = registry.links().into_iter().map(|l| l.node).collect();
        assert_eq!(ordered, [NodeIdentity::numeric(2, 1), NodeIdentity::numeric(2, 2)]);

        assert_eq!(registry.clear().len(), 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn concurrent_inserts_keep_one_winner() {
        let registry = Arc::new(SubscriptionRegistry::new());
        let threads: Vec<_> = (1..=8)
            .map(|item| {
                let registry = Arc::clone(&registry);
                std::thread::spawn(move || registry.insert(link(2, 42, item)).is_ok())
            })
            .collect();

        let winners = threads
            .into_iter()
            .map(|t| t.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(winners, 1);
        assert_eq!(registry.len(), 1);
    }
}
