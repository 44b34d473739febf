//! MQTT topic scheme for mirrored nodes.
//!
//! Topic structure: `{base}/{namespaceIndex}/{browseName}`
//!
//! The topic depends only on the namespace index and the browse name, so a
//! node relinked later (or by another gateway with the same base) lands on
//! the same topic and retained values stay meaningful.

use serde::{Deserialize, Serialize};

/// Default base topic.
pub const DEFAULT_BASE_TOPIC: &str = "opcuamqtt";

/// Topic scheme configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicScheme {
    /// Base topic (default: "opcuamqtt")
    pub base: String,
}

impl Default for TopicScheme {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_TOPIC)
    }
}

impl TopicScheme {
    /// Create a topic scheme under the given base.
    #[must_use]
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }

    fn prefix(&self) -> &str {
        self.base.trim_end_matches('/')
    }

    /// Topic a linked node publishes to.
    ///
    /// MQTT wildcards in the browse name are replaced with `_`.
    #[must_use]
    pub fn link_topic(&self, namespace: u16, browse_name: &str) -> String {
        let name = sanitize_level(browse_name);
        match self.prefix() {
            "" => format!("{namespace}/{name}"),
            prefix => format!("{prefix}/{namespace}/{name}"),
        }
    }

    /// Wildcard subscription for every mirrored node.
    #[must_use]
    pub fn wildcard(&self) -> String {
        match self.prefix() {
            "" => "#".to_string(),
            prefix => format!("{prefix}/#"),
        }
    }

    /// Parse a topic to extract components.
    ///
    /// Returns `(namespace, browse_name)` if the topic belongs to this scheme.
    #[must_use]
    pub fn parse(&self, topic: &str) -> Option<(u16, String)> {
        let remainder = match self.prefix() {
            "" => topic,
            prefix => topic.strip_prefix(prefix)?.strip_prefix('/')?,
        };
        let (namespace, name) = remainder.split_once('/')?;
        if name.is_empty() {
            return None;
        }
        Some((namespace.parse().ok()?, name.to_string()))
    }
}

fn sanitize_level(name: &str) -> String {
    name.chars()
        .map(|c| if matches!(c, '+' | '#') { '_' } else { c })
        .collect()
}
