//! # uamqtt Bridge
//!
//! The bridge engine of the OPC UA to MQTT gateway.
//!
//! This crate provides:
//! - `SourceClient`: one OPC UA session, its discovery walks and its links
//! - `BrokerClient`: one MQTT session with bounded automatic reconnection
//! - `ChangeForwarder`: data-change callback that republishes on the link topic
//! - `Bridge`: one of each, wired together
//!
//! ## Threads
//!
//! Each client runs its session on a dedicated worker thread. Data changes
//! arrive on the protocol library's own thread and go straight through the
//! forwarder to the broker session without touching either worker.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bridge;
pub mod broker;
pub mod config;
pub mod forwarder;
pub mod source;
pub mod walker;

pub use bridge::Bridge;
pub use broker::{BrokerClient, BrokerHandle};
pub use config::{BrokerConfig, SourceConfig};
pub use forwarder::{ChangeForwarder, DiscardingPublisher, TopicPublisher};
pub use source::{Anchor, DiscoveryStream, NewNodeKind, SourceClient, NEW_VARIABLE_INITIAL};
pub use walker::{CancelToken, DiscoveredNode, DiscoveryError, Walk, DEFAULT_MAX_DEPTH};
