//! # uamqtt Core
//!
//! Shared vocabulary for the OPC UA to MQTT gateway.
//!
//! This crate provides:
//! - Node identities, snapshots and values as read from an OPC UA address space
//! - Endpoint descriptors and the security-level rendering rule
//! - `LifecycleState`, the run-state/status machine shared by both connection managers
//! - `SubscriptionRegistry`, the node to (handle, topic) mapping
//! - The MQTT topic scheme derived from namespace index and browse name
//! - Capability traits for the source (OPC UA) and broker (MQTT) sessions
//!
//! ## Topic scheme
//!
//! `{base}/{namespaceIndex}/{browseName}`, e.g. `opcuamqtt/2/Temperature`

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod broker;
pub mod endpoint;
pub mod error;
pub mod lifecycle;
pub mod node;
pub mod registry;
pub mod source;
pub mod topics;
pub mod value;

pub use broker::{
    BrokerConnector, BrokerEvent, BrokerOptions, BrokerPublisher, BrokerSession, QualityOfService,
};
pub use endpoint::{EndpointDescriptor, SecurityLevel, SecurityMode};
pub use error::{
    ConnectionError, Error, LinkError, ProtocolError, PublishError, ReconnectExhausted,
};
pub use lifecycle::{ClientStatus, LifecycleState, RunState};
pub use node::{
    Identifier, NodeClass, NodeDetails, NodeIdParseError, NodeIdentity, NodeReference,
    NodeSnapshot,
};
pub use registry::{LinkHandle, MonitorHandle, SubscriptionId, SubscriptionLink, SubscriptionRegistry};
pub use source::{DataChangeHandler, SourceSession, SourceTransport};
pub use topics::{TopicScheme, DEFAULT_BASE_TOPIC};
pub use value::{DataType, TypedValue, ValueKind, Variant};
