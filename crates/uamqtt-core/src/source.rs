//! Capability seam for the source (OPC UA) side.
//!
//! The bridge engine only talks to these traits; the `opcua` adapter crate
//! implements them on a real client and tests use scripted fakes.

use crate::endpoint::EndpointDescriptor;
use crate::error::{ConnectionError, ProtocolError};
use crate::node::{NodeIdentity, NodeReference, NodeSnapshot};
use crate::registry::{MonitorHandle, SubscriptionId};
use crate::value::{DataType, Variant};
use std::sync::Arc;
use std::time::Duration;

/// Receives value changes of monitored items.
///
/// Invoked on the protocol library's own thread. Implementations must not
/// block on anything the source worker might be holding.
pub trait DataChangeHandler: Send + Sync {
    /// A monitored node reported a new value.
    fn on_data_change(&self, item: MonitorHandle, node: &NodeIdentity, value: &Variant);
}

/// Factory for source sessions.
pub trait SourceTransport: Send + Sync {
    /// Query the endpoints offered at `url` without opening a session.
    ///
    /// Any probe connection is closed before returning.
    ///
    /// # Errors
    ///
    /// `ConnectionError` if the discovery URL cannot be reached or parsed.
    fn discover_endpoints(&self, url: &str) -> Result<Vec<EndpointDescriptor>, ConnectionError>;

    /// Perform the handshake and activate a session on `endpoint`.
    ///
    /// # Errors
    ///
    /// `ConnectionError` on any handshake failure.
    fn connect(&self, endpoint: &EndpointDescriptor)
        -> Result<Arc<dyn SourceSession>, ConnectionError>;
}

/// An activated source session.
pub trait SourceSession: Send + Sync {
    /// Identity of the `Root` folder.
    fn root_node(&self) -> NodeIdentity {
        NodeIdentity::root()
    }

    /// Identity of the `Objects` folder.
    fn objects_node(&self) -> NodeIdentity {
        NodeIdentity::objects()
    }

    /// Hierarchical children of `node`, in the order the server reports them.
    ///
    /// # Errors
    ///
    /// `ProtocolError` if the browse fails.
    fn children(&self, node: &NodeIdentity) -> Result<Vec<NodeReference>, ProtocolError>;

    /// Read a fresh snapshot of `node`.
    ///
    /// # Errors
    ///
    /// `ProtocolError::NodeNotFound` for an unknown node, other variants for
    /// failed reads.
    fn read_node(&self, node: &NodeIdentity) -> Result<NodeSnapshot, ProtocolError>;

    /// Create a subscription publishing at `interval`.
    ///
    /// # Errors
    ///
    /// `ProtocolError` if the server rejects the subscription.
    fn create_subscription(
        &self,
        interval: Duration,
        handler: Arc<dyn DataChangeHandler>,
    ) -> Result<SubscriptionId, ProtocolError>;

    /// Monitor `node` for value changes within `subscription`.
    ///
    /// # Errors
    ///
    /// `ProtocolError` if the monitored item cannot be created.
    fn subscribe_data_change(
        &self,
        subscription: SubscriptionId,
        node: &NodeIdentity,
    ) -> Result<MonitorHandle, ProtocolError>;

    /// Stop monitoring an item.
    ///
    /// # Errors
    ///
    /// `ProtocolError` if the server rejects the request.
    fn unsubscribe(
        &self,
        subscription: SubscriptionId,
        item: MonitorHandle,
    ) -> Result<(), ProtocolError>;

    /// Delete a subscription and everything it monitors.
    ///
    /// # Errors
    ///
    /// `ProtocolError` if the server rejects the request.
    fn delete_subscription(&self, subscription: SubscriptionId) -> Result<(), ProtocolError>;

    /// Write an already coerced value to `node`, whose declared type is `declared`.
    ///
    /// # Errors
    ///
    /// `ProtocolError` if the server rejects the write.
    fn write_value(
        &self,
        node: &NodeIdentity,
        declared: &DataType,
        value: &Variant,
    ) -> Result<(), ProtocolError>;

    /// Create a folder below `parent`.
    ///
    /// # Errors
    ///
    /// `ProtocolError::Rejected` if the server refuses the new node.
    fn add_folder(
        &self,
        parent: &NodeIdentity,
        namespace: u16,
        name: &str,
    ) -> Result<NodeIdentity, ProtocolError>;

    /// Create a variable below `parent` holding `initial`.
    ///
    /// # Errors
    ///
    /// `ProtocolError::Rejected` if the server refuses the new node.
    fn add_variable(
        &self,
        parent: &NodeIdentity,
        namespace: u16,
        name: &str,
        initial: &Variant,
    ) -> Result<NodeIdentity, ProtocolError>;

    /// Whether the session is still usable. Polled by the source worker.
    ///
    /// # Errors
    ///
    /// `ConnectionError` once the session is lost.
    fn check_connection(&self) -> Result<(), ConnectionError> {
        Ok(())
    }

    /// Close the session.
    fn disconnect(&self);
}
