//! Error taxonomy shared by the source and broker clients.

use crate::node::NodeIdentity;
use crate::value::{DataType, ValueKind};

/// Failure to establish or keep a session.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConnectionError {
    /// Endpoint could not be reached
    #[error("endpoint unreachable: {0}")]
    Unreachable(String),
    /// I/O failure on a pending or established connection
    #[error("connection i/o error: {0}")]
    Io(String),
    /// Peer refused the connection
    #[error("connection refused: {0}")]
    Refused(String),
    /// Handshake or protocol negotiation failed
    #[error("handshake failed: {0}")]
    Handshake(String),
    /// Address could not be parsed
    #[error("invalid address: {0}")]
    InvalidAddress(String),
    /// Operation requires that no session is running
    #[error("a session is already active")]
    SessionActive,
}

impl ConnectionError {
    /// Whether retrying the same connection later can succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unreachable(_) | Self::Io(_))
    }
}

/// Failure of a single request on an established session.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ProtocolError {
    /// Operation needs a connected session
    #[error("not connected")]
    NotConnected,
    /// Server answered with something we could not interpret
    #[error("malformed response: {0}")]
    Malformed(String),
    /// Supplied value kind does not fit the node's declared type
    #[error("cannot write {supplied} value to node of type {declared}")]
    TypeMismatch {
        /// Declared data type of the target node
        declared: DataType,
        /// Kind of the supplied value
        supplied: ValueKind,
    },
    /// Integer does not fit the node's declared width
    #[error("value {value} out of range for {declared}")]
    OutOfRange {
        /// Declared data type of the target node
        declared: DataType,
        /// Supplied integer
        value: i64,
    },
    /// Floating point value overflows the node's declared width
    #[error("value {value} out of range for {declared}")]
    FloatOutOfRange {
        /// Declared data type of the target node
        declared: DataType,
        /// Supplied value
        value: f64,
    },
    /// Node does not exist in the address space
    #[error("node not found: {0}")]
    NodeNotFound(NodeIdentity),
    /// Server rejected the request
    #[error("request rejected: {0}")]
    Rejected(String),
}

/// Failure to create or remove a node to topic link.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LinkError {
    /// Node already has a live link
    #[error("node {0} is already linked")]
    AlreadyLinked(NodeIdentity),
    /// Node has no live link
    #[error("node {0} is not linked")]
    NotLinked(NodeIdentity),
    /// Source session is not connected
    #[error("source session not connected")]
    NotConnected,
    /// Protocol-level subscription request failed
    #[error("subscription error: {0}")]
    Subscription(#[from] ProtocolError),
}

/// Failure to hand a message to the broker client.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishError {
    /// Broker session is not connected
    #[error("broker not connected")]
    NotConnected,
    /// Topic is not a valid publish topic
    #[error("invalid topic: {0}")]
    InvalidTopic(String),
    /// Client queue or channel rejected the request
    #[error("publish rejected: {0}")]
    Rejected(String),
}

/// The broker client gave up reconnecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("gave up reconnecting after {attempts} attempts")]
pub struct ReconnectExhausted {
    /// Number of consecutive failed attempts
    pub attempts: u32,
}

/// Any failure a client can record as its most recent error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    /// Connection failure
    #[error(transparent)]
    Connection(#[from] ConnectionError),
    /// Protocol failure
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
    /// Link failure
    #[error(transparent)]
    Link(#[from] LinkError),
    /// Publish failure
    #[error(transparent)]
    Publish(#[from] PublishError),
    /// Reconnect attempts exhausted
    #[error(transparent)]
    ReconnectExhausted(#[from] ReconnectExhausted),
}
