//! Capability seam for the broker (MQTT) side.

use crate::error::{ConnectionError, PublishError};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// MQTT delivery guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum QualityOfService {
    /// QoS 0
    AtMostOnce,
    /// QoS 1
    #[default]
    AtLeastOnce,
    /// QoS 2
    ExactlyOnce,
}

impl QualityOfService {
    /// Map the numeric QoS level.
    #[must_use]
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(Self::AtMostOnce),
            1 => Some(Self::AtLeastOnce),
            2 => Some(Self::ExactlyOnce),
            _ => None,
        }
    }

    /// Numeric QoS level.
    #[must_use]
    pub fn level(self) -> u8 {
        match self {
            Self::AtMostOnce => 0,
            Self::AtLeastOnce => 1,
            Self::ExactlyOnce => 2,
        }
    }
}

/// Parameters for one broker session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerOptions {
    /// Broker host
    pub host: String,
    /// Broker port
    pub port: u16,
    /// MQTT client identifier
    pub client_id: String,
    /// Keep-alive interval
    pub keep_alive: Duration,
}

/// Asynchronous notification from the broker session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerEvent {
    /// Broker acknowledged the connection
    Connected,
    /// Broker refused the connection
    Refused(String),
    /// Connection dropped
    Disconnected(String),
}

/// Builds broker sessions.
pub trait BrokerConnector: Send + Sync {
    /// Build an unconnected session. Performs no I/O.
    fn create(&self, options: &BrokerOptions) -> Box<dyn BrokerSession>;
}

/// One broker session, driven by the broker worker thread.
pub trait BrokerSession: Send {
    /// Perform the handshake; returns once the broker acknowledged or refused it.
    ///
    /// # Errors
    ///
    /// `ConnectionError` describing the failure; `is_transient` tells whether
    /// retrying can help.
    fn connect(&mut self) -> Result<(), ConnectionError>;

    /// Re-establish a dropped session.
    ///
    /// # Errors
    ///
    /// `ConnectionError` if the attempt failed.
    fn reconnect(&mut self) -> Result<(), ConnectionError>;

    /// Close the session.
    fn disconnect(&mut self);

    /// Service the network for at most `timeout`, returning a state change
    /// if one happened.
    fn poll(&mut self, timeout: Duration) -> Option<BrokerEvent>;

    /// Handle for publishing from other threads.
    fn publisher(&self) -> Arc<dyn BrokerPublisher>;
}

/// Publishes messages without blocking on network I/O.
pub trait BrokerPublisher: Send + Sync {
    /// Queue a message for delivery.
    ///
    /// # Errors
    ///
    /// `PublishError` if the client cannot accept the message.
    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QualityOfService,
        retain: bool,
    ) -> Result<(), PublishError>;
}
