//! `rumqttc` implementation of the broker session.

use rumqttc::{Client, Connection, Event, MqttOptions, Packet, QoS, RecvTimeoutError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uamqtt_core::{
    BrokerConnector, BrokerEvent, BrokerOptions, BrokerPublisher, BrokerSession, ConnectionError,
    PublishError, QualityOfService,
};

/// Capacity of the client request channel.
const REQUEST_CAPACITY: usize = 100;

/// Upper bound on one connect or reconnect handshake.
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);

fn to_qos(qos: QualityOfService) -> QoS {
    match qos {
        QualityOfService::AtMostOnce => QoS::AtMostOnce,
        QualityOfService::AtLeastOnce => QoS::AtLeastOnce,
        QualityOfService::ExactlyOnce => QoS::ExactlyOnce,
    }
}

fn map_connection_error(error: rumqttc::ConnectionError) -> ConnectionError {
    match error {
        rumqttc::ConnectionError::ConnectionRefused(code) => {
            ConnectionError::Refused(format!("{code:?}"))
        }
        rumqttc::ConnectionError::NotConnAck(packet) => {
            ConnectionError::Handshake(format!("expected ConnAck, got {packet:?}"))
        }
        rumqttc::ConnectionError::RequestsDone => {
            ConnectionError::Handshake("client handle dropped".to_string())
        }
        rumqttc::ConnectionError::NetworkTimeout => {
            ConnectionError::Unreachable("network timeout".to_string())
        }
        other => ConnectionError::Io(other.to_string()),
    }
}

/// Builds [`MqttSession`]s.
#[derive(Debug, Clone, Default)]
pub struct MqttConnector;

impl BrokerConnector for MqttConnector {
    fn create(&self, options: &BrokerOptions) -> Box<dyn BrokerSession> {
        Box::new(MqttSession::new(options.clone()))
    }
}

/// One MQTT session.
///
/// The client and its event loop are built on the first `connect`, on the
/// thread that will drive them.
pub struct MqttSession {
    options: BrokerOptions,
    client: Option<Client>,
    connection: Option<Connection>,
}

impl MqttSession {
    /// Create an unconnected session.
    #[must_use]
    pub fn new(options: BrokerOptions) -> Self {
        Self {
            options,
            client: None,
            connection: None,
        }
    }

    fn mqtt_options(&self) -> MqttOptions {
        let mut mqtt_options = MqttOptions::new(
            self.options.client_id.clone(),
            self.options.host.clone(),
            self.options.port,
        );
        mqtt_options.set_keep_alive(self.options.keep_alive);
        mqtt_options.set_clean_session(true);
        mqtt_options
    }

    /// Drive the event loop until the broker answers the handshake.
    fn await_conn_ack(&mut self) -> Result<(), ConnectionError> {
        let connection = self
            .connection
            .as_mut()
            .ok_or_else(|| ConnectionError::Io("session not initialised".to_string()))?;
        let deadline = Instant::now() + HANDSHAKE_TIMEOUT;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ConnectionError::Unreachable(format!(
                    "no ConnAck within {}s",
                    HANDSHAKE_TIMEOUT.as_secs()
                )));
            }
            match connection.recv_timeout(remaining) {
                Ok(Ok(Event::Incoming(Packet::ConnAck(ack)))) => {
                    tracing::debug!(code = ?ack.code, "ConnAck received");
                    return Ok(());
                }
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(map_connection_error(e)),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(ConnectionError::Io("event loop closed".to_string()));
                }
            }
        }
    }
}

impl BrokerSession for MqttSession {
    fn connect(&mut self) -> Result<(), ConnectionError> {
        if self.options.host.is_empty() {
            return Err(ConnectionError::InvalidAddress("empty broker host".to_string()));
        }
        if self.connection.is_none() {
            let (client, connection) = Client::new(self.mqtt_options(), REQUEST_CAPACITY);
            self.client = Some(client);
            self.connection = Some(connection);
        }
        self.await_conn_ack()
    }

    fn reconnect(&mut self) -> Result<(), ConnectionError> {
        // The event loop redials on the next poll after a failure.
        if self.connection.is_none() {
            return self.connect();
        }
        self.await_conn_ack()
    }

    fn disconnect(&mut self) {
        if let Some(client) = self.client.take() {
            if let Err(e) = client.try_disconnect() {
                tracing::debug!(error = %e, "Disconnect request not sent");
            }
        }
        if let Some(mut connection) = self.connection.take() {
            // Flush the disconnect request; errors here only mean the socket is already gone.
            let _ = connection.recv_timeout(Duration::from_millis(100));
        }
    }

    fn poll(&mut self, timeout: Duration) -> Option<BrokerEvent> {
        let Some(connection) = self.connection.as_mut() else {
            std::thread::sleep(timeout);
            return Some(BrokerEvent::Disconnected("session not initialised".to_string()));
        };

        match connection.recv_timeout(timeout) {
            Ok(Ok(Event::Incoming(Packet::ConnAck(_)))) => Some(BrokerEvent::Connected),
            Ok(Ok(Event::Incoming(Packet::Disconnect))) => Some(BrokerEvent::Disconnected(
                "broker sent disconnect".to_string(),
            )),
            Ok(Ok(event)) => {
                tracing::trace!(?event, "MQTT event");
                None
            }
            Ok(Err(rumqttc::ConnectionError::ConnectionRefused(code))) => {
                Some(BrokerEvent::Refused(format!("{code:?}")))
            }
            Ok(Err(e)) => Some(BrokerEvent::Disconnected(e.to_string())),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                Some(BrokerEvent::Disconnected("event loop closed".to_string()))
            }
        }
    }

    fn publisher(&self) -> Arc<dyn BrokerPublisher> {
        Arc::new(MqttPublisher {
            client: self.client.clone(),
        })
    }
}

/// Non-blocking publisher on a cloned client handle.
#[derive(Clone)]
pub struct MqttPublisher {
    client: Option<Client>,
}

impl BrokerPublisher for MqttPublisher {
    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QualityOfService,
        retain: bool,
    ) -> Result<(), PublishError> {
        let client = self.client.as_ref().ok_or(PublishError::NotConnected)?;
        if topic.is_empty() || topic.contains(|c| c == '+' || c == '#') {
            return Err(PublishError::InvalidTopic(topic.to_string()));
        }

        client
            .try_publish(topic, to_qos(qos), retain, payload.to_vec())
            .map_err(|e| PublishError::Rejected(e.to_string()))
    }
}
