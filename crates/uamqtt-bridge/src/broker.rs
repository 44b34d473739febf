//! Broker connection manager with bounded automatic reconnection.

use crate::config::BrokerConfig;
use crate::forwarder::TopicPublisher;
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use uamqtt_core::{
    BrokerConnector, BrokerEvent, BrokerOptions, BrokerPublisher, BrokerSession, ClientStatus,
    ConnectionError, Error, LifecycleState, QualityOfService, ReconnectExhausted, RunState,
};

struct ActiveSession {
    publisher: Arc<dyn BrokerPublisher>,
    qos: QualityOfService,
    retain: bool,
}

struct Shared {
    lifecycle: LifecycleState,
    config: RwLock<BrokerConfig>,
    base_topic: RwLock<String>,
    active: RwLock<Option<ActiveSession>>,
    attempts: AtomicU32,
    published: AtomicU64,
    dropped: AtomicU64,
}

impl Shared {
    fn publish(&self, topic: &str, payload: &[u8]) {
        if self.lifecycle.status() != ClientStatus::Connected {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(topic, "Broker not connected, dropping message");
            return;
        }

        let active = self.active.read();
        let Some(session) = active.as_ref() else {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(topic, "No broker session, dropping message");
            return;
        };

        match session
            .publisher
            .publish(topic, payload, session.qos, session.retain)
        {
            Ok(()) => {
                self.published.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(topic, payload_len = payload.len(), "Published value");
            }
            Err(e) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(topic, error = %e, "Publish failed");
            }
        }
    }

    fn on_connected(&self, session: &dyn BrokerSession, qos: QualityOfService, retain: bool) {
        self.attempts.store(0, Ordering::Release);
        *self.active.write() = Some(ActiveSession {
            publisher: session.publisher(),
            qos,
            retain,
        });
        self.lifecycle.set_status(ClientStatus::Connected);
    }

    fn on_lost(&self, status: ClientStatus) {
        self.active.write().take();
        self.lifecycle.set_status(status);
    }
}

struct WorkerSettings {
    host: String,
    port: u16,
    qos: QualityOfService,
    retain: bool,
    max_attempts: u32,
    reconnect_delay: Duration,
    poll_interval: Duration,
}

/// Owns one broker session and keeps it connected.
///
/// The session is driven by a dedicated worker thread. Publishing is
/// fire-and-forget and silently dropped while the client is not connected;
/// there is no local queue.
pub struct BrokerClient {
    connector: Arc<dyn BrokerConnector>,
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl BrokerClient {
    /// Create an idle client.
    #[must_use]
    pub fn new(connector: Arc<dyn BrokerConnector>, config: BrokerConfig) -> Self {
        let base_topic = config.base_topic.clone();
        Self {
            connector,
            shared: Arc::new(Shared {
                lifecycle: LifecycleState::new("broker"),
                config: RwLock::new(config),
                base_topic: RwLock::new(base_topic),
                active: RwLock::new(None),
                attempts: AtomicU32::new(0),
                published: AtomicU64::new(0),
                dropped: AtomicU64::new(0),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Copy of the current configuration.
    #[must_use]
    pub fn config(&self) -> BrokerConfig {
        self.shared.config.read().clone()
    }

    /// Set the broker host; effective on the next `connect`.
    pub fn set_host(&self, host: impl Into<String>) {
        self.shared.config.write().host = host.into();
    }

    /// Set the broker port; effective on the next `connect`.
    pub fn set_port(&self, port: u16) {
        self.shared.config.write().port = port;
    }

    /// Set the base topic; effective on the next `connect`.
    pub fn set_topic(&self, base_topic: impl Into<String>) {
        self.shared.config.write().base_topic = base_topic.into();
    }

    /// Set whether published values are retained; effective on the next `connect`.
    pub fn set_retain(&self, retain: bool) {
        self.shared.config.write().retain = retain;
    }

    /// Connect to `host:port` and keep the session alive.
    ///
    /// Returns `false` if a worker is already running.
    pub fn connect(&self, host: impl Into<String>, port: u16) -> bool {
        if !self.shared.lifecycle.run_state().can_start() {
            return false;
        }
        {
            let mut config = self.shared.config.write();
            config.host = host.into();
            config.port = port;
        }
        self.start()
    }

    /// Start the worker with the current configuration.
    ///
    /// No-op returning `false` unless the client is `NotStarted` or `Finished`.
    pub fn start(&self) -> bool {
        let lifecycle = &self.shared.lifecycle;
        if !lifecycle.begin() {
            tracing::debug!("Broker client already running");
            return false;
        }
        self.join_worker();

        lifecycle.clear_failure();
        self.shared.attempts.store(0, Ordering::Release);
        lifecycle.set_status(ClientStatus::Disconnected);

        let config = self.shared.config.read().clone();
        *self.shared.base_topic.write() = config.base_topic.clone();

        let options = BrokerOptions {
            host: config.host.clone(),
            port: config.port,
            client_id: config.client_id.clone(),
            keep_alive: config.keep_alive,
        };
        let session = self.connector.create(&options);
        let settings = WorkerSettings {
            host: config.host,
            port: config.port,
            qos: config.qos,
            retain: config.retain,
            max_attempts: config.max_reconnect_attempts,
            reconnect_delay: config.reconnect_delay,
            poll_interval: config.poll_interval,
        };

        let shared = Arc::clone(&self.shared);
        let spawned = std::thread::Builder::new()
            .name("uamqtt-broker".to_string())
            .spawn(move || run_worker(&shared, session, &settings));

        match spawned {
            Ok(handle) => {
                *self.worker.lock() = Some(handle);
                true
            }
            Err(e) => {
                lifecycle.record_failure(ConnectionError::Io(e.to_string()));
                lifecycle.set_status(ClientStatus::Error);
                lifecycle.finish();
                false
            }
        }
    }

    /// Ask the worker to stop. Returns `false` if it was not running.
    pub fn request_stop(&self) -> bool {
        self.shared.lifecycle.request_stop()
    }

    /// Stop the worker and wait until it released the session.
    pub fn shutdown(&self) {
        self.request_stop();
        let progress = self.shared.config.read().shutdown_progress_interval;
        self.shared.lifecycle.wait_finished(progress);
        self.join_worker();
    }

    fn join_worker(&self) {
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                tracing::error!("Broker worker panicked");
            }
        }
    }

    /// Current connectivity.
    #[must_use]
    pub fn status(&self) -> ClientStatus {
        self.shared.lifecycle.status()
    }

    /// Current worker state.
    #[must_use]
    pub fn run_state(&self) -> RunState {
        self.shared.lifecycle.run_state()
    }

    /// Most recent session failure.
    #[must_use]
    pub fn last_error(&self) -> Option<Error> {
        self.shared.lifecycle.last_error()
    }

    /// Consecutive failed reconnect attempts so far.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.attempts.load(Ordering::Acquire)
    }

    /// Messages handed to the session.
    #[must_use]
    pub fn published(&self) -> u64 {
        self.shared.published.load(Ordering::Relaxed)
    }

    /// Messages dropped because the client was not connected or the session refused them.
    #[must_use]
    pub fn dropped(&self) -> u64 {
        self.shared.dropped.load(Ordering::Relaxed)
    }

    /// Wait until the status leaves `Disconnected`, the worker stops, or
    /// `timeout` elapses. Returns the status observed last.
    pub fn wait_for_connection(&self, timeout: Duration) -> ClientStatus {
        let (_, status) = self.shared.lifecycle.wait_for(timeout, |run, status| {
            status != ClientStatus::Disconnected || run != RunState::Running
        });
        status
    }

    /// Fire-and-forget publish; dropped silently unless connected.
    pub fn publish(&self, topic: &str, payload: &[u8]) {
        self.shared.publish(topic, payload);
    }

    /// Cheap handle for publishing from other components.
    #[must_use]
    pub fn handle(&self) -> BrokerHandle {
        BrokerHandle {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl Drop for BrokerClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Publishing handle onto a `BrokerClient`.
#[derive(Clone)]
pub struct BrokerHandle {
    shared: Arc<Shared>,
}

impl BrokerHandle {
    /// Current connectivity of the owning client.
    #[must_use]
    pub fn status(&self) -> ClientStatus {
        self.shared.lifecycle.status()
    }
}

impl TopicPublisher for BrokerHandle {
    fn base_topic(&self) -> String {
        self.shared.base_topic.read().clone()
    }

    fn publish(&self, topic: &str, payload: &[u8]) {
        self.shared.publish(topic, payload);
    }
}

fn run_worker(shared: &Shared, mut session: Box<dyn BrokerSession>, settings: &WorkerSettings) {
    let lifecycle = &shared.lifecycle;
    tracing::info!(host = %settings.host, port = settings.port, "Connecting to MQTT broker");

    match session.connect() {
        Ok(()) => {
            tracing::info!(host = %settings.host, port = settings.port, "Connected to MQTT broker");
            shared.on_connected(session.as_ref(), settings.qos, settings.retain);
        }
        Err(e) if e.is_transient() => {
            tracing::warn!(error = %e, "Initial broker connect failed, retrying");
            lifecycle.record_failure(e);
            shared.on_lost(ClientStatus::Disconnected);
        }
        Err(e) => {
            lifecycle.record_failure(e);
            shared.on_lost(ClientStatus::Error);
        }
    }

    while lifecycle.is_running() {
        match lifecycle.status() {
            ClientStatus::Error => {
                tracing::info!("Broker session failed, stopping worker");
                break;
            }
            ClientStatus::Disconnected => {
                let attempts = shared.attempts.load(Ordering::Acquire);
                if attempts >= settings.max_attempts {
                    lifecycle.record_failure(ReconnectExhausted { attempts });
                    shared.on_lost(ClientStatus::Disconnected);
                    break;
                }
                shared.attempts.store(attempts + 1, Ordering::Release);

                match session.reconnect() {
                    Ok(()) => {
                        tracing::info!(attempt = attempts + 1, "Reconnected to MQTT broker");
                        shared.on_connected(session.as_ref(), settings.qos, settings.retain);
                    }
                    Err(e) if e.is_transient() => {
                        tracing::debug!(attempt = attempts + 1, error = %e, "Reconnect failed");
                        lifecycle.record_failure(e);
                        lifecycle.idle(settings.reconnect_delay);
                        continue;
                    }
                    Err(e) => {
                        lifecycle.record_failure(e);
                        shared.on_lost(ClientStatus::Error);
                        continue;
                    }
                }
            }
            ClientStatus::Connected => {}
        }

        match session.poll(settings.poll_interval) {
            Some(BrokerEvent::Connected) => {
                if lifecycle.status() != ClientStatus::Connected {
                    shared.on_connected(session.as_ref(), settings.qos, settings.retain);
                }
            }
            Some(BrokerEvent::Refused(reason)) => {
                lifecycle.record_failure(ConnectionError::Refused(reason));
                shared.on_lost(ClientStatus::Error);
            }
            Some(BrokerEvent::Disconnected(reason)) => {
                tracing::warn!(reason = %reason, "Broker connection lost");
                lifecycle.record_failure(ConnectionError::Io(reason));
                shared.on_lost(ClientStatus::Disconnected);
            }
            None => {}
        }
    }

    shared.active.write().take();
    session.disconnect();
    if lifecycle.status() != ClientStatus::Error {
        lifecycle.set_status(ClientStatus::Disconnected);
    }
    tracing::info!("Broker worker stopped");
    lifecycle.finish();
}
