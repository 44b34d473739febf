//! Source (OPC UA) connection manager.
//!
//! One worker thread owns the session for the duration of an activation
//! cycle. Operator calls (discovery, links, writes) run synchronously on the
//! caller's thread against the shared session handle. Links are serialised
//! with session teardown, so a session never ends with a live link left in
//! the registry.

use crate::config::SourceConfig;
use crate::forwarder::{ChangeForwarder, TopicPublisher};
use crate::walker::{CancelToken, DiscoveredNode, DiscoveryError, Walk};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::mpsc;
use uamqtt_core::{
    ClientStatus, ConnectionError, DataChangeHandler, EndpointDescriptor, Error, LifecycleState,
    LinkError, LinkHandle, NodeClass, NodeDetails, NodeIdentity, NodeSnapshot, ProtocolError,
    RunState, SourceSession, SourceTransport, SubscriptionId, SubscriptionLink,
    SubscriptionRegistry, TopicScheme, TypedValue, Variant,
};

/// Initial value of a variable created without an explicit one.
pub const NEW_VARIABLE_INITIAL: &str = "new variable";

/// Capacity of the channel returned by [`SourceClient::spawn_walk`].
const DISCOVERY_CHANNEL_CAPACITY: usize = 64;

/// Nodes streamed by [`SourceClient::spawn_walk`].
pub type DiscoveryStream = mpsc::Receiver<Result<DiscoveredNode, DiscoveryError>>;

/// Discovery starting points fetched on connect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// The `Root` folder
    Root,
    /// The `Objects` folder
    Objects,
}

/// Kind of node created by [`SourceClient::add_child_node`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NewNodeKind {
    /// Folder object
    Folder,
    /// Variable initialised with [`NEW_VARIABLE_INITIAL`]
    Variable,
}

#[derive(Debug, Clone)]
struct Anchors {
    root: NodeSnapshot,
    objects: NodeSnapshot,
}

struct Shared {
    lifecycle: LifecycleState,
    config: RwLock<SourceConfig>,
    registry: Arc<SubscriptionRegistry>,
    session: RwLock<Option<Arc<dyn SourceSession>>>,
    anchors: RwLock<Option<Anchors>>,
    endpoints: RwLock<Vec<EndpointDescriptor>>,
    /// Held by link mutations and by session teardown.
    link_guard: Mutex<()>,
}

/// Owns one source session and the links created on it.
pub struct SourceClient {
    transport: Arc<dyn SourceTransport>,
    shared: Arc<Shared>,
    forwarder: Arc<ChangeForwarder>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SourceClient {
    /// Create an idle client whose links publish through `publisher`.
    #[must_use]
    pub fn new(
        transport: Arc<dyn SourceTransport>,
        config: SourceConfig,
        publisher: Arc<dyn TopicPublisher>,
    ) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new());
        let forwarder = Arc::new(ChangeForwarder::new(Arc::clone(&registry), publisher));
        Self {
            transport,
            shared: Arc::new(Shared {
                lifecycle: LifecycleState::new("source"),
                config: RwLock::new(config),
                registry,
                session: RwLock::new(None),
                anchors: RwLock::new(None),
                endpoints: RwLock::new(Vec::new()),
                link_guard: Mutex::new(()),
            }),
            forwarder,
            worker: Mutex::new(None),
        }
    }

    /// Copy of the current configuration.
    #[must_use]
    pub fn config(&self) -> SourceConfig {
        self.shared.config.read().clone()
    }

    /// Set the URL endpoint discovery starts from.
    pub fn set_initial_endpoint(&self, url: impl Into<String>) {
        self.shared.config.write().initial_endpoint = url.into();
    }

    /// Query the endpoints offered at `url` without opening a session.
    ///
    /// The result is cached and available from [`endpoints`](Self::endpoints).
    ///
    /// # Errors
    ///
    /// `ConnectionError::SessionActive` while a session is running, otherwise
    /// whatever the transport reports. A failure clears the cache and sets
    /// the status to `Error`.
    pub fn discover_endpoints(&self, url: &str) -> Result<Vec<EndpointDescriptor>, ConnectionError> {
        let lifecycle = &self.shared.lifecycle;
        if !lifecycle.run_state().can_start() {
            return Err(ConnectionError::SessionActive);
        }

        self.shared.endpoints.write().clear();
        tracing::info!(url, "Discovering endpoints");
        match self.transport.discover_endpoints(url) {
            Ok(endpoints) => {
                tracing::info!(url, count = endpoints.len(), "Endpoints discovered");
                *self.shared.endpoints.write() = endpoints.clone();
                Ok(endpoints)
            }
            Err(e) => {
                lifecycle.record_failure(e.clone());
                lifecycle.set_status(ClientStatus::Error);
                Err(e)
            }
        }
    }

    /// Result of the last successful discovery.
    #[must_use]
    pub fn endpoints(&self) -> Vec<EndpointDescriptor> {
        self.shared.endpoints.read().clone()
    }

    /// Connect to `endpoint` on a new worker thread.
    ///
    /// Returns once the worker is started; use
    /// [`wait_for_connection`](Self::wait_for_connection) for the outcome.
    /// A failed handshake sets the status to `Error` and ends the cycle; it is
    /// not retried.
    ///
    /// # Errors
    ///
    /// `ConnectionError::SessionActive` if a worker is already running, or
    /// `ConnectionError::Io` if the worker thread cannot be spawned.
    pub fn connect(&self, endpoint: &EndpointDescriptor) -> Result<(), ConnectionError> {
        let lifecycle = &self.shared.lifecycle;
        if !lifecycle.begin() {
            return Err(ConnectionError::SessionActive);
        }
        self.join_worker();

        lifecycle.clear_failure();
        lifecycle.set_status(ClientStatus::Disconnected);

        let shared = Arc::clone(&self.shared);
        let transport = Arc::clone(&self.transport);
        let endpoint = endpoint.clone();
        let spawned = std::thread::Builder::new()
            .name("uamqtt-source".to_string())
            .spawn(move || run_worker(&shared, transport.as_ref(), &endpoint));

        match spawned {
            Ok(handle) => {
                *self.worker.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                let error = ConnectionError::Io(e.to_string());
                lifecycle.record_failure(error.clone());
                lifecycle.set_status(ClientStatus::Error);
                lifecycle.finish();
                Err(error)
            }
        }
    }

    /// Ask the worker to end the session. Returns `false` if it was not running.
    pub fn request_stop(&self) -> bool {
        self.shared.lifecycle.request_stop()
    }

    /// End the session and wait until its resources are released.
    pub fn shutdown(&self) {
        self.request_stop();
        let progress = self.shared.config.read().shutdown_progress_interval;
        self.shared.lifecycle.wait_finished(progress);
        self.join_worker();
    }

    fn join_worker(&self) {
        if let Some(handle) = self.worker.lock().take() {
            if handle.join().is_err() {
                tracing::error!("Source worker panicked");
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

    /// Wait until the status leaves `Disconnected`, the worker stops, or
    /// `timeout` elapses. Returns the status observed last.
    pub fn wait_for_connection(&self, timeout: Duration) -> ClientStatus {
        let (_, status) = self.shared.lifecycle.wait_for(timeout, |run, status| {
            status != ClientStatus::Disconnected || run != RunState::Running
        });
        status
    }

    /// Snapshot of the `Root` folder taken on connect.
    #[must_use]
    pub fn root_node(&self) -> Option<NodeSnapshot> {
        self.shared.anchors.read().as_ref().map(|a| a.root.clone())
    }

    /// Snapshot of the `Objects` folder taken on connect.
    #[must_use]
    pub fn objects_node(&self) -> Option<NodeSnapshot> {
        self.shared.anchors.read().as_ref().map(|a| a.objects.clone())
    }

    /// Registry of live links.
    #[must_use]
    pub fn registry(&self) -> Arc<SubscriptionRegistry> {
        Arc::clone(&self.shared.registry)
    }

    /// Forwarder invoked for every data change.
    #[must_use]
    pub fn forwarder(&self) -> &Arc<ChangeForwarder> {
        &self.forwarder
    }

    /// The node's link, if any.
    #[must_use]
    pub fn link(&self, node: &NodeIdentity) -> Option<SubscriptionLink> {
        self.shared.registry.get(node)
    }

    /// All live links.
    #[must_use]
    pub fn links(&self) -> Vec<SubscriptionLink> {
        self.shared.registry.links()
    }

    /// Whether the node has a live link.
    #[must_use]
    pub fn is_linked(&self, node: &NodeIdentity) -> bool {
        self.shared.registry.contains(node)
    }

    fn connected_session(&self) -> Option<Arc<dyn SourceSession>> {
        if self.shared.lifecycle.status() != ClientStatus::Connected {
            return None;
        }
        self.shared.session.read().clone()
    }

    /// Walk from `start` with the configured depth bound.
    ///
    /// # Errors
    ///
    /// `DiscoveryError::NotConnected` without a connected session.
    pub fn walk(&self, start: &NodeIdentity) -> Result<Walk, DiscoveryError> {
        let depth = self.shared.config.read().max_walk_depth;
        self.walk_with(start, depth, CancelToken::new())
    }

    /// Walk from one of the anchors fetched on connect.
    ///
    /// # Errors
    ///
    /// `DiscoveryError::NotConnected` without a connected session.
    pub fn walk_from(&self, anchor: Anchor) -> Result<Walk, DiscoveryError> {
        let start = {
            let anchors = self.shared.anchors.read();
            let anchors = anchors.as_ref().ok_or(DiscoveryError::NotConnected)?;
            match anchor {
                Anchor::Root => anchors.root.identity.clone(),
                Anchor::Objects => anchors.objects.identity.clone(),
            }
        };
        self.walk(&start)
    }

    /// Walk from `start`, aborting when `cancel` fires or the session ends.
    ///
    /// # Errors
    ///
    /// `DiscoveryError::NotConnected` without a connected session.
    pub fn walk_with(
        &self,
        start: &NodeIdentity,
        max_depth: usize,
        cancel: CancelToken,
    ) -> Result<Walk, DiscoveryError> {
        let session = self.connected_session().ok_or(DiscoveryError::NotConnected)?;
        let shared = Arc::clone(&self.shared);
        tracing::debug!(start = %start, max_depth, "Starting discovery walk");
        Ok(Walk::new(session, start.clone(), max_depth)
            .with_stop(move || cancel.is_cancelled() || !shared.lifecycle.is_running()))
    }

    /// Run a walk on its own thread, streaming nodes through a channel.
    ///
    /// The walk stops early if the receiver is dropped.
    ///
    /// # Errors
    ///
    /// `DiscoveryError::NotConnected` without a connected session,
    /// `DiscoveryError::Spawn` if the thread cannot be started.
    pub fn spawn_walk(
        &self,
        start: &NodeIdentity,
        max_depth: usize,
        cancel: CancelToken,
    ) -> Result<(DiscoveryStream, JoinHandle<()>), DiscoveryError> {
        let walk = self.walk_with(start, max_depth, cancel)?;
        let (tx, rx) = mpsc::channel(DISCOVERY_CHANNEL_CAPACITY);
        let handle = std::thread::Builder::new()
            .name("uamqtt-discovery".to_string())
            .spawn(move || {
                for item in walk {
                    if tx.blocking_send(item).is_err() {
                        tracing::debug!("Discovery receiver dropped, stopping walk");
                        return;
                    }
                }
            })
            .map_err(|e| DiscoveryError::Spawn(e.to_string()))?;
        Ok((rx, handle))
    }

    /// Subscribe to `node` and publish its changes on its derived topic.
    ///
    /// # Errors
    ///
    /// `LinkError::NotConnected` without a connected session,
    /// `LinkError::AlreadyLinked` if the node already has a link, and
    /// `LinkError::Subscription` if the server rejects the subscription. A
    /// failed call leaves no subscription behind.
    pub fn create_link(
        &self,
        node: &NodeIdentity,
        publish_interval: Duration,
    ) -> Result<SubscriptionLink, LinkError> {
        let _guard = self.shared.link_guard.lock();
        let session = self.connected_session().ok_or(LinkError::NotConnected)?;
        if self.shared.registry.contains(node) {
            return Err(LinkError::AlreadyLinked(node.clone()));
        }

        let snapshot = session.read_node(node)?;
        let topic = TopicScheme::new(self.forwarder.publisher().base_topic())
            .link_topic(node.namespace, &snapshot.browse_name);

        self.shared.registry.reserve(node, topic.clone())?;
        let handler: Arc<dyn DataChangeHandler> = self.forwarder.clone();
        let subscription = match session.create_subscription(publish_interval, handler) {
            Ok(subscription) => subscription,
            Err(e) => {
                self.shared.registry.release(node);
                return Err(e.into());
            }
        };
        let item = match session.subscribe_data_change(subscription, node) {
            Ok(item) => item,
            Err(e) => {
                self.shared.registry.release(node);
                release_subscription(session.as_ref(), subscription);
                return Err(e.into());
            }
        };

        let link = SubscriptionLink {
            node: node.clone(),
            handle: LinkHandle { subscription, item },
            topic,
            publish_interval,
        };
        if let Err(e) = self.shared.registry.insert(link.clone()) {
            self.shared.registry.release(node);
            if let Err(unsubscribe) = session.unsubscribe(subscription, item) {
                tracing::warn!(node = %node, error = %unsubscribe, "Rollback unsubscribe failed");
            }
            release_subscription(session.as_ref(), subscription);
            return Err(e);
        }

        tracing::info!(node = %node, topic = %link.topic, item = %item, "Linked node");
        Ok(link)
    }

    /// Unsubscribe `node` and forget its link.
    ///
    /// # Errors
    ///
    /// `LinkError::NotLinked` if the node has no link,
    /// `LinkError::NotConnected` without a connected session, and
    /// `LinkError::Subscription` if the server rejects the unsubscribe (the
    /// link is kept in that case).
    pub fn remove_link(&self, node: &NodeIdentity) -> Result<(), LinkError> {
        let _guard = self.shared.link_guard.lock();
        let handle = self
            .shared
            .registry
            .handle_of(node)
            .ok_or_else(|| LinkError::NotLinked(node.clone()))?;
        let session = self.connected_session().ok_or(LinkError::NotConnected)?;

        session.unsubscribe(handle.subscription, handle.item)?;
        release_subscription(session.as_ref(), handle.subscription);
        self.shared.registry.remove(node)?;

        tracing::info!(node = %node, "Unlinked node");
        Ok(())
    }

    /// Write an operator value to `node`.
    ///
    /// # Errors
    ///
    /// `ProtocolError::NotConnected` without a connected session,
    /// `ProtocolError::TypeMismatch` / `OutOfRange` if the value does not fit
    /// the node's declared type, or the server's rejection.
    pub fn write_value(&self, node: &NodeIdentity, value: &TypedValue) -> Result<(), ProtocolError> {
        let session = self.connected_session().ok_or(ProtocolError::NotConnected)?;
        let snapshot = session.read_node(node)?;
        let variant = snapshot.data_type.coerce(value)?;
        session.write_value(node, &snapshot.data_type, &variant)?;
        tracing::info!(node = %node, value = %variant, "Wrote value");
        Ok(())
    }

    /// Create a folder or variable below `parent`, in the parent's namespace.
    ///
    /// # Errors
    ///
    /// `ProtocolError::NotConnected` without a connected session, or the
    /// server's rejection.
    pub fn add_child_node(
        &self,
        parent: &NodeIdentity,
        kind: NewNodeKind,
        name: &str,
    ) -> Result<NodeIdentity, ProtocolError> {
        match kind {
            NewNodeKind::Folder => {
                let session = self.connected_session().ok_or(ProtocolError::NotConnected)?;
                let created = session.add_folder(parent, parent.namespace, name)?;
                tracing::info!(parent = %parent, node = %created, name, "Added folder");
                Ok(created)
            }
            NewNodeKind::Variable => self.add_variable_with(
                parent,
                name,
                &Variant::String(NEW_VARIABLE_INITIAL.to_string()),
            ),
        }
    }

    /// Create a variable below `parent` holding `initial`.
    ///
    /// # Errors
    ///
    /// `ProtocolError::NotConnected` without a connected session, or the
    /// server's rejection.
    pub fn add_variable_with(
        &self,
        parent: &NodeIdentity,
        name: &str,
        initial: &Variant,
    ) -> Result<NodeIdentity, ProtocolError> {
        let session = self.connected_session().ok_or(ProtocolError::NotConnected)?;
        let created = session.add_variable(parent, parent.namespace, name, initial)?;
        tracing::info!(parent = %parent, node = %created, name, "Added variable");
        Ok(created)
    }

    /// Read a fresh snapshot of `node`.
    ///
    /// # Errors
    ///
    /// `ProtocolError::NotConnected` without a connected session, or the read failure.
    pub fn refresh(&self, node: &NodeIdentity) -> Result<NodeSnapshot, ProtocolError> {
        let session = self.connected_session().ok_or(ProtocolError::NotConnected)?;
        session.read_node(node)
    }

    /// Snapshot of `node` with child counts.
    ///
    /// # Errors
    ///
    /// `ProtocolError::NotConnected` without a connected session, or the
    /// read or browse failure.
    pub fn node_details(&self, node: &NodeIdentity) -> Result<NodeDetails, ProtocolError> {
        let session = self.connected_session().ok_or(ProtocolError::NotConnected)?;
        let snapshot = session.read_node(node)?;
        let children = session.children(node)?;
        let variables = children
            .iter()
            .filter(|child| child.node_class == NodeClass::Variable)
            .count();
        Ok(NodeDetails {
            snapshot,
            children: children.len(),
            variables,
        })
    }
}

impl Drop for SourceClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn release_subscription(session: &dyn SourceSession, subscription: SubscriptionId) {
    if let Err(e) = session.delete_subscription(subscription) {
        tracing::warn!(subscription = subscription.0, error = %e, "Failed to delete subscription");
    }
}

fn fetch_anchors(session: &dyn SourceSession) -> Result<Anchors, ProtocolError> {
    Ok(Anchors {
        root: session.read_node(&session.root_node())?,
        objects: session.read_node(&session.objects_node())?,
    })
}

fn run_worker(shared: &Shared, transport: &dyn SourceTransport, endpoint: &EndpointDescriptor) {
    let lifecycle = &shared.lifecycle;
    tracing::info!(endpoint = %endpoint.label(), "Connecting to OPC UA server");

    let session = match transport.connect(endpoint) {
        Ok(session) => session,
        Err(e) => {
            lifecycle.record_failure(e);
            lifecycle.set_status(ClientStatus::Error);
            lifecycle.request_stop();
            lifecycle.finish();
            return;
        }
    };

    match fetch_anchors(session.as_ref()) {
        Ok(anchors) => *shared.anchors.write() = Some(anchors),
        Err(e) => {
            lifecycle.record_failure(e);
            session.disconnect();
            lifecycle.set_status(ClientStatus::Error);
            lifecycle.request_stop();
            lifecycle.finish();
            return;
        }
    }

    *shared.session.write() = Some(Arc::clone(&session));
    lifecycle.set_status(ClientStatus::Connected);
    tracing::info!(endpoint = %endpoint.label(), "Connected to OPC UA server");

    let poll_interval = shared.config.read().poll_interval;
    while lifecycle.idle(poll_interval) {
        if let Err(e) = session.check_connection() {
            tracing::error!(error = %e, "OPC UA session lost");
            lifecycle.record_failure(e);
            lifecycle.set_status(ClientStatus::Error);
            lifecycle.request_stop();
        }
    }

    teardown(shared, session.as_ref());
}

fn teardown(shared: &Shared, session: &dyn SourceSession) {
    let lifecycle = &shared.lifecycle;
    let _guard = shared.link_guard.lock();

    shared.session.write().take();
    shared.anchors.write().take();

    let links = shared.registry.clear();
    for link in &links {
        if let Err(e) = session.unsubscribe(link.handle.subscription, link.handle.item) {
            tracing::warn!(node = %link.node, error = %e, "Failed to unsubscribe on teardown");
        }
        release_subscription(session, link.handle.subscription);
    }
    if !links.is_empty() {
        tracing::info!(count = links.len(), "Released links");
    }

    session.disconnect();
    if lifecycle.status() != ClientStatus::Error {
        lifecycle.set_status(ClientStatus::Disconnected);
    }
    tracing::info!("OPC UA session closed");
    lifecycle.finish();
}
