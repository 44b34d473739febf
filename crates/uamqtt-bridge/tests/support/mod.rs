//! In-memory source and broker fakes shared by the integration tests.

#![allow(dead_code)]

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uamqtt_bridge::{BrokerConfig, SourceConfig, TopicPublisher};
use uamqtt_core::{
    BrokerConnector, BrokerEvent, BrokerOptions, BrokerPublisher, BrokerSession, ConnectionError,
    DataChangeHandler, DataType, EndpointDescriptor, MonitorHandle, NodeClass, NodeIdentity,
    NodeReference, NodeSnapshot, ProtocolError, PublishError, QualityOfService, SecurityLevel,
    SourceSession, SourceTransport, SubscriptionId, Variant,
};

pub const ENDPOINT_URL: &str = "opc.tcp://localhost:4841";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("debug")
        .try_init();
}

pub fn temperature() -> NodeIdentity {
    NodeIdentity::numeric(2, 5001)
}

pub fn pressure() -> NodeIdentity {
    NodeIdentity::numeric(2, 5002)
}

pub fn setpoint() -> NodeIdentity {
    NodeIdentity::numeric(2, 5003)
}

pub fn label() -> NodeIdentity {
    NodeIdentity::string(2, "Line1.Label")
}

pub fn plant() -> NodeIdentity {
    NodeIdentity::numeric(2, 1000)
}

pub fn loop_back() -> NodeIdentity {
    NodeIdentity::numeric(2, 1001)
}

pub fn types_folder() -> NodeIdentity {
    NodeIdentity::numeric(0, 86)
}

pub fn fast_source_config() -> SourceConfig {
    SourceConfig {
        poll_interval: Duration::from_millis(10),
        shutdown_progress_interval: Duration::from_millis(50),
        ..SourceConfig::default()
    }
}

pub fn fast_broker_config() -> BrokerConfig {
    BrokerConfig {
        reconnect_delay: Duration::from_millis(1),
        poll_interval: Duration::from_millis(10),
        shutdown_progress_interval: Duration::from_millis(50),
        ..BrokerConfig::default()
    }
}

/// Poll `condition` until it holds or five seconds pass.
pub fn eventually(condition: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    condition()
}

pub fn endpoints() -> Vec<EndpointDescriptor> {
    (0..=3)
        .map(|level| EndpointDescriptor {
            security_level: SecurityLevel::from_level(level),
            ..EndpointDescriptor::insecure(format!("{ENDPOINT_URL}/"))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Source side
// ---------------------------------------------------------------------------

struct FakeNode {
    snapshot: NodeSnapshot,
    children: Vec<NodeIdentity>,
}

struct FakeSubscription {
    handler: Arc<dyn DataChangeHandler>,
    items: Vec<(MonitorHandle, NodeIdentity)>,
}

/// Scripted address space:
///
/// ```text
/// Root (i=84)
/// ├── Objects (i=85)
/// │   └── Plant (ns=2;i=1000)
/// │       ├── Temperature (ns=2;i=5001, Double)
/// │       ├── Pressure    (ns=2;i=5002, Int32)
/// │       ├── Setpoint    (ns=2;i=5003, Boolean)
/// │       ├── Label       (ns=2;s=Line1.Label, String)
/// │       └── Loop (ns=2;i=1001) ──> Plant   (cycle)
/// └── Types (i=86)
/// ```
pub struct FakeSession {
    nodes: Mutex<HashMap<NodeIdentity, FakeNode>>,
    subscriptions: Mutex<HashMap<u32, FakeSubscription>>,
    next_subscription: AtomicU32,
    next_item: AtomicU32,
    next_node: AtomicU32,
    pub fail_subscribe: AtomicBool,
    pub fail_unsubscribe: AtomicBool,
    /// Deliver the current value as soon as a monitored item is created.
    pub report_initial_value: AtomicBool,
    pub connection_lost: AtomicBool,
    pub writes: Mutex<Vec<(NodeIdentity, DataType, Variant)>>,
    pub unsubscribes: AtomicUsize,
    pub deleted_subscriptions: AtomicUsize,
    pub disconnects: AtomicUsize,
}

impl FakeSession {
    pub fn scripted() -> Self {
        let session = Self {
            nodes: Mutex::new(HashMap::new()),
            subscriptions: Mutex::new(HashMap::new()),
            next_subscription: AtomicU32::new(1),
            next_item: AtomicU32::new(1),
            next_node: AtomicU32::new(9000),
            fail_subscribe: AtomicBool::new(false),
            fail_unsubscribe: AtomicBool::new(false),
            report_initial_value: AtomicBool::new(false),
            connection_lost: AtomicBool::new(false),
            writes: Mutex::new(Vec::new()),
            unsubscribes: AtomicUsize::new(0),
            deleted_subscriptions: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        };

        session.insert(NodeIdentity::root(), "Root", NodeClass::Object, DataType::Unspecified, "");
        session.insert(NodeIdentity::objects(), "Objects", NodeClass::Object, DataType::Unspecified, "");
        session.insert(types_folder(), "Types", NodeClass::Object, DataType::Unspecified, "");
        session.insert(plant(), "Plant", NodeClass::Object, DataType::Unspecified, "");
        session.insert(temperature(), "Temperature", NodeClass::Variable, DataType::Double, "21");
        session.insert(pressure(), "Pressure", NodeClass::Variable, DataType::Int32, "3");
        session.insert(setpoint(), "Setpoint", NodeClass::Variable, DataType::Boolean, "false");
        session.insert(label(), "Label", NodeClass::Variable, DataType::String, "line one");
        session.insert(loop_back(), "Loop", NodeClass::Object, DataType::Unspecified, "");

        session.attach(&NodeIdentity::root(), NodeIdentity::objects());
        session.attach(&NodeIdentity::root(), types_folder());
        session.attach(&NodeIdentity::objects(), plant());
        for child in [temperature(), pressure(), setpoint(), label(), loop_back()] {
            session.attach(&plant(), child);
        }
        session.attach(&loop_back(), plant());
        session
    }

    fn insert(
        &self,
        identity: NodeIdentity,
        name: &str,
        node_class: NodeClass,
        data_type: DataType,
        value: &str,
    ) {
        self.nodes.lock().insert(
            identity.clone(),
            FakeNode {
                snapshot: NodeSnapshot {
                    identity,
                    browse_name: name.to_string(),
                    display_name: name.to_string(),
                    node_class,
                    data_type,
                    value: value.to_string(),
                },
                children: Vec::new(),
            },
        );
    }

    fn attach(&self, parent: &NodeIdentity, child: NodeIdentity) {
        if let Some(node) = self.nodes.lock().get_mut(parent) {
            node.children.push(child);
        }
    }

    /// Deliver a value change to every monitored item on `node`, the way the
    /// protocol library does from its own thread. Returns the number of
    /// deliveries.
    pub fn fire(&self, node: &NodeIdentity, value: &Variant) -> usize {
        if let Some(entry) = self.nodes.lock().get_mut(node) {
            entry.snapshot.value = value.to_string();
        }
        let targets: Vec<_> = self
            .subscriptions
            .lock()
            .values()
            .flat_map(|sub| {
                sub.items
                    .iter()
                    .filter(|(_, monitored)| monitored == node)
                    .map(|(item, _)| (*item, Arc::clone(&sub.handler)))
                    .collect::<Vec<_>>()
            })
            .collect();
        for (item, handler) in &targets {
            handler.on_data_change(*item, node, value);
        }
        targets.len()
    }

    pub fn live_subscriptions(&self) -> usize {
        self.subscriptions.lock().len()
    }

    pub fn live_items(&self) -> usize {
        self.subscriptions.lock().values().map(|s| s.items.len()).sum()
    }

    pub fn is_monitored(&self, node: &NodeIdentity) -> bool {
        self.subscriptions
            .lock()
            .values()
            .any(|s| s.items.iter().any(|(_, n)| n == node))
    }
}

impl SourceSession for FakeSession {
    fn children(&self, node: &NodeIdentity) -> Result<Vec<NodeReference>, ProtocolError> {
        let nodes = self.nodes.lock();
        let entry = nodes
            .get(node)
            .ok_or_else(|| ProtocolError::NodeNotFound(node.clone()))?;
        Ok(entry
            .children
            .iter()
            .filter_map(|child| nodes.get(child))
            .map(|child| NodeReference {
                identity: child.snapshot.identity.clone(),
                browse_name: child.snapshot.browse_name.clone(),
                node_class: child.snapshot.node_class,
            })
            .collect())
    }

    fn read_node(&self, node: &NodeIdentity) -> Result<NodeSnapshot, ProtocolError> {
        self.nodes
            .lock()
            .get(node)
            .map(|entry| entry.snapshot.clone())
            .ok_or_else(|| ProtocolError::NodeNotFound(node.clone()))
    }

    fn create_subscription(
        &self,
        _interval: Duration,
        handler: Arc<dyn DataChangeHandler>,
    ) -> Result<SubscriptionId, ProtocolError> {
        let id = self.next_subscription.fetch_add(1, Ordering::SeqCst);
        self.subscriptions.lock().insert(
            id,
            FakeSubscription {
                handler,
                items: Vec::new(),
            },
        );
        Ok(SubscriptionId(id))
    }

    fn subscribe_data_change(
        &self,
        subscription: SubscriptionId,
        node: &NodeIdentity,
    ) -> Result<MonitorHandle, ProtocolError> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(ProtocolError::Rejected("BadTooManyMonitoredItems".into()));
        }
        if !self.nodes.lock().contains_key(node) {
            return Err(ProtocolError::NodeNotFound(node.clone()));
        }
        let mut subscriptions = self.subscriptions.lock();
        let sub = subscriptions
            .get_mut(&subscription.0)
            .ok_or_else(|| ProtocolError::Rejected("BadSubscriptionIdInvalid".into()))?;
        let item = MonitorHandle::new(self.next_item.fetch_add(1, Ordering::SeqCst))
            .ok_or_else(|| ProtocolError::Malformed("zero handle".into()))?;
        sub.items.push((item, node.clone()));
        let handler = Arc::clone(&sub.handler);
        drop(subscriptions);

        if self.report_initial_value.load(Ordering::SeqCst) {
            let current = self.read_node(node)?.value;
            handler.on_data_change(item, node, &Variant::String(current));
        }
        Ok(item)
    }

    fn unsubscribe(
        &self,
        subscription: SubscriptionId,
        item: MonitorHandle,
    ) -> Result<(), ProtocolError> {
        if self.fail_unsubscribe.load(Ordering::SeqCst) {
            return Err(ProtocolError::Rejected("BadMonitoredItemIdInvalid".into()));
        }
        let mut subscriptions = self.subscriptions.lock();
        let sub = subscriptions
            .get_mut(&subscription.0)
            .ok_or_else(|| ProtocolError::Rejected("BadSubscriptionIdInvalid".into()))?;
        let before = sub.items.len();
        sub.items.retain(|(handle, _)| *handle != item);
        if sub.items.len() == before {
            return Err(ProtocolError::Rejected("BadMonitoredItemIdInvalid".into()));
        }
        self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn delete_subscription(&self, subscription: SubscriptionId) -> Result<(), ProtocolError> {
        self.subscriptions
            .lock()
            .remove(&subscription.0)
            .map(|_| {
                self.deleted_subscriptions.fetch_add(1, Ordering::SeqCst);
            })
            .ok_or_else(|| ProtocolError::Rejected("BadSubscriptionIdInvalid".into()))
    }

    fn write_value(
        &self,
        node: &NodeIdentity,
        declared: &DataType,
        value: &Variant,
    ) -> Result<(), ProtocolError> {
        let mut nodes = self.nodes.lock();
        let entry = nodes
            .get_mut(node)
            .ok_or_else(|| ProtocolError::NodeNotFound(node.clone()))?;
        entry.snapshot.value = value.to_string();
        self.writes
            .lock()
            .push((node.clone(), declared.clone(), value.clone()));
        Ok(())
    }

    fn add_folder(
        &self,
        parent: &NodeIdentity,
        namespace: u16,
        name: &str,
    ) -> Result<NodeIdentity, ProtocolError> {
        self.add_child(parent, namespace, name, NodeClass::Object, DataType::Unspecified, "")
    }

    fn add_variable(
        &self,
        parent: &NodeIdentity,
        namespace: u16,
        name: &str,
        initial: &Variant,
    ) -> Result<NodeIdentity, ProtocolError> {
        let data_type = match initial {
            Variant::Boolean(_) => DataType::Boolean,
            Variant::Integer(_) => DataType::Int64,
            Variant::Double(_) => DataType::Double,
            Variant::String(_) => DataType::String,
            _ => DataType::Unspecified,
        };
        self.add_child(
            parent,
            namespace,
            name,
            NodeClass::Variable,
            data_type,
            &initial.to_string(),
        )
    }

    fn check_connection(&self) -> Result<(), ConnectionError> {
        if self.connection_lost.load(Ordering::SeqCst) {
            return Err(ConnectionError::Io("secure channel closed".into()));
        }
        Ok(())
    }

    fn disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

impl FakeSession {
    fn add_child(
        &self,
        parent: &NodeIdentity,
        namespace: u16,
        name: &str,
        node_class: NodeClass,
        data_type: DataType,
        value: &str,
    ) -> Result<NodeIdentity, ProtocolError> {
        if name.is_empty() {
            return Err(ProtocolError::Rejected("BadBrowseNameInvalid".into()));
        }
        if !self.nodes.lock().contains_key(parent) {
            return Err(ProtocolError::NodeNotFound(parent.clone()));
        }
        let identity =
            NodeIdentity::numeric(namespace, self.next_node.fetch_add(1, Ordering::SeqCst));
        self.insert(identity.clone(), name, node_class, data_type, value);
        self.attach(parent, identity.clone());
        Ok(identity)
    }
}

/// Transport handing out one shared [`FakeSession`].
pub struct FakeTransport {
    pub session: Arc<FakeSession>,
    pub discovery: Mutex<Result<Vec<EndpointDescriptor>, ConnectionError>>,
    pub connect_error: Mutex<Option<ConnectionError>>,
    pub connects: AtomicUsize,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            session: Arc::new(FakeSession::scripted()),
            discovery: Mutex::new(Ok(endpoints())),
            connect_error: Mutex::new(None),
            connects: AtomicUsize::new(0),
        })
    }
}

impl SourceTransport for FakeTransport {
    fn discover_endpoints(&self, url: &str) -> Result<Vec<EndpointDescriptor>, ConnectionError> {
        if !url.starts_with("opc.tcp://") {
            return Err(ConnectionError::InvalidAddress(url.to_string()));
        }
        self.discovery.lock().clone()
    }

    fn connect(
        &self,
        _endpoint: &EndpointDescriptor,
    ) -> Result<Arc<dyn SourceSession>, ConnectionError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.connect_error.lock().clone() {
            return Err(error);
        }
        self.session.connection_lost.store(false, Ordering::SeqCst);
        let session: Arc<dyn SourceSession> = self.session.clone();
        Ok(session)
    }
}

/// Publisher recording everything the forwarder hands it.
#[derive(Default)]
pub struct RecordingPublisher {
    pub published: Mutex<Vec<(String, String)>>,
}

impl RecordingPublisher {
    pub fn messages(&self) -> Vec<(String, String)> {
        self.published.lock().clone()
    }
}

impl TopicPublisher for RecordingPublisher {
    fn base_topic(&self) -> String {
        "opcuamqtt".to_string()
    }

    fn publish(&self, topic: &str, payload: &[u8]) {
        self.published
            .lock()
            .push((topic.to_string(), String::from_utf8_lossy(payload).into_owned()));
    }
}

// ---------------------------------------------------------------------------
// Broker side
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub topic: String,
    pub payload: String,
    pub qos: QualityOfService,
    pub retain: bool,
}

/// Broker whose connect and reconnect outcomes are scripted.
///
/// An empty script means success unless `reconnect_fallback` says otherwise.
pub struct ScriptedBroker {
    pub connect_script: Mutex<VecDeque<Result<(), ConnectionError>>>,
    pub reconnect_script: Mutex<VecDeque<Result<(), ConnectionError>>>,
    pub reconnect_fallback: Mutex<Result<(), ConnectionError>>,
    pub events: Mutex<VecDeque<BrokerEvent>>,
    pub published: Mutex<Vec<Published>>,
    pub options: Mutex<Vec<BrokerOptions>>,
    pub connects: AtomicUsize,
    pub reconnects: AtomicUsize,
    pub disconnects: AtomicUsize,
}

impl ScriptedBroker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            connect_script: Mutex::new(VecDeque::new()),
            reconnect_script: Mutex::new(VecDeque::new()),
            reconnect_fallback: Mutex::new(Ok(())),
            events: Mutex::new(VecDeque::new()),
            published: Mutex::new(Vec::new()),
            options: Mutex::new(Vec::new()),
            connects: AtomicUsize::new(0),
            reconnects: AtomicUsize::new(0),
            disconnects: AtomicUsize::new(0),
        })
    }

    /// Broker that never answers.
    pub fn unreachable() -> Arc<Self> {
        let broker = Self::new();
        broker
            .connect_script
            .lock()
            .push_back(Err(ConnectionError::Unreachable("localhost:1883".into())));
        *broker.reconnect_fallback.lock() =
            Err(ConnectionError::Unreachable("localhost:1883".into()));
        broker
    }

    pub fn connector(self: &Arc<Self>) -> Arc<dyn BrokerConnector> {
        Arc::new(ScriptedConnector(Arc::clone(self)))
    }

    pub fn messages(&self) -> Vec<Published> {
        self.published.lock().clone()
    }

    pub fn push_event(&self, event: BrokerEvent) {
        self.events.lock().push_back(event);
    }
}

struct ScriptedConnector(Arc<ScriptedBroker>);

impl BrokerConnector for ScriptedConnector {
    fn create(&self, options: &BrokerOptions) -> Box<dyn BrokerSession> {
        self.0.options.lock().push(options.clone());
        Box::new(ScriptedSession(Arc::clone(&self.0)))
    }
}

struct ScriptedSession(Arc<ScriptedBroker>);

impl BrokerSession for ScriptedSession {
    fn connect(&mut self) -> Result<(), ConnectionError> {
        self.0.connects.fetch_add(1, Ordering::SeqCst);
        self.0.connect_script.lock().pop_front().unwrap_or(Ok(()))
    }

    fn reconnect(&mut self) -> Result<(), ConnectionError> {
        self.0.reconnects.fetch_add(1, Ordering::SeqCst);
        let scripted = self.0.reconnect_script.lock().pop_front();
        scripted.unwrap_or_else(|| self.0.reconnect_fallback.lock().clone())
    }

    fn disconnect(&mut self) {
        self.0.disconnects.fetch_add(1, Ordering::SeqCst);
    }

    fn poll(&mut self, timeout: Duration) -> Option<BrokerEvent> {
        let event = self.0.events.lock().pop_front();
        if event.is_none() {
            std::thread::sleep(timeout);
        }
        event
    }

    fn publisher(&self) -> Arc<dyn BrokerPublisher> {
        Arc::new(ScriptedPublisher(Arc::clone(&self.0)))
    }
}

struct ScriptedPublisher(Arc<ScriptedBroker>);

impl BrokerPublisher for ScriptedPublisher {
    fn publish(
        &self,
        topic: &str,
        payload: &[u8],
        qos: QualityOfService,
        retain: bool,
    ) -> Result<(), PublishError> {
        if topic.contains(|c| c == '+' || c == '#') {
            return Err(PublishError::InvalidTopic(topic.to_string()));
        }
        self.0.published.lock().push(Published {
            topic: topic.to_string(),
            payload: String::from_utf8_lossy(payload).into_owned(),
            qos,
            retain,
        });
        Ok(())
    }
}
