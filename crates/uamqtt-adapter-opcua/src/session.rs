//! `opcua` client implementation of the source transport and session.

use crate::convert::{
    connection_error, data_type_of, folder_type_definition, from_ua_endpoint, from_ua_node_class,
    from_ua_node_id, from_ua_variant, matches_endpoint, protocol_error, to_ua_node_id,
    to_ua_variant, variable_type_definition, READ_WRITE_ACCESS,
};
use opcua::client::prelude::*;
use opcua::sync::RwLock as UaRwLock;
use opcua::types::{
    AddNodesItem, AttributesMask, DataValue, ExpandedNodeId, LocalizedText, ObjectAttributes,
    ObjectId, QualifiedName, ReferenceDescription, UAString, VariableAttributes,
};
use parking_lot::Mutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use uamqtt_core::{
    ConnectionError, DataChangeHandler, DataType, EndpointDescriptor, MonitorHandle, NodeIdentity,
    NodeReference, NodeSnapshot, ProtocolError, SourceSession, SourceTransport, SubscriptionId,
    Variant,
};

/// Lifetime of a subscription, in publishing intervals.
const LIFETIME_COUNT: u32 = 60;

/// Keep-alive of a subscription, in publishing intervals.
const KEEP_ALIVE_COUNT: u32 = 10;

/// Queue depth of each monitored item.
const ITEM_QUEUE_SIZE: u32 = 10;

/// Client application settings.
#[derive(Debug, Clone)]
pub struct OpcUaClientConfig {
    /// Application name announced to the server
    pub application_name: String,
    /// Application URI announced to the server
    pub application_uri: String,
    /// Certificate store directory
    pub pki_dir: Option<PathBuf>,
    /// Accept any server certificate
    pub trust_server_certs: bool,
    /// Requested session timeout
    pub session_timeout: Duration,
}

impl Default for OpcUaClientConfig {
    fn default() -> Self {
        Self {
            application_name: "uamqtt gateway".to_string(),
            application_uri: "urn:uamqtt:gateway".to_string(),
            pki_dir: None,
            trust_server_certs: true,
            session_timeout: Duration::from_secs(60),
        }
    }
}

/// Source transport on the `opcua` client.
#[derive(Debug, Clone, Default)]
pub struct OpcUaTransport {
    config: OpcUaClientConfig,
}

impl OpcUaTransport {
    /// Create a transport with the given client settings.
    #[must_use]
    pub fn new(config: OpcUaClientConfig) -> Self {
        Self { config }
    }

    fn build_client(&self, url: &str) -> Result<Client, ConnectionError> {
        if !url.starts_with("opc.tcp://") {
            return Err(ConnectionError::InvalidAddress(format!(
                "{url}: expected an opc.tcp:// URL"
            )));
        }

        let mut builder = ClientBuilder::new()
            .application_name(self.config.application_name.as_str())
            .application_uri(self.config.application_uri.as_str())
            .create_sample_keypair(true)
            .trust_server_certs(self.config.trust_server_certs)
            .session_retry_limit(0)
            .session_timeout(
                u32::try_from(self.config.session_timeout.as_millis()).unwrap_or(u32::MAX),
            );
        if let Some(ref pki_dir) = self.config.pki_dir {
            builder = builder.pki_dir(pki_dir.clone());
        }

        builder
            .client()
            .ok_or_else(|| ConnectionError::Handshake(format!("{url}: invalid client settings")))
    }
}

impl SourceTransport for OpcUaTransport {
    fn discover_endpoints(&self, url: &str) -> Result<Vec<EndpointDescriptor>, ConnectionError> {
        let client = self.build_client(url)?;
        let endpoints = client
            .get_server_endpoints_from_url(url)
            .map_err(|status| connection_error(url, status))?;

        tracing::debug!(url, count = endpoints.len(), "Discovered endpoints");
        Ok(endpoints.iter().map(from_ua_endpoint).collect())
    }

    fn connect(
        &self,
        endpoint: &EndpointDescriptor,
    ) -> Result<Arc<dyn SourceSession>, ConnectionError> {
        let mut client = self.build_client(&endpoint.url)?;
        let offered = client
            .get_server_endpoints_from_url(endpoint.url.as_str())
            .map_err(|status| connection_error(&endpoint.url, status))?;
        let selected = offered
            .into_iter()
            .find(|offered| matches_endpoint(offered, endpoint))
            .ok_or_else(|| {
                ConnectionError::Handshake(format!("{endpoint}: no longer offered by the server"))
            })?;

        tracing::debug!(
            security_policy = %selected.security_policy_uri,
            security_mode = ?selected.security_mode,
            "Found matching endpoint"
        );

        let session = client
            .connect_to_endpoint(selected, IdentityToken::Anonymous)
            .map_err(|status| connection_error(&endpoint.url, status))?;
        let stop = Session::run_async(Arc::clone(&session));

        tracing::debug!(endpoint = %endpoint, "Session activated");
        let session: Arc<dyn SourceSession> = Arc::new(OpcUaSession {
            session,
            stop: Mutex::new(Some(Box::new(move || {
                // The run loop may already have exited on its own.
                let _ = stop.send(SessionCommand::Stop);
            }))),
        });
        Ok(session)
    }
}

type StopFn = Box<dyn FnOnce() + Send>;

/// An activated `opcua` session with its background run loop.
pub struct OpcUaSession {
    session: Arc<UaRwLock<Session>>,
    stop: Mutex<Option<StopFn>>,
}

impl OpcUaSession {
    fn browse_page(
        session: &Session,
        node: &NodeIdentity,
    ) -> Result<Vec<ReferenceDescription>, ProtocolError> {
        let description = BrowseDescription {
            node_id: to_ua_node_id(node),
            browse_direction: BrowseDirection::Forward,
            reference_type_id: ReferenceTypeId::HierarchicalReferences.into(),
            include_subtypes: true,
            node_class_mask: 0,
            result_mask: BrowseDescriptionResultMask::all().bits(),
        };

        let mut result = session
            .browse(&[description])
            .map_err(|status| protocol_error(Some(node), status))?
            .and_then(|results| results.into_iter().next())
            .ok_or_else(|| ProtocolError::Malformed(format!("no browse result for {node}")))?;
        if result.status_code.is_bad() {
            return Err(protocol_error(Some(node), result.status_code));
        }

        let mut references = result.references.take().unwrap_or_default();
        let mut continuation = result.continuation_point;
        while !continuation.is_null() {
            let next = session
                .browse_next(false, &[continuation])
                .map_err(|status| protocol_error(Some(node), status))?
                .and_then(|results| results.into_iter().next())
                .ok_or_else(|| ProtocolError::Malformed(format!("no browse result for {node}")))?;
            references.extend(next.references.unwrap_or_default());
            continuation = next.continuation_point;
        }
        Ok(references)
    }

    fn read_attributes(
        session: &Session,
        node: &NodeIdentity,
        attributes: &[AttributeId],
    ) -> Result<Vec<DataValue>, ProtocolError> {
        let node_id = to_ua_node_id(node);
        let requests: Vec<ReadValueId> = attributes
            .iter()
            .map(|attribute| ReadValueId {
                node_id: node_id.clone(),
                attribute_id: *attribute as u32,
                index_range: UAString::null(),
                data_encoding: QualifiedName::null(),
            })
            .collect();

        let values = session
            .read(&requests, TimestampsToReturn::Neither, 0.0)
            .map_err(|status| protocol_error(Some(node), status))?;
        if values.len() != attributes.len() {
            return Err(ProtocolError::Malformed(format!(
                "expected {} attribute values for {node}, got {}",
                attributes.len(),
                values.len()
            )));
        }
        Ok(values)
    }

    fn add_node(
        &self,
        item: AddNodesItem,
        parent: &NodeIdentity,
    ) -> Result<NodeIdentity, ProtocolError> {
        let session = self.session.read();
        let result = session
            .add_nodes(&[item])
            .map_err(|status| protocol_error(Some(parent), status))?
            .into_iter()
            .next()
            .ok_or_else(|| ProtocolError::Malformed("empty add nodes response".to_string()))?;
        if result.status_code.is_bad() {
            return Err(ProtocolError::Rejected(result.status_code.to_string()));
        }
        Ok(from_ua_node_id(&result.added_node_id))
    }
}

fn good(value: &DataValue) -> Option<&opcua::types::Variant> {
    match value.status {
        Some(status) if status.is_bad() => None,
        _ => value.value.as_ref(),
    }
}

impl SourceSession for OpcUaSession {
    fn children(&self, node: &NodeIdentity) -> Result<Vec<NodeReference>, ProtocolError> {
        let session = self.session.read();
        let references = Self::browse_page(&session, node)?;

        Ok(references
            .iter()
            .map(|reference| NodeReference {
                identity: from_ua_node_id(&reference.node_id.node_id),
                browse_name: reference.browse_name.name.as_ref().to_string(),
                node_class: from_ua_node_class(reference.node_class),
            })
            .collect())
    }

    fn read_node(&self, node: &NodeIdentity) -> Result<NodeSnapshot, ProtocolError> {
        let session = self.session.read();
        let values = Self::read_attributes(
            &session,
            node,
            &[
                AttributeId::NodeClass,
                AttributeId::BrowseName,
                AttributeId::DisplayName,
                AttributeId::DataType,
                AttributeId::Value,
            ],
        )?;

        if let Some(status) = values[0].status {
            if status.is_bad() {
                return Err(protocol_error(Some(node), status));
            }
        }

        let node_class = match good(&values[0]) {
            Some(opcua::types::Variant::Int32(class)) => {
                uamqtt_core::NodeClass::from_mask(i64::from(*class))
            }
            _ => uamqtt_core::NodeClass::Unspecified,
        };
        let browse_name = match good(&values[1]) {
            Some(opcua::types::Variant::QualifiedName(name)) => name.name.as_ref().to_string(),
            _ => String::new(),
        };
        let display_name = match good(&values[2]) {
            Some(opcua::types::Variant::LocalizedText(text)) => text.text.as_ref().to_string(),
            _ => browse_name.clone(),
        };
        let data_type = match good(&values[3]) {
            Some(opcua::types::Variant::NodeId(type_node)) => {
                DataType::from_type_node(&from_ua_node_id(type_node))
            }
            _ => DataType::Unspecified,
        };
        let value = good(&values[4])
            .map(|value| from_ua_variant(value).to_string())
            .unwrap_or_default();

        Ok(NodeSnapshot {
            identity: node.clone(),
            browse_name,
            display_name,
            node_class,
            data_type,
            value,
        })
    }

    fn create_subscription(
        &self,
        interval: Duration,
        handler: Arc<dyn DataChangeHandler>,
    ) -> Result<SubscriptionId, ProtocolError> {
        let callback = DataChangeCallback::new(move |items| {
            for item in items {
                let Some(handle) = MonitorHandle::new(item.id()) else {
                    continue;
                };
                let node = from_ua_node_id(&item.item_to_monitor().node_id);
                let value = item
                    .last_value()
                    .value
                    .as_ref()
                    .map(from_ua_variant)
                    .unwrap_or_default();
                handler.on_data_change(handle, &node, &value);
            }
        });

        let session = self.session.read();
        let id = session
            .create_subscription(
                interval.as_secs_f64() * 1000.0,
                LIFETIME_COUNT,
                KEEP_ALIVE_COUNT,
                0,
                0,
                true,
                callback,
            )
            .map_err(|status| protocol_error(None, status))?;

        tracing::debug!(subscription = id, ?interval, "Created subscription");
        Ok(SubscriptionId(id))
    }

    fn subscribe_data_change(
        &self,
        subscription: SubscriptionId,
        node: &NodeIdentity,
    ) -> Result<MonitorHandle, ProtocolError> {
        let request = MonitoredItemCreateRequest {
            item_to_monitor: ReadValueId {
                node_id: to_ua_node_id(node),
                attribute_id: AttributeId::Value as u32,
                index_range: UAString::null(),
                data_encoding: QualifiedName::null(),
            },
            monitoring_mode: MonitoringMode::Reporting,
            requested_parameters: MonitoringParameters {
                sampling_interval: 0.0,
                filter: ExtensionObject::null(),
                queue_size: ITEM_QUEUE_SIZE,
                discard_oldest: true,
                client_handle: 0,
            },
        };

        let session = self.session.read();
        let result = session
            .create_monitored_items(subscription.0, TimestampsToReturn::Both, &[request])
            .map_err(|status| protocol_error(Some(node), status))?
            .into_iter()
            .next()
            .ok_or_else(|| ProtocolError::Malformed("empty monitored item response".to_string()))?;
        if result.status_code.is_bad() {
            return Err(protocol_error(Some(node), result.status_code));
        }

        MonitorHandle::new(result.monitored_item_id).ok_or_else(|| {
            ProtocolError::Malformed("server returned monitored item id 0".to_string())
        })
    }

    fn unsubscribe(
        &self,
        subscription: SubscriptionId,
        item: MonitorHandle,
    ) -> Result<(), ProtocolError> {
        let session = self.session.read();
        let results = session
            .delete_monitored_items(subscription.0, &[item.get()])
            .map_err(|status| protocol_error(None, status))?;
        match results.first() {
            Some(status) if status.is_bad() => Err(protocol_error(None, *status)),
            _ => Ok(()),
        }
    }

    fn delete_subscription(&self, subscription: SubscriptionId) -> Result<(), ProtocolError> {
        let session = self.session.read();
        let status = session
            .delete_subscription(subscription.0)
            .map_err(|status| protocol_error(None, status))?;
        if status.is_bad() {
            return Err(protocol_error(None, status));
        }
        Ok(())
    }

    fn write_value(
        &self,
        node: &NodeIdentity,
        declared: &DataType,
        value: &Variant,
    ) -> Result<(), ProtocolError> {
        let write = WriteValue {
            node_id: to_ua_node_id(node),
            attribute_id: AttributeId::Value as u32,
            index_range: UAString::null(),
            value: DataValue::new_now(to_ua_variant(declared, value)?),
        };

        let session = self.session.read();
        let results = session
            .write(&[write])
            .map_err(|status| protocol_error(Some(node), status))?;
        match results.first() {
            Some(status) if status.is_bad() => Err(protocol_error(Some(node), *status)),
            Some(_) => Ok(()),
            None => Err(ProtocolError::Malformed("empty write response".to_string())),
        }
    }

    fn add_folder(
        &self,
        parent: &NodeIdentity,
        namespace: u16,
        name: &str,
    ) -> Result<NodeIdentity, ProtocolError> {
        let attributes = ObjectAttributes {
            specified_attributes: (AttributesMask::DISPLAY_NAME | AttributesMask::EVENT_NOTIFIER)
                .bits(),
            display_name: LocalizedText::new("", name),
            description: LocalizedText::null(),
            write_mask: 0,
            user_write_mask: 0,
            event_notifier: 0,
        };
        let item = AddNodesItem {
            parent_node_id: ExpandedNodeId::from(to_ua_node_id(parent)),
            reference_type_id: ReferenceTypeId::Organizes.into(),
            requested_new_node_id: ExpandedNodeId::null(),
            browse_name: QualifiedName::new(namespace, name),
            node_class: opcua::types::NodeClass::Object,
            node_attributes: ExtensionObject::from_encodable(
                ObjectId::ObjectAttributes_Encoding_DefaultBinary,
                &attributes,
            ),
            type_definition: folder_type_definition(),
        };

        let added = self.add_node(item, parent)?;
        tracing::debug!(parent = %parent, node = %added, name, "AddNodes folder accepted");
        Ok(added)
    }

    fn add_variable(
        &self,
        parent: &NodeIdentity,
        namespace: u16,
        name: &str,
        initial: &Variant,
    ) -> Result<NodeIdentity, ProtocolError> {
        let attributes = VariableAttributes {
            specified_attributes: (AttributesMask::DISPLAY_NAME
                | AttributesMask::VALUE
                | AttributesMask::DATA_TYPE
                | AttributesMask::VALUE_RANK
                | AttributesMask::ACCESS_LEVEL
                | AttributesMask::USER_ACCESS_LEVEL)
                .bits(),
            display_name: LocalizedText::new("", name),
            description: LocalizedText::null(),
            write_mask: 0,
            user_write_mask: 0,
            value: to_ua_variant(&DataType::Unspecified, initial)?,
            data_type: data_type_of(initial),
            value_rank: -1,
            array_dimensions: None,
            access_level: READ_WRITE_ACCESS,
            user_access_level: READ_WRITE_ACCESS,
            minimum_sampling_interval: 0.0,
            historizing: false,
        };
        let item = AddNodesItem {
            parent_node_id: ExpandedNodeId::from(to_ua_node_id(parent)),
            reference_type_id: ReferenceTypeId::Organizes.into(),
            requested_new_node_id: ExpandedNodeId::null(),
            browse_name: QualifiedName::new(namespace, name),
            node_class: opcua::types::NodeClass::Variable,
            node_attributes: ExtensionObject::from_encodable(
                ObjectId::VariableAttributes_Encoding_DefaultBinary,
                &attributes,
            ),
            type_definition: variable_type_definition(),
        };

        let added = self.add_node(item, parent)?;
        tracing::debug!(parent = %parent, node = %added, name, "AddNodes variable accepted");
        Ok(added)
    }

    fn check_connection(&self) -> Result<(), ConnectionError> {
        if self.session.read().is_connected() {
            Ok(())
        } else {
            Err(ConnectionError::Io("session connection lost".to_string()))
        }
    }

    fn disconnect(&self) {
        if let Some(stop) = self.stop.lock().take() {
            stop();
        }
        let session = self.session.read();
        if session.is_connected() {
            session.disconnect();
        }
        tracing::debug!("Session loop stopped");
    }
}

impl Drop for OpcUaSession {
    fn drop(&mut self) {
        if let Some(stop) = self.stop.lock().take() {
            stop();
        }
    }
}
