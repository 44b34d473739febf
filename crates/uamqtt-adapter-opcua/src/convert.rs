//! Conversions between `opcua` types and the gateway's data model.

use opcua::types::{
    DataTypeId, EndpointDescription, ExpandedNodeId, MessageSecurityMode, ObjectTypeId,
    StatusCode, UAString, VariableTypeId,
};
use uamqtt_core::{
    ConnectionError, DataType, EndpointDescriptor, NodeClass, NodeIdentity, ProtocolError,
    SecurityLevel, SecurityMode, Variant,
};

/// Convert a gateway node identity to an `opcua` node id.
#[must_use]
pub fn to_ua_node_id(node: &NodeIdentity) -> opcua::types::NodeId {
    match &node.identifier {
        uamqtt_core::Identifier::Numeric(id) => opcua::types::NodeId::new(node.namespace, *id),
        uamqtt_core::Identifier::String(id) => {
            opcua::types::NodeId::new(node.namespace, id.clone())
        }
    }
}

/// Convert an `opcua` node id to a gateway node identity.
///
/// GUID and opaque identifiers have no gateway form; they are carried as
/// their rendered text and will not resolve when sent back to the server.
#[must_use]
pub fn from_ua_node_id(node: &opcua::types::NodeId) -> NodeIdentity {
    match &node.identifier {
        opcua::types::Identifier::Numeric(id) => NodeIdentity::numeric(node.namespace, *id),
        opcua::types::Identifier::String(id) => {
            NodeIdentity::string(node.namespace, id.as_ref())
        }
        other => NodeIdentity::string(node.namespace, format!("{other:?}")),
    }
}

/// Map an `opcua` node class.
#[must_use]
pub fn from_ua_node_class(class: opcua::types::NodeClass) -> NodeClass {
    NodeClass::from_mask(class as i64)
}

/// Convert a value read from the server.
#[must_use]
pub fn from_ua_variant(value: &opcua::types::Variant) -> Variant {
    use opcua::types::Variant as Ua;

    match value {
        Ua::Empty => Variant::Empty,
        Ua::Boolean(v) => Variant::Boolean(*v),
        Ua::SByte(v) => Variant::Integer(i64::from(*v)),
        Ua::Int16(v) => Variant::Integer(i64::from(*v)),
        Ua::Int32(v) => Variant::Integer(i64::from(*v)),
        Ua::Int64(v) => Variant::Integer(*v),
        Ua::Byte(v) => Variant::UnsignedInteger(u64::from(*v)),
        Ua::UInt16(v) => Variant::UnsignedInteger(u64::from(*v)),
        Ua::UInt32(v) => Variant::UnsignedInteger(u64::from(*v)),
        Ua::UInt64(v) => Variant::UnsignedInteger(*v),
        Ua::Float(v) => Variant::Float(*v),
        Ua::Double(v) => Variant::Double(*v),
        Ua::String(v) => Variant::String(v.as_ref().to_string()),
        Ua::LocalizedText(v) => Variant::String(v.text.as_ref().to_string()),
        Ua::QualifiedName(v) => Variant::String(v.name.as_ref().to_string()),
        Ua::NodeId(v) => Variant::Other(v.to_string()),
        other => Variant::Other(format!("{other:?}")),
    }
}

/// Convert an already coerced value for a node declared as `declared`.
///
/// # Errors
///
/// `ProtocolError::Rejected` if a number does not fit the declared width.
pub fn to_ua_variant(
    declared: &DataType,
    value: &Variant,
) -> Result<opcua::types::Variant, ProtocolError> {
    use opcua::types::Variant as Ua;

    let rejected = || ProtocolError::Rejected(format!("cannot encode {value:?} as {declared}"));

    let encoded = match (declared, value) {
        (_, Variant::Empty) => Ua::Empty,
        (_, Variant::Boolean(v)) => Ua::Boolean(*v),
        (_, Variant::String(v) | Variant::Other(v)) => Ua::String(UAString::from(v.as_str())),
        (DataType::Float, Variant::Float(v)) => Ua::Float(*v),
        (_, Variant::Float(v)) => Ua::Double(f64::from(*v)),
        #[allow(clippy::cast_possible_truncation)]
        (DataType::Float, Variant::Double(v)) => {
            let narrow = *v as f32;
            if v.is_finite() && narrow.is_infinite() {
                return Err(rejected());
            }
            Ua::Float(narrow)
        }
        (_, Variant::Double(v)) => Ua::Double(*v),
        (DataType::SByte, Variant::Integer(v)) => {
            Ua::SByte(i8::try_from(*v).map_err(|_| rejected())?)
        }
        (DataType::Int16, Variant::Integer(v)) => {
            Ua::Int16(i16::try_from(*v).map_err(|_| rejected())?)
        }
        (DataType::Int64, Variant::Integer(v)) => Ua::Int64(*v),
        (DataType::Int32, Variant::Integer(v)) => {
            Ua::Int32(i32::try_from(*v).map_err(|_| rejected())?)
        }
        (_, Variant::Integer(v)) => match i32::try_from(*v) {
            Ok(narrow) => Ua::Int32(narrow),
            Err(_) => Ua::Int64(*v),
        },
        (DataType::Byte, Variant::UnsignedInteger(v)) => {
            Ua::Byte(u8::try_from(*v).map_err(|_| rejected())?)
        }
        (DataType::UInt16, Variant::UnsignedInteger(v)) => {
            Ua::UInt16(u16::try_from(*v).map_err(|_| rejected())?)
        }
        (DataType::UInt64, Variant::UnsignedInteger(v)) => Ua::UInt64(*v),
        (_, Variant::UnsignedInteger(v)) => {
            Ua::UInt32(u32::try_from(*v).map_err(|_| rejected())?)
        }
    };
    Ok(encoded)
}

/// Data type node to declare for a new variable holding `value`.
#[must_use]
pub fn data_type_of(value: &Variant) -> opcua::types::NodeId {
    let id = match value {
        Variant::Empty => DataTypeId::BaseDataType,
        Variant::Boolean(_) => DataTypeId::Boolean,
        Variant::Integer(_) => DataTypeId::Int64,
        Variant::UnsignedInteger(_) => DataTypeId::UInt64,
        Variant::Float(_) => DataTypeId::Float,
        Variant::Double(_) => DataTypeId::Double,
        Variant::String(_) | Variant::Other(_) => DataTypeId::String,
    };
    id.into()
}

/// `AccessLevel` bits `CurrentRead | CurrentWrite`.
pub const READ_WRITE_ACCESS: u8 = 0b0000_0011;

/// Type definition of a folder created by the gateway.
#[must_use]
pub fn folder_type_definition() -> ExpandedNodeId {
    ExpandedNodeId::from(opcua::types::NodeId::from(&ObjectTypeId::FolderType))
}

/// Type definition of a variable created by the gateway.
#[must_use]
pub fn variable_type_definition() -> ExpandedNodeId {
    ExpandedNodeId::from(opcua::types::NodeId::from(
        &VariableTypeId::BaseDataVariableType,
    ))
}

/// Map a discovered endpoint.
#[must_use]
pub fn from_ua_endpoint(endpoint: &EndpointDescription) -> EndpointDescriptor {
    EndpointDescriptor {
        url: endpoint.endpoint_url.as_ref().to_string(),
        security_level: SecurityLevel::from_level(endpoint.security_level),
        security_policy_uri: endpoint.security_policy_uri.as_ref().to_string(),
        security_mode: from_ua_security_mode(endpoint.security_mode),
    }
}

fn from_ua_security_mode(mode: MessageSecurityMode) -> SecurityMode {
    match mode {
        MessageSecurityMode::None => SecurityMode::None,
        MessageSecurityMode::Sign => SecurityMode::Sign,
        MessageSecurityMode::SignAndEncrypt => SecurityMode::SignAndEncrypt,
        MessageSecurityMode::Invalid => SecurityMode::Invalid,
    }
}

/// Whether a discovered endpoint is the one `descriptor` was made from.
#[must_use]
pub fn matches_endpoint(endpoint: &EndpointDescription, descriptor: &EndpointDescriptor) -> bool {
    endpoint.security_policy_uri.as_ref() == descriptor.security_policy_uri
        && from_ua_security_mode(endpoint.security_mode) == descriptor.security_mode
}

/// Classify a failed connect by its status code.
#[must_use]
pub fn connection_error(url: &str, status: StatusCode) -> ConnectionError {
    let detail = format!("{url}: {status}");
    if status == StatusCode::BadTimeout
        || status == StatusCode::BadCommunicationError
        || status == StatusCode::BadNotConnected
        || status == StatusCode::BadConnectionClosed
        || status == StatusCode::BadServerNotConnected
        || status == StatusCode::BadTcpEndpointUrlInvalid
    {
        ConnectionError::Unreachable(detail)
    } else if status == StatusCode::BadConnectionRejected
        || status == StatusCode::BadIdentityTokenRejected
        || status == StatusCode::BadIdentityTokenInvalid
        || status == StatusCode::BadUserAccessDenied
        || status == StatusCode::BadSecurityChecksFailed
        || status == StatusCode::BadCertificateUntrusted
    {
        ConnectionError::Refused(detail)
    } else {
        ConnectionError::Handshake(detail)
    }
}

/// Map a failed request on an established session.
#[must_use]
pub fn protocol_error(node: Option<&NodeIdentity>, status: StatusCode) -> ProtocolError {
    match node {
        Some(node) if status == StatusCode::BadNodeIdUnknown => {
            ProtocolError::NodeNotFound(node.clone())
        }
        _ if status == StatusCode::BadNotConnected || status == StatusCode::BadSessionIdInvalid => {
            ProtocolError::NotConnected
        }
        _ => ProtocolError::Rejected(status.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn node_id_conversion() {
        let node = NodeIdentity::numeric(2, 5001);
        assert_eq!(from_ua_node_id(&to_ua_node_id(&node)), node);

        let node = NodeIdentity::string(3, "Line1.Temp");
        assert_eq!(from_ua_node_id(&to_ua_node_id(&node)), node);
    }

    #[test]
    fn values_from_server() {
        assert_eq!(
            from_ua_variant(&opcua::types::Variant::Int16(-4)),
            Variant::Integer(-4)
        );
        assert_eq!(
            from_ua_variant(&opcua::types::Variant::UInt32(7)),
            Variant::UnsignedInteger(7)
        );
        assert_eq!(
            from_ua_variant(&opcua::types::Variant::from("pump")),
            Variant::String("pump".to_string())
        );
        assert_eq!(from_ua_variant(&opcua::types::Variant::Empty), Variant::Empty);
    }

    #[test]
    fn integer_width_follows_declared_type() {
        assert_eq!(
            to_ua_variant(&DataType::Int16, &Variant::Integer(300)).unwrap(),
            opcua::types::Variant::Int16(300)
        );
        assert_eq!(
            to_ua_variant(&DataType::Byte, &Variant::UnsignedInteger(200)).unwrap(),
            opcua::types::Variant::Byte(200)
        );
        assert!(to_ua_variant(&DataType::SByte, &Variant::Integer(300)).is_err());
        assert_eq!(
            to_ua_variant(&DataType::Unspecified, &Variant::Integer(1 << 40)).unwrap(),
            opcua::types::Variant::Int64(1 << 40)
        );
    }

    #[test]
    fn float_follows_declared_type() {
        assert_eq!(
            to_ua_variant(&DataType::Float, &Variant::Float(1.5)).unwrap(),
            opcua::types::Variant::Float(1.5)
        );
        assert_eq!(
            to_ua_variant(&DataType::Double, &Variant::Double(2.25)).unwrap(),
            opcua::types::Variant::Double(2.25)
        );
        assert!(to_ua_variant(&DataType::Float, &Variant::Double(1e300)).is_err());
    }

    #[test]
    fn created_node_definitions() {
        assert_eq!(
            folder_type_definition().node_id,
            opcua::types::NodeId::new(0, 61u32)
        );
        assert_eq!(
            variable_type_definition().node_id,
            opcua::types::NodeId::new(0, 63u32)
        );
        assert_eq!(READ_WRITE_ACCESS, 3);
    }

    #[test]
    fn status_codes_classify_connect_failures() {
        let url = "opc.tcp://localhost:4841/";
        assert!(connection_error(url, StatusCode::BadTimeout).is_transient());
        assert!(matches!(
            connection_error(url, StatusCode::BadIdentityTokenRejected),
            ConnectionError::Refused(_)
        ));
        assert!(matches!(
            connection_error(url, StatusCode::BadUnexpectedError),
            ConnectionError::Handshake(_)
        ));
    }

    #[test]
    fn unknown_node_is_not_found() {
        let node = NodeIdentity::numeric(2, 9);
        assert_eq!(
            protocol_error(Some(&node), StatusCode::BadNodeIdUnknown),
            ProtocolError::NodeNotFound(node)
        );
    }
}
