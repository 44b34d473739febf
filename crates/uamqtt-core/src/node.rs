//! Node identities and read-only node projections.

use crate::value::DataType;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Numeric id of the `Root` folder in namespace 0.
pub const ROOT_FOLDER_ID: u32 = 84;

/// Numeric id of the `Objects` folder in namespace 0.
pub const OBJECTS_FOLDER_ID: u32 = 85;

/// Identifier part of a node identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Identifier {
    /// Numeric identifier (`i=`)
    Numeric(u32),
    /// String identifier (`s=`)
    String(String),
}

/// Address of a node: namespace index plus identifier.
///
/// Two identities are equal iff namespace and identifier (kind and value)
/// match. Used as the registry key and as part of the derived topic.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NodeIdentity {
    /// Namespace index
    pub namespace: u16,
    /// Identifier within the namespace
    pub identifier: Identifier,
}

impl NodeIdentity {
    /// Identity with a numeric identifier.
    #[must_use]
    pub fn numeric(namespace: u16, id: u32) -> Self {
        Self {
            namespace,
            identifier: Identifier::Numeric(id),
        }
    }

    /// Identity with a string identifier.
    #[must_use]
    pub fn string(namespace: u16, id: impl Into<String>) -> Self {
        Self {
            namespace,
            identifier: Identifier::String(id.into()),
        }
    }

    /// The `Root` folder.
    #[must_use]
    pub fn root() -> Self {
        Self::numeric(0, ROOT_FOLDER_ID)
    }

    /// The `Objects` folder.
    #[must_use]
    pub fn objects() -> Self {
        Self::numeric(0, OBJECTS_FOLDER_ID)
    }
}

impl fmt::Display for NodeIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.identifier {
            Identifier::Numeric(id) => write!(f, "ns={};i={id}", self.namespace),
            Identifier::String(id) => write!(f, "ns={};s={id}", self.namespace),
        }
    }
}

/// Error parsing a node identity string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid node id '{0}': expected ns=<index>;i=<number> or ns=<index>;s=<text>")]
pub struct NodeIdParseError(pub String);

impl FromStr for NodeIdentity {
    type Err = NodeIdParseError;

    /// Parses `ns=2;i=5001`, `ns=2;s=Line1.Temp` or a bare `i=85` (namespace 0).
    fn from_str(input: &str) -> Result<Self, Self::Err> {
        let invalid = || NodeIdParseError(input.to_string());
        let trimmed = input.trim();

        let (namespace, rest) = match trimmed.strip_prefix("ns=") {
            Some(rest) => {
                let (ns, rest) = rest.split_once(';').ok_or_else(invalid)?;
                (ns.parse::<u16>().map_err(|_| invalid())?, rest)
            }
            None => (0, trimmed),
        };

        if let Some(id) = rest.strip_prefix("i=") {
            let id = id.parse::<u32>().map_err(|_| invalid())?;
            return Ok(Self::numeric(namespace, id));
        }
        if let Some(id) = rest.strip_prefix("s=") {
            if id.is_empty() {
                return Err(invalid());
            }
            return Ok(Self::string(namespace, id));
        }

        Err(invalid())
    }
}

impl TryFrom<String> for NodeIdentity {
    type Error = NodeIdParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<NodeIdentity> for String {
    fn from(value: NodeIdentity) -> Self {
        value.to_string()
    }
}

/// Class of a node in the address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum NodeClass {
    /// Object (folders included)
    Object,
    /// Variable
    Variable,
    /// Method
    Method,
    /// Object type
    ObjectType,
    /// Variable type
    VariableType,
    /// Reference type
    ReferenceType,
    /// Data type
    DataType,
    /// View
    View,
    /// Not reported
    #[default]
    Unspecified,
}

impl NodeClass {
    /// Map the OPC UA node class mask value.
    #[must_use]
    pub fn from_mask(value: i64) -> Self {
        match value {
            1 => Self::Object,
            2 => Self::Variable,
            4 => Self::Method,
            8 => Self::ObjectType,
            16 => Self::VariableType,
            32 => Self::ReferenceType,
            64 => Self::DataType,
            128 => Self::View,
            _ => Self::Unspecified,
        }
    }
}

/// Child reference as reported by a browse of the parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeReference {
    /// Target node
    pub identity: NodeIdentity,
    /// Browse name of the target
    pub browse_name: String,
    /// Class of the target
    pub node_class: NodeClass,
}

/// Read-only projection of a node at a point in time.
///
/// Never mutated in place; a refresh produces a new snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeSnapshot {
    /// Node address
    pub identity: NodeIdentity,
    /// Browse name (used for topic derivation)
    pub browse_name: String,
    /// Display name
    pub display_name: String,
    /// Class of the node
    pub node_class: NodeClass,
    /// Declared data type
    pub data_type: DataType,
    /// Stringified current value, empty when the node has none
    pub value: String,
}

/// Snapshot plus child counts, as shown by a node info panel.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeDetails {
    /// Current snapshot
    pub snapshot: NodeSnapshot,
    /// Number of hierarchical children
    pub children: usize,
    /// Number of children that are variables
    pub variables: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_parse() {
        let numeric = NodeIdentity::numeric(2, 5001);
        assert_eq!(numeric.to_string(), "ns=2;i=5001");
        assert_eq!("ns=2;i=5001".parse::<NodeIdentity>().unwrap(), numeric);

        let text = NodeIdentity::string(3, "Line1.Temp");
        assert_eq!(text.to_string(), "ns=3;s=Line1.Temp");
        assert_eq!("ns=3;s=Line1.Temp".parse::<NodeIdentity>().unwrap(), text);

        assert_eq!("i=85".parse::<NodeIdentity>().unwrap(), NodeIdentity::objects());
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("ns=x;i=1".parse::<NodeIdentity>().is_err());
        assert!("ns=2;q=1".parse::<NodeIdentity>().is_err());
        assert!("ns=2;s=".parse::<NodeIdentity>().is_err());
        assert!("ns=2".parse::<NodeIdentity>().is_err());
    }

    #[test]
    fn identifier_kind_matters_for_equality() {
        assert_ne!(NodeIdentity::numeric(2, 10), NodeIdentity::string(2, "10"));
        assert_ne!(NodeIdentity::numeric(2, 10), NodeIdentity::numeric(3, 10));
    }

    #[test]
    fn serde_uses_string_form() {
        let node: NodeIdentity = serde_json::from_str("\"ns=2;s=Pump\"").unwrap();
        assert_eq!(node, NodeIdentity::string(2, "Pump"));
        assert_eq!(serde_json::to_string(&node).unwrap(), "\"ns=2;s=Pump\"");
    }
}
