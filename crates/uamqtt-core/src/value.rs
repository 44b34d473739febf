//! Node values, writable scalar kinds and declared data types.

use crate::error::ProtocolError;
use crate::node::{Identifier, NodeIdentity};
use std::fmt;

/// Value as read from (or written to) a node.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Variant {
    /// No value
    #[default]
    Empty,
    /// Boolean
    Boolean(bool),
    /// Any signed integer width
    Integer(i64),
    /// Any unsigned integer width
    UnsignedInteger(u64),
    /// Single precision float
    Float(f32),
    /// Double precision float
    Double(f64),
    /// String
    String(String),
    /// Any other value, already rendered by the protocol library
    Other(String),
}

impl fmt::Display for Variant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => Ok(()),
            Self::Boolean(v) => write!(f, "{v}"),
            Self::Integer(v) => write!(f, "{v}"),
            Self::UnsignedInteger(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::String(v) | Self::Other(v) => f.write_str(v),
        }
    }
}

/// Kind of a writable scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    /// Integer
    Integer,
    /// Floating point
    Float,
    /// Boolean
    Boolean,
    /// String
    String,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Integer => "integer",
            Self::Float => "float",
            Self::Boolean => "boolean",
            Self::String => "string",
        })
    }
}

/// Operator-supplied scalar for a write.
///
/// Only these four kinds are writable; no coercion between them is attempted.
#[derive(Debug, Clone, PartialEq)]
pub enum TypedValue {
    /// Integer value
    Integer(i64),
    /// Floating point value
    Float(f64),
    /// Boolean value
    Boolean(bool),
    /// String value
    String(String),
}

impl TypedValue {
    /// Kind of this value.
    #[must_use]
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Integer(_) => ValueKind::Integer,
            Self::Float(_) => ValueKind::Float,
            Self::Boolean(_) => ValueKind::Boolean,
            Self::String(_) => ValueKind::String,
        }
    }

    /// Parse operator text as the given kind.
    ///
    /// Booleans accept `true`/`false` and `1`/`0`.
    ///
    /// # Errors
    ///
    /// Returns the offending text if it does not parse as `kind`.
    pub fn parse(kind: ValueKind, text: &str) -> Result<Self, String> {
        let text = text.trim();
        match kind {
            ValueKind::Integer => text.parse().map(Self::Integer).map_err(|_| text.to_string()),
            ValueKind::Float => text.parse().map(Self::Float).map_err(|_| text.to_string()),
            ValueKind::Boolean => match text.to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(Self::Boolean(true)),
                "false" | "0" => Ok(Self::Boolean(false)),
                _ => Err(text.to_string()),
            },
            ValueKind::String => Ok(Self::String(text.to_string())),
        }
    }
}

impl From<TypedValue> for Variant {
    fn from(value: TypedValue) -> Self {
        match value {
            TypedValue::Integer(v) => Self::Integer(v),
            TypedValue::Float(v) => Self::Double(v),
            TypedValue::Boolean(v) => Self::Boolean(v),
            TypedValue::String(v) => Self::String(v),
        }
    }
}

/// Declared data type of a variable node.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum DataType {
    /// Boolean
    Boolean,
    /// 8-bit signed
    SByte,
    /// 8-bit unsigned
    Byte,
    /// 16-bit signed
    Int16,
    /// 16-bit unsigned
    UInt16,
    /// 32-bit signed
    Int32,
    /// 32-bit unsigned
    UInt32,
    /// 64-bit signed
    Int64,
    /// 64-bit unsigned
    UInt64,
    /// Single precision float
    Float,
    /// Double precision float
    Double,
    /// String
    String,
    /// Any other declared type, by node id
    Other(String),
    /// No declared type (objects, `BaseDataType`)
    #[default]
    Unspecified,
}

impl DataType {
    /// Map the node id of a data type definition.
    #[must_use]
    pub fn from_type_node(node: &NodeIdentity) -> Self {
        match (node.namespace, &node.identifier) {
            (0, Identifier::Numeric(id)) => match id {
                1 => Self::Boolean,
                2 => Self::SByte,
                3 => Self::Byte,
                4 => Self::Int16,
                5 => Self::UInt16,
                6 => Self::Int32,
                7 => Self::UInt32,
                8 => Self::Int64,
                9 => Self::UInt64,
                10 => Self::Float,
                11 => Self::Double,
                12 => Self::String,
                24 => Self::Unspecified,
                _ => Self::Other(node.to_string()),
            },
            _ => Self::Other(node.to_string()),
        }
    }

    /// Whether the type is one of the integer widths.
    #[must_use]
    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            Self::SByte
                | Self::Byte
                | Self::Int16
                | Self::UInt16
                | Self::Int32
                | Self::UInt32
                | Self::Int64
                | Self::UInt64
        )
    }

    fn integer_bounds(&self) -> Option<(i128, i128)> {
        let bounds = match self {
            Self::SByte => (i128::from(i8::MIN), i128::from(i8::MAX)),
            Self::Byte => (0, i128::from(u8::MAX)),
            Self::Int16 => (i128::from(i16::MIN), i128::from(i16::MAX)),
            Self::UInt16 => (0, i128::from(u16::MAX)),
            Self::Int32 => (i128::from(i32::MIN), i128::from(i32::MAX)),
            Self::UInt32 => (0, i128::from(u32::MAX)),
            Self::Int64 => (i128::from(i64::MIN), i128::from(i64::MAX)),
            Self::UInt64 => (0, i128::from(u64::MAX)),
            _ => return None,
        };
        Some(bounds)
    }

    fn is_unsigned(&self) -> bool {
        matches!(self, Self::Byte | Self::UInt16 | Self::UInt32 | Self::UInt64)
    }

    /// Convert an operator value to a variant this type accepts.
    ///
    /// Integers fit any integer width they are in range for, floats fit
    /// `Float` and `Double`, booleans and strings only their own type.
    /// `Unspecified` accepts any kind unchanged and leaves the verdict to the server.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` for an incompatible kind, `OutOfRange` for an integer
    /// that does not fit the declared width, `FloatOutOfRange` for a finite
    /// value that overflows `Float`.
    pub fn coerce(&self, value: &TypedValue) -> Result<Variant, ProtocolError> {
        match (self, value) {
            (Self::Unspecified, value) => Ok(value.clone().into()),
            (Self::Boolean, TypedValue::Boolean(v)) => Ok(Variant::Boolean(*v)),
            (Self::String, TypedValue::String(v)) => Ok(Variant::String(v.clone())),
            (Self::Float, TypedValue::Float(v)) => {
                #[allow(clippy::cast_possible_truncation)]
                let narrow = *v as f32;
                if v.is_finite() && narrow.is_infinite() {
                    return Err(ProtocolError::FloatOutOfRange {
                        declared: Self::Float,
                        value: *v,
                    });
                }
                Ok(Variant::Float(narrow))
            }
            (Self::Double, TypedValue::Float(v)) => Ok(Variant::Double(*v)),
            (declared, TypedValue::Integer(v)) if declared.is_integer() => {
                let out_of_range = || ProtocolError::OutOfRange {
                    declared: declared.clone(),
                    value: *v,
                };
                let (min, max) = declared.integer_bounds().ok_or_else(out_of_range)?;
                let wide = i128::from(*v);
                if wide < min || wide > max {
                    return Err(out_of_range());
                }
                if declared.is_unsigned() {
                    u64::try_from(*v)
                        .map(Variant::UnsignedInteger)
                        .map_err(|_| out_of_range())
                } else {
                    Ok(Variant::Integer(*v))
                }
            }
            (declared, value) => Err(ProtocolError::TypeMismatch {
                declared: declared.clone(),
                supplied: value.kind(),
            }),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Boolean => "Boolean",
            Self::SByte => "SByte",
            Self::Byte => "Byte",
            Self::Int16 => "Int16",
            Self::UInt16 => "UInt16",
            Self::Int32 => "Int32",
            Self::UInt32 => "UInt32",
            Self::Int64 => "Int64",
            Self::UInt64 => "UInt64",
            Self::Float => "Float",
            Self::Double => "Double",
            Self::String => "String",
            Self::Other(id) => return f.write_str(id),
            Self::Unspecified => "Unspecified",
        };
        f.write_str(name)
    }
}
