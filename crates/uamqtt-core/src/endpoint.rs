//! Endpoints offered by a source server.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Security level advertised by an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SecurityLevel {
    /// No security
    #[default]
    None,
    /// Basic128Rsa15
    Basic128,
    /// Basic256
    Basic256,
    /// Anything else the server reports
    Unknown,
}

impl SecurityLevel {
    /// Map the numeric level reported during discovery.
    #[must_use]
    pub fn from_level(level: u8) -> Self {
        match level {
            0 => Self::None,
            1 => Self::Basic128,
            2 => Self::Basic256,
            _ => Self::Unknown,
        }
    }

    /// Suffix appended to the endpoint URL when it is listed.
    #[must_use]
    pub fn suffix(self) -> &'static str {
        match self {
            Self::None => "#None",
            Self::Basic128 => "#Basic128",
            Self::Basic256 => "#Basic256",
            Self::Unknown => "#Unknown",
        }
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.suffix()[1..])
    }
}

impl std::str::FromStr for SecurityLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().trim_start_matches('#').to_ascii_lowercase().as_str() {
            "none" | "0" => Ok(Self::None),
            "basic128" | "basic128rsa15" | "1" => Ok(Self::Basic128),
            "basic256" | "2" => Ok(Self::Basic256),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown security level: {other}")),
        }
    }
}

/// Message security mode of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum SecurityMode {
    /// Plain messages
    #[default]
    None,
    /// Signed messages
    Sign,
    /// Signed and encrypted messages
    SignAndEncrypt,
    /// Mode the server reported but we do not recognise
    Invalid,
}

/// A connectable endpoint as returned by discovery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointDescriptor {
    /// Endpoint URL
    pub url: String,
    /// Security level
    pub security_level: SecurityLevel,
    /// Security policy URI as reported by the server
    pub security_policy_uri: String,
    /// Message security mode
    pub security_mode: SecurityMode,
}

impl EndpointDescriptor {
    /// Endpoint without security.
    #[must_use]
    pub fn insecure(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            security_level: SecurityLevel::None,
            security_policy_uri: "http://opcfoundation.org/UA/SecurityPolicy#None".to_string(),
            security_mode: SecurityMode::None,
        }
    }

    /// URL plus security suffix, e.g. `opc.tcp://localhost:4841/#None`.
    #[must_use]
    pub fn label(&self) -> String {
        format!("{}{}", self.url, self.security_level.suffix())
    }
}

impl fmt::Display for EndpointDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}
