//! # OPC UA Adapter
//!
//! Source transport for the gateway, built on the synchronous `opcua` client.
//!
//! `OpcUaTransport` discovers endpoints and activates sessions; each
//! `OpcUaSession` runs the client's session loop on its own thread, which is
//! also where data-change callbacks arrive.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod convert;
pub mod session;

pub use session::{OpcUaClientConfig, OpcUaSession, OpcUaTransport};
