//! Mesh error types

use crate::packet::NodeId;
use thiserror::Error;

/// Mesh routing errors
#[derive(Error, Debug)]
pub enum MeshError {
    /// No route resolves to the destination
    #[error("No route to node {0}")]
    NoRoute(NodeId),

    /// Attempt to take a reserved identity (Broadcast or Direct)
    #[error("Reserved identity: {0}")]
    ReservedIdentity(NodeId),

    /// Application tried to use a protocol-reserved packet type
    #[error("Packet type {0:#04x} is reserved for protocol use")]
    ReservedType(u8),

    /// Node has no identity assigned yet
    #[error("Node identity not configured")]
    Unconfigured,

    /// Frame checksum did not verify
    #[error("Checksum mismatch")]
    Checksum,

    /// Frame failed structural validation
    #[error("Malformed frame: {0}")]
    Malformed(String),

    /// Link-layer transport error
    #[error("Link error: {0}")]
    Link(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for mesh operations
pub type Result<T> = std::result::Result<T, MeshError>;
