//! Simulator error types

use thiserror::Error;

/// Simulator errors
#[derive(Error, Debug)]
pub enum SimError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Routing engine error
    #[error("Mesh error: {0}")]
    Mesh(#[from] mesh_core::MeshError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for simulator operations
pub type Result<T> = std::result::Result<T, SimError>;
