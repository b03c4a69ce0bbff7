//! Mesh Simulator Library
//!
//! Runs several mesh-core nodes against an in-memory radio medium

pub mod config;
pub mod error;
pub mod medium;
pub mod sim;

pub use error::{Result, SimError};
