//! Error types for the device simulator

use thiserror::Error;

use crate::fault::FaultError;

/// Errors raised by a device store
#[derive(Debug, Error)]
pub enum StoreError {
    /// No device at this address
    #[error("device not found: {0}")]
    DeviceNotFound(String),

    /// A device already uses this address
    #[error("device already exists at address {0}")]
    DuplicateAddress(String),

    /// No property matched
    #[error("property {property} not found on device {address}")]
    PropertyNotFound {
        /// Device address
        address: String,
        /// Key or command that was looked up
        property: String,
    },

    /// No scenario with this name
    #[error("scenario not found: {0}")]
    ScenarioNotFound(String),

    /// Fault parameters out of range
    #[error("invalid fault: {0}")]
    InvalidFault(#[from] FaultError),

    /// Backing storage is not reachable
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// I/O error reading a fixture
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// Malformed fixture
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}
