//! Error types for the bridge

use homiq_sim::StoreError;
use thiserror::Error;

/// Errors raised by the bridge server
#[derive(Debug, Error)]
pub enum BridgeError {
    /// Could not bind the listener
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested
        addr: String,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// The bridge actor has stopped
    #[error("bridge actor is not running")]
    ActorClosed,

    /// A store operation requested by an admin command failed
    #[error("store error: {0}")]
    StoreError(#[from] StoreError),
}
