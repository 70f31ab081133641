//! Error types for the sync module.

use thiserror::Error;

/// Errors that can occur during sync operations.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The remote peer does not speak the requested stream protocol.
    /// Tolerated silently by the engine.
    #[error("peer does not support protocol {0}")]
    UnsupportedProtocol(String),

    /// Transport-level error (dial, stream, publish).
    #[error("transport error: {0}")]
    Transport(String),

    /// A dial or handshake exceeded its deadline. Treated as transport
    /// misbehavior.
    #[error("timeout: {0}")]
    Timeout(String),

    /// A sync envelope could not be decoded.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// A head's recomputed content address did not match the advertised one.
    #[error("hash mismatch: advertised {advertised}, computed {computed}")]
    HashMismatch {
        advertised: String,
        computed: String,
    },

    /// An entry or envelope failed a core-level check.
    #[error("core error: {0}")]
    Core(#[from] tidelog_core::CoreError),
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;
