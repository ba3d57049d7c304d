//! Error types for the sync engine.

use crate::config::SyncCategory;
use crate::store::StoreError;
use shelfsync_protocol::ProtocolError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The server rejected the credentials.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Network or server-side failure.
    #[error("network error: {message}")]
    Network {
        /// Error message.
        message: String,
        /// Whether a later run may succeed.
        retryable: bool,
    },

    /// Synchronization is switched off for this category.
    #[error("synchronization disabled for {0}")]
    SynchronizationDisabled(SyncCategory),

    /// The server answered with something that is not a usable payload.
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    /// Protocol message could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Local library storage failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Local I/O failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl SyncError {
    /// Creates a retryable network error.
    pub fn network_retryable(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable network error.
    pub fn network_fatal(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if a later run can be expected to succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network { retryable, .. } => *retryable,
            SyncError::MalformedResponse(_) | SyncError::Protocol(_) => true,
            _ => false,
        }
    }

    /// Returns true if the credentials were rejected.
    pub fn is_authentication(&self) -> bool {
        matches!(self, SyncError::AuthenticationFailed(_))
    }

    /// Returns true if synchronization is switched off.
    pub fn is_disabled(&self) -> bool {
        matches!(self, SyncError::SynchronizationDisabled(_))
    }
}
