//! Error taxonomy for the sync layer.
//!
//! The variants mirror how failures are recovered:
//!
//! - `TransientNetwork`: retried with backoff; rollback only once retries
//!   are exhausted.
//! - `Validation`: the server rejected the intent; always a full rollback,
//!   never retried.
//! - `Cancelled`: the operation was superseded; discarded silently, never
//!   surfaced to the user, never retried.
//! - `Conflict`: version mismatch; triggers a forced refetch instead of a
//!   blind rollback, since the cached snapshot itself may be stale.

use thiserror::Error;

/// Result alias used across the sync layer.
pub type SyncResult<T> = Result<T, SyncError>;

/// Failure of a fetch or mutation collaborator call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    /// Retryable infrastructure failure.
    #[error("transient network failure: {message}")]
    TransientNetwork { message: String },

    /// The server rejected the intent.
    #[error("mutation rejected: {reason}")]
    Validation { reason: String },

    /// The operation was superseded and its result must be discarded.
    #[error("operation cancelled")]
    Cancelled,

    /// The cached version the mutation was based on is no longer current.
    #[error("version conflict: local {local}, server {server}")]
    Conflict { local: u64, server: u64 },
}

impl SyncError {
    /// Whether the retry loop should attempt this operation again.
    pub fn is_transient(&self) -> bool {
        matches!(self, SyncError::TransientNetwork { .. })
    }

    /// Whether this failure must stay invisible to the user.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, SyncError::Cancelled)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        SyncError::TransientNetwork {
            message: message.into(),
        }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        SyncError::Validation {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_network_failures_are_transient() {
        assert!(SyncError::transient("timeout").is_transient());
        assert!(!SyncError::validation("stock exceeded").is_transient());
        assert!(!SyncError::Cancelled.is_transient());
        assert!(!SyncError::Conflict { local: 3, server: 7 }.is_transient());
    }

    #[test]
    fn test_cancellation_is_silent() {
        assert!(SyncError::Cancelled.is_cancellation());
        assert!(!SyncError::transient("timeout").is_cancellation());
    }
}
