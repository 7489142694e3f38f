use tether_store::StoreError;
use thiserror::Error;

use crate::state::StreamStatus;

/// Result alias for coordination operations over a store with error `SE`.
pub type Result<T, SE> = std::result::Result<T, Error<SE>>;

/// Input rejected before any store access.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// A stream ID, lock ID or key prefix is empty, too long, or uses
    /// characters outside its alphabet.
    #[error("invalid {field}: {reason}")]
    InvalidIdentifier {
        /// Which identifier was rejected.
        field: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// A cleanup pattern is too long or uses characters outside its alphabet.
    #[error("invalid pattern: {reason}")]
    InvalidPattern {
        /// What was wrong with it.
        reason: String,
    },
}

/// Errors returned by the lock manager, state store and sweeper.
#[derive(Debug, Error)]
pub enum Error<SE: StoreError> {
    /// Caller input failed validation. Never retried automatically.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A lease shorter than one millisecond was requested.
    #[error("lease must be at least one millisecond")]
    InvalidLease,

    /// The requested status change would leave a terminal state or skip a step.
    #[error("stream {stream_id} cannot move from {from} to {to}")]
    InvalidTransition {
        /// The stream being updated.
        stream_id: String,
        /// The status currently stored.
        from: StreamStatus,
        /// The status that was requested.
        to: StreamStatus,
    },

    /// A record could not be encoded for writing.
    #[error("failed to encode record: {0}")]
    Serialize(#[from] serde_json::Error),

    /// The backing store failed or was unreachable. Propagated unmodified.
    #[error("store error: {0}")]
    Store(#[source] SE),
}

impl<SE: StoreError> Error<SE> {
    /// Whether the error was caused by caller input rather than the store.
    #[must_use]
    pub const fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation(_) | Self::InvalidLease | Self::InvalidTransition { .. }
        )
    }
}
