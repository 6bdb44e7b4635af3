//! Error types for rill operations

use thiserror::Error;

/// Errors surfaced by the entity store collaborator.
///
/// The operation store never retries or masks these; they propagate to the
/// caller of whichever store call triggered the entity-store mutation.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EntityStoreError {
    #[error("entity store mutation failed: {reason}")]
    MutationFailed { reason: String },

    #[error("entity store snapshot unavailable: {reason}")]
    SnapshotUnavailable { reason: String },
}

/// Operation store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// The store has been disposed; every public call fails with this
    /// afterwards rather than silently no-oping.
    #[error("operation store has been disposed")]
    Disposed,

    /// A required key parameter was absent or malformed. Rejected
    /// synchronously at the call boundary.
    #[error("invalid operation request: {reason}")]
    InvalidRequest { reason: String },

    /// A failure from the entity store's own mutation primitive.
    #[error(transparent)]
    Entity(#[from] EntityStoreError),
}

impl StoreError {
    /// Build an invalid-request error with the given reason.
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }
}

/// Result type alias used across all rill crates.
pub type RillResult<T> = Result<T, StoreError>;
