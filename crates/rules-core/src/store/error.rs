//! Sync store errors

use thiserror::Error;

use crate::gateway::{GatewayError, Resource};

/// Errors returned by [`SyncStore`](super::SyncStore) operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// No backend is configured; the store runs in disabled mode
    #[error("No backend configured. Set backend_url and backend_key to enable the feed.")]
    Disabled,

    /// A backend call failed. Any optimistic change has been rolled back.
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    /// A record could not be converted to or from JSON
    #[error("Invalid {resource} record: {source}")]
    Decode {
        resource: Resource,
        #[source]
        source: serde_json::Error,
    },
}

impl StoreError {
    pub(crate) fn decode(resource: Resource) -> impl FnOnce(serde_json::Error) -> Self {
        move |source| StoreError::Decode { resource, source }
    }

    /// Whether the same call could succeed later
    pub fn is_retryable(&self) -> bool {
        matches!(self, StoreError::Gateway(e) if e.is_retryable())
    }

    /// Whether the failure was a duplicate vote
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Gateway(GatewayError::Conflict(_)))
    }
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;
