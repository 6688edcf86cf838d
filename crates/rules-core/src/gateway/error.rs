//! Gateway error handling

use thiserror::Error;

use super::Resource;

/// Errors returned by backend calls
#[derive(Error, Debug, Clone, PartialEq)]
pub enum GatewayError {
    /// Backend unreachable, timed out, or failing server-side
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Record addressed by primary key does not exist
    #[error("No {resource} record with id '{id}'")]
    NotFound { resource: Resource, id: String },

    /// Uniqueness violation, e.g. a second vote on the same rule
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Backend refused the request (bad filter, permissions)
    #[error("Backend rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    /// Response body could not be decoded
    #[error("Invalid backend response: {0}")]
    Decode(String),
}

impl GatewayError {
    /// Whether retrying the same call later could succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Unavailable(_))
    }

    /// Classify an HTTP error status
    pub fn from_status(status: u16, resource: Resource, id: Option<&str>, body: String) -> Self {
        match status {
            404 => GatewayError::NotFound {
                resource,
                id: id.unwrap_or_default().to_string(),
            },
            409 => GatewayError::Conflict(body),
            408 | 429 | 500..=599 => {
                GatewayError::Unavailable(format!("HTTP {}: {}", status, body))
            }
            _ => GatewayError::Rejected {
                status,
                message: body,
            },
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_decode() {
            GatewayError::Decode(error.to_string())
        } else {
            GatewayError::Unavailable(error.to_string())
        }
    }
}

/// Result type for gateway operations
pub type GatewayResult<T> = Result<T, GatewayError>;
