//! Error types for backend adapters.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for adapter calls.
pub type BackendResult<T> = Result<T, BackendError>;

/// A provider call failed.
///
/// "Resource not found" on delete is not an error; adapters report it as
/// [`Deletion::NotFound`](crate::Deletion::NotFound).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("provider error: {0}")]
    Provider(String),

    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("database {0} failed to become ready")]
    ProvisioningFailed(String),

    #[error("call timed out after {0:?}")]
    TimedOut(Duration),

    #[error("{0} is not available yet")]
    MissingInput(&'static str),
}
