//! Error types for the Hostgrid instance registry.

use hostgrid_core::{InstanceId, InstanceStatus};
use thiserror::Error;

/// Result type alias for registry operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during registry operations.
#[derive(Debug, Clone, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("instance not found: {0}")]
    NotFound(InstanceId),

    #[error("instance {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: InstanceId,
        from: InstanceStatus,
        to: InstanceStatus,
    },
}
