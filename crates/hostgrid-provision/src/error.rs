//! Provisioning error types.

use std::time::Duration;

use thiserror::Error;

use hostgrid_backends::BackendError;
use hostgrid_core::{InstanceId, ResourceRef, Stage, ValidationError};
use hostgrid_pool::PoolError;
use hostgrid_state::StateError;

/// Errors reported by the orchestrator.
///
/// Every variant except [`Validation`](Self::Validation),
/// [`AlreadyInProgress`](Self::AlreadyInProgress) and the two "left
/// resources behind" variants is reported after a clean rollback.
#[derive(Debug, Clone, Error)]
pub enum ProvisionError {
    #[error("invalid request: {0}")]
    Validation(#[from] ValidationError),

    #[error("shared database pool exhausted ({active_members} active members)")]
    AllocationExhausted { active_members: usize },

    #[error("{stage} stage failed: {cause}")]
    StageFailure { stage: Stage, cause: BackendError },

    #[error("{stage} stage timed out after {timeout:?}")]
    StageTimeout { stage: Stage, timeout: Duration },

    #[error("cancelled during {stage} stage")]
    Cancelled { stage: Stage },

    #[error("health check timed out after {attempts} probes ({elapsed:?})")]
    HealthCheckTimeout { attempts: u32, elapsed: Duration },

    #[error("rollback after \"{cause}\" left {} resource(s) behind", .unresolved.len())]
    RollbackPartialFailure {
        cause: Box<ProvisionError>,
        unresolved: Vec<ResourceRef>,
    },

    #[error("teardown left {} resource(s) behind", .unresolved.len())]
    DestroyIncomplete { unresolved: Vec<ResourceRef> },

    #[error("instance {0} already has an operation in progress")]
    AlreadyInProgress(InstanceId),

    #[error("pool error: {0}")]
    Pool(PoolError),

    #[error("registry error: {0}")]
    Registry(#[from] StateError),
}

impl From<PoolError> for ProvisionError {
    fn from(e: PoolError) -> Self {
        match e {
            PoolError::Exhausted { active_members } => {
                ProvisionError::AllocationExhausted { active_members }
            }
            other => ProvisionError::Pool(other),
        }
    }
}

impl ProvisionError {
    /// Whether retrying the same request is safe and may succeed.
    ///
    /// False when resources were left behind or the request itself is bad.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            ProvisionError::Validation(_)
                | ProvisionError::RollbackPartialFailure { .. }
                | ProvisionError::DestroyIncomplete { .. }
        )
    }

    /// The stage the failure is attributed to, if any.
    pub fn stage(&self) -> Option<Stage> {
        match self {
            ProvisionError::StageFailure { stage, .. }
            | ProvisionError::StageTimeout { stage, .. }
            | ProvisionError::Cancelled { stage } => Some(*stage),
            ProvisionError::AllocationExhausted { .. } | ProvisionError::Pool(_) => {
                Some(Stage::Database)
            }
            ProvisionError::RollbackPartialFailure { cause, .. } => cause.stage(),
            _ => None,
        }
    }

    /// Resources that still need cleanup.
    pub fn unresolved(&self) -> &[ResourceRef] {
        match self {
            ProvisionError::RollbackPartialFailure { unresolved, .. }
            | ProvisionError::DestroyIncomplete { unresolved } => unresolved,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostgrid_core::ResourceKind;

    #[test]
    fn exhausted_pool_maps_to_allocation_error() {
        let err: ProvisionError = PoolError::Exhausted { active_members: 2 }.into();
        assert!(matches!(err, ProvisionError::AllocationExhausted { active_members: 2 }));
        assert_eq!(err.stage(), Some(Stage::Database));
        assert!(err.is_retryable());
    }

    #[test]
    fn partial_rollback_is_not_retryable() {
        let err = ProvisionError::RollbackPartialFailure {
            cause: Box::new(ProvisionError::StageFailure {
                stage: Stage::Compute,
                cause: BackendError::Provider("boom".to_string()),
            }),
            unresolved: vec![ResourceRef::new(ResourceKind::Bucket, "hostgrid-abc")],
        };
        assert!(!err.is_retryable());
        assert_eq!(err.stage(), Some(Stage::Compute));
        assert_eq!(err.unresolved().len(), 1);
        assert!(err.to_string().contains("1 resource(s) behind"));
    }

    #[test]
    fn validation_is_not_retryable() {
        let err: ProvisionError = ValidationError::MissingOwner.into();
        assert!(!err.is_retryable());
        assert_eq!(err.stage(), None);
    }
}
