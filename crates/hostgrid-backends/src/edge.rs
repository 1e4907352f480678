//! Edge routing backend contract.

use async_trait::async_trait;

use hostgrid_core::EdgeHandle;

use crate::Deletion;
use crate::error::BackendResult;

/// A distribution in front of a compute origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishSpec {
    pub alias: String,
    pub origin_url: String,
    /// Public host name attached to the distribution.
    pub hostname: String,
}

#[async_trait]
pub trait EdgeBackend: Send + Sync {
    async fn find_distribution(&self, alias: &str) -> BackendResult<Option<EdgeHandle>>;

    async fn publish(&self, spec: &PublishSpec) -> BackendResult<EdgeHandle>;

    async fn unpublish(&self, handle: &EdgeHandle) -> BackendResult<Deletion>;
}
