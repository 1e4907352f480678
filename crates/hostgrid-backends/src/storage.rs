//! Object storage backend contract.

use async_trait::async_trait;

use hostgrid_core::StorageHandle;

use crate::Deletion;
use crate::error::BackendResult;

#[async_trait]
pub trait StorageBackend: Send + Sync {
    async fn find_bucket(&self, name: &str) -> BackendResult<Option<StorageHandle>>;

    /// Create a private bucket with a key scoped to it.
    async fn create_bucket(&self, name: &str, quota_gb: u32) -> BackendResult<StorageHandle>;

    /// Delete the bucket and revoke its key.
    async fn delete_bucket(&self, handle: &StorageHandle) -> BackendResult<Deletion>;
}
