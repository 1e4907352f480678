//! Database backend contract.

use std::fmt;

use async_trait::async_trait;

use hostgrid_core::{DatabaseHandle, MemberId, ResourceNames};

use crate::error::BackendResult;
use crate::{Deletion, Readiness};

/// A tenant database on a shared pool host.
#[derive(Clone, PartialEq, Eq)]
pub struct SharedDatabaseSpec {
    pub member_id: MemberId,
    pub endpoint: String,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl fmt::Debug for SharedDatabaseSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedDatabaseSpec")
            .field("member_id", &self.member_id)
            .field("endpoint", &self.endpoint)
            .field("database", &self.database)
            .field("user", &self.user)
            .finish_non_exhaustive()
    }
}

/// A standalone database server for one tenant.
#[derive(Clone, PartialEq, Eq)]
pub struct DedicatedDatabaseSpec {
    pub resource_id: String,
    pub database: String,
    pub user: String,
    pub password: String,
    pub storage_gb: u32,
}

impl fmt::Debug for DedicatedDatabaseSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DedicatedDatabaseSpec")
            .field("resource_id", &self.resource_id)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("storage_gb", &self.storage_gb)
            .finish_non_exhaustive()
    }
}

/// Token for polling an asynchronous dedicated database creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollHandle {
    pub resource_id: String,
}

#[async_trait]
pub trait DatabaseBackend: Send + Sync {
    /// Look up a database created under the derived names of an instance,
    /// on a shared host or as a dedicated server.
    async fn find_database(&self, names: &ResourceNames) -> BackendResult<Option<DatabaseHandle>>;

    async fn create_shared(&self, spec: &SharedDatabaseSpec) -> BackendResult<DatabaseHandle>;

    /// Start creating a dedicated server. The handle is usable once
    /// [`poll_ready`](Self::poll_ready) reports [`Readiness::Ready`].
    async fn create_dedicated(
        &self,
        spec: &DedicatedDatabaseSpec,
    ) -> BackendResult<(DatabaseHandle, PollHandle)>;

    async fn poll_ready(&self, handle: &PollHandle) -> BackendResult<Readiness>;

    async fn delete(&self, handle: &DatabaseHandle) -> BackendResult<Deletion>;
}
