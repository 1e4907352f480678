//! hostgrid-backends: resource provider contracts for Hostgrid.
//!
//! One async trait per provider: [`DatabaseBackend`], [`StorageBackend`],
//! [`ComputeBackend`], [`EdgeBackend`] and [`InstanceInitializer`]. Every
//! lookup is by the deterministic names from
//! [`ResourceNames`](hostgrid_core::ResourceNames), and every delete
//! distinguishes "deleted" from "was not there" so teardown can be
//! repeated safely.
//!
//! The [`memory`] module holds in-process adapters with fault injection;
//! [`HttpInitializer`] calls a deployed instance's setup endpoint.

pub mod compute;
pub mod database;
pub mod edge;
pub mod error;
pub mod init;
pub mod memory;
pub mod storage;

use std::sync::Arc;

pub use compute::{ComputeBackend, DeploySpec};
pub use database::{DatabaseBackend, DedicatedDatabaseSpec, PollHandle, SharedDatabaseSpec};
pub use edge::{EdgeBackend, PublishSpec};
pub use error::{BackendError, BackendResult};
pub use init::{HttpInitializer, InstanceInitializer};
pub use memory::MemoryBackends;
pub use storage::StorageBackend;

/// Outcome of a delete call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deletion {
    Deleted,
    /// Nothing to delete. Teardown treats this as done.
    NotFound,
}

/// Outcome of polling an asynchronous creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Pending,
}

/// The set of adapters one orchestrator drives.
#[derive(Clone)]
pub struct Backends {
    pub database: Arc<dyn DatabaseBackend>,
    pub storage: Arc<dyn StorageBackend>,
    pub compute: Arc<dyn ComputeBackend>,
    pub edge: Arc<dyn EdgeBackend>,
    pub initializer: Arc<dyn InstanceInitializer>,
}
