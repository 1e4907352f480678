//! Compute backend contract.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;

use hostgrid_core::{ComputeHandle, ComputeTier};

use crate::Deletion;
use crate::error::BackendResult;

/// What to deploy for one instance.
#[derive(Clone, PartialEq, Eq)]
pub struct DeploySpec {
    pub function_name: String,
    /// Runtime environment. Values carry secrets.
    pub env: BTreeMap<String, String>,
    pub artifact_version: String,
    pub tier: ComputeTier,
}

impl fmt::Debug for DeploySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeploySpec")
            .field("function_name", &self.function_name)
            .field("env_keys", &self.env.keys().collect::<Vec<_>>())
            .field("artifact_version", &self.artifact_version)
            .field("tier", &self.tier)
            .finish()
    }
}

#[async_trait]
pub trait ComputeBackend: Send + Sync {
    async fn find_function(&self, name: &str) -> BackendResult<Option<ComputeHandle>>;

    /// Deploy and return the public endpoint. The returned handle records
    /// the tier actually used, which may differ from the requested one.
    async fn deploy(&self, spec: &DeploySpec) -> BackendResult<ComputeHandle>;

    async fn teardown(&self, handle: &ComputeHandle) -> BackendResult<Deletion>;
}
