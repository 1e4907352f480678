//! Persisted record types.

use serde::{Deserialize, Serialize};

use hostgrid_core::{InstanceId, InstanceStatus, ResourceHandles, ResourceRef, epoch_secs};

/// Registry view of one hosted instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub instance_id: InstanceId,
    pub owner_id: String,
    pub subdomain: String,
    pub status: InstanceStatus,
    /// Resources the instance currently owns.
    pub resources: ResourceHandles,
    /// Public URL once the instance is running.
    pub url: Option<String>,
    /// Failure detail when `status` is `error`.
    pub error: Option<String>,
    /// Unix timestamp (seconds) of the first provisioning run.
    pub created_at: u64,
    /// Unix timestamp (seconds) of the last status change.
    pub updated_at: u64,
}

impl InstanceRecord {
    /// A fresh record in `provisioning` state.
    pub fn provisioning(instance_id: InstanceId, owner_id: &str, subdomain: &str) -> Self {
        let now = epoch_secs();
        Self {
            instance_id,
            owner_id: owner_id.to_string(),
            subdomain: subdomain.to_string(),
            status: InstanceStatus::Provisioning,
            resources: ResourceHandles::default(),
            url: None,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn table_key(&self) -> String {
        self.instance_id.to_string()
    }
}

/// Terminal outcome applied to a record in `provisioning` state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusUpdate {
    pub status: InstanceStatus,
    pub resources: ResourceHandles,
    pub url: Option<String>,
    pub error: Option<String>,
}

/// Resources a rollback or teardown left behind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrphanRecord {
    pub instance_id: InstanceId,
    pub resources: Vec<ResourceRef>,
    /// Unix timestamp (seconds) when the orphans were recorded.
    pub recorded_at: u64,
}

/// A shared-pool tenant as recorded in the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolAssignment {
    pub instance_id: InstanceId,
    pub member_id: String,
}
