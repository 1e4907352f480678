//! The registry contract the orchestrator records status transitions through.

use hostgrid_core::{InstanceId, ResourceRef};

use crate::error::StateResult;
use crate::store::StateStore;
use crate::types::{InstanceRecord, StatusUpdate};

/// Persistence of instance status, keyed by instance identifier.
///
/// The orchestrator calls it but does not own its storage.
pub trait InstanceRegistry: Send + Sync {
    /// Record the start of a provisioning run (`provisioning`).
    fn begin(&self, record: &InstanceRecord) -> StateResult<()>;

    /// Move a `provisioning` record to `running` or `error`.
    fn transition(&self, id: &InstanceId, update: StatusUpdate) -> StateResult<InstanceRecord>;

    fn get(&self, id: &InstanceId) -> StateResult<Option<InstanceRecord>>;

    /// Forget an instance after teardown. Returns true if it existed.
    fn remove(&self, id: &InstanceId) -> StateResult<bool>;

    /// Remember resources that could not be cleaned up.
    fn record_orphans(&self, id: &InstanceId, resources: &[ResourceRef]) -> StateResult<()>;

    /// Drop the orphan entry of an instance. Returns true if it existed.
    fn clear_orphans(&self, id: &InstanceId) -> StateResult<bool>;
}

impl InstanceRegistry for StateStore {
    fn begin(&self, record: &InstanceRecord) -> StateResult<()> {
        self.begin_run(record)
    }

    fn transition(&self, id: &InstanceId, update: StatusUpdate) -> StateResult<InstanceRecord> {
        self.apply_update(id, update)
    }

    fn get(&self, id: &InstanceId) -> StateResult<Option<InstanceRecord>> {
        self.get_instance(id)
    }

    fn remove(&self, id: &InstanceId) -> StateResult<bool> {
        self.delete_instance(id)
    }

    fn record_orphans(&self, id: &InstanceId, resources: &[ResourceRef]) -> StateResult<()> {
        self.put_orphans(id, resources)
    }

    fn clear_orphans(&self, id: &InstanceId) -> StateResult<bool> {
        self.delete_orphans(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostgrid_core::{InstanceStatus, ResourceHandles, ResourceKind};
    use std::sync::Arc;

    #[test]
    fn store_is_usable_as_trait_object() {
        let registry: Arc<dyn InstanceRegistry> = Arc::new(StateStore::open_in_memory().unwrap());
        let id = InstanceId::generate();

        registry
            .begin(&InstanceRecord::provisioning(id, "user-1", "myapp"))
            .unwrap();
        let record = registry
            .transition(
                &id,
                StatusUpdate {
                    status: InstanceStatus::Error,
                    resources: ResourceHandles::default(),
                    url: None,
                    error: Some("storage failed".to_string()),
                },
            )
            .unwrap();
        assert_eq!(record.status, InstanceStatus::Error);

        registry
            .record_orphans(&id, &[ResourceRef::new(ResourceKind::Bucket, "b")])
            .unwrap();
        assert!(registry.clear_orphans(&id).unwrap());
        assert!(registry.remove(&id).unwrap());
        assert!(registry.get(&id).unwrap().is_none());
    }
}
