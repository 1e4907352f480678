//! RollbackLedger: resources a run has created or adopted.
//!
//! Entries are appended as soon as a resource exists and are removed only
//! after the owning adapter confirms the delete (or reports the resource
//! already gone). Compensation walks the entries newest first, keeps
//! going past failures, and leaves every unconfirmed entry in place.

use tokio::time::timeout;
use tracing::{info, warn};

use hostgrid_backends::{BackendError, Backends, Deletion};
use hostgrid_core::{
    ComputeHandle, DatabaseHandle, EdgeHandle, InstanceId, MemberId, ResourceHandles,
    ResourceKind, ResourceRef, Stage, StageTimeouts, StorageHandle,
};
use hostgrid_pool::SharedPool;

/// One compensable resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LedgerEntry {
    PoolSlot { member_id: MemberId },
    Database(DatabaseHandle),
    Bucket(StorageHandle),
    Function(ComputeHandle),
    Distribution(EdgeHandle),
}

impl LedgerEntry {
    pub fn resource_ref(&self) -> ResourceRef {
        match self {
            LedgerEntry::PoolSlot { member_id } => {
                ResourceRef::new(ResourceKind::PoolSlot, member_id.clone())
            }
            LedgerEntry::Database(db) => ResourceRef::new(ResourceKind::Database, db.resource_id()),
            LedgerEntry::Bucket(b) => ResourceRef::new(ResourceKind::Bucket, b.bucket_name.clone()),
            LedgerEntry::Function(f) => {
                ResourceRef::new(ResourceKind::Function, f.function_name.clone())
            }
            LedgerEntry::Distribution(d) => {
                ResourceRef::new(ResourceKind::Distribution, d.alias.clone())
            }
        }
    }

    /// The stage whose timeout bounds this entry's delete call.
    fn stage(&self) -> Stage {
        match self {
            LedgerEntry::PoolSlot { .. } | LedgerEntry::Database(_) => Stage::Database,
            LedgerEntry::Bucket(_) => Stage::Storage,
            LedgerEntry::Function(_) => Stage::Compute,
            LedgerEntry::Distribution(_) => Stage::EdgeRouting,
        }
    }
}

/// What a compensation pass achieved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompensationReport {
    /// Confirmed deleted by this pass.
    pub removed: Vec<ResourceRef>,
    /// Reported missing by the adapter.
    pub already_absent: Vec<ResourceRef>,
    /// Still present or unknown.
    pub unresolved: Vec<ResourceRef>,
}

impl CompensationReport {
    pub fn is_clean(&self) -> bool {
        self.unresolved.is_empty()
    }
}

/// Ordered record of what one instance owns.
#[derive(Debug, Clone)]
pub struct RollbackLedger {
    instance_id: InstanceId,
    entries: Vec<LedgerEntry>,
}

impl RollbackLedger {
    pub fn new(instance_id: InstanceId) -> Self {
        Self {
            instance_id,
            entries: Vec::new(),
        }
    }

    pub fn record(&mut self, entry: LedgerEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[LedgerEntry] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn unresolved(&self) -> Vec<ResourceRef> {
        self.entries.iter().map(LedgerEntry::resource_ref).collect()
    }

    /// Handles of the resources still recorded.
    pub fn handles(&self) -> ResourceHandles {
        let mut handles = ResourceHandles::default();
        for entry in &self.entries {
            match entry {
                LedgerEntry::PoolSlot { .. } => {}
                LedgerEntry::Database(db) => handles.database = Some(db.clone()),
                LedgerEntry::Bucket(b) => handles.storage = Some(b.clone()),
                LedgerEntry::Function(f) => handles.compute = Some(f.clone()),
                LedgerEntry::Distribution(d) => handles.edge = Some(d.clone()),
            }
        }
        handles
    }

    /// Delete everything recorded, newest first.
    ///
    /// Pool slots go last, and only once no database delete has failed.
    /// Each delete is bounded by the timeout of the stage that created the
    /// resource.
    pub async fn compensate(
        &mut self,
        backends: &Backends,
        pool: &SharedPool,
        timeouts: &StageTimeouts,
    ) -> CompensationReport {
        let mut report = CompensationReport::default();
        let mut kept = Vec::new();
        let mut slots = Vec::new();
        let mut database_left = false;

        while let Some(entry) = self.entries.pop() {
            if matches!(entry, LedgerEntry::PoolSlot { .. }) {
                slots.push(entry);
                continue;
            }
            if !self.remove_one(&entry, backends, pool, timeouts, &mut report).await {
                if matches!(entry, LedgerEntry::Database(_)) {
                    database_left = true;
                }
                kept.push(entry);
            }
        }

        for entry in slots {
            if database_left {
                if let LedgerEntry::PoolSlot { member_id } = &entry {
                    warn!(
                        instance = %self.instance_id,
                        member = %member_id,
                        "database still present, keeping pool slot"
                    );
                }
                report.unresolved.push(entry.resource_ref());
                kept.push(entry);
            } else if !self.remove_one(&entry, backends, pool, timeouts, &mut report).await {
                kept.push(entry);
            }
        }

        kept.reverse();
        report.unresolved.reverse();
        self.entries = kept;
        report
    }

    /// Delete one entry and file the outcome. False if it is still present.
    async fn remove_one(
        &self,
        entry: &LedgerEntry,
        backends: &Backends,
        pool: &SharedPool,
        timeouts: &StageTimeouts,
        report: &mut CompensationReport,
    ) -> bool {
        let resource = entry.resource_ref();
        let limit = timeouts.for_stage(entry.stage());
        let outcome = match timeout(limit, delete(entry, backends, pool, self.instance_id)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(BackendError::TimedOut(limit)),
        };

        match outcome {
            Ok(Deletion::Deleted) => {
                info!(instance = %self.instance_id, %resource, "compensated");
                report.removed.push(resource);
                true
            }
            Ok(Deletion::NotFound) => {
                info!(instance = %self.instance_id, %resource, "already absent");
                report.already_absent.push(resource);
                true
            }
            Err(e) => {
                warn!(instance = %self.instance_id, %resource, error = %e, "compensation failed");
                report.unresolved.push(resource);
                false
            }
        }
    }
}

async fn delete(
    entry: &LedgerEntry,
    backends: &Backends,
    pool: &SharedPool,
    instance_id: InstanceId,
) -> Result<Deletion, BackendError> {
    match entry {
        LedgerEntry::PoolSlot { .. } => Ok(match pool.release(instance_id) {
            Some(_) => Deletion::Deleted,
            None => Deletion::NotFound,
        }),
        LedgerEntry::Database(db) => backends.database.delete(db).await,
        LedgerEntry::Bucket(b) => backends.storage.delete_bucket(b).await,
        LedgerEntry::Function(f) => backends.compute.teardown(f).await,
        LedgerEntry::Distribution(d) => backends.edge.unpublish(d).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostgrid_backends::memory::Op;
    use hostgrid_backends::{MemoryBackends, SharedDatabaseSpec, StorageBackend};
    use hostgrid_core::ResourceNames;
    use hostgrid_pool::SharedPoolMember;
    use std::time::Duration;

    struct Fixture {
        mem: MemoryBackends,
        pool: SharedPool,
        ledger: RollbackLedger,
        names: ResourceNames,
    }

    async fn fixture() -> Fixture {
        let id = InstanceId::generate();
        let names = ResourceNames::derive(&id);
        let mem = MemoryBackends::new();
        let pool = SharedPool::new([SharedPoolMember::new("pg-a", "pg-a.internal", 4)]);
        let mut ledger = RollbackLedger::new(id);

        let slot = pool.reserve(id).unwrap();
        ledger.record(LedgerEntry::PoolSlot { member_id: slot.member_id.clone() });
        let db = mem
            .backends()
            .database
            .create_shared(&SharedDatabaseSpec {
                member_id: slot.member_id,
                endpoint: slot.endpoint,
                database: names.database_name.clone(),
                user: names.database_user.clone(),
                password: "pw".to_string(),
            })
            .await
            .unwrap();
        ledger.record(LedgerEntry::Database(db));
        let bucket = mem.storage.create_bucket(&names.bucket_name, 1).await.unwrap();
        ledger.record(LedgerEntry::Bucket(bucket));

        Fixture { mem, pool, ledger, names }
    }

    fn slots(pool: &SharedPool) -> u32 {
        pool.snapshot().iter().map(|m| m.current_count).sum()
    }

    #[tokio::test]
    async fn clean_compensation_empties_ledger() {
        let mut f = fixture().await;
        let report = f
            .ledger
            .compensate(&f.mem.backends(), &f.pool, &StageTimeouts::default())
            .await;

        assert!(report.is_clean());
        assert_eq!(report.removed.len(), 3);
        // Newest first.
        assert_eq!(report.removed[0].kind, ResourceKind::Bucket);
        assert_eq!(report.removed[2].kind, ResourceKind::PoolSlot);
        assert!(f.ledger.is_empty());
        assert_eq!(f.mem.resource_count(), 0);
        assert_eq!(slots(&f.pool), 0);
    }

    #[tokio::test]
    async fn failed_delete_keeps_entry_and_continues() {
        let mut f = fixture().await;
        f.mem.storage.faults.fail(Op::Delete);

        let report = f
            .ledger
            .compensate(&f.mem.backends(), &f.pool, &StageTimeouts::default())
            .await;

        assert!(!report.is_clean());
        assert_eq!(
            report.unresolved,
            vec![ResourceRef::new(ResourceKind::Bucket, f.names.bucket_name.clone())]
        );
        assert!(f.mem.storage.contains(&f.names.bucket_name));
        assert!(f.mem.database.is_empty());
        assert_eq!(slots(&f.pool), 0);
        assert_eq!(f.ledger.len(), 1);
        assert!(f.ledger.handles().storage.is_some());

        // A second pass after the fault clears finishes the job.
        f.mem.storage.faults.heal(Op::Delete);
        let report = f
            .ledger
            .compensate(&f.mem.backends(), &f.pool, &StageTimeouts::default())
            .await;
        assert!(report.is_clean());
        assert_eq!(f.mem.resource_count(), 0);
    }

    #[tokio::test]
    async fn pool_slot_kept_while_database_remains() {
        let mut f = fixture().await;
        f.mem.database.faults.fail(Op::Delete);

        let report = f
            .ledger
            .compensate(&f.mem.backends(), &f.pool, &StageTimeouts::default())
            .await;

        let kinds: Vec<ResourceKind> = report.unresolved.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![ResourceKind::PoolSlot, ResourceKind::Database]);
        assert_eq!(slots(&f.pool), 1);
        assert!(!f.mem.storage.contains(&f.names.bucket_name));
    }

    #[tokio::test]
    async fn slot_recorded_after_its_database_is_still_released_last() {
        let mut f = fixture().await;
        // Adoption records the database before claiming the slot.
        f.ledger.entries.swap(0, 1);
        f.mem.database.faults.fail(Op::Delete);

        let report = f
            .ledger
            .compensate(&f.mem.backends(), &f.pool, &StageTimeouts::default())
            .await;
        assert_eq!(slots(&f.pool), 1);
        assert!(report.unresolved.iter().any(|r| r.kind == ResourceKind::PoolSlot));

        f.mem.database.faults.heal(Op::Delete);
        let report = f
            .ledger
            .compensate(&f.mem.backends(), &f.pool, &StageTimeouts::default())
            .await;
        assert!(report.is_clean());
        let kinds: Vec<ResourceKind> = report.removed.iter().map(|r| r.kind).collect();
        assert_eq!(kinds, vec![ResourceKind::Database, ResourceKind::PoolSlot]);
        assert_eq!(slots(&f.pool), 0);
    }

    #[tokio::test]
    async fn missing_resources_count_as_absent() {
        let mut f = fixture().await;
        let backends = f.mem.backends();
        if let LedgerEntry::Bucket(b) = &f.ledger.entries()[2] {
            backends.storage.delete_bucket(b).await.unwrap();
        }

        let report = f
            .ledger
            .compensate(&backends, &f.pool, &StageTimeouts::default())
            .await;
        assert!(report.is_clean());
        assert_eq!(report.already_absent.len(), 1);
        assert_eq!(report.removed.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_delete_times_out() {
        let mut f = fixture().await;
        f.mem.storage.faults.stall(Op::Delete, Duration::from_secs(3600));
        let timeouts = StageTimeouts {
            storage: Duration::from_secs(5),
            ..StageTimeouts::default()
        };

        let report = f.ledger.compensate(&f.mem.backends(), &f.pool, &timeouts).await;
        assert_eq!(report.unresolved.len(), 1);
        assert_eq!(report.unresolved[0].kind, ResourceKind::Bucket);
        assert!(f.mem.database.is_empty());
    }
}
