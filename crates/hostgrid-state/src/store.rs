//! StateStore: redb-backed instance registry.
//!
//! Provides typed CRUD over instance records and the orphan ledger. All
//! values are JSON-serialized into redb's `&[u8]` value columns. The store
//! supports both on-disk and in-memory backends (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable};
use tracing::debug;

use hostgrid_core::{InstanceId, ResourceRef, epoch_secs};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

/// Thread-safe instance registry backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
}

impl StateStore {
    /// Open (or create) a persistent registry at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "registry opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory registry (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!("in-memory registry opened");
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        txn.open_table(ORPHANS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    // ── Instances ──────────────────────────────────────────────────

    /// Insert or replace an instance record.
    pub fn put_instance(&self, record: &InstanceRecord) -> StateResult<()> {
        let key = record.table_key();
        let value = serde_json::to_vec(record).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, status = %record.status, "instance stored");
        Ok(())
    }

    /// Get an instance record by identifier.
    pub fn get_instance(&self, id: &InstanceId) -> StateResult<Option<InstanceRecord>> {
        let key = id.to_string();
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        match table.get(key.as_str()).map_err(map_err!(Read))? {
            Some(guard) => {
                let record: InstanceRecord =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    /// List all instance records.
    pub fn list_instances(&self) -> StateResult<Vec<InstanceRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: InstanceRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    /// Delete an instance record. Returns true if it existed.
    pub fn delete_instance(&self, id: &InstanceId) -> StateResult<bool> {
        let key = id.to_string();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, existed, "instance deleted");
        Ok(existed)
    }

    /// Start a fresh provisioning run for `record`.
    ///
    /// Replaces a previous `provisioning` or `error` record for the same
    /// instance, keeping its `created_at`. A `running` record is terminal
    /// and is left untouched.
    pub fn begin_run(&self, record: &InstanceRecord) -> StateResult<()> {
        let key = record.table_key();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            let previous = table
                .get(key.as_str())
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec());

            let mut fresh = record.clone();
            fresh.status = hostgrid_core::InstanceStatus::Provisioning;
            fresh.error = None;
            fresh.url = None;
            if let Some(bytes) = previous {
                let old: InstanceRecord =
                    serde_json::from_slice(&bytes).map_err(map_err!(Deserialize))?;
                if old.status == hostgrid_core::InstanceStatus::Running {
                    return Err(StateError::InvalidTransition {
                        id: record.instance_id,
                        from: old.status,
                        to: hostgrid_core::InstanceStatus::Provisioning,
                    });
                }
                fresh.created_at = old.created_at;
            }

            let value = serde_json::to_vec(&fresh).map_err(map_err!(Serialize))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, "provisioning run recorded");
        Ok(())
    }

    /// Apply a terminal status to a record in `provisioning` state.
    ///
    /// The read-check-write happens inside one write transaction.
    pub fn apply_update(
        &self,
        id: &InstanceId,
        update: StatusUpdate,
    ) -> StateResult<InstanceRecord> {
        let key = id.to_string();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let record;
        {
            let mut table = txn.open_table(INSTANCES).map_err(map_err!(Table))?;
            let bytes = table
                .get(key.as_str())
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec())
                .ok_or(StateError::NotFound(*id))?;
            let mut current: InstanceRecord =
                serde_json::from_slice(&bytes).map_err(map_err!(Deserialize))?;

            if !current.status.can_transition_to(update.status) {
                return Err(StateError::InvalidTransition {
                    id: *id,
                    from: current.status,
                    to: update.status,
                });
            }

            current.status = update.status;
            current.resources = update.resources;
            current.url = update.url;
            current.error = update.error;
            current.updated_at = epoch_secs();

            let value = serde_json::to_vec(&current).map_err(map_err!(Serialize))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
            record = current;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, status = %record.status, "instance status updated");
        Ok(record)
    }

    /// Shared-pool tenants recorded in the registry.
    ///
    /// Used to rebuild allocator counts after a restart.
    pub fn pool_assignments(&self) -> StateResult<Vec<PoolAssignment>> {
        Ok(self
            .list_instances()?
            .into_iter()
            .filter_map(|record| {
                record.resources.pool_member().map(|member| PoolAssignment {
                    instance_id: record.instance_id,
                    member_id: member.to_string(),
                })
            })
            .collect())
    }

    // ── Orphans ────────────────────────────────────────────────────

    /// Add resources to the orphan ledger of an instance.
    ///
    /// Entries already present are not duplicated.
    pub fn put_orphans(&self, id: &InstanceId, resources: &[ResourceRef]) -> StateResult<()> {
        let key = id.to_string();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(ORPHANS).map_err(map_err!(Table))?;
            let previous = table
                .get(key.as_str())
                .map_err(map_err!(Read))?
                .map(|guard| guard.value().to_vec());

            let mut record = match previous {
                Some(bytes) => {
                    serde_json::from_slice::<OrphanRecord>(&bytes).map_err(map_err!(Deserialize))?
                }
                None => OrphanRecord {
                    instance_id: *id,
                    resources: Vec::new(),
                    recorded_at: 0,
                },
            };
            for resource in resources {
                if !record.resources.contains(resource) {
                    record.resources.push(resource.clone());
                }
            }
            record.recorded_at = epoch_secs();

            let value = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            table
                .insert(key.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(%key, count = resources.len(), "orphans recorded");
        Ok(())
    }

    /// List the orphan ledger.
    pub fn list_orphans(&self) -> StateResult<Vec<OrphanRecord>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(ORPHANS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: OrphanRecord =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    /// Drop the orphan entry of an instance. Returns true if it existed.
    pub fn delete_orphans(&self, id: &InstanceId) -> StateResult<bool> {
        let key = id.to_string();
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(ORPHANS).map_err(map_err!(Table))?;
            existed = table.remove(key.as_str()).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }
}
