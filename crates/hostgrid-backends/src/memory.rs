//! In-memory backend adapters.
//!
//! These keep every resource in process memory. They back the daemon's
//! simulated mode and every orchestration test. Each adapter counts its
//! calls per [`Op`] and can be told to fail or stall a given operation.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info};
use uuid::Uuid;

use hostgrid_core::{
    AccessKey, AdminCredentials, ComputeHandle, ComputeTier, DatabaseCredentials,
    DatabaseHandle, DatabasePlacement, EdgeHandle, ResourceNames, StorageHandle,
};

use crate::compute::{ComputeBackend, DeploySpec};
use crate::database::{DatabaseBackend, DedicatedDatabaseSpec, PollHandle, SharedDatabaseSpec};
use crate::edge::{EdgeBackend, PublishSpec};
use crate::error::{BackendError, BackendResult};
use crate::init::InstanceInitializer;
use crate::storage::StorageBackend;
use crate::{Backends, Deletion, Readiness};

/// Adapter operation classes that faults and counters are keyed by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Find,
    /// Create, deploy, publish or initialize.
    Create,
    Poll,
    Delete,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Injected failures, delays and call counters of one adapter.
#[derive(Debug, Default)]
pub struct Faults {
    failing: Mutex<HashSet<Op>>,
    delays: Mutex<HashMap<Op, Duration>>,
    calls: Mutex<HashMap<Op, usize>>,
}

impl Faults {
    /// Make every later `op` call fail until [`heal`](Self::heal).
    pub fn fail(&self, op: Op) {
        lock(&self.failing).insert(op);
    }

    pub fn heal(&self, op: Op) {
        lock(&self.failing).remove(&op);
    }

    /// Make every later `op` call wait `delay` before doing anything.
    pub fn stall(&self, op: Op, delay: Duration) {
        lock(&self.delays).insert(op, delay);
    }

    pub fn calls(&self, op: Op) -> usize {
        lock(&self.calls).get(&op).copied().unwrap_or(0)
    }

    async fn enter(&self, op: Op, what: &str) -> BackendResult<()> {
        *lock(&self.calls).entry(op).or_insert(0) += 1;
        let delay = lock(&self.delays).get(&op).copied();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if lock(&self.failing).contains(&op) {
            debug!(?op, what, "injected failure");
            return Err(BackendError::Provider(format!("injected {op:?} failure for {what}")));
        }
        Ok(())
    }
}

// ── Database ──────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct DatabaseState {
    /// Keyed by `DatabaseHandle::resource_id`.
    databases: BTreeMap<String, DatabaseHandle>,
    /// Remaining `Pending` answers per dedicated resource.
    pending: HashMap<String, u32>,
}

/// Shared hosts and dedicated servers held in memory.
#[derive(Debug, Default)]
pub struct MemoryDatabase {
    state: Mutex<DatabaseState>,
    polls_until_ready: AtomicU32,
    pub faults: Faults,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    /// Dedicated servers created from now on answer `Pending` this many
    /// times before `Ready`.
    pub fn set_polls_until_ready(&self, polls: u32) {
        self.polls_until_ready.store(polls, Ordering::SeqCst);
    }

    pub fn contains(&self, resource_id: &str) -> bool {
        lock(&self.state).databases.contains_key(resource_id)
    }

    pub fn len(&self) -> usize {
        lock(&self.state).databases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Place a database directly, bypassing faults and counters.
    pub fn seed(&self, handle: DatabaseHandle) {
        lock(&self.state)
            .databases
            .insert(handle.resource_id(), handle);
    }
}

#[async_trait]
impl DatabaseBackend for MemoryDatabase {
    async fn find_database(&self, names: &ResourceNames) -> BackendResult<Option<DatabaseHandle>> {
        self.faults.enter(Op::Find, &names.database_name).await?;
        let state = lock(&self.state);
        let found = state.databases.values().find(|db| match &db.placement {
            DatabasePlacement::Shared { .. } => db.database == names.database_name,
            DatabasePlacement::Dedicated { resource_id } => {
                *resource_id == names.dedicated_database_id
            }
        });
        Ok(found.cloned())
    }

    async fn create_shared(&self, spec: &SharedDatabaseSpec) -> BackendResult<DatabaseHandle> {
        self.faults.enter(Op::Create, &spec.database).await?;
        let handle = DatabaseHandle {
            placement: DatabasePlacement::Shared {
                member_id: spec.member_id.clone(),
            },
            endpoint: spec.endpoint.clone(),
            database: spec.database.clone(),
            credentials: DatabaseCredentials {
                user: spec.user.clone(),
                password: spec.password.clone(),
            },
        };
        lock(&self.state)
            .databases
            .insert(handle.resource_id(), handle.clone());
        info!(member = %spec.member_id, database = %spec.database, "created shared database");
        Ok(handle)
    }

    async fn create_dedicated(
        &self,
        spec: &DedicatedDatabaseSpec,
    ) -> BackendResult<(DatabaseHandle, PollHandle)> {
        self.faults.enter(Op::Create, &spec.resource_id).await?;
        let handle = DatabaseHandle {
            placement: DatabasePlacement::Dedicated {
                resource_id: spec.resource_id.clone(),
            },
            endpoint: format!("{}.db.hostgrid.internal", spec.resource_id),
            database: spec.database.clone(),
            credentials: DatabaseCredentials {
                user: spec.user.clone(),
                password: spec.password.clone(),
            },
        };
        let mut state = lock(&self.state);
        state
            .databases
            .insert(spec.resource_id.clone(), handle.clone());
        state.pending.insert(
            spec.resource_id.clone(),
            self.polls_until_ready.load(Ordering::SeqCst),
        );
        info!(resource = %spec.resource_id, "dedicated database creation started");
        Ok((
            handle,
            PollHandle {
                resource_id: spec.resource_id.clone(),
            },
        ))
    }

    async fn poll_ready(&self, handle: &PollHandle) -> BackendResult<Readiness> {
        self.faults.enter(Op::Poll, &handle.resource_id).await?;
        let mut state = lock(&self.state);
        if !state.databases.contains_key(&handle.resource_id) {
            return Err(BackendError::ProvisioningFailed(handle.resource_id.clone()));
        }
        match state.pending.get_mut(&handle.resource_id) {
            Some(remaining) if *remaining > 0 => {
                *remaining -= 1;
                Ok(Readiness::Pending)
            }
            _ => Ok(Readiness::Ready),
        }
    }

    async fn delete(&self, handle: &DatabaseHandle) -> BackendResult<Deletion> {
        let id = handle.resource_id();
        self.faults.enter(Op::Delete, &id).await?;
        let mut state = lock(&self.state);
        state.pending.remove(&id);
        Ok(match state.databases.remove(&id) {
            Some(_) => Deletion::Deleted,
            None => Deletion::NotFound,
        })
    }
}

// ── Storage ───────────────────────────────────────────────────────

/// Buckets held in memory.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    buckets: Mutex<BTreeMap<String, StorageHandle>>,
    next_id: AtomicU64,
    pub faults: Faults,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, name: &str) -> bool {
        lock(&self.buckets).contains_key(name)
    }

    pub fn len(&self) -> usize {
        lock(&self.buckets).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn find_bucket(&self, name: &str) -> BackendResult<Option<StorageHandle>> {
        self.faults.enter(Op::Find, name).await?;
        Ok(lock(&self.buckets).get(name).cloned())
    }

    async fn create_bucket(&self, name: &str, quota_gb: u32) -> BackendResult<StorageHandle> {
        self.faults.enter(Op::Create, name).await?;
        let seq = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let handle = StorageHandle {
            bucket_name: name.to_string(),
            bucket_id: format!("bkt-{seq:06}"),
            access_key: AccessKey {
                key_id: format!("key-{seq:06}"),
                secret: Uuid::new_v4().simple().to_string(),
            },
        };
        lock(&self.buckets).insert(name.to_string(), handle.clone());
        info!(bucket = %name, quota_gb, "created bucket");
        Ok(handle)
    }

    async fn delete_bucket(&self, handle: &StorageHandle) -> BackendResult<Deletion> {
        self.faults.enter(Op::Delete, &handle.bucket_name).await?;
        let mut buckets = lock(&self.buckets);
        let matches = buckets
            .get(&handle.bucket_name)
            .is_some_and(|b| b.bucket_id == handle.bucket_id);
        if matches {
            buckets.remove(&handle.bucket_name);
            Ok(Deletion::Deleted)
        } else {
            Ok(Deletion::NotFound)
        }
    }
}

// ── Compute ───────────────────────────────────────────────────────

/// Deployed functions held in memory, with the spec each was deployed from.
#[derive(Debug, Default)]
pub struct MemoryCompute {
    functions: Mutex<BTreeMap<String, (ComputeHandle, DeploySpec)>>,
    supports_containers: bool,
    pub faults: Faults,
}

impl MemoryCompute {
    /// A function-only adapter: container requests fall back to functions.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_containers() -> Self {
        Self {
            supports_containers: true,
            ..Self::default()
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        lock(&self.functions).contains_key(name)
    }

    pub fn len(&self) -> usize {
        lock(&self.functions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Environment a function was deployed with.
    pub fn deployed_env(&self, name: &str) -> Option<BTreeMap<String, String>> {
        lock(&self.functions)
            .get(name)
            .map(|(_, spec)| spec.env.clone())
    }
}

#[async_trait]
impl ComputeBackend for MemoryCompute {
    async fn find_function(&self, name: &str) -> BackendResult<Option<ComputeHandle>> {
        self.faults.enter(Op::Find, name).await?;
        Ok(lock(&self.functions).get(name).map(|(h, _)| h.clone()))
    }

    async fn deploy(&self, spec: &DeploySpec) -> BackendResult<ComputeHandle> {
        self.faults.enter(Op::Create, &spec.function_name).await?;
        let tier = match spec.tier {
            ComputeTier::Container if !self.supports_containers => {
                info!(
                    function = %spec.function_name,
                    "container tier unavailable, deploying as function"
                );
                ComputeTier::Function
            }
            tier => tier,
        };
        let handle = ComputeHandle {
            function_name: spec.function_name.clone(),
            function_id: format!("fn-{}", Uuid::new_v4().simple()),
            endpoint_url: format!("https://{}.{tier}.hostgrid.internal", spec.function_name),
            tier,
        };
        lock(&self.functions).insert(spec.function_name.clone(), (handle.clone(), spec.clone()));
        info!(
            function = %spec.function_name,
            version = %spec.artifact_version,
            %tier,
            "deployed"
        );
        Ok(handle)
    }

    async fn teardown(&self, handle: &ComputeHandle) -> BackendResult<Deletion> {
        self.faults.enter(Op::Delete, &handle.function_name).await?;
        Ok(match lock(&self.functions).remove(&handle.function_name) {
            Some(_) => Deletion::Deleted,
            None => Deletion::NotFound,
        })
    }
}

// ── Edge ──────────────────────────────────────────────────────────

/// Published distributions held in memory.
#[derive(Debug, Default)]
pub struct MemoryEdge {
    distributions: Mutex<BTreeMap<String, (EdgeHandle, PublishSpec)>>,
    pub faults: Faults,
}

impl MemoryEdge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, alias: &str) -> bool {
        lock(&self.distributions).contains_key(alias)
    }

    pub fn len(&self) -> usize {
        lock(&self.distributions).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Host name a distribution was published under.
    pub fn hostname(&self, alias: &str) -> Option<String> {
        lock(&self.distributions)
            .get(alias)
            .map(|(_, spec)| spec.hostname.clone())
    }
}

#[async_trait]
impl EdgeBackend for MemoryEdge {
    async fn find_distribution(&self, alias: &str) -> BackendResult<Option<EdgeHandle>> {
        self.faults.enter(Op::Find, alias).await?;
        Ok(lock(&self.distributions).get(alias).map(|(h, _)| h.clone()))
    }

    async fn publish(&self, spec: &PublishSpec) -> BackendResult<EdgeHandle> {
        self.faults.enter(Op::Create, &spec.alias).await?;
        let distribution_id = format!("E{}", Uuid::new_v4().simple()).to_uppercase();
        let handle = EdgeHandle {
            alias: spec.alias.clone(),
            domain: format!("{}.edge.hostgrid.internal", distribution_id.to_lowercase()),
            distribution_id,
        };
        lock(&self.distributions).insert(spec.alias.clone(), (handle.clone(), spec.clone()));
        info!(alias = %spec.alias, origin = %spec.origin_url, host = %spec.hostname, "published distribution");
        Ok(handle)
    }

    async fn unpublish(&self, handle: &EdgeHandle) -> BackendResult<Deletion> {
        self.faults.enter(Op::Delete, &handle.alias).await?;
        Ok(match lock(&self.distributions).remove(&handle.alias) {
            Some(_) => Deletion::Deleted,
            None => Deletion::NotFound,
        })
    }
}

// ── Initializer ───────────────────────────────────────────────────

/// Records setup calls instead of making them. Fails on [`Op::Create`].
#[derive(Debug, Default)]
pub struct MemoryInitializer {
    initialized: Mutex<Vec<(String, String)>>,
    pub faults: Faults,
}

impl MemoryInitializer {
    pub fn new() -> Self {
        Self::default()
    }

    /// `(endpoint_url, admin_email)` of every successful setup call.
    pub fn calls(&self) -> Vec<(String, String)> {
        lock(&self.initialized).clone()
    }
}

#[async_trait]
impl InstanceInitializer for MemoryInitializer {
    async fn initialize(&self, endpoint_url: &str, admin: &AdminCredentials) -> BackendResult<()> {
        self.faults.enter(Op::Create, endpoint_url).await?;
        lock(&self.initialized).push((endpoint_url.to_string(), admin.email.clone()));
        Ok(())
    }
}

// ── Bundle ────────────────────────────────────────────────────────

/// One of each in-memory adapter, kept concrete for inspection.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackends {
    pub database: Arc<MemoryDatabase>,
    pub storage: Arc<MemoryStorage>,
    pub compute: Arc<MemoryCompute>,
    pub edge: Arc<MemoryEdge>,
    pub initializer: Arc<MemoryInitializer>,
}

impl MemoryBackends {
    pub fn new() -> Self {
        Self::default()
    }

    /// The same adapters behind the trait objects the orchestrator takes.
    pub fn backends(&self) -> Backends {
        Backends {
            database: self.database.clone(),
            storage: self.storage.clone(),
            compute: self.compute.clone(),
            edge: self.edge.clone(),
            initializer: self.initializer.clone(),
        }
    }

    /// Total live resources across all adapters.
    pub fn resource_count(&self) -> usize {
        self.database.len() + self.storage.len() + self.compute.len() + self.edge.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostgrid_core::InstanceId;

    fn names() -> ResourceNames {
        ResourceNames::derive(&InstanceId::generate())
    }

    fn shared_spec(names: &ResourceNames) -> SharedDatabaseSpec {
        SharedDatabaseSpec {
            member_id: "pg-a".to_string(),
            endpoint: "pg-a.internal".to_string(),
            database: names.database_name.clone(),
            user: names.database_user.clone(),
            password: "pw".to_string(),
        }
    }

    #[tokio::test]
    async fn shared_database_lifecycle() {
        let db = MemoryDatabase::new();
        let names = names();
        assert!(db.find_database(&names).await.unwrap().is_none());

        let handle = db.create_shared(&shared_spec(&names)).await.unwrap();
        assert_eq!(db.find_database(&names).await.unwrap(), Some(handle.clone()));
        assert!(db.contains(&format!("pg-a/{}", names.database_name)));

        assert_eq!(db.delete(&handle).await.unwrap(), Deletion::Deleted);
        assert_eq!(db.delete(&handle).await.unwrap(), Deletion::NotFound);
        assert!(db.is_empty());
    }

    #[tokio::test]
    async fn dedicated_database_reports_pending_then_ready() {
        let db = MemoryDatabase::new();
        db.set_polls_until_ready(2);
        let names = names();
        let (handle, poll) = db
            .create_dedicated(&DedicatedDatabaseSpec {
                resource_id: names.dedicated_database_id.clone(),
                database: "app".to_string(),
                user: "app_admin".to_string(),
                password: "pw".to_string(),
                storage_gb: 20,
            })
            .await
            .unwrap();

        assert_eq!(db.poll_ready(&poll).await.unwrap(), Readiness::Pending);
        assert_eq!(db.poll_ready(&poll).await.unwrap(), Readiness::Pending);
        assert_eq!(db.poll_ready(&poll).await.unwrap(), Readiness::Ready);
        assert_eq!(db.find_database(&names).await.unwrap(), Some(handle.clone()));

        db.delete(&handle).await.unwrap();
        assert!(matches!(
            db.poll_ready(&poll).await,
            Err(BackendError::ProvisioningFailed(_))
        ));
    }

    #[tokio::test]
    async fn injected_failure_counts_the_call() {
        let storage = MemoryStorage::new();
        storage.faults.fail(Op::Create);
        assert!(storage.create_bucket("b", 1).await.is_err());
        assert_eq!(storage.faults.calls(Op::Create), 1);
        assert!(storage.is_empty());

        storage.faults.heal(Op::Create);
        let handle = storage.create_bucket("b", 1).await.unwrap();
        assert_eq!(storage.faults.calls(Op::Create), 2);
        assert_eq!(storage.delete_bucket(&handle).await.unwrap(), Deletion::Deleted);
    }

    #[tokio::test]
    async fn bucket_delete_ignores_a_recreated_namesake() {
        let storage = MemoryStorage::new();
        let old = storage.create_bucket("b", 1).await.unwrap();
        storage.delete_bucket(&old).await.unwrap();
        storage.create_bucket("b", 1).await.unwrap();

        assert_eq!(storage.delete_bucket(&old).await.unwrap(), Deletion::NotFound);
        assert!(storage.contains("b"));
    }

    #[tokio::test]
    async fn container_request_falls_back_to_function() {
        let spec = DeploySpec {
            function_name: "hostgrid-fn-abc".to_string(),
            env: BTreeMap::from([("PORT".to_string(), "8080".to_string())]),
            artifact_version: "1.2.3".to_string(),
            tier: ComputeTier::Container,
        };

        let compute = MemoryCompute::new();
        let handle = compute.deploy(&spec).await.unwrap();
        assert_eq!(handle.tier, ComputeTier::Function);
        assert_eq!(
            compute.deployed_env("hostgrid-fn-abc").unwrap()["PORT"],
            "8080"
        );

        let compute = MemoryCompute::with_containers();
        assert_eq!(compute.deploy(&spec).await.unwrap().tier, ComputeTier::Container);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_call_waits_before_answering() {
        let edge = MemoryEdge::new();
        edge.faults.stall(Op::Create, Duration::from_secs(30));
        let started = tokio::time::Instant::now();
        edge.publish(&PublishSpec {
            alias: "hostgrid-edge-abc".to_string(),
            origin_url: "https://origin".to_string(),
            hostname: "myapp.hostgrid.app".to_string(),
        })
        .await
        .unwrap();
        assert!(started.elapsed() >= Duration::from_secs(30));
        assert_eq!(edge.hostname("hostgrid-edge-abc").as_deref(), Some("myapp.hostgrid.app"));
    }

    #[test]
    fn deploy_spec_debug_hides_env_values() {
        let spec = DeploySpec {
            function_name: "f".to_string(),
            env: BTreeMap::from([("JWT_SECRET".to_string(), "topsecretvalue".to_string())]),
            artifact_version: "latest".to_string(),
            tier: ComputeTier::Function,
        };
        let rendered = format!("{spec:?}");
        assert!(rendered.contains("JWT_SECRET"));
        assert!(!rendered.contains("topsecretvalue"));
    }
}
