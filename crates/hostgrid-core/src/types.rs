//! Domain types shared across Hostgrid crates.
//!
//! A provisioning run consumes a [`ProvisionRequest`] and records a
//! [`StageResult`] per completed stage. Resource handles returned by the backend adapters
//! are plain data so they can be persisted in the instance registry and
//! replayed during teardown.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Identifiers ───────────────────────────────────────────────────

/// Globally unique tenant instance identifier.
///
/// This is the idempotency key: every resource name is derived from it,
/// so it must never change once an instance exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InstanceId(Uuid);

impl InstanceId {
    /// Generate a fresh random identifier.
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

impl FromStr for InstanceId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

/// Identifier of a shared database host.
pub type MemberId = String;

// ── Request ───────────────────────────────────────────────────────

/// Where the tenant database lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DatabaseTier {
    /// A database on one of the shared pool hosts.
    #[default]
    Shared,
    /// A standalone database server for this tenant alone.
    Dedicated,
}

/// How the application is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputeTier {
    /// Serverless function behind a function URL.
    #[default]
    Function,
    /// Long-running container service.
    Container,
}

impl fmt::Display for ComputeTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ComputeTier::Function => f.write_str("function"),
            ComputeTier::Container => f.write_str("container"),
        }
    }
}

/// Size limits granted by the tenant's plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quotas {
    pub database_gb: u32,
    pub storage_gb: u32,
}

impl Default for Quotas {
    fn default() -> Self {
        Self {
            database_gb: 1,
            storage_gb: 2,
        }
    }
}

/// First administrator account created during initialization.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminCredentials {
    pub email: String,
    pub password: String,
}

impl fmt::Debug for AdminCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdminCredentials")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Everything needed to bring up one hosted instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    pub instance_id: InstanceId,
    pub owner_id: String,
    pub subdomain: String,
    #[serde(default)]
    pub database_tier: DatabaseTier,
    #[serde(default)]
    pub compute_tier: ComputeTier,
    #[serde(default)]
    pub quotas: Quotas,
    pub admin: AdminCredentials,
    /// Application build to deploy. Falls back to the platform default.
    #[serde(default)]
    pub artifact_version: Option<String>,
    /// Caller-controlled environment overrides. Keys must not collide
    /// with the reserved system keys.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

// ── Stages ────────────────────────────────────────────────────────

/// The five ordered provisioning stages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Database,
    Storage,
    Compute,
    EdgeRouting,
    Initialize,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 5] = [
        Stage::Database,
        Stage::Storage,
        Stage::Compute,
        Stage::EdgeRouting,
        Stage::Initialize,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Database => "database",
            Stage::Storage => "storage",
            Stage::Compute => "compute",
            Stage::EdgeRouting => "edge_routing",
            Stage::Initialize => "initialize",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Status ────────────────────────────────────────────────────────

/// Externally visible lifecycle of a provisioning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Provisioning,
    Running,
    Error,
}

impl InstanceStatus {
    /// `Running` and `Error` end a run; only a fresh run leaves them.
    pub fn is_terminal(&self) -> bool {
        matches!(self, InstanceStatus::Running | InstanceStatus::Error)
    }

    /// Whether a single run may move from `self` to `next`.
    pub fn can_transition_to(&self, next: InstanceStatus) -> bool {
        matches!(
            (self, next),
            (InstanceStatus::Provisioning, InstanceStatus::Running)
                | (InstanceStatus::Provisioning, InstanceStatus::Error)
        )
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InstanceStatus::Provisioning => f.write_str("provisioning"),
            InstanceStatus::Running => f.write_str("running"),
            InstanceStatus::Error => f.write_str("error"),
        }
    }
}

// ── Resource handles ──────────────────────────────────────────────

/// Login for a tenant database.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseCredentials {
    pub user: String,
    pub password: String,
}

impl fmt::Debug for DatabaseCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseCredentials")
            .field("user", &self.user)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Where a tenant database was placed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "tier", rename_all = "snake_case")]
pub enum DatabasePlacement {
    Shared { member_id: MemberId },
    Dedicated { resource_id: String },
}

/// A provisioned tenant database.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatabaseHandle {
    pub placement: DatabasePlacement,
    /// Host name of the database server.
    pub endpoint: String,
    pub database: String,
    pub credentials: DatabaseCredentials,
}

impl DatabaseHandle {
    /// PostgreSQL connection URL handed to the application.
    pub fn connection_url(&self) -> String {
        format!(
            "postgresql://{}:{}@{}:5432/{}",
            self.credentials.user, self.credentials.password, self.endpoint, self.database
        )
    }

    /// Identifier used when deleting or reporting this database.
    pub fn resource_id(&self) -> String {
        match &self.placement {
            DatabasePlacement::Shared { member_id } => format!("{member_id}/{}", self.database),
            DatabasePlacement::Dedicated { resource_id } => resource_id.clone(),
        }
    }
}

/// Scoped key granting the application access to its bucket.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessKey {
    pub key_id: String,
    pub secret: String,
}

impl fmt::Debug for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessKey")
            .field("key_id", &self.key_id)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// A provisioned object-storage bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageHandle {
    pub bucket_name: String,
    pub bucket_id: String,
    pub access_key: AccessKey,
}

/// A deployed compute function or service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeHandle {
    pub function_name: String,
    pub function_id: String,
    pub endpoint_url: String,
    pub tier: ComputeTier,
}

/// A published edge distribution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeHandle {
    pub alias: String,
    pub distribution_id: String,
    pub domain: String,
}

/// Per-stage resource handles of an instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceHandles {
    pub database: Option<DatabaseHandle>,
    pub storage: Option<StorageHandle>,
    pub compute: Option<ComputeHandle>,
    pub edge: Option<EdgeHandle>,
}

impl ResourceHandles {
    /// Shared pool member hosting the database, if any.
    pub fn pool_member(&self) -> Option<&str> {
        match self.database.as_ref().map(|db| &db.placement) {
            Some(DatabasePlacement::Shared { member_id }) => Some(member_id),
            _ => None,
        }
    }
}

/// Kind of a concrete external resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    PoolSlot,
    Database,
    Bucket,
    Function,
    Distribution,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ResourceKind::PoolSlot => "pool slot",
            ResourceKind::Database => "database",
            ResourceKind::Bucket => "bucket",
            ResourceKind::Function => "function",
            ResourceKind::Distribution => "distribution",
        };
        f.write_str(s)
    }
}

/// Name of a single external resource, used in reports and the orphan ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub id: String,
}

impl ResourceRef {
    pub fn new(kind: ResourceKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.id)
    }
}

// ── Results ───────────────────────────────────────────────────────

/// What a successful stage produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StageOutput {
    Database(DatabaseHandle),
    Storage(StorageHandle),
    Compute(ComputeHandle),
    EdgeRouting(EdgeHandle),
    Initialized { endpoint_url: String },
}

/// One entry of the append-only stage log of a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageResult {
    pub stage: Stage,
    pub output: StageOutput,
    /// Whether the resource already existed and was adopted.
    pub adopted: bool,
    /// Unix timestamp (seconds) when the stage succeeded.
    pub completed_at: u64,
}

/// Seconds since the Unix epoch.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
