//! Saga coordinator: runs the five stages of one provisioning run.
//!
//! ```text
//! Pending ─▶ Database ─▶ Storage ─▶ Compute ─▶ EdgeRouting ─▶ Initialize ─▶ health ─▶ Completed
//!               │           │          │            │              │           │
//!               └───────────┴──────────┴────────────┴──────────────┴───────────┴──▶ RolledBack
//! ```
//!
//! Each stage first looks for a resource under its derived name and adopts
//! it; only if none exists does it create one. Every resource lands in the
//! [`RollbackLedger`] the moment it exists, so a timeout or cancellation
//! that interrupts a later await still compensates it.

use tokio::sync::watch;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use hostgrid_backends::{
    BackendError, Backends, DedicatedDatabaseSpec, DeploySpec, PollHandle, PublishSpec, Readiness,
    SharedDatabaseSpec,
};
use hostgrid_core::{
    DatabaseHandle, DatabasePlacement, DatabaseTier, InstanceId, InstanceStatus, ProvisionRequest,
    ResourceHandles, ResourceNames, RunSecrets, Stage, StageOutput, StageResult, epoch_secs,
};
use hostgrid_health::{HealthError, ReadinessProber, cancellation};
use hostgrid_pool::SharedPool;
use hostgrid_state::InstanceRecord;

use crate::env::{EnvInputs, compose_env};
use crate::error::ProvisionError;
use crate::ledger::{LedgerEntry, RollbackLedger};
use crate::orchestrator::OrchestratorSettings;
use crate::stage::{SagaPhase, StageBoard};

/// Database created inside a dedicated server.
pub const DEDICATED_DATABASE_NAME: &str = "app";
/// Administrative login of a dedicated server.
pub const DEDICATED_ADMIN_USER: &str = "app_admin";

/// Outcome of one provisioning run.
#[derive(Debug, Clone)]
pub struct ProvisionResult {
    pub instance_id: InstanceId,
    pub status: InstanceStatus,
    /// On success, every resource of the instance. On failure, only what
    /// compensation could not remove.
    pub resources: ResourceHandles,
    /// Public URL once running.
    pub url: Option<String>,
    /// Stages that succeeded, in order.
    pub stages: Vec<StageResult>,
    pub stage_states: StageBoard,
    pub phase: SagaPhase,
    pub error: Option<ProvisionError>,
}

impl ProvisionResult {
    /// A run refused before any stage started.
    pub(crate) fn rejected(instance_id: InstanceId, error: ProvisionError) -> Self {
        Self {
            instance_id,
            status: InstanceStatus::Error,
            resources: ResourceHandles::default(),
            url: None,
            stages: Vec::new(),
            stage_states: StageBoard::new(),
            phase: SagaPhase::Pending,
            error: Some(error),
        }
    }

    /// The recorded state of an instance that is already running. No
    /// stage runs, so nothing can be compensated.
    pub(crate) fn already_running(record: InstanceRecord) -> Self {
        let mut board = StageBoard::new();
        for stage in Stage::ALL {
            board.start(stage);
            board.succeed(stage);
        }
        Self {
            instance_id: record.instance_id,
            status: InstanceStatus::Running,
            resources: record.resources,
            url: record.url,
            stages: Vec::new(),
            stage_states: board,
            phase: SagaPhase::Completed,
            error: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == InstanceStatus::Running
    }

    /// Stage the run failed in, if it failed in one.
    pub fn failed_stage(&self) -> Option<Stage> {
        self.error.as_ref().and_then(ProvisionError::stage)
    }
}

type StageOutcome = Result<(StageOutput, bool), ProvisionError>;

fn failure(stage: Stage) -> impl Fn(BackendError) -> ProvisionError {
    move |cause| ProvisionError::StageFailure { stage, cause }
}

fn missing(stage: Stage, what: &'static str) -> ProvisionError {
    ProvisionError::StageFailure {
        stage,
        cause: BackendError::MissingInput(what),
    }
}

pub(crate) struct Saga<'a> {
    request: &'a ProvisionRequest,
    names: ResourceNames,
    secrets: RunSecrets,
    settings: &'a OrchestratorSettings,
    backends: &'a Backends,
    pool: &'a SharedPool,
    prober: &'a ReadinessProber,
    ledger: RollbackLedger,
    board: StageBoard,
    phase: SagaPhase,
    log: Vec<StageResult>,
    handles: ResourceHandles,
}

impl<'a> Saga<'a> {
    pub fn new(
        request: &'a ProvisionRequest,
        secrets: RunSecrets,
        settings: &'a OrchestratorSettings,
        backends: &'a Backends,
        pool: &'a SharedPool,
        prober: &'a ReadinessProber,
    ) -> Self {
        Self {
            request,
            names: ResourceNames::derive(&request.instance_id),
            secrets,
            settings,
            backends,
            pool,
            prober,
            ledger: RollbackLedger::new(request.instance_id),
            board: StageBoard::new(),
            phase: SagaPhase::Pending,
            log: Vec::new(),
            handles: ResourceHandles::default(),
        }
    }

    fn id(&self) -> InstanceId {
        self.request.instance_id
    }

    /// Run every stage, then the readiness check. Compensates on failure.
    pub async fn run(mut self, cancel: &mut watch::Receiver<bool>) -> ProvisionResult {
        match self.forward(cancel).await {
            Ok(url) => {
                self.phase = SagaPhase::Completed;
                info!(instance = %self.id(), %url, "instance running");
                ProvisionResult {
                    instance_id: self.id(),
                    status: InstanceStatus::Running,
                    resources: self.handles,
                    url: Some(url),
                    stages: self.log,
                    stage_states: self.board,
                    phase: self.phase,
                    error: None,
                }
            }
            Err(cause) => self.roll_back(cause).await,
        }
    }

    async fn forward(&mut self, cancel: &mut watch::Receiver<bool>) -> Result<String, ProvisionError> {
        for stage in Stage::ALL {
            self.phase = SagaPhase::Running { stage };
            self.board.start(stage);
            debug!(instance = %self.id(), %stage, "stage started");

            let limit = self.settings.timeouts.for_stage(stage);
            let outcome = tokio::select! {
                biased;
                _ = cancellation(cancel) => Err(ProvisionError::Cancelled { stage }),
                result = timeout(limit, self.execute(stage)) => match result {
                    Ok(outcome) => outcome,
                    Err(_) => Err(ProvisionError::StageTimeout { stage, timeout: limit }),
                },
            };

            match outcome {
                Ok(result) => {
                    self.board.succeed(stage);
                    info!(instance = %self.id(), %stage, adopted = result.adopted, "stage succeeded");
                    self.log.push(result);
                }
                Err(e) => {
                    self.board.fail(stage);
                    warn!(instance = %self.id(), %stage, error = %e, "stage failed");
                    return Err(e);
                }
            }
        }

        let compute = self
            .handles
            .compute
            .as_ref()
            .ok_or_else(|| missing(Stage::Initialize, "compute endpoint"))?;
        let health_url = format!(
            "{}{}",
            compute.endpoint_url.trim_end_matches('/'),
            self.settings.platform.health_path
        );
        match self.prober.wait_ready(&health_url, cancel).await {
            Ok(attempts) => debug!(instance = %self.id(), attempts, "health check passed"),
            Err(HealthError::Timeout { attempts, elapsed }) => {
                return Err(ProvisionError::HealthCheckTimeout { attempts, elapsed });
            }
            Err(HealthError::Cancelled { .. }) => {
                return Err(ProvisionError::Cancelled {
                    stage: Stage::Initialize,
                });
            }
        }

        Ok(self.settings.public_url(&self.request.subdomain))
    }

    async fn execute(&mut self, stage: Stage) -> Result<StageResult, ProvisionError> {
        let (output, adopted) = match stage {
            Stage::Database => self.database().await?,
            Stage::Storage => self.storage().await?,
            Stage::Compute => self.compute().await?,
            Stage::EdgeRouting => self.edge_routing().await?,
            Stage::Initialize => self.initialize().await?,
        };
        Ok(StageResult {
            stage,
            output,
            adopted,
            completed_at: epoch_secs(),
        })
    }

    async fn database(&mut self) -> StageOutcome {
        let stage = Stage::Database;
        let id = self.id();
        let db = &self.backends.database;

        if let Some(existing) = db.find_database(&self.names).await.map_err(failure(stage))? {
            info!(instance = %id, database = %existing.resource_id(), "adopting existing database");
            match &existing.placement {
                DatabasePlacement::Shared { member_id } => {
                    // The database exists whether or not its slot can be
                    // claimed, so it is compensable either way.
                    self.ledger.record(LedgerEntry::Database(existing.clone()));
                    let slot = self.pool.adopt(id, member_id)?;
                    self.ledger.record(LedgerEntry::PoolSlot {
                        member_id: slot.member_id,
                    });
                }
                DatabasePlacement::Dedicated { resource_id } => {
                    self.ledger.record(LedgerEntry::Database(existing.clone()));
                    let poll = PollHandle {
                        resource_id: resource_id.clone(),
                    };
                    self.await_dedicated(&poll).await?;
                }
            }
            self.handles.database = Some(existing.clone());
            return Ok((StageOutput::Database(existing), true));
        }

        let handle: DatabaseHandle = match self.request.database_tier {
            DatabaseTier::Shared => {
                let slot = self.pool.reserve(id)?;
                self.ledger.record(LedgerEntry::PoolSlot {
                    member_id: slot.member_id.clone(),
                });
                let spec = SharedDatabaseSpec {
                    member_id: slot.member_id,
                    endpoint: slot.endpoint,
                    database: self.names.database_name.clone(),
                    user: self.names.database_user.clone(),
                    password: self.secrets.database_password.clone(),
                };
                let handle = db.create_shared(&spec).await.map_err(failure(stage))?;
                self.ledger.record(LedgerEntry::Database(handle.clone()));
                handle
            }
            DatabaseTier::Dedicated => {
                let spec = DedicatedDatabaseSpec {
                    resource_id: self.names.dedicated_database_id.clone(),
                    database: DEDICATED_DATABASE_NAME.to_string(),
                    user: DEDICATED_ADMIN_USER.to_string(),
                    password: self.secrets.database_password.clone(),
                    storage_gb: self.request.quotas.database_gb,
                };
                let (handle, poll) = db.create_dedicated(&spec).await.map_err(failure(stage))?;
                self.ledger.record(LedgerEntry::Database(handle.clone()));
                self.await_dedicated(&poll).await?;
                handle
            }
        };

        self.handles.database = Some(handle.clone());
        Ok((StageOutput::Database(handle), false))
    }

    /// Poll a dedicated server until ready. Bounded by the caller's stage timeout.
    async fn await_dedicated(&self, poll: &PollHandle) -> Result<(), ProvisionError> {
        let interval = self.settings.timeouts.dedicated_poll_interval;
        let mut polls = 0u32;
        loop {
            polls += 1;
            let readiness = self
                .backends
                .database
                .poll_ready(poll)
                .await
                .map_err(failure(Stage::Database))?;
            match readiness {
                Readiness::Ready => {
                    info!(instance = %self.id(), resource = %poll.resource_id, polls, "dedicated database ready");
                    return Ok(());
                }
                Readiness::Pending => {
                    debug!(instance = %self.id(), resource = %poll.resource_id, polls, "dedicated database pending");
                    tokio::time::sleep(interval).await;
                }
            }
        }
    }

    async fn storage(&mut self) -> StageOutcome {
        let stage = Stage::Storage;
        let storage = &self.backends.storage;
        let name = &self.names.bucket_name;

        let (handle, adopted) = match storage.find_bucket(name).await.map_err(failure(stage))? {
            Some(existing) => {
                info!(instance = %self.id(), bucket = %name, "adopting existing bucket");
                (existing, true)
            }
            None => {
                let handle = storage
                    .create_bucket(name, self.request.quotas.storage_gb)
                    .await
                    .map_err(failure(stage))?;
                (handle, false)
            }
        };

        self.ledger.record(LedgerEntry::Bucket(handle.clone()));
        self.handles.storage = Some(handle.clone());
        Ok((StageOutput::Storage(handle), adopted))
    }

    async fn compute(&mut self) -> StageOutcome {
        let stage = Stage::Compute;
        let compute = &self.backends.compute;
        let name = &self.names.function_name;

        let (handle, adopted) = match compute.find_function(name).await.map_err(failure(stage))? {
            Some(existing) => {
                info!(instance = %self.id(), function = %name, "adopting existing function");
                (existing, true)
            }
            None => {
                let database = self
                    .handles
                    .database
                    .as_ref()
                    .ok_or_else(|| missing(stage, "database credentials"))?;
                let storage = self
                    .handles
                    .storage
                    .as_ref()
                    .ok_or_else(|| missing(stage, "storage bucket"))?;
                let public_url = self.settings.public_url(&self.request.subdomain);
                let env = compose_env(&EnvInputs {
                    instance_id: self.id(),
                    database,
                    storage,
                    platform: &self.settings.platform,
                    jwt_secret: &self.secrets.jwt_secret,
                    public_url: &public_url,
                    overrides: &self.request.env,
                });
                let spec = DeploySpec {
                    function_name: name.clone(),
                    env,
                    artifact_version: self.settings.artifact_version(self.request),
                    tier: self.request.compute_tier,
                };
                let handle = compute.deploy(&spec).await.map_err(failure(stage))?;
                (handle, false)
            }
        };

        self.ledger.record(LedgerEntry::Function(handle.clone()));
        self.handles.compute = Some(handle.clone());
        Ok((StageOutput::Compute(handle), adopted))
    }

    async fn edge_routing(&mut self) -> StageOutcome {
        let stage = Stage::EdgeRouting;
        let edge = &self.backends.edge;
        let alias = &self.names.distribution_alias;

        let (handle, adopted) = match edge.find_distribution(alias).await.map_err(failure(stage))? {
            Some(existing) => {
                info!(instance = %self.id(), %alias, "adopting existing distribution");
                (existing, true)
            }
            None => {
                let origin = self
                    .handles
                    .compute
                    .as_ref()
                    .ok_or_else(|| missing(stage, "compute endpoint"))?;
                let spec = PublishSpec {
                    alias: alias.clone(),
                    origin_url: origin.endpoint_url.clone(),
                    hostname: self.settings.hostname(&self.request.subdomain),
                };
                let handle = edge.publish(&spec).await.map_err(failure(stage))?;
                (handle, false)
            }
        };

        self.ledger.record(LedgerEntry::Distribution(handle.clone()));
        self.handles.edge = Some(handle.clone());
        Ok((StageOutput::EdgeRouting(handle), adopted))
    }

    async fn initialize(&mut self) -> StageOutcome {
        let stage = Stage::Initialize;
        let endpoint_url = self
            .handles
            .compute
            .as_ref()
            .map(|c| c.endpoint_url.clone())
            .ok_or_else(|| missing(stage, "compute endpoint"))?;

        self.backends
            .initializer
            .initialize(&endpoint_url, &self.request.admin)
            .await
            .map_err(failure(stage))?;
        Ok((StageOutput::Initialized { endpoint_url }, false))
    }

    async fn roll_back(mut self, cause: ProvisionError) -> ProvisionResult {
        let id = self.id();
        warn!(
            instance = %id,
            error = %cause,
            resources = self.ledger.len(),
            never_started = ?self.board.untouched(),
            "provisioning failed, rolling back"
        );

        let report = self
            .ledger
            .compensate(self.backends, self.pool, &self.settings.timeouts)
            .await;

        let error = if report.is_clean() {
            info!(instance = %id, removed = report.removed.len(), "rollback complete");
            cause
        } else {
            error!(
                instance = %id,
                unresolved = ?report.unresolved,
                "rollback left resources behind"
            );
            ProvisionError::RollbackPartialFailure {
                cause: Box::new(cause),
                unresolved: report.unresolved.clone(),
            }
        };
        self.phase = SagaPhase::RolledBack {
            clean: report.is_clean(),
        };

        ProvisionResult {
            instance_id: id,
            status: InstanceStatus::Error,
            resources: self.ledger.handles(),
            url: None,
            stages: self.log,
            stage_states: self.board,
            phase: self.phase,
            error: Some(error),
        }
    }
}
