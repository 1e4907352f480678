//! Orchestrator: public entry points for provisioning and teardown.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::SeedableRng;
use rand::rngs::StdRng;
use tokio::sync::watch;
use tracing::{error, info, warn};

use hostgrid_backends::Backends;
use hostgrid_core::config::PlatformConfig;
use hostgrid_core::{
    ConfigError, HostgridConfig, InstanceId, InstanceStatus, ProvisionRequest, ResourceKind,
    ResourceNames, ResourceRef, RunSecrets, StageTimeouts,
};
use hostgrid_health::ReadinessProber;
use hostgrid_pool::SharedPool;
use hostgrid_state::{InstanceRecord, InstanceRegistry, StatusUpdate};

use crate::error::ProvisionError;
use crate::ledger::{LedgerEntry, RollbackLedger};
use crate::saga::{ProvisionResult, Saga};

/// Resolved platform settings the orchestrator runs with.
#[derive(Debug, Clone, Default)]
pub struct OrchestratorSettings {
    pub platform: PlatformConfig,
    pub timeouts: StageTimeouts,
}

impl OrchestratorSettings {
    pub fn from_config(config: &HostgridConfig) -> Result<Self, ConfigError> {
        Ok(Self {
            platform: config.platform.clone(),
            timeouts: config.timeouts.resolve()?,
        })
    }

    /// Public host name of an instance.
    pub fn hostname(&self, subdomain: &str) -> String {
        format!("{subdomain}.{}", self.platform.base_domain)
    }

    pub fn public_url(&self, subdomain: &str) -> String {
        format!("https://{}", self.hostname(subdomain))
    }

    /// Build to deploy: the request's pin, else the platform default.
    pub fn artifact_version(&self, request: &ProvisionRequest) -> String {
        request
            .artifact_version
            .clone()
            .unwrap_or_else(|| self.platform.artifact_version.clone())
    }
}

/// Confirmation of a teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DestroyAck {
    pub instance_id: InstanceId,
    /// Resources deleted by this call, newest first.
    pub removed: Vec<ResourceRef>,
    /// True when nothing was left to delete.
    pub already_absent: bool,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Marks an instance busy until dropped.
struct InFlight<'a> {
    set: &'a Mutex<HashSet<InstanceId>>,
    id: InstanceId,
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        lock(self.set).remove(&self.id);
    }
}

/// Composes the pool, the backends, the registry and the prober into
/// `provision_instance` / `destroy_instance`.
pub struct Orchestrator {
    settings: OrchestratorSettings,
    backends: Backends,
    pool: Arc<SharedPool>,
    registry: Arc<dyn InstanceRegistry>,
    prober: ReadinessProber,
    rng: Mutex<StdRng>,
    in_flight: Mutex<HashSet<InstanceId>>,
}

impl Orchestrator {
    pub fn new(
        settings: OrchestratorSettings,
        backends: Backends,
        pool: Arc<SharedPool>,
        registry: Arc<dyn InstanceRegistry>,
        prober: ReadinessProber,
    ) -> Self {
        Self {
            settings,
            backends,
            pool,
            registry,
            prober,
            rng: Mutex::new(StdRng::from_entropy()),
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    /// Replace the secret source, e.g. with a seeded generator.
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = Mutex::new(rng);
        self
    }

    pub fn settings(&self) -> &OrchestratorSettings {
        &self.settings
    }

    pub fn pool(&self) -> &Arc<SharedPool> {
        &self.pool
    }

    fn claim(&self, id: InstanceId) -> Option<InFlight<'_>> {
        if lock(&self.in_flight).insert(id) {
            Some(InFlight {
                set: &self.in_flight,
                id,
            })
        } else {
            None
        }
    }

    /// Provision one instance. Never panics on provider failure: the
    /// outcome, including any error, is in the returned result.
    pub async fn provision_instance(&self, request: &ProvisionRequest) -> ProvisionResult {
        let (_never, mut cancel) = watch::channel(false);
        self.provision_instance_with_cancel(request, &mut cancel).await
    }

    /// [`provision_instance`](Self::provision_instance) that stops as soon
    /// as `cancel` carries `true`, rolling back whatever was created.
    pub async fn provision_instance_with_cancel(
        &self,
        request: &ProvisionRequest,
        cancel: &mut watch::Receiver<bool>,
    ) -> ProvisionResult {
        let id = request.instance_id;

        if let Err(e) = request.validate() {
            warn!(instance = %id, error = %e, "rejecting invalid provisioning request");
            return ProvisionResult::rejected(id, e.into());
        }

        let Some(_busy) = self.claim(id) else {
            warn!(instance = %id, "provisioning already in progress");
            return ProvisionResult::rejected(id, ProvisionError::AlreadyInProgress(id));
        };

        match self.registry.get(&id) {
            Ok(Some(existing)) if existing.status == InstanceStatus::Running => {
                info!(instance = %id, "instance already running, nothing to provision");
                return ProvisionResult::already_running(existing);
            }
            Ok(_) => {}
            Err(e) => {
                error!(instance = %id, error = %e, "could not read instance record");
                return ProvisionResult::rejected(id, e.into());
            }
        }

        let record = InstanceRecord::provisioning(id, &request.owner_id, &request.subdomain);
        if let Err(e) = self.registry.begin(&record) {
            error!(instance = %id, error = %e, "could not record provisioning start");
            return ProvisionResult::rejected(id, e.into());
        }

        info!(
            instance = %id,
            owner = %request.owner_id,
            subdomain = %request.subdomain,
            database_tier = ?request.database_tier,
            compute_tier = %request.compute_tier,
            "provisioning started"
        );

        let secrets = {
            let mut rng = lock(&self.rng);
            RunSecrets::draw(&mut *rng)
        };

        let result = Saga::new(
            request,
            secrets,
            &self.settings,
            &self.backends,
            &self.pool,
            &self.prober,
        )
        .run(cancel)
        .await;

        self.record_outcome(&result);
        result
    }

    /// Write the terminal status. Failures here are logged, not returned.
    fn record_outcome(&self, result: &ProvisionResult) {
        let id = result.instance_id;
        let update = StatusUpdate {
            status: result.status,
            resources: result.resources.clone(),
            url: result.url.clone(),
            error: result.error.as_ref().map(ToString::to_string),
        };
        if let Err(e) = self.registry.transition(&id, update) {
            error!(instance = %id, error = %e, "could not record terminal status");
        }

        let unresolved = result
            .error
            .as_ref()
            .map(ProvisionError::unresolved)
            .unwrap_or_default();
        if !unresolved.is_empty() {
            if let Err(e) = self.registry.record_orphans(&id, unresolved) {
                error!(instance = %id, error = %e, "could not record orphaned resources");
            }
        }
    }

    /// Tear an instance down. Succeeds when nothing is left, including
    /// when there was nothing to begin with.
    pub async fn destroy_instance(&self, id: InstanceId) -> Result<DestroyAck, ProvisionError> {
        let Some(_busy) = self.claim(id) else {
            return Err(ProvisionError::AlreadyInProgress(id));
        };

        let names = ResourceNames::derive(&id);
        let mut ledger = RollbackLedger::new(id);
        let mut unresolved = Vec::new();

        // Recorded in creation order; compensation walks it backwards.
        match self.backends.database.find_database(&names).await {
            Ok(found) => {
                if let Some(slot) = self.pool.reservation(id) {
                    ledger.record(LedgerEntry::PoolSlot {
                        member_id: slot.member_id,
                    });
                }
                if let Some(db) = found {
                    ledger.record(LedgerEntry::Database(db));
                }
            }
            Err(e) => {
                warn!(instance = %id, error = %e, "database lookup failed");
                if let Some(slot) = self.pool.reservation(id) {
                    unresolved.push(ResourceRef::new(ResourceKind::PoolSlot, slot.member_id));
                }
                unresolved.push(ResourceRef::new(
                    ResourceKind::Database,
                    names.database_name.clone(),
                ));
            }
        }

        match self.backends.storage.find_bucket(&names.bucket_name).await {
            Ok(Some(bucket)) => ledger.record(LedgerEntry::Bucket(bucket)),
            Ok(None) => {}
            Err(e) => {
                warn!(instance = %id, error = %e, "bucket lookup failed");
                unresolved.push(ResourceRef::new(ResourceKind::Bucket, names.bucket_name.clone()));
            }
        }

        match self.backends.compute.find_function(&names.function_name).await {
            Ok(Some(function)) => ledger.record(LedgerEntry::Function(function)),
            Ok(None) => {}
            Err(e) => {
                warn!(instance = %id, error = %e, "function lookup failed");
                unresolved.push(ResourceRef::new(
                    ResourceKind::Function,
                    names.function_name.clone(),
                ));
            }
        }

        match self
            .backends
            .edge
            .find_distribution(&names.distribution_alias)
            .await
        {
            Ok(Some(distribution)) => ledger.record(LedgerEntry::Distribution(distribution)),
            Ok(None) => {}
            Err(e) => {
                warn!(instance = %id, error = %e, "distribution lookup failed");
                unresolved.push(ResourceRef::new(
                    ResourceKind::Distribution,
                    names.distribution_alias.clone(),
                ));
            }
        }

        info!(instance = %id, resources = ledger.len(), "destroying instance");
        let report = ledger
            .compensate(&self.backends, &self.pool, &self.settings.timeouts)
            .await;
        unresolved.extend(report.unresolved);

        if !unresolved.is_empty() {
            error!(instance = %id, unresolved = ?unresolved, "teardown incomplete");
            if let Err(e) = self.registry.record_orphans(&id, &unresolved) {
                error!(instance = %id, error = %e, "could not record orphaned resources");
            }
            return Err(ProvisionError::DestroyIncomplete { unresolved });
        }

        self.registry.remove(&id)?;
        self.registry.clear_orphans(&id)?;

        let already_absent = report.removed.is_empty();
        info!(instance = %id, removed = report.removed.len(), already_absent, "instance destroyed");
        Ok(DestroyAck {
            instance_id: id,
            removed: report.removed,
            already_absent,
        })
    }

    /// Probe `url` once on behalf of `id`.
    pub async fn health_check(&self, id: InstanceId, url: &str) -> bool {
        let healthy = self.prober.check_once(url).await;
        info!(instance = %id, %url, healthy, "health check");
        healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostgrid_core::config::TimeoutConfig;

    #[test]
    fn public_url_uses_base_domain() {
        let settings = OrchestratorSettings::default();
        assert_eq!(settings.hostname("myapp"), "myapp.hostgrid.app");
        assert_eq!(settings.public_url("myapp"), "https://myapp.hostgrid.app");
    }

    #[test]
    fn settings_resolve_configured_timeouts() {
        let mut config = HostgridConfig::scaffold("example.dev");
        config.timeouts = TimeoutConfig {
            compute: "90s".to_string(),
            ..TimeoutConfig::default()
        };
        let settings = OrchestratorSettings::from_config(&config).unwrap();
        assert_eq!(settings.timeouts.compute, std::time::Duration::from_secs(90));
        assert_eq!(settings.public_url("a1b"), "https://a1b.example.dev");
    }

    #[test]
    fn bad_duration_is_a_config_error() {
        let mut config = HostgridConfig::default();
        config.timeouts.storage = "soon".to_string();
        assert!(matches!(
            OrchestratorSettings::from_config(&config),
            Err(ConfigError::InvalidDuration { .. })
        ));
    }
}
