use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, bail};
use serde_json::{Value, json};
use tokio::sync::watch;
use tracing::{info, warn};

use hostgrid_backends::MemoryBackends;
use hostgrid_core::{HostgridConfig, InstanceId, ProvisionRequest, ResourceHandles};
use hostgrid_health::{HealthProbe, HttpProbe, ProbeResult, ReadinessProber, ScriptedProbe};
use hostgrid_pool::SharedPool;
use hostgrid_provision::{Orchestrator, OrchestratorSettings, ProvisionResult};
use hostgrid_state::StateStore;

/// Read `path`, or fall back to defaults when it does not exist.
pub fn load_config(path: &Path) -> anyhow::Result<HostgridConfig> {
    if !path.exists() {
        warn!(path = %path.display(), "config not found, using defaults");
        return Ok(HostgridConfig::default());
    }
    HostgridConfig::from_file(path).with_context(|| format!("loading {}", path.display()))
}

fn open_registry(config: &HostgridConfig) -> anyhow::Result<StateStore> {
    std::fs::create_dir_all(&config.state.data_dir)
        .with_context(|| format!("creating {}", config.state.data_dir.display()))?;
    let path = config.registry_path();
    let store = StateStore::open(&path)?;
    info!(path = %path.display(), "registry opened");
    Ok(store)
}

/// Pool with counters rebuilt from the registry.
fn restored_pool(config: &HostgridConfig, store: &StateStore) -> anyhow::Result<SharedPool> {
    let pool = SharedPool::from_config(&config.pool.members);
    let assignments = store.pool_assignments()?;
    let restored = pool.restore(
        assignments
            .into_iter()
            .map(|a| (a.instance_id, a.member_id)),
    );
    info!(members = config.pool.members.len(), restored, "shared pool loaded");
    Ok(pool)
}

/// Orchestrator over simulated backends.
///
/// Simulated endpoints do not resolve, so provisioning probes with a
/// probe that always answers healthy unless `probe` is given.
fn orchestrator(
    config: &HostgridConfig,
    store: &StateStore,
    probe: Option<Arc<dyn HealthProbe>>,
) -> anyhow::Result<Orchestrator> {
    let settings = OrchestratorSettings::from_config(config)?;
    let health = config.health.resolve()?;
    let pool = Arc::new(restored_pool(config, store)?);
    let probe = probe.unwrap_or_else(|| {
        Arc::new(ScriptedProbe::always(ProbeResult::Healthy)) as Arc<dyn HealthProbe>
    });
    let backends = MemoryBackends::new();
    info!(mode = "simulated", "backends ready");

    Ok(Orchestrator::new(
        settings,
        backends.backends(),
        pool,
        Arc::new(store.clone()),
        ReadinessProber::new(probe, health),
    ))
}

fn parse_id(id: &str) -> anyhow::Result<InstanceId> {
    id.parse()
        .with_context(|| format!("{id:?} is not an instance identifier"))
}

fn print_json(value: &Value) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Resource identifiers only. Credentials stay out of the output.
fn resource_summary(resources: &ResourceHandles) -> Value {
    json!({
        "database": resources.database.as_ref().map(|db| db.resource_id()),
        "bucket": resources.storage.as_ref().map(|s| s.bucket_name.clone()),
        "function": resources.compute.as_ref().map(|c| c.function_name.clone()),
        "distribution": resources.edge.as_ref().map(|e| e.alias.clone()),
    })
}

fn result_summary(result: &ProvisionResult) -> Value {
    let stages: Vec<Value> = result
        .stages
        .iter()
        .map(|s| json!({ "stage": s.stage, "adopted": s.adopted }))
        .collect();
    json!({
        "instance_id": result.instance_id,
        "status": result.status,
        "url": result.url,
        "stages": stages,
        "resources": resource_summary(&result.resources),
        "error": result.error.as_ref().map(ToString::to_string),
        "retryable": result.error.as_ref().map(|e| e.is_retryable()),
    })
}

pub fn init_config(path: &Path, base_domain: &str, force: bool) -> anyhow::Result<()> {
    if path.exists() && !force {
        bail!("{} already exists (pass --force to overwrite)", path.display());
    }
    let rendered = HostgridConfig::scaffold(base_domain).to_toml_string()?;
    std::fs::write(path, rendered).with_context(|| format!("writing {}", path.display()))?;
    println!("wrote {}", path.display());
    Ok(())
}

pub async fn provision(config_path: &Path, request_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let raw = std::fs::read_to_string(request_path)
        .with_context(|| format!("reading {}", request_path.display()))?;
    let request: ProvisionRequest = serde_json::from_str(&raw)
        .with_context(|| format!("parsing {}", request_path.display()))?;

    let store = open_registry(&config)?;
    let orch = orchestrator(&config, &store, None)?;

    let (cancel_tx, mut cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling provisioning");
            let _ = cancel_tx.send(true);
        }
    });

    let result = orch
        .provision_instance_with_cancel(&request, &mut cancel_rx)
        .await;
    print_json(&result_summary(&result))?;

    match result.error {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

pub async fn destroy(config_path: &Path, id: &str) -> anyhow::Result<()> {
    let id = parse_id(id)?;
    let config = load_config(config_path)?;
    let store = open_registry(&config)?;
    let orch = orchestrator(&config, &store, None)?;

    let ack = orch.destroy_instance(id).await?;
    let removed: Vec<String> = ack.removed.iter().map(ToString::to_string).collect();
    print_json(&json!({
        "instance_id": ack.instance_id,
        "removed": removed,
        "already_absent": ack.already_absent,
    }))
}

pub fn status(config_path: &Path, id: &str) -> anyhow::Result<()> {
    let id = parse_id(id)?;
    let config = load_config(config_path)?;
    let store = open_registry(&config)?;

    let Some(record) = store.get_instance(&id)? else {
        bail!("instance {id} is not registered");
    };
    print_json(&json!({
        "instance_id": record.instance_id,
        "owner_id": record.owner_id,
        "subdomain": record.subdomain,
        "status": record.status,
        "url": record.url,
        "error": record.error,
        "resources": resource_summary(&record.resources),
        "created_at": record.created_at,
        "updated_at": record.updated_at,
    }))
}

pub async fn health(config_path: &Path, id: &str, url: &str) -> anyhow::Result<()> {
    let id = parse_id(id)?;
    let config = load_config(config_path)?;
    let health = config.health.resolve()?;
    let store = open_registry(&config)?;
    let probe: Arc<dyn HealthProbe> = Arc::new(HttpProbe::new(health.probe_timeout));
    let orch = orchestrator(&config, &store, Some(probe))?;

    let healthy = orch.health_check(id, url).await;
    print_json(&json!({ "instance_id": id, "url": url, "healthy": healthy }))?;
    if !healthy {
        bail!("{url} is not healthy");
    }
    Ok(())
}

pub fn pool(config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let store = open_registry(&config)?;
    let pool = restored_pool(&config, &store)?;

    println!(
        "{:<20} {:<32} {:>9} {:>8} {:>6}",
        "MEMBER", "ENDPOINT", "TENANTS", "HEADROOM", "ACTIVE"
    );
    for member in pool.snapshot() {
        println!(
            "{:<20} {:<32} {:>9} {:>8} {:>6}",
            member.id,
            member.endpoint,
            format!("{}/{}", member.current_count, member.max_count),
            member.headroom(),
            if member.active { "yes" } else { "no" }
        );
    }
    Ok(())
}

pub fn orphans(config_path: &Path) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let store = open_registry(&config)?;

    let orphans = store.list_orphans()?;
    if orphans.is_empty() {
        println!("no orphaned resources");
        return Ok(());
    }
    for orphan in orphans {
        for resource in &orphan.resources {
            println!("{}  {}  (recorded {})", orphan.instance_id, resource, orphan.recorded_at);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use hostgrid_core::{InstanceStatus, ResourceKind, ResourceRef};
    use hostgrid_state::InstanceRecord;

    fn config_in(dir: &Path) -> HostgridConfig {
        let mut config = HostgridConfig::scaffold("example.dev");
        config.state.data_dir = dir.join("data");
        config
    }

    #[test]
    fn missing_config_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.platform.base_domain, "hostgrid.app");
    }

    #[test]
    fn init_config_refuses_to_overwrite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hostgrid.toml");

        init_config(&path, "example.dev", false).unwrap();
        let loaded = load_config(&path).unwrap();
        assert_eq!(loaded.platform.base_domain, "example.dev");
        assert_eq!(loaded.pool.members.len(), 1);

        assert!(init_config(&path, "other.dev", false).is_err());
        init_config(&path, "other.dev", true).unwrap();
        assert_eq!(load_config(&path).unwrap().platform.base_domain, "other.dev");
    }

    #[test]
    fn bad_instance_id_is_reported() {
        let err = parse_id("nope").unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn summary_omits_credentials() {
        let mut resources = ResourceHandles::default();
        resources.database = Some(hostgrid_core::DatabaseHandle {
            placement: hostgrid_core::DatabasePlacement::Shared {
                member_id: "pg-a".to_string(),
            },
            endpoint: "pg-a.internal".to_string(),
            database: "tenant_abc".to_string(),
            credentials: hostgrid_core::DatabaseCredentials {
                user: "tenant_abc_owner".to_string(),
                password: "hunter22hunter22".to_string(),
            },
        });
        let rendered = resource_summary(&resources).to_string();
        assert!(rendered.contains("pg-a/tenant_abc"));
        assert!(!rendered.contains("hunter22"));
    }

    #[tokio::test]
    async fn simulated_orchestrator_provisions_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let store = open_registry(&config).unwrap();
        let orch = orchestrator(&config, &store, None).unwrap();

        let request: ProvisionRequest = serde_json::from_value(json!({
            "instance_id": InstanceId::generate(),
            "owner_id": "user-1",
            "subdomain": "myapp",
            "admin": { "email": "owner@example.com", "password": "correct-horse" }
        }))
        .unwrap();
        let result = orch.provision_instance(&request).await;
        assert!(result.is_running(), "unexpected error: {:?}", result.error);

        let summary = result_summary(&result);
        assert_eq!(summary["url"], "https://myapp.example.dev");
        assert_eq!(summary["status"], "running");

        let record = store.get_instance(&request.instance_id).unwrap().unwrap();
        assert_eq!(record.status, InstanceStatus::Running);

        // A fresh process sees the slot through the registry.
        let pool = restored_pool(&config, &store).unwrap();
        assert_eq!(pool.snapshot()[0].current_count, 1);
    }

    #[test]
    fn orphans_listing_reads_registry() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let store = open_registry(&config).unwrap();
        let id = InstanceId::generate();
        store
            .put_instance(&InstanceRecord::provisioning(id, "user-1", "myapp"))
            .unwrap();
        store
            .put_orphans(&id, &[ResourceRef::new(ResourceKind::Bucket, "hostgrid-abc")])
            .unwrap();
        drop(store);

        let path = dir.path().join("hostgrid.toml");
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();
        orphans(&path).unwrap();
    }
}
