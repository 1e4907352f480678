//! hostgrid.toml configuration parser.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::Stage;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HostgridConfig {
    #[serde(default)]
    pub platform: PlatformConfig,
    #[serde(default)]
    pub pool: PoolConfig,
    #[serde(default)]
    pub timeouts: TimeoutConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub state: StateConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlatformConfig {
    /// Instances are served at `https://{subdomain}.{base_domain}`.
    pub base_domain: String,
    /// Application build deployed when a request does not pin one.
    pub artifact_version: String,
    pub storage_endpoint: String,
    pub storage_region: String,
    /// Path probed on the compute endpoint after initialization.
    pub health_path: String,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            base_domain: "hostgrid.app".to_string(),
            artifact_version: "latest".to_string(),
            storage_endpoint: "https://s3.us-west-004.backblazeb2.com".to_string(),
            storage_region: "us-west-004".to_string(),
            health_path: "/health".to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default)]
    pub members: Vec<PoolMemberConfig>,
}

/// One shared database host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolMemberConfig {
    pub id: String,
    pub endpoint: String,
    pub max_tenants: u32,
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub database: String,
    pub storage: String,
    pub compute: String,
    pub edge_routing: String,
    pub initialize: String,
    /// Interval between readiness polls of a dedicated database.
    pub dedicated_poll_interval: String,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            database: "15m".to_string(),
            storage: "60s".to_string(),
            compute: "2m".to_string(),
            edge_routing: "2m".to_string(),
            initialize: "60s".to_string(),
            dedicated_poll_interval: "10s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HealthConfig {
    pub initial_backoff: String,
    pub max_backoff: String,
    /// Total wall-clock budget for the readiness wait.
    pub budget: String,
    /// Timeout of a single probe request.
    pub probe_timeout: String,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            initial_backoff: "1s".to_string(),
            max_backoff: "8s".to_string(),
            budget: "45s".to_string(),
            probe_timeout: "5s".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    pub data_dir: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("/var/lib/hostgrid"),
        }
    }
}

/// Resolved per-stage timeouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageTimeouts {
    pub database: Duration,
    pub storage: Duration,
    pub compute: Duration,
    pub edge_routing: Duration,
    pub initialize: Duration,
    pub dedicated_poll_interval: Duration,
}

impl StageTimeouts {
    pub fn for_stage(&self, stage: Stage) -> Duration {
        match stage {
            Stage::Database => self.database,
            Stage::Storage => self.storage,
            Stage::Compute => self.compute,
            Stage::EdgeRouting => self.edge_routing,
            Stage::Initialize => self.initialize,
        }
    }
}

impl Default for StageTimeouts {
    fn default() -> Self {
        // The defaults are literals known to parse.
        TimeoutConfig::default()
            .resolve()
            .unwrap_or(Self {
                database: Duration::from_secs(900),
                storage: Duration::from_secs(60),
                compute: Duration::from_secs(120),
                edge_routing: Duration::from_secs(120),
                initialize: Duration::from_secs(60),
                dedicated_poll_interval: Duration::from_secs(10),
            })
    }
}

/// Resolved readiness-probe settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSettings {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub budget: Duration,
    pub probe_timeout: Duration,
}

impl Default for HealthSettings {
    fn default() -> Self {
        Self {
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(8),
            budget: Duration::from_secs(45),
            probe_timeout: Duration::from_secs(5),
        }
    }
}

impl TimeoutConfig {
    pub fn resolve(&self) -> Result<StageTimeouts, ConfigError> {
        Ok(StageTimeouts {
            database: duration_field("timeouts.database", &self.database)?,
            storage: duration_field("timeouts.storage", &self.storage)?,
            compute: duration_field("timeouts.compute", &self.compute)?,
            edge_routing: duration_field("timeouts.edge_routing", &self.edge_routing)?,
            initialize: duration_field("timeouts.initialize", &self.initialize)?,
            dedicated_poll_interval: duration_field(
                "timeouts.dedicated_poll_interval",
                &self.dedicated_poll_interval,
            )?,
        })
    }
}

impl HealthConfig {
    pub fn resolve(&self) -> Result<HealthSettings, ConfigError> {
        Ok(HealthSettings {
            initial_backoff: duration_field("health.initial_backoff", &self.initial_backoff)?,
            max_backoff: duration_field("health.max_backoff", &self.max_backoff)?,
            budget: duration_field("health.budget", &self.budget)?,
            probe_timeout: duration_field("health.probe_timeout", &self.probe_timeout)?,
        })
    }
}

impl HostgridConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: HostgridConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        for member in &self.pool.members {
            if !seen.insert(member.id.as_str()) {
                return Err(ConfigError::DuplicateMember(member.id.clone()));
            }
            if member.max_tenants == 0 {
                return Err(ConfigError::ZeroCapacity(member.id.clone()));
            }
        }
        self.timeouts.resolve()?;
        self.health.resolve()?;
        Ok(())
    }

    /// Path of the registry database inside the data directory.
    pub fn registry_path(&self) -> PathBuf {
        self.state.data_dir.join("hostgrid.redb")
    }

    /// Scaffold a starter config with a single shared database host.
    pub fn scaffold(base_domain: &str) -> Self {
        HostgridConfig {
            platform: PlatformConfig {
                base_domain: base_domain.to_string(),
                ..Default::default()
            },
            pool: PoolConfig {
                members: vec![PoolMemberConfig {
                    id: "shared-pg-01".to_string(),
                    endpoint: "shared-pg-01.internal".to_string(),
                    max_tenants: 50,
                    active: true,
                }],
            },
            ..Default::default()
        }
    }
}

fn duration_field(field: &'static str, value: &str) -> Result<Duration, ConfigError> {
    parse_duration(value).ok_or_else(|| ConfigError::InvalidDuration {
        field,
        value: value.to_string(),
    })
}

/// Parse a duration string like "5s", "500ms", "2m". Bare numbers are seconds.
pub fn parse_duration(s: &str) -> Option<Duration> {
    let s = s.trim();
    if let Some(secs) = s.strip_suffix('s') {
        if let Some(ms) = secs.strip_suffix('m') {
            ms.parse::<u64>().ok().map(Duration::from_millis)
        } else {
            secs.parse::<u64>().ok().map(Duration::from_secs)
        }
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.parse::<u64>()
            .ok()
            .and_then(|m| m.checked_mul(60))
            .map(Duration::from_secs)
    } else {
        s.parse::<u64>().ok().map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scaffold_renders_and_parses_back() {
        let config = HostgridConfig::scaffold("example.cloud");
        let toml_str = config.to_toml_string().unwrap();
        assert!(toml_str.contains("example.cloud"));
        assert!(toml_str.contains("shared-pg-01"));

        let back = HostgridConfig::from_toml_str(&toml_str).unwrap();
        assert_eq!(back.pool.members, config.pool.members);
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = HostgridConfig::from_toml_str("").unwrap();
        assert_eq!(config.platform.base_domain, "hostgrid.app");
        assert!(config.pool.members.is_empty());
        assert_eq!(
            config.timeouts.resolve().unwrap().database,
            Duration::from_secs(900)
        );
        assert_eq!(config.health.resolve().unwrap(), HealthSettings::default());
    }

    #[test]
    fn parses_pool_members() {
        let config = HostgridConfig::from_toml_str(
            r#"
[platform]
base_domain = "solo.cloud"

[[pool.members]]
id = "pg-a"
endpoint = "pg-a.internal"
max_tenants = 10

[[pool.members]]
id = "pg-b"
endpoint = "pg-b.internal"
max_tenants = 20
active = false
"#,
        )
        .unwrap();
        assert_eq!(config.pool.members.len(), 2);
        assert!(config.pool.members[0].active);
        assert!(!config.pool.members[1].active);
        assert_eq!(config.platform.storage_region, "us-west-004");
    }

    #[test]
    fn rejects_duplicate_members() {
        let err = HostgridConfig::from_toml_str(
            r#"
[[pool.members]]
id = "pg-a"
endpoint = "a"
max_tenants = 1

[[pool.members]]
id = "pg-a"
endpoint = "b"
max_tenants = 1
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateMember(id) if id == "pg-a"));
    }

    #[test]
    fn rejects_zero_capacity_member() {
        let err = HostgridConfig::from_toml_str(
            r#"
[[pool.members]]
id = "pg-a"
endpoint = "a"
max_tenants = 0
"#,
        )
        .unwrap_err();
        assert!(matches!(err, ConfigError::ZeroCapacity(_)));
    }

    #[test]
    fn rejects_bad_duration() {
        let err = HostgridConfig::from_toml_str(
            r#"
[health]
budget = "forever"
"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidDuration { field: "health.budget", .. }
        ));
    }

    #[test]
    fn stage_timeouts_map_each_stage() {
        let timeouts = StageTimeouts::default();
        assert_eq!(timeouts.for_stage(Stage::Storage), Duration::from_secs(60));
        assert_eq!(timeouts.for_stage(Stage::Compute), Duration::from_secs(120));
        assert_eq!(timeouts.for_stage(Stage::Initialize), Duration::from_secs(60));
    }

    #[test]
    fn parse_duration_units() {
        assert_eq!(parse_duration("5s"), Some(Duration::from_secs(5)));
        assert_eq!(parse_duration("500ms"), Some(Duration::from_millis(500)));
        assert_eq!(parse_duration("2m"), Some(Duration::from_secs(120)));
        assert_eq!(parse_duration("10"), Some(Duration::from_secs(10)));
        assert_eq!(parse_duration("soon"), None);
    }

    #[test]
    fn oversized_minutes_are_invalid() {
        assert_eq!(parse_duration("18446744073709551615m"), None);
        let err = HostgridConfig::from_toml_str(
            r#"
[timeouts]
compute = "307445734561825861m"
"#,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidDuration { field: "timeouts.compute", .. }
        ));
    }
}
