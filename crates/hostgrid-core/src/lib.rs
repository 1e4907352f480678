//! hostgrid-core: shared vocabulary for the Hostgrid provisioning plane.
//!
//! Everything here is pure: request and result types, request validation,
//! the deterministic resource-name deriver, secret generation against an
//! explicit randomness source, and `hostgrid.toml` parsing.

pub mod config;
pub mod error;
pub mod naming;
pub mod secrets;
pub mod types;
pub mod validate;

pub use config::{HealthSettings, HostgridConfig, PoolMemberConfig, StageTimeouts};
pub use error::{ConfigError, ValidationError};
pub use naming::ResourceNames;
pub use secrets::{RunSecrets, generate_secret};
pub use types::*;
