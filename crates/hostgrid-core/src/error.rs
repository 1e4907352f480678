//! Error types for request validation and configuration loading.

use thiserror::Error;

/// A provisioning request was rejected before any resource was touched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("owner identifier must not be empty")]
    MissingOwner,

    #[error("subdomain {0:?} must be 3-63 lowercase letters, digits or hyphens")]
    InvalidSubdomain(String),

    #[error("admin email {0:?} is not a valid address")]
    InvalidAdminEmail(String),

    #[error("admin password must be at least {min} characters")]
    WeakAdminPassword { min: usize },

    #[error("{field} quota must be greater than zero")]
    ZeroQuota { field: &'static str },

    #[error("artifact version must not be empty")]
    EmptyArtifactVersion,

    #[error("environment key {0:?} is malformed")]
    InvalidEnvKey(String),

    #[error("environment key {0:?} is reserved for the platform")]
    ReservedEnvKey(String),
}

/// Errors raised while loading `hostgrid.toml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Read(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("failed to render config: {0}")]
    Render(#[from] toml::ser::Error),

    #[error("invalid duration for {field}: {value:?}")]
    InvalidDuration { field: &'static str, value: String },

    #[error("pool member {0:?} is declared more than once")]
    DuplicateMember(String),

    #[error("pool member {0:?} must allow at least one tenant")]
    ZeroCapacity(String),
}
