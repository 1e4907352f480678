//! Request validation. Runs before any backend is called.

use crate::error::ValidationError;
use crate::types::ProvisionRequest;

/// Environment keys the platform sets itself.
pub const RESERVED_ENV_KEYS: &[&str] = &[
    "DATABASE_URL",
    "STORAGE_ENDPOINT",
    "STORAGE_BUCKET",
    "STORAGE_REGION",
    "STORAGE_ACCESS_KEY_ID",
    "STORAGE_SECRET_KEY",
    "JWT_SECRET",
    "PORT",
    "INSTANCE_ID",
    "PUBLIC_URL",
];

pub const MIN_ADMIN_PASSWORD_LEN: usize = 8;

impl ProvisionRequest {
    /// Check the request is well-formed. Has no side effects.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.owner_id.trim().is_empty() {
            return Err(ValidationError::MissingOwner);
        }
        if !is_valid_subdomain(&self.subdomain) {
            return Err(ValidationError::InvalidSubdomain(self.subdomain.clone()));
        }
        if !is_plausible_email(&self.admin.email) {
            return Err(ValidationError::InvalidAdminEmail(self.admin.email.clone()));
        }
        if self.admin.password.chars().count() < MIN_ADMIN_PASSWORD_LEN {
            return Err(ValidationError::WeakAdminPassword {
                min: MIN_ADMIN_PASSWORD_LEN,
            });
        }
        if self.quotas.database_gb == 0 {
            return Err(ValidationError::ZeroQuota { field: "database" });
        }
        if self.quotas.storage_gb == 0 {
            return Err(ValidationError::ZeroQuota { field: "storage" });
        }
        if self
            .artifact_version
            .as_deref()
            .is_some_and(|v| v.trim().is_empty())
        {
            return Err(ValidationError::EmptyArtifactVersion);
        }
        for key in self.env.keys() {
            if !is_valid_env_key(key) {
                return Err(ValidationError::InvalidEnvKey(key.clone()));
            }
            if is_reserved_env_key(key) {
                return Err(ValidationError::ReservedEnvKey(key.clone()));
            }
        }
        Ok(())
    }
}

pub fn is_reserved_env_key(key: &str) -> bool {
    RESERVED_ENV_KEYS.contains(&key)
}

/// 3-63 chars of `[a-z0-9-]`, no leading or trailing hyphen.
pub fn is_valid_subdomain(s: &str) -> bool {
    (3..=63).contains(&s.len())
        && !s.starts_with('-')
        && !s.ends_with('-')
        && s
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
}

/// One `@` between a non-empty local part and a non-empty domain.
fn is_plausible_email(s: &str) -> bool {
    let mut parts = s.split('@');
    match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => !local.is_empty() && !domain.is_empty(),
        _ => false,
    }
}

fn is_valid_env_key(key: &str) -> bool {
    let Some(first) = key.bytes().next() else {
        return false;
    };
    !first.is_ascii_digit()
        && key
            .bytes()
            .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit() || b == b'_')
}
