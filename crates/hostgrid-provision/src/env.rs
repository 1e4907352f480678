//! Runtime environment handed to a deployed instance.

use std::collections::BTreeMap;

use hostgrid_core::config::PlatformConfig;
use hostgrid_core::{DatabaseHandle, InstanceId, StorageHandle};

/// Port the application listens on inside its runtime.
pub const APP_PORT: u16 = 8080;

/// Inputs the Compute stage wires into the environment.
pub struct EnvInputs<'a> {
    pub instance_id: InstanceId,
    pub database: &'a DatabaseHandle,
    pub storage: &'a StorageHandle,
    pub platform: &'a PlatformConfig,
    pub jwt_secret: &'a str,
    pub public_url: &'a str,
    pub overrides: &'a BTreeMap<String, String>,
}

/// Reserved platform keys plus caller overrides.
///
/// Overrides never replace a reserved key.
pub fn compose_env(inputs: &EnvInputs<'_>) -> BTreeMap<String, String> {
    let mut env = BTreeMap::from([
        ("DATABASE_URL".to_string(), inputs.database.connection_url()),
        (
            "STORAGE_ENDPOINT".to_string(),
            inputs.platform.storage_endpoint.clone(),
        ),
        ("STORAGE_BUCKET".to_string(), inputs.storage.bucket_name.clone()),
        (
            "STORAGE_REGION".to_string(),
            inputs.platform.storage_region.clone(),
        ),
        (
            "STORAGE_ACCESS_KEY_ID".to_string(),
            inputs.storage.access_key.key_id.clone(),
        ),
        (
            "STORAGE_SECRET_KEY".to_string(),
            inputs.storage.access_key.secret.clone(),
        ),
        ("JWT_SECRET".to_string(), inputs.jwt_secret.to_string()),
        ("PORT".to_string(), APP_PORT.to_string()),
        ("INSTANCE_ID".to_string(), inputs.instance_id.to_string()),
        ("PUBLIC_URL".to_string(), inputs.public_url.to_string()),
    ]);
    for (key, value) in inputs.overrides {
        env.entry(key.clone()).or_insert_with(|| value.clone());
    }
    env
}
