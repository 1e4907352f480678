//! Deterministic resource naming.
//!
//! Every external resource of an instance is named from a truncated
//! SHA-256 of its identifier. A retried provisioning run therefore looks
//! for exactly the names a previous attempt used and adopts what it finds
//! instead of creating a second copy.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::types::InstanceId;

/// Hex characters kept from the identifier digest.
pub const FINGERPRINT_LEN: usize = 12;

/// Prefix applied to every platform-owned resource name.
pub const NAME_PREFIX: &str = "hostgrid";

/// Resource names derived from one instance identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceNames {
    pub fingerprint: String,
    /// Database created on a shared pool host.
    pub database_name: String,
    /// Owner role of the shared database.
    pub database_user: String,
    /// Identifier of a dedicated database server.
    pub dedicated_database_id: String,
    pub bucket_name: String,
    pub function_name: String,
    pub distribution_alias: String,
}

impl ResourceNames {
    /// Derive all names for `id`. Pure: equal inputs give equal names.
    pub fn derive(id: &InstanceId) -> Self {
        let fp = fingerprint(id);
        Self {
            database_name: format!("tenant_{fp}"),
            database_user: format!("tenant_{fp}_owner"),
            dedicated_database_id: format!("{NAME_PREFIX}-db-{fp}"),
            bucket_name: format!("{NAME_PREFIX}-{fp}"),
            function_name: format!("{NAME_PREFIX}-fn-{fp}"),
            distribution_alias: format!("{NAME_PREFIX}-edge-{fp}"),
            fingerprint: fp,
        }
    }
}

/// First [`FINGERPRINT_LEN`] hex characters of SHA-256 over the identifier.
pub fn fingerprint(id: &InstanceId) -> String {
    let digest = Sha256::digest(id.to_string().as_bytes());
    let mut hex = hex::encode(digest);
    hex.truncate(FINGERPRINT_LEN);
    hex
}
