//! redb table definitions for the instance registry.
//!
//! Both tables use `&str` keys (the hyphenated instance identifier) and
//! `&[u8]` values holding JSON-serialized records.

use redb::TableDefinition;

/// Instance records keyed by `{instance_id}`.
pub const INSTANCES: TableDefinition<&str, &[u8]> = TableDefinition::new("instances");

/// Orphaned resources keyed by `{instance_id}`.
pub const ORPHANS: TableDefinition<&str, &[u8]> = TableDefinition::new("orphans");
