//! hostgrid-state: instance registry for Hostgrid.
//!
//! Backed by [redb](https://docs.rs/redb), records the status of every
//! provisioning run, the resource handles an instance owns, and the
//! orphan ledger of resources a rollback could not remove.
//!
//! # Architecture
//!
//! Records are JSON-serialized into redb's `&[u8]` value columns, keyed
//! by the hyphenated instance identifier. The orchestrator only talks to
//! the [`InstanceRegistry`] trait; [`StateStore`] is the redb
//! implementation and is `Clone` + `Send` + `Sync` (backed by
//! `Arc<Database>`).

pub mod error;
pub mod registry;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use registry::InstanceRegistry;
pub use store::StateStore;
pub use types::*;
