//! Hostgrid shared database pool: least-loaded placement, atomic reservation.
//!
//! Tenants on the `shared` database tier get a database on one of a fixed
//! set of hosts. This crate owns the per-host tenant counters; nothing else
//! may change them.
//!
//! # Components
//!
//! - **`member`**: Pool member state and the selection policy
//! - **`allocator`**: `SharedPool`, the serialized reserve/release surface
//! - **`error`**: `PoolError`

pub mod allocator;
pub mod error;
pub mod member;

pub use allocator::{Reservation, SharedPool};
pub use error::{PoolError, PoolResult};
pub use member::{SharedPoolMember, rank_members, select_member};
