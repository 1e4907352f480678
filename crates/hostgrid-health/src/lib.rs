//! hostgrid-health: post-provisioning readiness checks for Hostgrid.
//!
//! Polls a freshly deployed instance until it answers its health path,
//! with exponential backoff and a wall-clock budget.
//!
//! # Architecture
//!
//! ```text
//! ReadinessProber
//!   ├── HealthProbe (HttpProbe in production, ScriptedProbe in tests)
//!   ├── Backoff (initial → doubled per failure → capped)
//!   └── watch::Receiver<bool> cancellation
//! ```
//!
//! A probe that fails until the budget runs out ends in
//! [`HealthError::Timeout`]; the caller treats that like a failed stage.

pub mod backoff;
pub mod error;
pub mod probe;
pub mod prober;

pub use backoff::Backoff;
pub use error::{HealthError, HealthResult};
pub use probe::{HealthProbe, HttpProbe, ProbeResult, ScriptedProbe};
pub use prober::{ReadinessProber, cancellation};
