//! hostgrid-provision: the provisioning saga for Hostgrid.
//!
//! Brings up a hosted instance by running five ordered stages against the
//! backend adapters, confirms it answers its health path, and on any
//! failure compensates every resource it created or adopted.
//!
//! # Architecture
//!
//! ```text
//! Orchestrator
//!   ├── validate request (no side effects)
//!   ├── in-flight guard (one operation per instance)
//!   ├── InstanceRegistry: provisioning → running | error
//!   └── Saga
//!       ├── Database ── SharedPool (shared tier) / poll (dedicated tier)
//!       ├── Storage
//!       ├── Compute  ── composed runtime environment
//!       ├── EdgeRouting
//!       ├── Initialize
//!       ├── ReadinessProber
//!       └── RollbackLedger ── reverse, best-effort compensation
//! ```
//!
//! # Failure outcomes
//!
//! A failed run either rolled back cleanly (the error is retryable and no
//! resource remains) or reports
//! [`ProvisionError::RollbackPartialFailure`] naming what was left. The
//! second case is also written to the registry's orphan ledger.

pub mod env;
pub mod error;
pub mod ledger;
pub mod orchestrator;
pub mod saga;
pub mod stage;

pub use error::ProvisionError;
pub use ledger::{CompensationReport, LedgerEntry, RollbackLedger};
pub use orchestrator::{DestroyAck, Orchestrator, OrchestratorSettings};
pub use saga::ProvisionResult;
pub use stage::{SagaPhase, StageBoard, StageState};
