//! Error types for readiness probing.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for readiness waits.
pub type HealthResult<T> = Result<T, HealthError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HealthError {
    #[error("not ready after {attempts} probes ({elapsed:?})")]
    Timeout { attempts: u32, elapsed: Duration },

    #[error("readiness wait cancelled after {attempts} probes")]
    Cancelled { attempts: u32 },
}
