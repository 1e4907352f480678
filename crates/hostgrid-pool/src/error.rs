//! Pool error types.

use thiserror::Error;

/// Errors that can occur while reserving pool capacity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("no shared database host has headroom ({active_members} active members)")]
    Exhausted { active_members: usize },

    #[error("unknown pool member: {0}")]
    UnknownMember(String),

    #[error("pool member {0} is at capacity")]
    MemberFull(String),
}

pub type PoolResult<T> = Result<T, PoolError>;
