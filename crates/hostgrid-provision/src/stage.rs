//! Per-stage and whole-run state machines.

use serde::{Deserialize, Serialize};
use tracing::warn;

use hostgrid_core::Stage;

/// State of one stage within a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageState {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl StageState {
    /// `Pending → Running → Succeeded | Failed`.
    pub fn can_transition_to(&self, next: StageState) -> bool {
        matches!(
            (self, next),
            (StageState::Pending, StageState::Running)
                | (StageState::Running, StageState::Succeeded)
                | (StageState::Running, StageState::Failed)
        )
    }
}

/// Where a provisioning run is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "phase")]
pub enum SagaPhase {
    /// Nothing has run yet.
    Pending,
    /// A stage is executing.
    Running { stage: Stage },
    /// All stages succeeded and the instance answered its health check.
    Completed,
    /// A failure triggered compensation. `clean` is false if resources
    /// were left behind.
    RolledBack { clean: bool },
}

/// The state of every stage of one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageBoard {
    states: [StageState; 5],
}

impl StageBoard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self, stage: Stage) -> StageState {
        self.states[index(stage)]
    }

    pub fn start(&mut self, stage: Stage) {
        self.set(stage, StageState::Running);
    }

    pub fn succeed(&mut self, stage: Stage) {
        self.set(stage, StageState::Succeeded);
    }

    pub fn fail(&mut self, stage: Stage) {
        self.set(stage, StageState::Failed);
    }

    /// Stages that never started.
    pub fn untouched(&self) -> Vec<Stage> {
        Stage::ALL
            .into_iter()
            .filter(|s| self.state(*s) == StageState::Pending)
            .collect()
    }

    fn set(&mut self, stage: Stage, next: StageState) {
        let slot = &mut self.states[index(stage)];
        if !slot.can_transition_to(next) {
            warn!(%stage, from = ?*slot, to = ?next, "ignoring illegal stage transition");
            return;
        }
        *slot = next;
    }
}

fn index(stage: Stage) -> usize {
    match stage {
        Stage::Database => 0,
        Stage::Storage => 1,
        Stage::Compute => 2,
        Stage::EdgeRouting => 3,
        Stage::Initialize => 4,
    }
}
