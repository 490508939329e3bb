use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Failure;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionStatus {
    Passed,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub name: String,
    pub status: ExecutionStatus,
    pub duration: Duration,
    pub error: Option<Failure>,
}

/// Terminal record of one scenario: the result of its last attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub scenario_name: String,
    pub status: ExecutionStatus,
    pub duration: Duration,
    pub error: Option<Failure>,
    pub steps: Vec<StepOutcome>,
    /// Attempts made, retries included. Zero when skipped.
    pub attempts: u32,
}

impl ExecutionOutcome {
    pub fn skipped(scenario_name: impl Into<String>) -> Self {
        Self {
            scenario_name: scenario_name.into(),
            status: ExecutionStatus::Skipped,
            duration: Duration::ZERO,
            error: None,
            steps: Vec::new(),
            attempts: 0,
        }
    }

    pub fn is_passed(&self) -> bool {
        self.status == ExecutionStatus::Passed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    /// Wall-clock span of the whole batch.
    pub duration: Duration,
    /// One outcome per filtered-in scenario, in input order.
    pub outcomes: Vec<ExecutionOutcome>,
}

impl ExecutionSummary {
    /// `true` when nothing failed. Callers derive exit codes from this.
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }

    pub fn outcome(&self, scenario_name: &str) -> Option<&ExecutionOutcome> {
        self.outcomes
            .iter()
            .find(|o| o.scenario_name == scenario_name)
    }

    pub fn failures(&self) -> impl Iterator<Item = &ExecutionOutcome> {
        self.outcomes
            .iter()
            .filter(|o| o.status == ExecutionStatus::Failed)
    }
}
