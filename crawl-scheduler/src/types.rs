use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Idle,
    Busy,
    Overloaded,
    Failed,
    Maintenance,
}

impl WorkerState {
    /// States in which a worker may receive new assignments.
    pub fn is_assignable(self) -> bool {
        matches!(self, WorkerState::Idle | WorkerState::Busy)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}
