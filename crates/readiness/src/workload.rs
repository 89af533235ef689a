use std::fmt;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

/// Identifies a workload by the label selector its pods carry.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkloadId {
    pub label: String,
    pub value: String,
}

impl WorkloadId {
    pub fn new(label: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            value: value.into(),
        }
    }

    /// Label selector matching the workload's pods, e.g. `app=todo`.
    pub fn selector(&self) -> String {
        format!("{}={}", self.label, self.value)
    }
}

impl fmt::Display for WorkloadId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.label, self.value)
    }
}

/// Replica counts observed for one workload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicaStatus {
    pub ready: u32,
    pub running: u32,
}

/// Condition a workload has to reach.
///
/// Both variants require an exact count, so `Running(0)` is the condition for
/// a workload that has been scaled away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetState {
    Ready(u32),
    Running(u32),
}

impl TargetState {
    pub fn is_met(&self, status: &ReplicaStatus) -> bool {
        match *self {
            TargetState::Ready(n) => status.ready == n,
            TargetState::Running(n) => status.running == n,
        }
    }
}

impl fmt::Display for TargetState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetState::Ready(n) => write!(f, "exactly {n} ready"),
            TargetState::Running(n) => write!(f, "exactly {n} running"),
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum WorkloadError {
    #[error("polling interval of workload `{0}` must be positive")]
    ZeroInterval(WorkloadId),

    #[error("timeout of workload `{0}` must be positive")]
    ZeroTimeout(WorkloadId),
}

/// A workload to wait for, with its own polling cadence and time budget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    pub id: WorkloadId,
    pub target: TargetState,
    pub interval: Duration,
    pub timeout: Duration,
}

impl Workload {
    pub fn new(
        id: WorkloadId,
        target: TargetState,
        interval: Duration,
        timeout: Duration,
    ) -> Result<Self, WorkloadError> {
        if interval.is_zero() {
            return Err(WorkloadError::ZeroInterval(id));
        }
        if timeout.is_zero() {
            return Err(WorkloadError::ZeroTimeout(id));
        }
        Ok(Self {
            id,
            target,
            interval,
            timeout,
        })
    }
}
