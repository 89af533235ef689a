use std::time::Duration;

use serde::Serialize;

use crate::workload::WorkloadId;

/// Terminal result of waiting for one workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PollOutcome {
    /// The target condition held on tick `ticks`.
    Succeeded { ticks: u32, elapsed: Duration },
    /// The workload's own timeout elapsed without the condition holding.
    TimedOut { ticks: u32, elapsed: Duration },
    /// The last query before the workload's deadline failed, or polling could
    /// not run at all.
    Errored { reason: String },
    /// The global deadline was reached while the workload was still pending.
    Cancelled,
}

impl PollOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, PollOutcome::Succeeded { .. })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Success,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkloadOutcome {
    pub workload: WorkloadId,
    pub outcome: PollOutcome,
}

/// Outcomes of one coordination call, in submission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AggregateResult {
    pub verdict: Verdict,
    pub outcomes: Vec<WorkloadOutcome>,
}

impl AggregateResult {
    pub fn from_outcomes(outcomes: Vec<(WorkloadId, PollOutcome)>) -> Self {
        let outcomes: Vec<WorkloadOutcome> = outcomes
            .into_iter()
            .map(|(workload, outcome)| WorkloadOutcome { workload, outcome })
            .collect();
        let verdict = if outcomes.iter().all(|o| o.outcome.is_success()) {
            Verdict::Success
        } else {
            Verdict::Failure
        };
        Self { verdict, outcomes }
    }

    pub fn is_success(&self) -> bool {
        self.verdict == Verdict::Success
    }

    /// Workloads that did not succeed, for diagnostics.
    pub fn failures(&self) -> impl Iterator<Item = &WorkloadOutcome> {
        self.outcomes.iter().filter(|o| !o.outcome.is_success())
    }

    pub fn outcome_of(&self, workload: &WorkloadId) -> Option<&PollOutcome> {
        self.outcomes
            .iter()
            .find(|o| &o.workload == workload)
            .map(|o| &o.outcome)
    }

    /// True when there was something to wait for and every query failed.
    ///
    /// Callers use this to detect an unreachable cluster.
    pub fn all_errored(&self) -> bool {
        !self.outcomes.is_empty()
            && self
                .outcomes
                .iter()
                .all(|o| matches!(o.outcome, PollOutcome::Errored { .. }))
    }

    /// One line per failing workload, e.g. `app=todo: timed out after 2 ticks (2s)`.
    pub fn failure_summary(&self) -> String {
        self.failures()
            .map(|o| {
                let detail = match &o.outcome {
                    PollOutcome::TimedOut { ticks, elapsed } => {
                        format!("timed out after {ticks} ticks ({elapsed:?})")
                    }
                    PollOutcome::Errored { reason } => format!("errored: {reason}"),
                    PollOutcome::Cancelled => "cancelled at global deadline".to_string(),
                    PollOutcome::Succeeded { .. } => "succeeded".to_string(),
                };
                format!("{}: {detail}", o.workload)
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;

    use super::*;

    fn succeeded() -> PollOutcome {
        PollOutcome::Succeeded {
            ticks: 1,
            elapsed: Duration::ZERO,
        }
    }

    #[test]
    fn success_requires_every_outcome_to_succeed() {
        let a = WorkloadId::new("app", "a");
        let b = WorkloadId::new("app", "b");

        let all_good = AggregateResult::from_outcomes(vec![
            (a.clone(), succeeded()),
            (b.clone(), succeeded()),
        ]);
        assert!(all_good.is_success());
        assert_eq!(all_good.failures().count(), 0);

        let one_cancelled =
            AggregateResult::from_outcomes(vec![(a, succeeded()), (b.clone(), PollOutcome::Cancelled)]);
        assert_eq!(one_cancelled.verdict, Verdict::Failure);
        let failures: Vec<_> = one_cancelled.failures().map(|o| &o.workload).collect();
        assert_eq!(failures, vec![&b]);
    }

    #[test]
    fn empty_set_is_trivial_success() {
        let result = AggregateResult::from_outcomes(Vec::new());
        assert!(result.is_success());
        assert!(!result.all_errored());
    }

    #[test]
    fn summary_names_failing_workloads() {
        let result = AggregateResult::from_outcomes(vec![
            (WorkloadId::new("app", "a"), succeeded()),
            (
                WorkloadId::new("app", "b"),
                PollOutcome::Errored {
                    reason: "boom".to_string(),
                },
            ),
        ]);
        assert_eq!(result.failure_summary(), "app=b: errored: boom");
    }

    #[test]
    fn serializes_with_status_tag() {
        let result = AggregateResult::from_outcomes(vec![(
            WorkloadId::new("app", "a"),
            PollOutcome::Cancelled,
        )]);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["verdict"], "failure");
        assert_eq!(json["outcomes"][0]["outcome"]["status"], "cancelled");
        assert_eq!(json["outcomes"][0]["workload"]["value"], "a");
    }
}
