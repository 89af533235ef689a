//! Parallel readiness polling.
//!
//! Every workload gets its own polling task on a [`JoinSet`]. The caller waits
//! for all of them or for the global deadline, whichever comes first; on the
//! deadline the remaining tasks are cancelled through a shared
//! [`CancellationToken`] and, failing that, aborted. No task outlives
//! [`ReadinessCoordinator::wait_for_all`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::cluster::describe;
use crate::cluster::ClusterApi;
use crate::outcome::AggregateResult;
use crate::outcome::PollOutcome;
use crate::session::SessionContext;
use crate::workload::Workload;

/// Upper bound on how long cancelled tasks get to wind down before they are
/// aborted. The effective grace is never longer than the shortest interval.
const MAX_CANCEL_GRACE: Duration = Duration::from_secs(1);

const UNREACHABLE_REASON: &str = "cluster unreachable";

pub struct ReadinessCoordinator {
    cluster: Arc<dyn ClusterApi>,
}

impl ReadinessCoordinator {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self { cluster }
    }

    pub fn cluster(&self) -> &Arc<dyn ClusterApi> {
        &self.cluster
    }

    /// Waits until every workload reaches its target, times out, errors or
    /// is cancelled at `global_timeout`.
    ///
    /// Never fails: problems are reported per workload in the returned
    /// [`AggregateResult`], which lists outcomes in submission order. Returns
    /// no later than `global_timeout` plus the shortest polling interval.
    #[tracing::instrument(skip_all, fields(workloads = workloads.len(), global_timeout = ?global_timeout))]
    pub async fn wait_for_all(
        &self,
        session: &SessionContext,
        workloads: Vec<Workload>,
        global_timeout: Duration,
    ) -> AggregateResult {
        if workloads.is_empty() {
            info!("Nothing to wait for");
            return AggregateResult::from_outcomes(Vec::new());
        }

        if !session.is_reachable() {
            warn!("Cluster marked unreachable in this session, not polling");
            return AggregateResult::from_outcomes(
                workloads
                    .into_iter()
                    .map(|w| {
                        let outcome = PollOutcome::Errored {
                            reason: UNREACHABLE_REASON.to_string(),
                        };
                        (w.id, outcome)
                    })
                    .collect(),
            );
        }

        let deadline = Instant::now() + global_timeout;
        let grace = workloads
            .iter()
            .map(|w| w.interval)
            .min()
            .unwrap_or(MAX_CANCEL_GRACE)
            .min(MAX_CANCEL_GRACE);
        let token = CancellationToken::new();
        let mut tasks = JoinSet::new();

        for (slot, workload) in workloads.iter().enumerate() {
            let cluster = Arc::clone(&self.cluster);
            let workload = workload.clone();
            let token = token.child_token();
            tasks.spawn(async move {
                let outcome = AssertUnwindSafe(poll_workload(cluster.as_ref(), &workload, &token))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| {
                        warn!(workload = %workload.id, "Polling task panicked");
                        PollOutcome::Errored {
                            reason: "polling task panicked".to_string(),
                        }
                    });
                (slot, outcome)
            });
        }

        let mut slots: Vec<Option<PollOutcome>> = vec![None; workloads.len()];

        if tokio::time::timeout_at(deadline, collect(&mut tasks, &mut slots))
            .await
            .is_err()
        {
            warn!(pending = tasks.len(), "Global timeout elapsed, cancelling pending workloads");
            token.cancel();
            if tokio::time::timeout(grace, collect(&mut tasks, &mut slots))
                .await
                .is_err()
            {
                tasks.abort_all();
                collect(&mut tasks, &mut slots).await;
            }
        }

        let result = AggregateResult::from_outcomes(
            workloads
                .into_iter()
                .zip(slots)
                .map(|(w, slot)| (w.id, slot.unwrap_or(PollOutcome::Cancelled)))
                .collect(),
        );

        if result.is_success() {
            info!("All workloads reached their target");
        } else {
            warn!(failures = %result.failure_summary(), "Not all workloads reached their target");
        }
        result
    }
}

/// Records finished tasks into their slots. A slot keeps the first outcome
/// written to it.
async fn collect(tasks: &mut JoinSet<(usize, PollOutcome)>, slots: &mut [Option<PollOutcome>]) {
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((slot, outcome)) => {
                slots[slot].get_or_insert(outcome);
            }
            Err(e) if e.is_cancelled() => debug!("Polling task aborted"),
            Err(e) => warn!("Polling task failed: {e}"),
        }
    }
}

/// Polls one workload until its target holds, its own timeout elapses or
/// `token` is cancelled.
///
/// The first tick is immediate and the last one lands on the deadline. A
/// query still pending at the deadline is abandoned, except on the final tick
/// which gets one interval to answer, so a workload never overshoots its
/// timeout by more than one interval. A query error is retried on the next
/// tick; only an error on the final tick (or one left standing when the
/// deadline cuts a query short) turns into [`PollOutcome::Errored`].
async fn poll_workload(
    cluster: &dyn ClusterApi,
    workload: &Workload,
    token: &CancellationToken,
) -> PollOutcome {
    let started = Instant::now();
    let deadline = started + workload.timeout;
    let mut ticks = 0u32;
    let mut previous_error: Option<String> = None;

    info!(workload = %workload.id, target = %workload.target, "Waiting for workload");

    loop {
        ticks += 1;
        let query_deadline = deadline.max(Instant::now() + workload.interval);

        let attempt = tokio::select! {
            biased;
            _ = token.cancelled() => return PollOutcome::Cancelled,
            attempt = cluster.replica_status(&workload.id) => attempt,
            _ = tokio::time::sleep_until(query_deadline) => {
                warn!(workload = %workload.id, tick = ticks, "Replica status query still pending at deadline");
                return expired(workload, previous_error, ticks, started.elapsed());
            }
        };

        let last_error = match attempt {
            Ok(status) if workload.target.is_met(&status) => {
                let elapsed = started.elapsed();
                info!(workload = %workload.id, tick = ticks, ?elapsed, "Workload reached target");
                return PollOutcome::Succeeded { ticks, elapsed };
            }
            Ok(status) => {
                debug!(
                    workload = %workload.id,
                    tick = ticks,
                    ready = status.ready,
                    running = status.running,
                    "Target not reached yet"
                );
                None
            }
            Err(report) => {
                warn!(workload = %workload.id, tick = ticks, "Replica status query failed: {report:?}");
                Some(describe(&report))
            }
        };

        let now = Instant::now();
        if now >= deadline {
            return expired(workload, last_error, ticks, now - started);
        }
        previous_error = last_error;

        let next_tick = (now + workload.interval).min(deadline);
        tokio::select! {
            biased;
            _ = token.cancelled() => return PollOutcome::Cancelled,
            _ = tokio::time::sleep_until(next_tick) => {}
        }
    }
}

fn expired(workload: &Workload, last_error: Option<String>, ticks: u32, elapsed: Duration) -> PollOutcome {
    match last_error {
        Some(reason) => PollOutcome::Errored { reason },
        None => {
            warn!(workload = %workload.id, tick = ticks, ?elapsed, "Workload timed out");
            PollOutcome::TimedOut { ticks, elapsed }
        }
    }
}
