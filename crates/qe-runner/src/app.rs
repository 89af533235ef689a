use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use anyhow::Result;
use readiness::cleanup;
use readiness::cleanup::CleanOptions;
use readiness::cluster::ResourceSelector;
use readiness::platform;
use readiness::platform::Platform;
use readiness::platform::WaitTiming;
use readiness::session::ReachabilityPolicy;
use readiness::session::ReachabilityProbe;
use readiness::AggregateResult;
use readiness::ReadinessCoordinator;
use readiness::SessionContext;
use readiness::TargetState;
use readiness::Workload;
use readiness::WorkloadId;

use crate::scenario::Plan;
use crate::scenario::PlanReport;
use crate::scenario::Scenario;
use crate::scenario::ScenarioReport;
use crate::scenario::ScenarioStatus;
use crate::scenario::Step;
use crate::scenario::StepReport;
use crate::scenario::TagFilter;

/// Workloads that must all fail in one wait before a session without a
/// cluster URL is given up on.
const MIN_ERRORED_WORKLOADS: usize = 2;

/// Runs waits and scenario steps against one cluster, sharing a single
/// session across everything it runs.
pub struct Runner {
    coordinator: ReadinessCoordinator,
    session: SessionContext,
    probe: Option<Arc<dyn ReachabilityProbe>>,
    platform: Platform,
    timing: WaitTiming,
    policy: ReachabilityPolicy,
    clean: CleanOptions,
    platform_version: Option<String>,
}

impl Runner {
    pub(crate) fn new(
        coordinator: ReadinessCoordinator,
        probe: Option<Arc<dyn ReachabilityProbe>>,
        timing: WaitTiming,
        policy: ReachabilityPolicy,
        clean: CleanOptions,
        platform_version: Option<String>,
    ) -> Self {
        Self {
            coordinator,
            session: SessionContext::new(),
            probe,
            platform: Platform::default(),
            timing,
            policy,
            clean,
            platform_version,
        }
    }

    pub fn session(&self) -> &SessionContext {
        &self.session
    }

    pub fn timing(&self) -> &WaitTiming {
        &self.timing
    }

    pub async fn check_reachable(&self) -> Result<()> {
        let probe = self
            .probe
            .as_ref()
            .context("no cluster URL configured, cannot check reachability")?;
        self.session
            .ensure_reachable(probe.as_ref(), &self.policy)
            .await?;
        Ok(())
    }

    pub async fn wait_ready(&self) -> Result<AggregateResult> {
        let result = self
            .platform
            .wait_deployed(&self.coordinator, &self.session, &self.timing)
            .await?;
        Ok(self.observe(result).await)
    }

    pub async fn wait_undeployed(&self) -> Result<AggregateResult> {
        let result = self
            .platform
            .wait_undeployed(&self.coordinator, &self.session, &self.timing)
            .await?;
        Ok(self.observe(result).await)
    }

    /// Waits for `replicas` ready pods of `label=value`. The default
    /// application keeps its longer global timeout.
    pub async fn wait_app(&self, label: &str, value: &str, replicas: u32) -> Result<AggregateResult> {
        let todo = platform::todo_workload()?;
        let id = WorkloadId::new(label, value);
        let workload = if id == todo.id && replicas == 1 {
            todo
        } else {
            Workload::new(
                id,
                TargetState::Ready(replicas),
                todo.interval,
                self.timing.timeout,
            )?
        };
        let global_timeout = platform::TODO_GLOBAL_TIMEOUT.max(workload.timeout);
        let result =
            platform::wait_app(&self.coordinator, &self.session, workload, global_timeout).await;
        Ok(self.observe(result).await)
    }

    pub async fn clean(&self) -> Result<usize> {
        if !self.session.is_reachable() {
            anyhow::bail!("cluster marked unreachable, not cleaning");
        }
        let deleted = cleanup::clean_namespace(self.coordinator.cluster().as_ref(), &self.clean)
            .await?;
        Ok(deleted)
    }

    /// A wait in which every query failed may mean the cluster is gone. With
    /// a cluster URL the session is re-checked and only marked unreachable
    /// when that check fails too. Without one, a single failed workload is
    /// not enough evidence.
    async fn observe(&self, result: AggregateResult) -> AggregateResult {
        if !result.all_errored() {
            return result;
        }
        match &self.probe {
            Some(probe) => {
                if let Err(e) = self.session.ensure_reachable(probe.as_ref(), &self.policy).await {
                    tracing::warn!("Every query of the wait failed: {e:?}");
                }
            }
            None if result.outcomes.len() >= MIN_ERRORED_WORKLOADS => {
                tracing::warn!(
                    workloads = result.outcomes.len(),
                    "Every query of the wait failed, marking cluster unreachable"
                );
                self.session.mark_unreachable();
            }
            None => {}
        }
        result
    }

    pub async fn run_step(&self, step: &Step) -> StepReport {
        tracing::info!("Step: {step}");
        let outcome = match step {
            Step::CheckReachable => self.check_reachable().await.map(|()| None),
            Step::Clean => self.clean().await.map(|_| None),
            Step::WaitReady => self.wait_ready().await.map(Some),
            Step::WaitUndeployed => self.wait_undeployed().await.map(Some),
            Step::WaitApp {
                label,
                value,
                replicas,
            } => self.wait_app(label, value, *replicas).await.map(Some),
            Step::Sleep { seconds } => {
                tokio::time::sleep(Duration::from_secs(*seconds)).await;
                Ok(None)
            }
        };
        StepReport::new(step.clone(), outcome)
    }

    /// Runs the steps of `scenario` in order, stopping at the first failure.
    #[tracing::instrument(skip_all, fields(scenario = %scenario.name))]
    pub async fn run_scenario(&self, scenario: &Scenario) -> ScenarioReport {
        if let Some(reason) = scenario.skip_reason(self.platform_version.as_deref()) {
            tracing::info!("Skipping scenario: {reason}");
            return ScenarioReport {
                name: scenario.name.clone(),
                status: ScenarioStatus::Skipped { reason },
                steps: Vec::new(),
            };
        }

        let mut steps = Vec::with_capacity(scenario.steps.len());
        for step in &scenario.steps {
            let report = self.run_step(step).await;
            let failure = report.error.clone();
            steps.push(report);

            if let Some(reason) = failure {
                tracing::error!("Scenario failed at step `{step}`: {reason}");
                self.print_pods().await;
                return ScenarioReport {
                    name: scenario.name.clone(),
                    status: ScenarioStatus::Failed {
                        step: step.to_string(),
                        reason,
                    },
                    steps,
                };
            }
        }

        tracing::info!("Scenario passed");
        ScenarioReport {
            name: scenario.name.clone(),
            status: ScenarioStatus::Passed,
            steps,
        }
    }

    pub async fn run_plan(&self, plan: &Plan, filter: &TagFilter) -> PlanReport {
        let mut report = PlanReport::default();
        for scenario in plan.scenarios.iter().filter(|s| filter.selects(s)) {
            report.scenarios.push(self.run_scenario(scenario).await);
        }

        tracing::info!(
            passed = report.count(|s| matches!(s, ScenarioStatus::Passed)),
            failed = report.count(|s| matches!(s, ScenarioStatus::Failed { .. })),
            skipped = report.count(|s| matches!(s, ScenarioStatus::Skipped { .. })),
            "Plan finished"
        );
        report
    }

    /// Logs the pods of the namespace, for post-mortem of a failed scenario.
    async fn print_pods(&self) {
        if !self.session.is_reachable() {
            return;
        }
        match self
            .coordinator
            .cluster()
            .list_pods(&ResourceSelector::all())
            .await
        {
            Ok(pods) => {
                tracing::info!("Pods in namespace ({}):", pods.len());
                for pod in pods {
                    tracing::info!("{pod}");
                }
            }
            Err(e) => tracing::warn!("Failed to list pods: {e:?}"),
        }
    }
}
