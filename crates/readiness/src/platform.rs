//! Named waits for the platform under test.

use std::time::Duration;

use error_stack::Report;
use tracing::info;
use tracing::warn;

use crate::cluster::ClusterApi;
use crate::cluster::ClusterError;
use crate::cluster::ResourceKind;
use crate::cluster::ResourceSelector;
use crate::coordinator::ReadinessCoordinator;
use crate::outcome::AggregateResult;
use crate::session::SessionContext;
use crate::workload::TargetState;
use crate::workload::Workload;
use crate::workload::WorkloadError;
use crate::workload::WorkloadId;

pub const COMPONENT_LABEL: &str = "syndesis.io/component";
pub const APP_LABEL: &str = "syndesis.io/app";

/// Environment variable whose presence marks a CI run.
pub const CI_ENV_VAR: &str = "JENKINS_HOME";

const DEFAULT_COMPONENTS: [&str; 7] = [
    "syndesis-db",
    "syndesis-oauthproxy",
    "syndesis-server",
    "syndesis-ui",
    "syndesis-meta",
    "syndesis-prometheus",
    "syndesis-operator",
];

/// Polling cadence for platform waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitTiming {
    pub interval: Duration,
    pub timeout: Duration,
    pub global_timeout: Duration,
}

impl WaitTiming {
    /// CI clusters are slower, so they get 20 minutes instead of 12.
    pub fn for_environment(ci: bool) -> Self {
        let timeout = Duration::from_secs(if ci { 20 * 60 } else { 12 * 60 });
        Self {
            interval: Duration::from_secs(20),
            timeout,
            global_timeout: timeout,
        }
    }

    pub fn from_env() -> Self {
        Self::for_environment(std::env::var_os(CI_ENV_VAR).is_some())
    }
}

/// Components of the platform, all selected through one label.
#[derive(Debug, Clone)]
pub struct Platform {
    pub label: String,
    pub components: Vec<String>,
    /// The platform counts as deployed while a deployment of this workload
    /// exists, whether or not it is scaled up.
    pub operator: WorkloadId,
}

impl Default for Platform {
    fn default() -> Self {
        Self {
            label: COMPONENT_LABEL.to_string(),
            components: DEFAULT_COMPONENTS.iter().map(|c| c.to_string()).collect(),
            operator: WorkloadId::new(COMPONENT_LABEL, "syndesis-operator"),
        }
    }
}

impl Platform {
    fn workloads(
        &self,
        target: TargetState,
        timing: &WaitTiming,
    ) -> Result<Vec<Workload>, WorkloadError> {
        self.components
            .iter()
            .map(|component| {
                Workload::new(
                    WorkloadId::new(self.label.clone(), component.clone()),
                    target,
                    timing.interval,
                    timing.timeout,
                )
            })
            .collect()
    }

    /// Every component with exactly one ready pod.
    pub fn deploy_workloads(&self, timing: &WaitTiming) -> Result<Vec<Workload>, WorkloadError> {
        self.workloads(TargetState::Ready(1), timing)
    }

    /// Every component with no running pod.
    pub fn undeploy_workloads(&self, timing: &WaitTiming) -> Result<Vec<Workload>, WorkloadError> {
        self.workloads(TargetState::Running(0), timing)
    }

    pub async fn is_deployed(&self, cluster: &dyn ClusterApi) -> Result<bool, Report<ClusterError>> {
        let resources = cluster
            .list_matching(&ResourceSelector::from(&self.operator))
            .await?;
        Ok(resources.iter().any(|r| {
            matches!(r.kind, ResourceKind::Deployment | ResourceKind::StatefulSet)
        }))
    }

    pub async fn wait_deployed(
        &self,
        coordinator: &ReadinessCoordinator,
        session: &SessionContext,
        timing: &WaitTiming,
    ) -> Result<AggregateResult, WorkloadError> {
        info!(components = self.components.len(), "Waiting for platform to become ready");
        let workloads = self.deploy_workloads(timing)?;
        Ok(coordinator
            .wait_for_all(session, workloads, timing.global_timeout)
            .await)
    }

    /// Waits for every component to go away. Nothing to wait for when the
    /// operator is not deployed, which counts as success.
    pub async fn wait_undeployed(
        &self,
        coordinator: &ReadinessCoordinator,
        session: &SessionContext,
        timing: &WaitTiming,
    ) -> Result<AggregateResult, WorkloadError> {
        let workloads = self.undeploy_workloads(timing)?;

        if session.is_reachable() {
            match self.is_deployed(coordinator.cluster().as_ref()).await {
                Ok(false) => {
                    info!(operator = %self.operator, "Platform is not deployed, nothing to undeploy");
                    return Ok(AggregateResult::from_outcomes(Vec::new()));
                }
                Ok(true) => {}
                Err(e) => {
                    warn!(operator = %self.operator, "Could not tell whether the platform is deployed, waiting anyway: {e:?}");
                }
            }
        }

        info!(components = self.components.len(), "Waiting for platform to be undeployed");
        Ok(coordinator
            .wait_for_all(session, workloads, timing.global_timeout)
            .await)
    }
}

/// The sample application most scenarios deploy.
pub fn todo_workload() -> Result<Workload, WorkloadError> {
    Workload::new(
        WorkloadId::new(APP_LABEL, "todo"),
        TargetState::Ready(1),
        Duration::from_secs(20),
        Duration::from_secs(12 * 60),
    )
}

pub const TODO_GLOBAL_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// Waits for a single application workload.
pub async fn wait_app(
    coordinator: &ReadinessCoordinator,
    session: &SessionContext,
    workload: Workload,
    global_timeout: Duration,
) -> AggregateResult {
    info!(workload = %workload.id, target = %workload.target, "Waiting for application");
    coordinator
        .wait_for_all(session, vec![workload], global_timeout)
        .await
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use similar_asserts::assert_eq;
    use test_log::test;
    use tokio::time::Instant;

    use super::*;
    use crate::cluster::MockCluster;
    use crate::cluster::MockStatus;
    use crate::cluster::ResourceRef;
    use crate::outcome::PollOutcome;
    use crate::outcome::Verdict;

    fn fast_timing() -> WaitTiming {
        WaitTiming {
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(5),
            global_timeout: Duration::from_secs(10),
        }
    }

    #[test]
    fn timing_depends_on_ci() {
        let local = WaitTiming::for_environment(false);
        let ci = WaitTiming::for_environment(true);

        assert_eq!(local.interval, Duration::from_secs(20));
        assert_eq!(local.timeout, Duration::from_secs(720));
        assert_eq!(ci.timeout, Duration::from_secs(1200));
        assert_eq!(ci.global_timeout, ci.timeout);
    }

    #[test]
    fn deploy_workloads_cover_every_component() {
        let platform = Platform::default();
        let workloads = platform
            .deploy_workloads(&WaitTiming::for_environment(false))
            .unwrap();

        assert_eq!(workloads.len(), 7);
        assert!(workloads
            .iter()
            .all(|w| w.id.label == COMPONENT_LABEL && w.target == TargetState::Ready(1)));
        assert_eq!(
            workloads[0].id.selector(),
            "syndesis.io/component=syndesis-db"
        );
    }

    #[test(tokio::test(start_paused = true))]
    async fn wait_deployed_succeeds_when_all_components_ready() {
        let platform = Platform::default();
        let cluster = Arc::new(MockCluster::new());
        for w in platform.deploy_workloads(&fast_timing()).unwrap() {
            cluster.script(&w.id, vec![MockStatus::ready(0), MockStatus::ready(1)]);
        }

        let coordinator = ReadinessCoordinator::new(cluster.clone());
        let result = platform
            .wait_deployed(&coordinator, &SessionContext::new(), &fast_timing())
            .await
            .unwrap();

        assert_eq!(result.verdict, Verdict::Success);
        assert_eq!(result.outcomes.len(), 7);
    }

    #[test(tokio::test(start_paused = true))]
    async fn wait_deployed_reports_the_stuck_component() {
        let platform = Platform::default();
        let cluster = Arc::new(MockCluster::new());
        for w in platform.deploy_workloads(&fast_timing()).unwrap() {
            cluster.always(&w.id, MockStatus::ready(1));
        }
        let stuck = WorkloadId::new(COMPONENT_LABEL, "syndesis-meta");
        cluster.always(&stuck, MockStatus::running(1));

        let coordinator = ReadinessCoordinator::new(cluster.clone());
        let result = platform
            .wait_deployed(&coordinator, &SessionContext::new(), &fast_timing())
            .await
            .unwrap();

        let failing: Vec<_> = result.failures().map(|o| o.workload.clone()).collect();
        assert_eq!(failing, vec![stuck.clone()]);
        assert!(matches!(
            result.outcome_of(&stuck),
            Some(PollOutcome::TimedOut { .. })
        ));
    }

    #[test(tokio::test(start_paused = true))]
    async fn wait_undeployed_skips_absent_platform() {
        let platform = Platform::default();
        let cluster = Arc::new(MockCluster::new());

        let coordinator = ReadinessCoordinator::new(cluster.clone());
        let result = platform
            .wait_undeployed(&coordinator, &SessionContext::new(), &fast_timing())
            .await
            .unwrap();

        assert!(result.is_success());
        assert!(result.outcomes.is_empty());
        assert_eq!(cluster.query_count(&platform.operator), 0);
    }

    fn with_operator_deployment(platform: &Platform) -> Arc<MockCluster> {
        let cluster = Arc::new(MockCluster::new());
        let selector = platform.operator.selector();
        cluster.add_resource(
            ResourceRef::new(ResourceKind::Deployment, "syndesis-operator"),
            &[selector.as_str()],
        );
        cluster
    }

    #[test(tokio::test(start_paused = true))]
    async fn wait_undeployed_waits_for_pods_to_go() {
        let platform = Platform::default();
        let cluster = with_operator_deployment(&platform);
        for w in platform.undeploy_workloads(&fast_timing()).unwrap() {
            cluster.script(&w.id, vec![MockStatus::running(1), MockStatus::running(0)]);
        }

        let coordinator = ReadinessCoordinator::new(cluster.clone());
        let result = platform
            .wait_undeployed(&coordinator, &SessionContext::new(), &fast_timing())
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.outcomes.len(), 7);
    }

    #[test(tokio::test(start_paused = true))]
    async fn wait_undeployed_proceeds_when_precondition_errors() {
        let platform = Platform::default();
        let cluster = Arc::new(MockCluster::new());
        cluster.fail_listing("forbidden");

        let coordinator = ReadinessCoordinator::new(cluster.clone());
        let result = platform
            .wait_undeployed(&coordinator, &SessionContext::new(), &fast_timing())
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.outcomes.len(), 7);
    }

    #[test(tokio::test(start_paused = true))]
    async fn scaled_down_operator_still_counts_as_deployed() {
        let platform = Platform::default();
        let cluster = with_operator_deployment(&platform);
        let meta = WorkloadId::new(COMPONENT_LABEL, "syndesis-meta");
        cluster.script(&meta, vec![MockStatus::running(1), MockStatus::running(0)]);

        assert!(platform.is_deployed(cluster.as_ref()).await.unwrap());

        let coordinator = ReadinessCoordinator::new(cluster.clone());
        let result = platform
            .wait_undeployed(&coordinator, &SessionContext::new(), &fast_timing())
            .await
            .unwrap();

        assert!(result.is_success());
        assert_eq!(result.outcomes.len(), 7);
        assert_eq!(cluster.query_count(&meta), 2);
    }

    #[test]
    fn todo_workload_defaults() {
        let todo = todo_workload().unwrap();
        assert_eq!(todo.id.selector(), "syndesis.io/app=todo");
        assert_eq!(todo.target, TargetState::Ready(1));
        assert_eq!(todo.interval, Duration::from_secs(20));
        assert_eq!(todo.timeout, Duration::from_secs(720));
    }

    #[test(tokio::test(start_paused = true))]
    async fn wait_app_times_out_on_its_own_budget() {
        let cluster = Arc::new(MockCluster::new());
        let todo = todo_workload().unwrap();

        let coordinator = ReadinessCoordinator::new(cluster.clone());
        let started = Instant::now();
        let result = wait_app(
            &coordinator,
            &SessionContext::new(),
            todo.clone(),
            TODO_GLOBAL_TIMEOUT,
        )
        .await;

        assert_eq!(result.verdict, Verdict::Failure);
        assert!(matches!(
            result.outcome_of(&todo.id),
            Some(PollOutcome::TimedOut { ticks: 37, .. })
        ));
        assert!(started.elapsed() < TODO_GLOBAL_TIMEOUT);
    }
}
