use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use readiness::cleanup::CleanOptions;
use readiness::cluster::KubeCluster;
use readiness::platform::WaitTiming;
use readiness::session::HttpProbe;
use readiness::session::ReachabilityPolicy;
use readiness::session::ReachabilityProbe;
use readiness::ClusterApi;
use readiness::ReadinessCoordinator;

use crate::app::Runner;
use crate::config::ClusterArgs;

/// Runner builder
pub struct RunnerBuilder {
    cluster: Arc<dyn ClusterApi>,
    probe: Option<Arc<dyn ReachabilityProbe>>,
    timing: WaitTiming,
    policy: ReachabilityPolicy,
    clean: CleanOptions,
    platform_version: Option<String>,
}

impl RunnerBuilder {
    pub fn new(cluster: Arc<dyn ClusterApi>) -> Self {
        Self {
            cluster,
            probe: None,
            timing: WaitTiming::from_env(),
            policy: ReachabilityPolicy::default(),
            clean: CleanOptions::default(),
            platform_version: None,
        }
    }

    /// Connects to the cluster described by `args`.
    pub async fn from_args(args: &ClusterArgs) -> Result<Self> {
        tracing::info!(namespace = %args.namespace, "Connecting to cluster");
        let cluster = KubeCluster::connect(args.kubeconfig.clone(), args.namespace.clone())
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to cluster: {e:?}"))?;

        let mut builder = Self::new(Arc::new(cluster));
        if args.ci {
            builder = builder.timing(WaitTiming::for_environment(true));
        }
        if let Some(url) = &args.cluster_url {
            let probe = HttpProbe::new(url.clone(), Duration::from_secs(args.probe_timeout_secs))?;
            builder = builder.probe(Arc::new(probe));
        }
        if let Some(version) = &args.platform_version {
            builder = builder.platform_version(version.clone());
        }
        Ok(builder)
    }

    pub fn probe(mut self, probe: Arc<dyn ReachabilityProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn timing(mut self, timing: WaitTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn policy(mut self, policy: ReachabilityPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn clean_options(mut self, clean: CleanOptions) -> Self {
        self.clean = clean;
        self
    }

    pub fn platform_version(mut self, version: impl Into<String>) -> Self {
        self.platform_version = Some(version.into());
        self
    }

    pub fn build(self) -> Runner {
        tracing::debug!(timing = ?self.timing, "Building runner");
        Runner::new(
            ReadinessCoordinator::new(self.cluster),
            self.probe,
            self.timing,
            self.policy,
            self.clean,
            self.platform_version,
        )
    }
}
