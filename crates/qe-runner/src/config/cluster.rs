use std::path::PathBuf;

use clap::Args;

/// Where the cluster under test is and how to talk to it.
#[derive(Args, Debug, Clone)]
pub struct ClusterArgs {
    #[arg(
        long,
        env = "OPENSHIFT_URL",
        help = "Cluster API URL probed by the reachability check"
    )]
    pub cluster_url: Option<String>,

    #[arg(
        long,
        env = "OPENSHIFT_NAMESPACE",
        help = "Namespace the platform is deployed to"
    )]
    pub namespace: String,

    #[arg(
        long,
        env = "KUBECONFIG",
        help = "Path to kubeconfig file (defaults to in-cluster config or ~/.kube/config)"
    )]
    pub kubeconfig: Option<PathBuf>,

    #[arg(
        long,
        env = "SYNDESIS_VERSION",
        help = "Version of the platform under test"
    )]
    pub platform_version: Option<String>,

    #[arg(
        long,
        help = "Use CI timeouts (also enabled when JENKINS_HOME is set)"
    )]
    pub ci: bool,

    #[arg(
        long,
        default_value_t = 5,
        help = "Timeout in seconds of a single reachability probe"
    )]
    pub probe_timeout_secs: u64,
}
