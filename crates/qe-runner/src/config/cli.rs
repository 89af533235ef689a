use clap::{Parser, Subcommand};
use utils::version;

use crate::config::cluster::ClusterArgs;
use crate::config::commands::{RunArgs, WaitAppArgs};

/// Readiness waits and scenario plans for end-to-end platform tests
#[derive(Parser)]
#[command(about, long_about, version = &**version::VERSION)]
pub struct Cli {
    #[command(flatten)]
    pub cluster: ClusterArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Wait until every platform component has one ready pod
    #[command(name = "wait-ready")]
    WaitReady,
    /// Wait until no platform component has a running pod
    #[command(name = "wait-undeployed")]
    WaitUndeployed,
    /// Wait for a single application workload
    #[command(name = "wait-app")]
    WaitApp(WaitAppArgs),
    /// Delete everything in the namespace and wait for it to be empty
    Clean,
    /// Check that the cluster API answers
    #[command(name = "check-reachable")]
    CheckReachable,
    /// Run the scenarios of a plan file
    Run(RunArgs),
}
