//! Readiness polling for cluster workloads.
//!
//! The [`ReadinessCoordinator`] waits, in parallel, for a set of workloads to
//! reach a target replica count and folds the per-workload results into one
//! [`AggregateResult`]. The remaining modules are the cluster-facing pieces an
//! end-to-end run needs around it: the [`ClusterApi`] boundary and its
//! Kubernetes implementation, a session-scoped reachability gate, namespace
//! cleanup and the named platform waits.

pub mod cleanup;
pub mod cluster;
pub mod coordinator;
pub mod outcome;
pub mod platform;
pub mod session;
pub mod workload;

pub use cluster::ClusterApi;
pub use cluster::ClusterError;
pub use coordinator::ReadinessCoordinator;
pub use outcome::AggregateResult;
pub use outcome::PollOutcome;
pub use outcome::Verdict;
pub use session::SessionContext;
pub use workload::ReplicaStatus;
pub use workload::TargetState;
pub use workload::Workload;
pub use workload::WorkloadId;
