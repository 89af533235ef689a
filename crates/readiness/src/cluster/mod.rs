//! Cluster API boundary.
//!
//! The coordinator only ever reads replica counts through [`ClusterApi`]; the
//! cleanup helpers also list and delete resources. [`KubeCluster`] talks to a
//! real cluster, `MockCluster` (feature `test-util`) scripts responses for
//! tests.

use core::error::Error;
use std::fmt;

use async_trait::async_trait;
use error_stack::Report;
use serde::Serialize;

use crate::workload::ReplicaStatus;
use crate::workload::WorkloadId;

pub mod kubernetes;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;

pub use self::kubernetes::init_kube_client;
pub use self::kubernetes::KubeCluster;
#[cfg(any(test, feature = "test-util"))]
pub use self::mock::MockCluster;
#[cfg(any(test, feature = "test-util"))]
pub use self::mock::MockStatus;

/// Errors that can occur while talking to the cluster.
#[derive(Debug, derive_more::Display)]
pub enum ClusterError {
    #[display("Failed to connect to cluster API: {message}")]
    ConnectionFailed { message: String },
    #[display("Failed to query cluster: {message}")]
    QueryFailed { message: String },
    #[display("Failed to delete {resource}: {message}")]
    DeleteFailed { resource: String, message: String },
}

impl Error for ClusterError {}

/// Renders every context of `report`, followed by the source chain of the
/// Kubernetes client error underneath, if any.
///
/// `Display` on a report stops at the outermost context, which leaves out the
/// transport error that actually explains a failed request.
pub fn describe(report: &Report<ClusterError>) -> String {
    let mut description = format!("{report:#}");
    if let Some(error) = report.downcast_ref::<kube::Error>() {
        let mut source = error.source();
        while let Some(cause) = source {
            let cause_text = cause.to_string();
            if !description.contains(&cause_text) {
                description.push_str(": ");
                description.push_str(&cause_text);
            }
            source = cause.source();
        }
    }
    description
}

/// Kinds of namespaced resources cleanup knows how to list and delete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum ResourceKind {
    Deployment,
    StatefulSet,
    Service,
    ConfigMap,
    Secret,
    PersistentVolumeClaim,
    Pod,
}

impl ResourceKind {
    pub const ALL: [ResourceKind; 7] = [
        ResourceKind::Deployment,
        ResourceKind::StatefulSet,
        ResourceKind::Service,
        ResourceKind::ConfigMap,
        ResourceKind::Secret,
        ResourceKind::PersistentVolumeClaim,
        ResourceKind::Pod,
    ];
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            ResourceKind::Deployment => "deployment",
            ResourceKind::StatefulSet => "statefulset",
            ResourceKind::Service => "service",
            ResourceKind::ConfigMap => "configmap",
            ResourceKind::Secret => "secret",
            ResourceKind::PersistentVolumeClaim => "persistentvolumeclaim",
            ResourceKind::Pod => "pod",
        };
        f.write_str(kind)
    }
}

/// A namespaced resource found by [`ClusterApi::list_matching`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub name: String,
    /// Deletion already requested, the object is waiting for finalizers.
    pub terminating: bool,
}

impl ResourceRef {
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
            terminating: false,
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Label selector restricting list and delete operations. `None` matches
/// everything in the namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResourceSelector {
    pub labels: Option<String>,
}

impl ResourceSelector {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn labeled(selector: impl Into<String>) -> Self {
        Self {
            labels: Some(selector.into()),
        }
    }
}

impl From<&WorkloadId> for ResourceSelector {
    fn from(id: &WorkloadId) -> Self {
        Self::labeled(id.selector())
    }
}

impl fmt::Display for ResourceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.labels {
            Some(labels) => f.write_str(labels),
            None => f.write_str("<all>"),
        }
    }
}

/// Pod state printed when a scenario fails.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PodSummary {
    pub name: String,
    pub phase: String,
    pub ready: bool,
    pub restarts: u32,
}

impl fmt::Display for PodSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:<50} {:<10} ready={:<5} restarts={}",
            self.name, self.phase, self.ready, self.restarts
        )
    }
}

/// Operations the readiness and cleanup code needs from a cluster.
#[async_trait]
pub trait ClusterApi: Send + Sync {
    /// Ready and running replica counts of the pods selected by `workload`.
    async fn replica_status(
        &self,
        workload: &WorkloadId,
    ) -> Result<ReplicaStatus, Report<ClusterError>>;

    /// Resources of every [`ResourceKind`] matching `selector`.
    async fn list_matching(
        &self,
        selector: &ResourceSelector,
    ) -> Result<Vec<ResourceRef>, Report<ClusterError>>;

    /// Deletes one resource. Deleting something that is already gone succeeds.
    async fn delete_resource(&self, resource: &ResourceRef) -> Result<(), Report<ClusterError>>;

    async fn list_pods(
        &self,
        selector: &ResourceSelector,
    ) -> Result<Vec<PodSummary>, Report<ClusterError>>;
}
