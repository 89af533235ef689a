use std::fmt::Debug;
use std::path::PathBuf;

use async_trait::async_trait;
use error_stack::Report;
use error_stack::ResultExt;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::apps::v1::StatefulSet;
use k8s_openapi::api::core::v1::ConfigMap;
use k8s_openapi::api::core::v1::PersistentVolumeClaim;
use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::api::core::v1::Service;
use k8s_openapi::NamespaceResourceScope;
use kube::api::DeleteParams;
use kube::api::ListParams;
use kube::config::KubeConfigOptions;
use kube::config::Kubeconfig;
use kube::Api;
use kube::Client;
use kube::Config;
use kube::Resource;
use kube::ResourceExt;
use serde::de::DeserializeOwned;
use tracing::debug;

use super::ClusterApi;
use super::ClusterError;
use super::PodSummary;
use super::ResourceKind;
use super::ResourceRef;
use super::ResourceSelector;
use crate::workload::ReplicaStatus;
use crate::workload::WorkloadId;

/// Config maps every namespace gets from the control plane.
const SYSTEM_CONFIG_MAPS: [&str; 2] = ["kube-root-ca.crt", "openshift-service-ca.crt"];

/// Annotation carried by token and pull secrets generated for service accounts.
const SERVICE_ACCOUNT_ANNOTATION: &str = "kubernetes.io/service-account.name";

pub async fn init_kube_client(kubeconfig: Option<PathBuf>) -> Result<Client, Report<ClusterError>> {
    let client = match kubeconfig {
        Some(kubeconfig_path) => {
            // Load kubeconfig from the specified file
            let kubeconfig = Kubeconfig::read_from(&kubeconfig_path).change_context(
                ClusterError::ConnectionFailed {
                    message: format!(
                        "Failed to read kubeconfig file: {}",
                        kubeconfig_path.display()
                    ),
                },
            )?;

            let config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
                .await
                .change_context(ClusterError::ConnectionFailed {
                    message: format!(
                        "Failed to create config from kubeconfig: {}",
                        kubeconfig_path.display()
                    ),
                })?;

            Client::try_from(config).change_context(ClusterError::ConnectionFailed {
                message: "Failed to create Kubernetes client from custom kubeconfig".to_string(),
            })?
        }
        None => {
            // Use default configuration (in-cluster or ~/.kube/config)
            Client::try_default()
                .await
                .change_context(ClusterError::ConnectionFailed {
                    message: "Failed to create Kubernetes client".to_string(),
                })?
        }
    };
    Ok(client)
}

/// [`ClusterApi`] backed by the Kubernetes API, scoped to one namespace.
#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
    namespace: String,
}

impl KubeCluster {
    pub fn new(client: Client, namespace: impl Into<String>) -> Self {
        Self {
            client,
            namespace: namespace.into(),
        }
    }

    pub async fn connect(
        kubeconfig: Option<PathBuf>,
        namespace: impl Into<String>,
    ) -> Result<Self, Report<ClusterError>> {
        let client = init_kube_client(kubeconfig).await?;
        Ok(Self::new(client, namespace))
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    fn api<K>(&self) -> Api<K>
    where
        K: Resource<Scope = NamespaceResourceScope>,
        <K as Resource>::DynamicType: Default,
    {
        Api::namespaced(self.client.clone(), &self.namespace)
    }

    async fn list_kind<K>(&self, params: &ListParams) -> Result<Vec<K>, kube::Error>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        Ok(self.api::<K>().list(params).await?.items)
    }

    async fn delete_kind<K>(&self, name: &str) -> Result<(), kube::Error>
    where
        K: Resource<Scope = NamespaceResourceScope> + Clone + DeserializeOwned + Debug,
        <K as Resource>::DynamicType: Default,
    {
        match self.api::<K>().delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(()),
            Err(kube::Error::Api(response)) if response.code == 404 => Ok(()),
            Err(e) => Err(e),
        }
    }

    async fn list_refs(
        &self,
        kind: ResourceKind,
        params: &ListParams,
    ) -> Result<Vec<ResourceRef>, kube::Error> {
        let refs = match kind {
            ResourceKind::Deployment => to_refs(kind, self.list_kind::<Deployment>(params).await?),
            ResourceKind::StatefulSet => {
                to_refs(kind, self.list_kind::<StatefulSet>(params).await?)
            }
            ResourceKind::Service => to_refs(kind, self.list_kind::<Service>(params).await?),
            ResourceKind::ConfigMap => {
                let maps = self.list_kind::<ConfigMap>(params).await?;
                to_refs(
                    kind,
                    maps.into_iter()
                        .filter(|cm| !SYSTEM_CONFIG_MAPS.contains(&cm.name_any().as_str())),
                )
            }
            ResourceKind::Secret => {
                let secrets = self.list_kind::<Secret>(params).await?;
                to_refs(
                    kind,
                    secrets
                        .into_iter()
                        .filter(|s| !s.annotations().contains_key(SERVICE_ACCOUNT_ANNOTATION)),
                )
            }
            ResourceKind::PersistentVolumeClaim => {
                to_refs(kind, self.list_kind::<PersistentVolumeClaim>(params).await?)
            }
            ResourceKind::Pod => to_refs(kind, self.list_kind::<Pod>(params).await?),
        };
        Ok(refs)
    }
}

fn list_params(selector: &ResourceSelector) -> ListParams {
    match &selector.labels {
        Some(labels) => ListParams::default().labels(labels),
        None => ListParams::default(),
    }
}

fn to_refs<K: Resource>(kind: ResourceKind, items: impl IntoIterator<Item = K>) -> Vec<ResourceRef> {
    items
        .into_iter()
        .map(|item| ResourceRef {
            kind,
            terminating: item.meta().deletion_timestamp.is_some(),
            name: item.name_any(),
        })
        .collect()
}

fn pod_phase(pod: &Pod) -> &str {
    pod.status
        .as_ref()
        .and_then(|s| s.phase.as_deref())
        .unwrap_or("Unknown")
}

fn is_pod_ready(pod: &Pod) -> bool {
    pod.status
        .as_ref()
        .and_then(|s| s.conditions.as_ref())
        .is_some_and(|conditions| {
            conditions
                .iter()
                .any(|c| c.type_ == "Ready" && c.status == "True")
        })
}

/// Counts running pods, and among those the ready ones.
///
/// Terminating pods still count as running until they are gone, but never as
/// ready.
fn replica_status_of(pods: &[Pod]) -> ReplicaStatus {
    let mut status = ReplicaStatus::default();
    for pod in pods.iter().filter(|p| pod_phase(p) == "Running") {
        status.running += 1;
        if pod.metadata.deletion_timestamp.is_none() && is_pod_ready(pod) {
            status.ready += 1;
        }
    }
    status
}

fn summarize_pod(pod: &Pod) -> PodSummary {
    let restarts = pod
        .status
        .as_ref()
        .and_then(|s| s.container_statuses.as_ref())
        .map(|statuses| {
            statuses
                .iter()
                .map(|c| u32::try_from(c.restart_count).unwrap_or(0))
                .sum()
        })
        .unwrap_or(0);
    PodSummary {
        name: pod.name_any(),
        phase: pod_phase(pod).to_string(),
        ready: is_pod_ready(pod),
        restarts,
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn replica_status(
        &self,
        workload: &WorkloadId,
    ) -> Result<ReplicaStatus, Report<ClusterError>> {
        let params = ListParams::default().labels(&workload.selector());
        let pods = self
            .list_kind::<Pod>(&params)
            .await
            .change_context(ClusterError::QueryFailed {
                message: format!("list pods matching {workload}"),
            })
            .attach_printable_lazy(|| format!("namespace: {}", self.namespace))?;
        let status = replica_status_of(&pods);
        debug!(workload = %workload, ready = status.ready, running = status.running, "replica status");
        Ok(status)
    }

    async fn list_matching(
        &self,
        selector: &ResourceSelector,
    ) -> Result<Vec<ResourceRef>, Report<ClusterError>> {
        let params = list_params(selector);
        let mut matches = Vec::new();
        for kind in ResourceKind::ALL {
            let refs = self
                .list_refs(kind, &params)
                .await
                .change_context(ClusterError::QueryFailed {
                    message: format!("list {kind}s matching {selector}"),
                })
                .attach_printable_lazy(|| format!("namespace: {}", self.namespace))?;
            matches.extend(refs);
        }
        Ok(matches)
    }

    async fn delete_resource(&self, resource: &ResourceRef) -> Result<(), Report<ClusterError>> {
        let name = resource.name.as_str();
        let result = match resource.kind {
            ResourceKind::Deployment => self.delete_kind::<Deployment>(name).await,
            ResourceKind::StatefulSet => self.delete_kind::<StatefulSet>(name).await,
            ResourceKind::Service => self.delete_kind::<Service>(name).await,
            ResourceKind::ConfigMap => self.delete_kind::<ConfigMap>(name).await,
            ResourceKind::Secret => self.delete_kind::<Secret>(name).await,
            ResourceKind::PersistentVolumeClaim => {
                self.delete_kind::<PersistentVolumeClaim>(name).await
            }
            ResourceKind::Pod => self.delete_kind::<Pod>(name).await,
        };
        result
            .change_context(ClusterError::DeleteFailed {
                resource: resource.to_string(),
                message: format!("namespace {}", self.namespace),
            })
    }

    async fn list_pods(
        &self,
        selector: &ResourceSelector,
    ) -> Result<Vec<PodSummary>, Report<ClusterError>> {
        let pods = self
            .list_kind::<Pod>(&list_params(selector))
            .await
            .change_context(ClusterError::QueryFailed {
                message: format!("list pods matching {selector}"),
            })?;
        Ok(pods.iter().map(summarize_pod).collect())
    }
}
