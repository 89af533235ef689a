//! Scripted in-memory cluster for tests.

use std::collections::BTreeMap;
use std::collections::HashMap;
use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;
use error_stack::Report;

use super::ClusterApi;
use super::ClusterError;
use super::PodSummary;
use super::ResourceKind;
use super::ResourceRef;
use super::ResourceSelector;
use crate::workload::ReplicaStatus;
use crate::workload::WorkloadId;

/// Response to one replica status query.
#[derive(Debug, Clone)]
pub enum MockStatus {
    Status(ReplicaStatus),
    Fail(String),
    /// The query never completes.
    Hang,
    Panic,
}

impl MockStatus {
    pub fn ready(n: u32) -> Self {
        MockStatus::Status(ReplicaStatus {
            ready: n,
            running: n,
        })
    }

    pub fn running(n: u32) -> Self {
        MockStatus::Status(ReplicaStatus {
            ready: 0,
            running: n,
        })
    }
}

struct MockResource {
    labels: Vec<String>,
    /// How many more deletions the resource survives by being recreated.
    respawns: u32,
    /// How many more deletions fail outright.
    failing_deletes: u32,
    /// Terminating, visible for this many more listings.
    linger: Option<u32>,
}

#[derive(Default)]
struct MockState {
    scripts: HashMap<WorkloadId, VecDeque<MockStatus>>,
    queries: HashMap<WorkloadId, u32>,
    resources: BTreeMap<(ResourceKind, String), MockResource>,
    pods: Vec<PodSummary>,
    deletes: u32,
    list_failure: Option<String>,
}

/// [`ClusterApi`] answering from per-workload scripts.
///
/// Each query consumes the next scripted response; the last one repeats
/// forever. Workloads without a script report zero replicas.
#[derive(Default)]
pub struct MockCluster {
    state: Mutex<MockState>,
}

impl MockCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, workload: &WorkloadId, responses: Vec<MockStatus>) -> &Self {
        let mut state = self.state.lock().unwrap();
        state.scripts.insert(workload.clone(), responses.into());
        self
    }

    pub fn always(&self, workload: &WorkloadId, response: MockStatus) -> &Self {
        self.script(workload, vec![response])
    }

    pub fn query_count(&self, workload: &WorkloadId) -> u32 {
        let state = self.state.lock().unwrap();
        state.queries.get(workload).copied().unwrap_or(0)
    }

    pub fn add_resource(&self, resource: ResourceRef, labels: &[&str]) -> &Self {
        let mut state = self.state.lock().unwrap();
        state.resources.insert(
            (resource.kind, resource.name),
            MockResource {
                labels: labels.iter().map(|l| l.to_string()).collect(),
                respawns: 0,
                failing_deletes: 0,
                linger: None,
            },
        );
        self
    }

    /// The resource comes back after each of its next `times` deletions.
    pub fn respawn(&self, kind: ResourceKind, name: &str, times: u32) -> &Self {
        let mut state = self.state.lock().unwrap();
        if let Some(resource) = state.resources.get_mut(&(kind, name.to_string())) {
            resource.respawns = times;
        }
        self
    }

    /// The next `times` deletions of the resource fail.
    pub fn fail_deletes(&self, kind: ResourceKind, name: &str, times: u32) -> &Self {
        let mut state = self.state.lock().unwrap();
        if let Some(resource) = state.resources.get_mut(&(kind, name.to_string())) {
            resource.failing_deletes = times;
        }
        self
    }

    /// The resource is terminating and stays visible for `listings` more
    /// listings.
    pub fn linger(&self, kind: ResourceKind, name: &str, listings: u32) -> &Self {
        let mut state = self.state.lock().unwrap();
        if let Some(resource) = state.resources.get_mut(&(kind, name.to_string())) {
            resource.linger = Some(listings);
        }
        self
    }

    pub fn fail_listing(&self, message: &str) -> &Self {
        let mut state = self.state.lock().unwrap();
        state.list_failure = Some(message.to_string());
        self
    }

    pub fn add_pod(&self, pod: PodSummary) -> &Self {
        let mut state = self.state.lock().unwrap();
        state.pods.push(pod);
        self
    }

    pub fn remaining(&self) -> Vec<ResourceRef> {
        let state = self.state.lock().unwrap();
        state
            .resources
            .keys()
            .map(|(kind, name)| ResourceRef::new(*kind, name.clone()))
            .collect()
    }

    pub fn delete_count(&self) -> u32 {
        self.state.lock().unwrap().deletes
    }

    fn next_response(&self, workload: &WorkloadId) -> MockStatus {
        let mut state = self.state.lock().unwrap();
        *state.queries.entry(workload.clone()).or_default() += 1;
        match state.scripts.get_mut(workload) {
            Some(script) if script.len() > 1 => script.pop_front().unwrap_or(MockStatus::ready(0)),
            Some(script) => script
                .front()
                .cloned()
                .unwrap_or(MockStatus::Status(ReplicaStatus::default())),
            None => MockStatus::Status(ReplicaStatus::default()),
        }
    }
}

fn matches(resource: &MockResource, selector: &ResourceSelector) -> bool {
    match &selector.labels {
        Some(labels) => resource.labels.iter().any(|l| l == labels),
        None => true,
    }
}

#[async_trait]
impl ClusterApi for MockCluster {
    async fn replica_status(
        &self,
        workload: &WorkloadId,
    ) -> Result<ReplicaStatus, Report<ClusterError>> {
        match self.next_response(workload) {
            MockStatus::Status(status) => Ok(status),
            MockStatus::Fail(message) => Err(Report::new(ClusterError::QueryFailed { message })),
            MockStatus::Hang => std::future::pending().await,
            MockStatus::Panic => panic!("scripted panic while querying {workload}"),
        }
    }

    async fn list_matching(
        &self,
        selector: &ResourceSelector,
    ) -> Result<Vec<ResourceRef>, Report<ClusterError>> {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = &state.list_failure {
            return Err(Report::new(ClusterError::QueryFailed {
                message: message.clone(),
            }));
        }
        state.resources.retain(|_, resource| resource.linger != Some(0));

        let mut found = Vec::new();
        for ((kind, name), resource) in state.resources.iter_mut() {
            if !matches(resource, selector) {
                continue;
            }
            if let Some(listings) = resource.linger.as_mut() {
                *listings -= 1;
            }
            found.push(ResourceRef {
                kind: *kind,
                name: name.clone(),
                terminating: resource.linger.is_some(),
            });
        }
        Ok(found)
    }

    async fn delete_resource(&self, resource: &ResourceRef) -> Result<(), Report<ClusterError>> {
        let mut state = self.state.lock().unwrap();
        state.deletes += 1;
        let key = (resource.kind, resource.name.clone());
        let Some(entry) = state.resources.get_mut(&key) else {
            return Ok(());
        };
        if entry.linger.is_some() {
            return Ok(());
        }
        if entry.failing_deletes > 0 {
            entry.failing_deletes -= 1;
            return Err(Report::new(ClusterError::DeleteFailed {
                resource: resource.to_string(),
                message: "scripted delete failure".to_string(),
            }));
        }
        if entry.respawns > 0 {
            entry.respawns -= 1;
            return Ok(());
        }
        state.resources.remove(&key);
        Ok(())
    }

    async fn list_pods(
        &self,
        _selector: &ResourceSelector,
    ) -> Result<Vec<PodSummary>, Report<ClusterError>> {
        Ok(self.state.lock().unwrap().pods.clone())
    }
}
