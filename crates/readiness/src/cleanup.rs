//! Namespace cleanup between test runs.

use std::time::Duration;

use error_stack::Report;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::cluster::describe;
use crate::cluster::ClusterApi;
use crate::cluster::ClusterError;
use crate::cluster::ResourceRef;
use crate::cluster::ResourceSelector;

#[derive(Debug, thiserror::Error)]
pub enum CleanupError {
    #[error("{remaining} resources matching `{selector}` still present after {rounds} purge rounds")]
    StillPresent {
        selector: String,
        remaining: usize,
        rounds: u32,
    },

    #[error("namespace not clean after {timeout:?}, {remaining} resources left")]
    NotClean { timeout: Duration, remaining: usize },

    #[error("cluster request failed: {}", describe(.0))]
    Cluster(Report<ClusterError>),
}

/// Deletes everything matching `selector`, re-listing after each round.
///
/// Each round works on a snapshot of the current matches; resources that are
/// already terminating are left alone. Returns the number of successful
/// deletions once nothing deletable is left, or
/// [`CleanupError::StillPresent`] after `max_rounds`.
pub async fn purge_matching(
    cluster: &dyn ClusterApi,
    selector: &ResourceSelector,
    max_rounds: u32,
) -> Result<usize, CleanupError> {
    let mut deleted = 0;

    for round in 1..=max_rounds {
        let snapshot: Vec<_> = list(cluster, selector)
            .await?
            .into_iter()
            .filter(|r| !r.terminating)
            .collect();
        if snapshot.is_empty() {
            return Ok(deleted);
        }

        debug!(round, matches = snapshot.len(), %selector, "Purging resources");
        for resource in &snapshot {
            match cluster.delete_resource(resource).await {
                Ok(()) => {
                    debug!("Deleted {resource}");
                    deleted += 1;
                }
                Err(e) => warn!("Failed to delete {resource}, retrying next round: {e:?}"),
            }
        }
    }

    let remaining = list(cluster, selector)
        .await?
        .iter()
        .filter(|r| !r.terminating)
        .count();
    if remaining == 0 {
        Ok(deleted)
    } else {
        Err(CleanupError::StillPresent {
            selector: selector.to_string(),
            remaining,
            rounds: max_rounds,
        })
    }
}

/// Polls until nothing matches `selector`, terminating resources included.
pub async fn wait_for_project_clean(
    cluster: &dyn ClusterApi,
    selector: &ResourceSelector,
    timeout: Duration,
    interval: Duration,
) -> Result<(), CleanupError> {
    let deadline = Instant::now() + timeout;
    loop {
        let remaining = list(cluster, selector).await?;
        if remaining.is_empty() {
            return Ok(());
        }

        let now = Instant::now();
        if now >= deadline {
            return Err(CleanupError::NotClean {
                timeout,
                remaining: remaining.len(),
            });
        }
        debug!(remaining = remaining.len(), "Waiting for namespace to become clean");
        tokio::time::sleep_until((now + interval).min(deadline)).await;
    }
}

#[derive(Debug, Clone)]
pub struct CleanOptions {
    pub selector: ResourceSelector,
    pub max_purge_rounds: u32,
    pub clean_timeout: Duration,
    pub interval: Duration,
}

impl Default for CleanOptions {
    fn default() -> Self {
        Self {
            selector: ResourceSelector::all(),
            max_purge_rounds: 5,
            clean_timeout: Duration::from_secs(20),
            interval: Duration::from_secs(2),
        }
    }
}

/// Purges the namespace and waits for it to be empty, retrying once if it is
/// not clean in time. Returns the number of deleted resources.
#[tracing::instrument(skip_all, fields(selector = %options.selector))]
pub async fn clean_namespace(
    cluster: &dyn ClusterApi,
    options: &CleanOptions,
) -> Result<usize, CleanupError> {
    let mut deleted = purge_matching(cluster, &options.selector, options.max_purge_rounds).await?;

    match wait_for_project_clean(
        cluster,
        &options.selector,
        options.clean_timeout,
        options.interval,
    )
    .await
    {
        Ok(()) => {}
        Err(CleanupError::NotClean { .. }) => {
            warn!(
                "Project was not clean after {:?}, retrying once again",
                options.clean_timeout
            );
            deleted += purge_matching(cluster, &options.selector, options.max_purge_rounds).await?;
            wait_for_project_clean(
                cluster,
                &options.selector,
                options.clean_timeout,
                options.interval,
            )
            .await?;
        }
        Err(e) => return Err(e),
    }

    info!(deleted, "Namespace is clean");
    Ok(deleted)
}

async fn list(
    cluster: &dyn ClusterApi,
    selector: &ResourceSelector,
) -> Result<Vec<ResourceRef>, CleanupError> {
    cluster
        .list_matching(selector)
        .await
        .map_err(CleanupError::Cluster)
}

#[cfg(test)]
mod tests {
    use similar_asserts::assert_eq;
    use test_log::test;

    use super::*;
    use crate::cluster::MockCluster;
    use crate::cluster::ResourceKind;

    fn cluster_with(names: &[(ResourceKind, &str)]) -> MockCluster {
        let cluster = MockCluster::new();
        for (kind, name) in names {
            cluster.add_resource(ResourceRef::new(*kind, *name), &["app=syndesis"]);
        }
        cluster
    }

    #[test(tokio::test)]
    async fn purge_deletes_every_match() {
        let cluster = cluster_with(&[
            (ResourceKind::Deployment, "server"),
            (ResourceKind::Service, "server"),
            (ResourceKind::ConfigMap, "server-config"),
        ]);
        cluster.add_resource(ResourceRef::new(ResourceKind::Pod, "unrelated"), &["app=other"]);

        let deleted = purge_matching(&cluster, &ResourceSelector::labeled("app=syndesis"), 3)
            .await
            .unwrap();

        assert_eq!(deleted, 3);
        assert_eq!(
            cluster.remaining(),
            vec![ResourceRef::new(ResourceKind::Pod, "unrelated")]
        );
    }

    #[test(tokio::test)]
    async fn purge_retries_failed_deletes_next_round() {
        let cluster = cluster_with(&[(ResourceKind::Secret, "creds")]);
        cluster.fail_deletes(ResourceKind::Secret, "creds", 1);

        let deleted = purge_matching(&cluster, &ResourceSelector::all(), 3)
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert!(cluster.remaining().is_empty());
        assert_eq!(cluster.delete_count(), 2);
    }

    #[test(tokio::test)]
    async fn purge_is_bounded() {
        let cluster = cluster_with(&[(ResourceKind::Pod, "phoenix")]);
        cluster.respawn(ResourceKind::Pod, "phoenix", u32::MAX);

        let err = purge_matching(&cluster, &ResourceSelector::all(), 4)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CleanupError::StillPresent { ref selector, remaining: 1, rounds: 4 } if selector == "<all>"
        ));
        assert_eq!(cluster.delete_count(), 4);
    }

    #[test(tokio::test)]
    async fn purge_of_empty_namespace_is_noop() {
        let cluster = MockCluster::new();
        let deleted = purge_matching(&cluster, &ResourceSelector::all(), 3)
            .await
            .unwrap();
        assert_eq!(deleted, 0);
        assert_eq!(cluster.delete_count(), 0);
    }

    #[test(tokio::test(start_paused = true))]
    async fn clean_namespace_retries_once() {
        let cluster = cluster_with(&[
            (ResourceKind::Deployment, "server"),
            (ResourceKind::PersistentVolumeClaim, "db-data"),
        ]);
        // Outlives the first wait (11 listings over 20s) but not the second.
        cluster.linger(ResourceKind::PersistentVolumeClaim, "db-data", 15);

        let deleted = clean_namespace(&cluster, &CleanOptions::default())
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert!(cluster.remaining().is_empty());
    }

    #[test(tokio::test(start_paused = true))]
    async fn clean_namespace_fails_after_second_attempt() {
        let cluster = cluster_with(&[(ResourceKind::PersistentVolumeClaim, "db-data")]);
        cluster.linger(ResourceKind::PersistentVolumeClaim, "db-data", u32::MAX);

        let started = Instant::now();
        let err = clean_namespace(&cluster, &CleanOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            CleanupError::NotClean { timeout, remaining: 1 } if timeout == Duration::from_secs(20)
        ));
        assert!(started.elapsed() >= Duration::from_secs(40));
    }

    #[test(tokio::test)]
    async fn purge_skips_terminating_resources() {
        let cluster = cluster_with(&[(ResourceKind::Pod, "old")]);
        cluster.linger(ResourceKind::Pod, "old", 10);

        let deleted = purge_matching(&cluster, &ResourceSelector::all(), 3)
            .await
            .unwrap();

        assert_eq!(deleted, 0);
        assert_eq!(cluster.delete_count(), 0);
    }

    #[test(tokio::test)]
    async fn listing_failure_is_reported() {
        let cluster = MockCluster::new();
        cluster.fail_listing("forbidden");

        let err = clean_namespace(&cluster, &CleanOptions::default())
            .await
            .unwrap_err();

        assert!(matches!(err, CleanupError::Cluster(_)));
        assert!(err.to_string().contains("forbidden"), "{err}");
    }

    #[test(tokio::test)]
    async fn cluster_error_keeps_transport_cause() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);
        let client = kube::Client::try_from(kube::Config::new(url.parse().unwrap())).unwrap();
        let cluster = crate::cluster::KubeCluster::new(client, "e2e");

        let err = purge_matching(&cluster, &ResourceSelector::all(), 1)
            .await
            .unwrap_err();

        let CleanupError::Cluster(report) = &err else {
            panic!("expected cluster error, got {err:?}");
        };
        assert!(report.contains::<kube::Error>());
        assert!(err.to_string().contains("Connection refused"), "{err}");
    }
}
