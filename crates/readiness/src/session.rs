//! Session-scoped cluster reachability.
//!
//! A [`SessionContext`] lives for one test run and is handed to every
//! coordinator call. Once a reachability check gives up, the session stays
//! unreachable and later calls fail fast instead of waiting again.

use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;
use tracing::info;
use tracing::warn;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("previous reachability test failed, skipping remaining tests")]
    PreviouslyUnreachable,

    #[error("unable to contact cluster at {target} after {attempts} tries")]
    Unreachable { target: String, attempts: u32 },

    #[error("failed to build reachability probe: {0}")]
    Probe(String),
}

/// How often and how patiently [`SessionContext::ensure_reachable`] probes.
#[derive(Debug, Clone)]
pub struct ReachabilityPolicy {
    pub max_attempts: u32,
    pub delay: Duration,
}

impl Default for ReachabilityPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 30,
            delay: Duration::from_secs(45),
        }
    }
}

#[async_trait]
pub trait ReachabilityProbe: Send + Sync {
    /// What is being probed, for logs.
    fn target(&self) -> &str;

    async fn is_reachable(&self) -> bool;
}

/// Probes a cluster API URL with a plain HTTP GET.
///
/// Any HTTP response counts, including 401/403 from an API server that wants
/// credentials. Certificates are not verified: the probe only asks whether
/// something answers.
pub struct HttpProbe {
    url: String,
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>, request_timeout: Duration) -> Result<Self, SessionError> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .danger_accept_invalid_certs(true)
            .build()
            .map_err(|e| SessionError::Probe(e.to_string()))?;
        Ok(Self {
            url: url.into(),
            client,
        })
    }
}

#[async_trait]
impl ReachabilityProbe for HttpProbe {
    fn target(&self) -> &str {
        &self.url
    }

    async fn is_reachable(&self) -> bool {
        match self.client.get(&self.url).send().await {
            Ok(response) => {
                debug!(url = %self.url, status = %response.status(), "Cluster answered");
                true
            }
            Err(e) => {
                debug!(url = %self.url, "Cluster did not answer: {e}");
                false
            }
        }
    }
}

/// State shared by all coordinator calls of one test run.
#[derive(Debug, Default)]
pub struct SessionContext {
    unreachable: AtomicBool,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_reachable(&self) -> bool {
        !self.unreachable.load(Ordering::Acquire)
    }

    /// Marks the cluster unreachable for the rest of the session. There is no
    /// way back.
    pub fn mark_unreachable(&self) {
        if !self.unreachable.swap(true, Ordering::AcqRel) {
            warn!("Cluster marked unreachable for the rest of the session");
        }
    }

    /// Probes until the cluster answers or the policy is exhausted.
    pub async fn ensure_reachable(
        &self,
        probe: &dyn ReachabilityProbe,
        policy: &ReachabilityPolicy,
    ) -> Result<(), SessionError> {
        if !self.is_reachable() {
            return Err(SessionError::PreviouslyUnreachable);
        }

        let attempts = policy.max_attempts.max(1);
        info!("Checking if cluster at {} is reachable", probe.target());
        for attempt in 1..=attempts {
            if probe.is_reachable().await {
                info!("Cluster at {} is reachable", probe.target());
                return Ok(());
            }
            if attempt < attempts {
                debug!(
                    attempt,
                    "Cluster at {} was not reachable, retrying in {:?}",
                    probe.target(),
                    policy.delay
                );
                tokio::time::sleep(policy.delay).await;
            }
        }

        self.mark_unreachable();
        Err(SessionError::Unreachable {
            target: probe.target().to_string(),
            attempts,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicU32;

    use similar_asserts::assert_eq;
    use test_log::test;
    use wiremock::matchers::method;
    use wiremock::Mock;
    use wiremock::MockServer;
    use wiremock::ResponseTemplate;

    use super::*;

    /// Answers after `fail_first` failed probes.
    struct CountingProbe {
        calls: AtomicU32,
        fail_first: u32,
    }

    impl CountingProbe {
        fn new(fail_first: u32) -> Self {
            Self {
                calls: AtomicU32::new(0),
                fail_first,
            }
        }
    }

    #[async_trait]
    impl ReachabilityProbe for CountingProbe {
        fn target(&self) -> &str {
            "https://api.test:6443"
        }

        async fn is_reachable(&self) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst) >= self.fail_first
        }
    }

    fn policy(max_attempts: u32) -> ReachabilityPolicy {
        ReachabilityPolicy {
            max_attempts,
            delay: Duration::from_secs(45),
        }
    }

    #[test(tokio::test(start_paused = true))]
    async fn reachable_after_retries() {
        let session = SessionContext::new();
        let probe = CountingProbe::new(2);

        session.ensure_reachable(&probe, &policy(5)).await.unwrap();

        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
        assert!(session.is_reachable());
    }

    #[test(tokio::test(start_paused = true))]
    async fn gives_up_and_fails_fast_afterwards() {
        let session = SessionContext::new();
        let probe = CountingProbe::new(u32::MAX);

        let err = session.ensure_reachable(&probe, &policy(3)).await.unwrap_err();
        assert_eq!(
            err,
            SessionError::Unreachable {
                target: "https://api.test:6443".to_string(),
                attempts: 3
            }
        );
        assert!(!session.is_reachable());

        let err = session.ensure_reachable(&probe, &policy(3)).await.unwrap_err();
        assert_eq!(err, SessionError::PreviouslyUnreachable);
        assert_eq!(probe.calls.load(Ordering::SeqCst), 3);
    }

    #[test(tokio::test)]
    async fn http_probe_accepts_any_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let probe = HttpProbe::new(server.uri(), Duration::from_secs(2)).unwrap();
        assert!(probe.is_reachable().await);
    }

    #[test(tokio::test)]
    async fn http_probe_fails_without_listener() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let uri = format!("http://{}", listener.local_addr().unwrap());
        drop(listener);

        let probe = HttpProbe::new(uri, Duration::from_secs(2)).unwrap();
        assert!(!probe.is_reachable().await);
    }
}
