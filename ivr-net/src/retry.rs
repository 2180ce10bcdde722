// ivr-net/src/retry.rs
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use ivr_common::config::Config;
use ivr_common::error::{IvrError, Result};
use ivr_common::model::{ArtifactSpec, Descriptor, ModuleId, ModuleRevision, Revision};
use ivr_common::VersionConstraint;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, warn};

use crate::fetcher::Fetcher;

/// Deadline and retry schedule applied to every repository call.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub timeout: Duration,
    pub retry_not_found: bool,
}

impl RetryPolicy {
    pub fn from_config(config: &Config) -> Self {
        Self {
            attempts: config.retry.attempts.max(1),
            initial_backoff: config.retry.initial_backoff,
            max_backoff: config.retry.max_backoff,
            timeout: config.fetch_timeout,
            retry_not_found: config.retry.retry_not_found,
        }
    }

    /// Delays between attempts: exponential from `initial_backoff`, capped
    /// at `max_backoff`, jittered, one fewer than `attempts`.
    pub fn delays(&self) -> impl Iterator<Item = Duration> {
        let half_ms = (self.initial_backoff.as_millis() as u64 / 2).max(1);
        ExponentialBackoff::from_millis(2)
            .factor(half_ms)
            .max_delay(self.max_backoff)
            .map(jitter)
            .take(self.attempts.saturating_sub(1) as usize)
    }

    /// Runs `op` until it succeeds, fails with a non-retryable error or runs
    /// out of attempts. Each attempt is bounded by the timeout.
    pub async fn run<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let timeout = self.timeout;
        let action = || {
            let fut = op();
            async move {
                match tokio::time::timeout(timeout, fut).await {
                    Ok(result) => result,
                    Err(_) => Err(IvrError::Network(format!(
                        "{what} timed out after {}",
                        humantime::format_duration(timeout)
                    ))),
                }
            }
        };
        let retry_not_found = self.retry_not_found;
        let condition = |e: &IvrError| {
            let retry = e.is_retryable(retry_not_found);
            if retry {
                warn!("{} failed: {}", what, e);
            }
            retry
        };
        RetryIf::start(self.delays(), action, condition)
            .await
            .inspect_err(|e| debug!("{} gave up: {}", what, e))
    }
}

/// Wraps a fetcher so every call goes through a [`RetryPolicy`].
pub struct RetryingFetcher {
    inner: Arc<dyn Fetcher>,
    policy: RetryPolicy,
}

impl RetryingFetcher {
    pub fn new(inner: Arc<dyn Fetcher>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl Fetcher for RetryingFetcher {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn list_modules(&self) -> Result<Vec<ModuleId>> {
        self.policy
            .run("listing modules", || self.inner.list_modules())
            .await
    }

    async fn list_revisions(&self, id: &ModuleId) -> Result<Vec<Revision>> {
        self.policy
            .run(&format!("listing revisions of {id}"), || {
                self.inner.list_revisions(id)
            })
            .await
    }

    async fn fetch_descriptor(
        &self,
        id: &ModuleId,
        constraint: &VersionConstraint,
    ) -> Result<(Descriptor, Vec<u8>)> {
        self.policy
            .run(&format!("fetching descriptor {id};{constraint}"), || {
                self.inner.fetch_descriptor(id, constraint)
            })
            .await
    }

    async fn fetch_artifact(
        &self,
        module: &ModuleRevision,
        artifact: &ArtifactSpec,
    ) -> Result<Vec<u8>> {
        self.policy
            .run(
                &format!("fetching {} of {module}", artifact.file_name()),
                || self.inner.fetch_artifact(module, artifact),
            )
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryFetcher;

    fn fast_policy(attempts: u32) -> RetryPolicy {
        RetryPolicy {
            attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(4),
            timeout: Duration::from_millis(200),
            retry_not_found: false,
        }
    }

    #[test]
    fn delays_are_capped_and_counted() {
        let policy = RetryPolicy {
            max_backoff: Duration::from_millis(100),
            initial_backoff: Duration::from_millis(40),
            ..fast_policy(10)
        };
        let delays: Vec<Duration> = policy.delays().collect();
        assert_eq!(delays.len(), 9);
        for delay in delays {
            assert!(delay <= Duration::from_millis(100), "{delay:?}");
        }
        assert_eq!(fast_policy(1).delays().count(), 0);
    }

    #[tokio::test]
    async fn recovers_from_transient_failures() {
        let memory = Arc::new(MemoryFetcher::new());
        memory.add_simple("org", "lib", "1.0").unwrap();
        let id = ModuleId::new("org", "lib");
        memory.fail_times(&id, 2, IvrError::Network("connection reset".into()));

        let fetcher = RetryingFetcher::new(memory.clone(), fast_policy(3));
        let (descriptor, _) = fetcher
            .fetch_descriptor(&id, &VersionConstraint::parse("1.0").unwrap())
            .await
            .unwrap();
        assert_eq!(descriptor.module.revision.as_str(), "1.0");
        assert_eq!(memory.descriptor_fetches(), 3);
    }

    #[tokio::test]
    async fn gives_up_after_attempts_and_skips_not_found() {
        let memory = Arc::new(MemoryFetcher::new());
        let id = ModuleId::new("org", "lib");
        memory.fail_times(&id, 5, IvrError::Network("down".into()));
        let fetcher = RetryingFetcher::new(memory.clone(), fast_policy(2));
        let exact = VersionConstraint::parse("1.0").unwrap();
        assert!(matches!(
            fetcher.fetch_descriptor(&id, &exact).await,
            Err(IvrError::Network(_))
        ));
        assert_eq!(memory.descriptor_fetches(), 2);

        let missing = ModuleId::new("org", "missing");
        assert!(matches!(
            fetcher.fetch_descriptor(&missing, &exact).await,
            Err(IvrError::NotFound(_))
        ));
        assert_eq!(memory.descriptor_fetches(), 3);
    }

    #[tokio::test]
    async fn timeouts_become_network_errors() {
        let memory = Arc::new(MemoryFetcher::new());
        memory.add_simple("org", "slow", "1.0").unwrap();
        let id = ModuleId::new("org", "slow");
        memory.set_delay(&id, Duration::from_secs(5));
        let policy = RetryPolicy {
            timeout: Duration::from_millis(20),
            ..fast_policy(1)
        };
        let fetcher = RetryingFetcher::new(memory, policy);
        let err = fetcher
            .fetch_descriptor(&id, &VersionConstraint::parse("1.0").unwrap())
            .await
            .unwrap_err();
        assert_eq!(err.exit_code(), 4);
    }
}
