//! Timeouts and retries around external calls.

use std::{future::Future, time::Duration};

use crate::{
    config::{RetryConfig, TimeoutConfig},
    error::{Error, Result},
};

/// Which external dependency a call goes to. Decides the timeout and the
/// error a timeout turns into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Embedding,
    Store,
    Llm,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Embedding => "embedding",
            Self::Store => "store",
            Self::Llm => "llm",
        }
    }

    fn timed_out(self, after: Duration) -> Error {
        let message = format!("timed out after {after:?}");
        match self {
            Self::Embedding => Error::Encoding {
                encoder: "embedding",
                message,
            },
            Self::Store => Error::StoreUnavailable(message),
            Self::Llm => Error::Synthesis(message),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub embedding_timeout: Duration,
    pub store_timeout: Duration,
    pub llm_timeout: Duration,
}

impl RetryPolicy {
    pub fn from_config(retry: &RetryConfig, timeouts: &TimeoutConfig) -> Self {
        Self {
            max_attempts: retry.max_attempts.max(1),
            initial_backoff: Duration::from_millis(retry.initial_backoff_ms),
            max_backoff: Duration::from_millis(retry.max_backoff_ms),
            embedding_timeout: timeouts.embedding(),
            store_timeout: timeouts.store(),
            llm_timeout: timeouts.llm(),
        }
    }

    pub fn timeout(&self, stage: Stage) -> Duration {
        match stage {
            Stage::Embedding => self.embedding_timeout,
            Stage::Store => self.store_timeout,
            Stage::Llm => self.llm_timeout,
        }
    }

    /// Delay before retry number `attempt` (0-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default(), &TimeoutConfig::default())
    }
}

/// Run `op` under the stage's timeout, retrying retryable failures with
/// exponential backoff until `max_attempts` is spent.
pub async fn run<T, F, Fut>(policy: &RetryPolicy, stage: Stage, mut op: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let limit = policy.timeout(stage);
    let mut attempt = 0;
    loop {
        let result = match tokio::time::timeout(limit, op()).await {
            Ok(result) => result,
            Err(_) => Err(stage.timed_out(limit)),
        };

        match result {
            Ok(value) => return Ok(value),
            Err(e) if e.is_retryable() && attempt + 1 < policy.max_attempts => {
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    stage = stage.as_str(),
                    attempt = attempt + 1,
                    error = %e,
                    ?delay,
                    "call failed, retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
            embedding_timeout: Duration::from_millis(50),
            store_timeout: Duration::from_millis(50),
            llm_timeout: Duration::from_millis(50),
        }
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(250));
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(4), Duration::from_millis(4000));
        assert_eq!(policy.backoff(40), Duration::from_millis(4000));
    }

    #[tokio::test]
    async fn retries_until_success() {
        let calls = AtomicU32::new(0);
        let value = run(&fast_policy(3), Stage::Store, || async {
            if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                Err(Error::StoreUnavailable("flaky".into()))
            } else {
                Ok(7)
            }
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let calls = AtomicU32::new(0);
        let err = run(&fast_policy(2), Stage::Embedding, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(Error::encoding("dense", "down"))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Encoding { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn non_retryable_errors_fail_fast() {
        let calls = AtomicU32::new(0);
        let err = run(&fast_policy(5), Stage::Store, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err::<(), _>(Error::Config("dimension".into()))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn timeout_maps_to_stage_error() {
        let slow = || async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, Error>(())
        };
        let err = run(&fast_policy(1), Stage::Llm, slow).await.unwrap_err();
        assert!(matches!(err, Error::Synthesis(_)));

        let err = run(&fast_policy(1), Stage::Store, slow).await.unwrap_err();
        assert!(matches!(err, Error::StoreUnavailable(_)));

        let err = run(&fast_policy(1), Stage::Embedding, slow)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Encoding { .. }));
    }
}
