//! Retry with exponential back-off and jitter for gateway calls.
//!
//! Only transient upstream failures are retried (timeouts, transport errors, 5xx).
//! Validation, configuration, and 4xx errors return on the first attempt.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;

use super::error::GatewayError;
use crate::metrics::GATEWAY_RETRIES;

/// Retry policy for one backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Additional attempts after the first one.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

fn default_max_retries() -> u32 {
    3
}

fn default_backoff_base_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            backoff_base_ms: default_backoff_base_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff_base_ms: 0,
            max_backoff_ms: 0,
        }
    }

    /// Un-jittered delay before retry number `attempt` (1-based).
    pub fn base_delay_ms(&self, attempt: u32) -> u64 {
        let exp = attempt.saturating_sub(1).min(16);
        self.backoff_base_ms
            .saturating_mul(1u64 << exp)
            .min(self.max_backoff_ms)
    }
}

/// Run `operation` with up to `policy.max_retries` extra attempts on transient errors.
///
/// Delay before retry `n` is `backoff_base_ms * 2^(n-1)`, capped at
/// `max_backoff_ms`, then scaled by a random factor in [0.75, 1.25).
pub async fn retry_with_backoff<T, F, Fut>(
    policy: &RetryPolicy,
    backend: &str,
    mut operation: F,
) -> Result<T, GatewayError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, GatewayError>>,
{
    let mut attempt = 0u32;
    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                if !err.is_transient() || attempt >= policy.max_retries {
                    return Err(err);
                }
                attempt += 1;
                let capped = policy.base_delay_ms(attempt);
                let delay_ms = (capped as f64 * (rand::random::<f64>() * 0.5 + 0.75)) as u64;
                GATEWAY_RETRIES.with_label_values(&[backend]).inc();
                tracing::warn!(
                    backend,
                    attempt,
                    max_retries = policy.max_retries,
                    delay_ms,
                    error = %err,
                    "Transient gateway error, retrying after back-off"
                );
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::error::UpstreamCategory;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff_base_ms: 0,
            max_backoff_ms: 0,
        }
    }

    #[test]
    fn test_base_delay_doubles_and_caps() {
        let policy = RetryPolicy {
            max_retries: 5,
            backoff_base_ms: 100,
            max_backoff_ms: 500,
        };
        assert_eq!(policy.base_delay_ms(1), 100);
        assert_eq!(policy.base_delay_ms(2), 200);
        assert_eq!(policy.base_delay_ms(3), 400);
        assert_eq!(policy.base_delay_ms(4), 500);
        assert_eq!(policy.base_delay_ms(60), 500);
    }

    #[tokio::test]
    async fn test_succeeds_first_try() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(&fast_policy(3), "test", || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Ok::<u32, GatewayError>(7)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_retries_transient_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result = retry_with_backoff(&fast_policy(3), "test", || {
            let c = Arc::clone(&c);
            async move {
                let n = c.fetch_add(1, Ordering::SeqCst);
                if n < 2 {
                    Err(GatewayError::from_status("test", 503, "busy"))
                } else {
                    Ok(n)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 2);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result: Result<(), _> = retry_with_backoff(&fast_policy(2), "test", || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(GatewayError::upstream(
                    "test",
                    UpstreamCategory::Timeout,
                    None,
                    "slow",
                ))
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = Arc::clone(&calls);
        let result: Result<(), _> = retry_with_backoff(&fast_policy(5), "test", || {
            let c = Arc::clone(&c);
            async move {
                c.fetch_add(1, Ordering::SeqCst);
                Err(GatewayError::from_status("test", 401, "bad key"))
            }
        })
        .await;
        assert!(matches!(
            result,
            Err(GatewayError::Upstream {
                status: Some(401),
                ..
            })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
