//! SPDX-License-Identifier: GPL-3.0-or-later

//! Shared exponential-backoff retry and circuit-breaker machinery used by
//! both the vision classifier client and the narrative text client.

use crate::config::RetryConfig;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// Whether a call failure is worth retrying: network errors, HTTP 5xx,
/// and HTTP 429 are transient; auth/quota failures are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Transient,
    Permanent,
}

/// Tracks consecutive call failures and trips once the configured
/// threshold is reached.
#[derive(Debug, Default)]
pub struct CircuitBreaker {
    consecutive_failures: AtomicU32,
}

impl CircuitBreaker {
    pub fn new() -> Self {
        CircuitBreaker {
            consecutive_failures: AtomicU32::new(0),
        }
    }

    pub fn record_success(&self) {
        self.consecutive_failures.store(0, Ordering::SeqCst);
    }

    /// Records a failure and returns true if the breaker has now tripped.
    pub fn record_failure(&self, threshold: u32) -> bool {
        let n = self.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
        n >= threshold
    }

    pub fn is_tripped(&self, threshold: u32) -> bool {
        self.consecutive_failures.load(Ordering::SeqCst) >= threshold
    }
}

/// Runs `attempt` up to `cfg.max_attempts` times with exponential backoff
/// between transient failures. Returns the last error if every attempt
/// fails, or immediately on the first permanent failure.
pub async fn with_retry<T, E, F, Fut>(cfg: &RetryConfig, mut attempt: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, (E, FailureKind)>>,
{
    let mut backoff = cfg.initial_backoff();
    let mut last_err = None;

    for attempt_no in 1..=cfg.max_attempts {
        match attempt().await {
            Ok(v) => return Ok(v),
            Err((e, FailureKind::Permanent)) => return Err(e),
            Err((e, FailureKind::Transient)) => {
                last_err = Some(e);
                if attempt_no < cfg.max_attempts {
                    tokio::time::sleep(backoff).await;
                    backoff = Duration::from_millis(
                        (backoff.as_millis() as u64).saturating_mul(cfg.factor as u64),
                    );
                }
            }
        }
    }

    Err(last_err.expect("loop runs at least once since max_attempts >= 1"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn breaker_trips_at_threshold() {
        let cb = CircuitBreaker::new();
        for _ in 0..9 {
            assert!(!cb.record_failure(10));
        }
        assert!(cb.record_failure(10));
        assert!(cb.is_tripped(10));
    }

    #[test]
    fn breaker_resets_on_success() {
        let cb = CircuitBreaker::new();
        for _ in 0..5 {
            cb.record_failure(10);
        }
        cb.record_success();
        assert!(!cb.is_tripped(10));
    }

    #[tokio::test]
    async fn with_retry_returns_first_success() {
        let cfg = RetryConfig {
            initial_backoff_ms: 1,
            factor: 2,
            max_attempts: 3,
            circuit_breaker_threshold: 10,
        };
        let result: Result<i32, String> =
            with_retry(&cfg, || async { Ok::<_, (String, FailureKind)>(42) }).await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test]
    async fn with_retry_stops_immediately_on_permanent_failure() {
        let cfg = RetryConfig {
            initial_backoff_ms: 1,
            factor: 2,
            max_attempts: 3,
            circuit_breaker_threshold: 10,
        };
        let calls = std::sync::atomic::AtomicU32::new(0);
        let result: Result<i32, String> = with_retry(&cfg, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, _>(("auth failed".to_string(), FailureKind::Permanent)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn with_retry_exhausts_attempts_on_transient_failure() {
        let cfg = RetryConfig {
            initial_backoff_ms: 1,
            factor: 2,
            max_attempts: 3,
            circuit_breaker_threshold: 10,
        };
        let calls = std::sync::atomic::AtomicU32::new(0);
        let result: Result<i32, String> = with_retry(&cfg, || {
            calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<i32, _>(("timeout".to_string(), FailureKind::Transient)) }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
