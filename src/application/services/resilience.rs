use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::warn;

/// Classifies an operation error: transient failures are retried and count
/// against the circuit breaker, anything else short-circuits as permanent.
pub trait Recoverable {
    fn is_transient(&self) -> bool;
}

#[derive(Debug, Clone)]
pub struct CallPolicy {
    /// Stable identifier for the destination (e.g. per sender host), so one
    /// failing destination does not open the breaker for unrelated ones.
    pub breaker_key: String,
    /// Total attempts per execution, including the first.
    pub retries: u32,
    pub base_delay: Duration,
    pub timeout: Duration,
    pub breaker_threshold: u32,
    pub breaker_reset: Duration,
}

#[derive(Debug, Error)]
pub enum ResilienceError<E: Display> {
    #[error("circuit open for {key}, retry in {retry_in:?}")]
    CircuitOpen {
        key: String,
        retry_in: Duration,
        cause: Option<String>,
    },
    #[error("{operation} timed out after {attempts} attempt(s) of {timeout:?}")]
    Timeout {
        operation: String,
        attempts: u32,
        timeout: Duration,
    },
    #[error("retries exhausted after {attempts} attempt(s): {cause}")]
    RetryExhausted { attempts: u32, cause: E },
    #[error("permanent failure: {0}")]
    Permanent(E),
}

impl<E: Display> ResilienceError<E> {
    /// Transient kinds may be retried later by the caller; `Permanent` may
    /// not.
    pub fn is_transient(&self) -> bool {
        !matches!(self, ResilienceError::Permanent(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ResilienceError::CircuitOpen { .. } => "circuit_open",
            ResilienceError::Timeout { .. } => "timeout",
            ResilienceError::RetryExhausted { .. } => "retry_exhausted",
            ResilienceError::Permanent(_) => "permanent",
        }
    }
}

#[derive(Debug, Default)]
struct BreakerState {
    consecutive_failures: u32,
    open_until: Option<Instant>,
    last_error: Option<String>,
}

/// Shared wrapper for fallible remote calls: per-key timeout, exponential
/// backoff retry and a circuit breaker.
///
/// Circuit state is process-local and owned by the executor instance; each
/// worker process keeps its own view, which is a per-process protective
/// measure rather than a coordination mechanism.
pub struct ResilienceExecutor {
    breakers: Mutex<HashMap<String, BreakerState>>,
}

impl Default for ResilienceExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl ResilienceExecutor {
    pub fn new() -> Self {
        Self {
            breakers: Mutex::new(HashMap::new()),
        }
    }

    pub async fn execute<T, E, F, Fut>(
        &self,
        operation: &str,
        policy: &CallPolicy,
        mut call: F,
    ) -> Result<T, ResilienceError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Recoverable + Display,
    {
        if let Some((retry_in, cause)) = self.currently_open(&policy.breaker_key) {
            warn!(
                operation,
                breaker_key = %policy.breaker_key,
                ?retry_in,
                "circuit open, refusing call"
            );
            return Err(ResilienceError::CircuitOpen {
                key: policy.breaker_key.clone(),
                retry_in,
                cause,
            });
        }

        let attempts = policy.retries.max(1);
        let mut last_error: Option<E> = None;
        let mut timed_out = false;

        for attempt in 1..=attempts {
            let cause = match tokio::time::timeout(policy.timeout, call()).await {
                Ok(Ok(value)) => {
                    self.record_success(&policy.breaker_key);
                    return Ok(value);
                }
                Ok(Err(error)) if !error.is_transient() => {
                    // Definitive response from the remote end, not flakiness;
                    // neither retried nor counted against the breaker.
                    return Err(ResilienceError::Permanent(error));
                }
                Ok(Err(error)) => {
                    let cause = error.to_string();
                    last_error = Some(error);
                    timed_out = false;
                    cause
                }
                Err(_) => {
                    timed_out = true;
                    format!("no response within {:?}", policy.timeout)
                }
            };

            warn!(
                operation,
                breaker_key = %policy.breaker_key,
                attempt,
                %cause,
                "attempt failed"
            );

            if self.record_failure(policy, &cause) {
                return Err(ResilienceError::CircuitOpen {
                    key: policy.breaker_key.clone(),
                    retry_in: policy.breaker_reset,
                    cause: Some(cause),
                });
            }

            if attempt < attempts {
                tokio::time::sleep(policy.base_delay * 2u32.saturating_pow(attempt - 1)).await;
            }
        }

        if timed_out {
            Err(ResilienceError::Timeout {
                operation: operation.to_string(),
                attempts,
                timeout: policy.timeout,
            })
        } else {
            match last_error {
                Some(cause) => Err(ResilienceError::RetryExhausted { attempts, cause }),
                None => Err(ResilienceError::Timeout {
                    operation: operation.to_string(),
                    attempts,
                    timeout: policy.timeout,
                }),
            }
        }
    }

    fn currently_open(&self, key: &str) -> Option<(Duration, Option<String>)> {
        let breakers = self.breakers.lock().ok()?;
        let state = breakers.get(key)?;
        let open_until = state.open_until?;
        let now = Instant::now();
        if now < open_until {
            Some((open_until - now, state.last_error.clone()))
        } else {
            None
        }
    }

    fn record_success(&self, key: &str) {
        if let Ok(mut breakers) = self.breakers.lock() {
            breakers.remove(key);
        }
    }

    /// Returns true when this failure tripped the breaker open.
    fn record_failure(&self, policy: &CallPolicy, cause: &str) -> bool {
        let Ok(mut breakers) = self.breakers.lock() else {
            return false;
        };
        let state = breakers.entry(policy.breaker_key.clone()).or_default();
        state.consecutive_failures += 1;
        state.last_error = Some(cause.to_string());
        if state.consecutive_failures >= policy.breaker_threshold {
            state.open_until = Some(Instant::now() + policy.breaker_reset);
            warn!(
                breaker_key = %policy.breaker_key,
                failures = state.consecutive_failures,
                reset = ?policy.breaker_reset,
                "circuit opened"
            );
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[derive(Debug, Error)]
    enum FakeError {
        #[error("connection refused")]
        Transient,
        #[error("credentials rejected")]
        Permanent,
    }

    impl Recoverable for FakeError {
        fn is_transient(&self) -> bool {
            matches!(self, FakeError::Transient)
        }
    }

    fn policy(key: &str, retries: u32, threshold: u32, reset: Duration) -> CallPolicy {
        CallPolicy {
            breaker_key: key.to_string(),
            retries,
            base_delay: Duration::from_millis(1),
            timeout: Duration::from_millis(200),
            breaker_threshold: threshold,
            breaker_reset: reset,
        }
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let executor = ResilienceExecutor::new();
        let calls = AtomicU32::new(0);
        let policy = policy("host-a", 3, 10, Duration::from_secs(60));

        let result: Result<u32, _> = executor
            .execute("send", &policy, || {
                let attempt = calls.fetch_add(1, Ordering::SeqCst) + 1;
                async move {
                    if attempt < 3 {
                        Err(FakeError::Transient)
                    } else {
                        Ok(attempt)
                    }
                }
            })
            .await;

        assert_eq!(result.unwrap(), 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn exhausted_retries_classify_as_retry_exhausted() {
        let executor = ResilienceExecutor::new();
        let policy = policy("host-b", 2, 10, Duration::from_secs(60));

        let result: Result<(), _> = executor
            .execute("send", &policy, || async { Err(FakeError::Transient) })
            .await;

        match result {
            Err(ResilienceError::RetryExhausted { attempts, .. }) => assert_eq!(attempts, 2),
            other => panic!("expected retry_exhausted, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn permanent_errors_skip_retries_and_breaker_accounting() {
        let executor = ResilienceExecutor::new();
        let calls = AtomicU32::new(0);
        let policy = policy("host-c", 5, 1, Duration::from_secs(60));

        let result: Result<(), _> = executor
            .execute("send", &policy, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FakeError::Permanent) }
            })
            .await;

        assert!(matches!(result, Err(ResilienceError::Permanent(_))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // The breaker never counted the permanent failure.
        let follow_up: Result<(), ResilienceError<FakeError>> = executor
            .execute("send", &policy, || async { Ok(()) })
            .await;
        assert!(follow_up.is_ok());
    }

    #[tokio::test]
    async fn breaker_opens_after_threshold_and_fails_fast() {
        let executor = ResilienceExecutor::new();
        let calls = AtomicU32::new(0);
        // Five consecutive failures, one attempt per execution.
        let policy = policy("sender-host-x", 1, 5, Duration::from_secs(60));

        for _ in 0..5 {
            let _: Result<(), _> = executor
                .execute("send", &policy, || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err(FakeError::Transient) }
                })
                .await;
        }
        assert_eq!(calls.load(Ordering::SeqCst), 5);

        // Sixth execution fails fast without invoking the call.
        let result: Result<(), _> = executor
            .execute("send", &policy, || {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err(FakeError::Transient) }
            })
            .await;
        match result {
            Err(ResilienceError::CircuitOpen { key, .. }) => assert_eq!(key, "sender-host-x"),
            other => panic!("expected circuit_open, got {other:?}"),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn breaker_key_isolates_destinations() {
        let executor = ResilienceExecutor::new();
        let failing = policy("host-down", 1, 1, Duration::from_secs(60));
        let healthy = policy("host-up", 1, 1, Duration::from_secs(60));

        let _: Result<(), _> = executor
            .execute("send", &failing, || async { Err(FakeError::Transient) })
            .await;

        let result: Result<u32, ResilienceError<FakeError>> = executor
            .execute("send", &healthy, || async { Ok(7) })
            .await;
        assert_eq!(result.unwrap(), 7);
    }

    #[tokio::test]
    async fn success_after_reset_window_closes_the_circuit() {
        let executor = ResilienceExecutor::new();
        let policy = policy("host-flappy", 1, 1, Duration::from_millis(20));

        let _: Result<(), _> = executor
            .execute("send", &policy, || async { Err(FakeError::Transient) })
            .await;
        assert!(executor.currently_open("host-flappy").is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;

        let result: Result<(), ResilienceError<FakeError>> = executor
            .execute("send", &policy, || async { Ok(()) })
            .await;
        assert!(result.is_ok());
        assert!(executor.currently_open("host-flappy").is_none());
    }

    #[tokio::test]
    async fn hung_call_times_out() {
        let executor = ResilienceExecutor::new();
        let mut policy = policy("host-hang", 1, 10, Duration::from_secs(60));
        policy.timeout = Duration::from_millis(10);

        let result: Result<(), ResilienceError<FakeError>> = executor
            .execute("send", &policy, || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;
        match result {
            Err(ResilienceError::Timeout { attempts, .. }) => assert_eq!(attempts, 1),
            other => panic!("expected timeout, got {other:?}"),
        }
    }
}
