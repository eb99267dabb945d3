//! `withRecovery`: compose retry/timeout/circuit-breaker into one result
//! envelope that never throws.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::CoreError;
use crate::resilience::circuit_breaker::{BreakerThresholds, CircuitBreakerRegistry};
use crate::resilience::retry::RetryConfig;

type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, CoreError>> + Send + 'a>>;
type OpFactory<T> = Arc<dyn Fn() -> BoxFuture<'static, T> + Send + Sync>;
type ShouldFallback = Arc<dyn Fn(&CoreError) -> bool + Send + Sync>;

/// One strategy in a composite recovery pipeline, specified outer-to-inner
/// as the caller writes them; composition is right-to-left (the last entry
/// wraps the bare operation first, so it re-invokes the operation factory
/// directly rather than a single pre-built future).
pub enum Strategy<T> {
    Timeout(Duration),
    Retry(RetryConfig),
    CircuitBreaker {
        name: String,
        thresholds: BreakerThresholds,
        registry: Arc<CircuitBreakerRegistry>,
    },
    /// Runs `op` when the inner pipeline fails and `should_fallback` accepts
    /// the error, replacing the failure with `op`'s result.
    Fallback {
        op: OpFactory<T>,
        should_fallback: ShouldFallback,
    },
}

/// Result envelope returned by [`with_recovery`]. Never propagates an `Err`;
/// failures are reported through `error`.
#[derive(Debug, Clone)]
pub struct RecoveryEnvelope<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
    pub used_fallback: bool,
    pub attempts: u32,
    pub duration_ms: u64,
}

/// Composes `strategies` right-to-left around `op` and runs the result,
/// tracking attempts (as reported by any retry strategy), whether a
/// `Fallback` strategy fired, and wall-clock duration.
pub async fn with_recovery<T, F, Fut>(strategies: Vec<Strategy<T>>, op: F) -> RecoveryEnvelope<T>
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, CoreError>> + Send + 'static,
{
    let start = Instant::now();
    let attempts = Arc::new(AtomicU32::new(1));
    let used_fallback = Arc::new(AtomicBool::new(false));

    let mut factory: OpFactory<T> = Arc::new(move || Box::pin(op()));
    for strategy in strategies.into_iter().rev() {
        factory = wrap(strategy, factory, attempts.clone(), used_fallback.clone());
    }

    let result = factory().await;
    let duration_ms = start.elapsed().as_millis() as u64;
    let used_fallback = used_fallback.load(Ordering::SeqCst);
    match result {
        Ok(data) => RecoveryEnvelope {
            success: true,
            data: Some(data),
            error: None,
            used_fallback,
            attempts: attempts.load(Ordering::SeqCst),
            duration_ms,
        },
        Err(e) => RecoveryEnvelope {
            success: false,
            data: None,
            error: Some(e.to_string()),
            used_fallback,
            attempts: attempts.load(Ordering::SeqCst),
            duration_ms,
        },
    }
}

fn wrap<T>(
    strategy: Strategy<T>,
    inner: OpFactory<T>,
    attempts: Arc<AtomicU32>,
    used_fallback: Arc<AtomicBool>,
) -> OpFactory<T>
where
    T: Send + 'static,
{
    match strategy {
        Strategy::Timeout(duration) => Arc::new(move || {
            let inner = inner.clone();
            Box::pin(async move { crate::resilience::timeout::timeout(duration, inner()).await })
        }),
        Strategy::Retry(config) => Arc::new(move || {
            let inner = inner.clone();
            let attempts = attempts.clone();
            Box::pin(async move {
                crate::resilience::retry::retry(
                    &config,
                    || inner(),
                    |e| e.is_retryable(),
                    move |attempt, _err, _delay| {
                        attempts.fetch_max(attempt + 1, Ordering::SeqCst);
                    },
                )
                .await
            })
        }),
        Strategy::CircuitBreaker {
            name,
            thresholds,
            registry,
        } => Arc::new(move || {
            let inner = inner.clone();
            let registry = registry.clone();
            let name = name.clone();
            let thresholds = thresholds.clone();
            Box::pin(async move {
                let breaker = registry.get_or_create(&name, thresholds);
                breaker.call(|| inner()).await
            })
        }),
        Strategy::Fallback { op, should_fallback } => Arc::new(move || {
            let inner = inner.clone();
            let op = op.clone();
            let should_fallback = should_fallback.clone();
            let fired = used_fallback.clone();
            Box::pin(async move {
                crate::resilience::fallback::fallback(
                    || inner(),
                    |e| should_fallback(e),
                    |_| fired.store(true, Ordering::SeqCst),
                    || op(),
                )
                .await
            })
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::retry::Backoff;

    #[tokio::test]
    async fn succeeding_operation_yields_success_envelope() {
        let envelope =
            with_recovery(vec![Strategy::Timeout(Duration::from_secs(1))], || async {
                Ok::<_, CoreError>(99)
            })
            .await;
        assert!(envelope.success);
        assert_eq!(envelope.data, Some(99));
        assert_eq!(envelope.error, None);
    }

    #[tokio::test]
    async fn failing_operation_yields_error_envelope_never_panics() {
        let envelope: RecoveryEnvelope<i32> = with_recovery(
            vec![Strategy::Retry(RetryConfig {
                max_attempts: 3,
                initial_delay: Duration::from_millis(1),
                backoff: Backoff::Fixed,
                jitter: 0.0,
                ..Default::default()
            })],
            || async { Err(CoreError::NotConnected) },
        )
        .await;
        assert!(!envelope.success);
        assert!(envelope.error.is_some());
        assert_eq!(envelope.attempts, 3);
    }

    #[tokio::test]
    async fn retry_then_circuit_breaker_composes_right_to_left() {
        let registry = Arc::new(CircuitBreakerRegistry::new());
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let envelope: RecoveryEnvelope<i32> = with_recovery(
            vec![
                Strategy::CircuitBreaker {
                    name: "svc".into(),
                    thresholds: BreakerThresholds::default(),
                    registry,
                },
                Strategy::Retry(RetryConfig {
                    max_attempts: 2,
                    initial_delay: Duration::from_millis(1),
                    backoff: Backoff::Fixed,
                    jitter: 0.0,
                    ..Default::default()
                }),
            ],
            move || {
                let calls = calls_clone.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        Err(CoreError::NotConnected)
                    } else {
                        Ok(1)
                    }
                }
            },
        )
        .await;
        assert!(envelope.success);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn fallback_fires_on_matching_error_and_is_reported() {
        let envelope: RecoveryEnvelope<i32> = with_recovery(
            vec![Strategy::Fallback {
                op: Arc::new(|| Box::pin(async { Ok(42) })),
                should_fallback: Arc::new(|_| true),
            }],
            || async { Err(CoreError::NotConnected) },
        )
        .await;
        assert!(envelope.success);
        assert_eq!(envelope.data, Some(42));
        assert!(envelope.used_fallback);
    }

    #[tokio::test]
    async fn fallback_does_not_fire_when_filter_rejects() {
        let envelope: RecoveryEnvelope<i32> = with_recovery(
            vec![Strategy::Fallback {
                op: Arc::new(|| Box::pin(async { Ok(42) })),
                should_fallback: Arc::new(|_| false),
            }],
            || async { Err(CoreError::NotConnected) },
        )
        .await;
        assert!(!envelope.success);
        assert!(!envelope.used_fallback);
    }
}
