//! Retry with fixed/linear/exponential backoff and jitter.

use std::future::Future;
use std::time::Duration;

use rand::Rng;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Fixed,
    Linear,
    Exponential,
}

#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub backoff: Backoff,
    pub multiplier: f64,
    pub max_delay: Duration,
    /// Jitter fraction in `[0, 1]`; delay is scaled by `1 + rand(-jitter, +jitter)`.
    pub jitter: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            backoff: Backoff::Exponential,
            multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            jitter: 0.0,
        }
    }
}

impl RetryConfig {
    /// Delay before the given 1-indexed attempt number, already clamped to `max_delay`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let base_ms = match self.backoff {
            Backoff::Fixed => self.initial_delay.as_millis() as f64,
            Backoff::Linear => self.initial_delay.as_millis() as f64 * attempt as f64,
            Backoff::Exponential => {
                self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32 - 1)
            }
        };
        let clamped = base_ms.min(self.max_delay.as_millis() as f64).max(0.0);
        Duration::from_millis(clamped as u64)
    }

    fn jittered_delay(&self, attempt: u32) -> Duration {
        let base = self.delay_for(attempt);
        if self.jitter <= 0.0 {
            return base;
        }
        let factor = rand::rng().random_range(-self.jitter..=self.jitter);
        let ms = (base.as_millis() as f64 * (1.0 + factor)).max(0.0);
        Duration::from_millis(ms as u64)
            .min(self.max_delay)
    }
}

/// Retries `op` per `config`, invoking `retry_predicate` to decide whether a
/// given failure warrants another attempt, and `on_retry` before each sleep
/// (never after the final, exhausting attempt).
pub async fn retry<T, F, Fut>(
    config: &RetryConfig,
    mut op: F,
    retry_predicate: impl Fn(&CoreError) -> bool,
    mut on_retry: impl FnMut(u32, &CoreError, Duration),
) -> Result<T, CoreError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, CoreError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(err) => {
                if attempt >= config.max_attempts || !retry_predicate(&err) {
                    return Err(CoreError::retry_exhausted(attempt, err));
                }
                let delay = config.jittered_delay(attempt);
                on_retry(attempt, &err, delay);
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[tokio::test]
    async fn fixed_backoff_exhausts_with_n_minus_one_retries() {
        let config = RetryConfig {
            max_attempts: 3,
            initial_delay: Duration::from_millis(5),
            backoff: Backoff::Fixed,
            jitter: 0.0,
            ..Default::default()
        };
        let retry_calls = AtomicU32::new(0);
        let result: Result<(), CoreError> = retry(
            &config,
            || async { Err(CoreError::internal("boom")) },
            |_| true,
            |_, _, _| {
                retry_calls.fetch_add(1, Ordering::SeqCst);
            },
        )
        .await;

        assert!(matches!(result, Err(CoreError::RetryExhausted { attempts: 3, .. })));
        assert_eq!(retry_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn succeeds_without_retry_when_op_succeeds_first_try() {
        let config = RetryConfig::default();
        let result = retry(
            &config,
            || async { Ok::<_, CoreError>(42) },
            |_| true,
            |_, _, _| panic!("on_retry should not be called"),
        )
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn exponential_delay_is_clamped() {
        let config = RetryConfig {
            initial_delay: Duration::from_millis(100),
            backoff: Backoff::Exponential,
            multiplier: 2.0,
            max_delay: Duration::from_millis(300),
            ..Default::default()
        };
        assert_eq!(config.delay_for(1), Duration::from_millis(100));
        assert_eq!(config.delay_for(2), Duration::from_millis(200));
        assert_eq!(config.delay_for(3), Duration::from_millis(300));
        assert_eq!(config.delay_for(4), Duration::from_millis(300));
    }
}
