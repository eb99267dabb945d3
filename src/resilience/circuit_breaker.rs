//! Circuit breaker state machine and process-wide registry.

use std::future::Future;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct BreakerThresholds {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub open_timeout: Duration,
}

impl Default for BreakerThresholds {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            success_threshold: 1,
            open_timeout: Duration::from_secs(30),
        }
    }
}

/// A single named circuit breaker. Unique per name within a [`CircuitBreakerRegistry`].
pub struct CircuitBreaker {
    name: String,
    thresholds: BreakerThresholds,
    state: Mutex<BreakerState>,
    failure_count: AtomicU32,
    success_count: AtomicU32,
    last_state_change_ms: AtomicU64,
    /// Guards the single half-open probe slot.
    probe_in_flight: Mutex<bool>,
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, thresholds: BreakerThresholds) -> Self {
        Self {
            name: name.into(),
            thresholds,
            state: Mutex::new(BreakerState::Closed),
            failure_count: AtomicU32::new(0),
            success_count: AtomicU32::new(0),
            last_state_change_ms: AtomicU64::new(now_ms()),
            probe_in_flight: Mutex::new(false),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn state(&self) -> BreakerState {
        *self.state.lock().await
    }

    async fn set_state(&self, state: BreakerState) {
        *self.state.lock().await = state;
        self.last_state_change_ms.store(now_ms(), Ordering::SeqCst);
    }

    fn retry_after(&self) -> Duration {
        let elapsed = now_ms().saturating_sub(self.last_state_change_ms.load(Ordering::SeqCst));
        let remaining = self.thresholds.open_timeout.as_millis() as u64 - elapsed.min(self.thresholds.open_timeout.as_millis() as u64);
        Duration::from_millis(remaining)
    }

    /// Checks whether a call may proceed, transitioning OPEN→HALF_OPEN on timeout
    /// elapse and admitting exactly one concurrent half-open probe.
    async fn acquire(&self) -> Result<(), CoreError> {
        let state = self.state().await;
        match state {
            BreakerState::Closed => Ok(()),
            BreakerState::Open => {
                let elapsed =
                    now_ms().saturating_sub(self.last_state_change_ms.load(Ordering::SeqCst));
                if elapsed >= self.thresholds.open_timeout.as_millis() as u64 {
                    self.set_state(BreakerState::HalfOpen).await;
                    self.try_take_probe_slot().await
                } else {
                    Err(CoreError::circuit_open(self.name.clone(), self.retry_after()))
                }
            }
            BreakerState::HalfOpen => self.try_take_probe_slot().await,
        }
    }

    async fn try_take_probe_slot(&self) -> Result<(), CoreError> {
        let mut slot = self.probe_in_flight.lock().await;
        if *slot {
            return Err(CoreError::circuit_open(self.name.clone(), self.retry_after()));
        }
        *slot = true;
        Ok(())
    }

    async fn release_probe_slot(&self) {
        *self.probe_in_flight.lock().await = false;
    }

    async fn on_success(&self) {
        let state = self.state().await;
        match state {
            BreakerState::Closed => {
                self.failure_count.store(0, Ordering::SeqCst);
            }
            BreakerState::HalfOpen => {
                let successes = self.success_count.fetch_add(1, Ordering::SeqCst) + 1;
                self.release_probe_slot().await;
                if successes >= self.thresholds.success_threshold {
                    self.failure_count.store(0, Ordering::SeqCst);
                    self.success_count.store(0, Ordering::SeqCst);
                    self.set_state(BreakerState::Closed).await;
                }
            }
            BreakerState::Open => {}
        }
    }

    async fn on_failure(&self) {
        let state = self.state().await;
        match state {
            BreakerState::Closed => {
                let failures = self.failure_count.fetch_add(1, Ordering::SeqCst) + 1;
                if failures >= self.thresholds.failure_threshold {
                    self.set_state(BreakerState::Open).await;
                }
            }
            BreakerState::HalfOpen => {
                self.release_probe_slot().await;
                self.success_count.store(0, Ordering::SeqCst);
                self.set_state(BreakerState::Open).await;
            }
            BreakerState::Open => {}
        }
    }

    pub fn reset(&self) {
        self.failure_count.store(0, Ordering::SeqCst);
        self.success_count.store(0, Ordering::SeqCst);
        self.last_state_change_ms.store(now_ms(), Ordering::SeqCst);
        // `blocking_lock` is unavailable off a runtime thread; reset is only ever
        // called from async context via `CircuitBreakerRegistry::reset`.
    }

    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, CoreError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        self.acquire().await?;
        match op().await {
            Ok(v) => {
                self.on_success().await;
                Ok(v)
            }
            Err(e) => {
                self.on_failure().await;
                Err(e)
            }
        }
    }
}

/// Process-wide registry of circuit breakers keyed by name. Per Design Note
/// "Singletons", this is a convenience global for scripts/CLI use — internal
/// callers should hold an explicit `Arc<CircuitBreakerRegistry>`.
#[derive(Default)]
pub struct CircuitBreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl CircuitBreakerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the breaker for `name`, creating it with `thresholds` if absent.
    /// A name collision with different thresholds still returns the existing
    /// breaker unchanged (first registration wins), matching invariant 4 in §3.
    pub fn get_or_create(&self, name: &str, thresholds: BreakerThresholds) -> Arc<CircuitBreaker> {
        self.breakers
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(name, thresholds)))
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|b| b.clone())
    }

    pub async fn reset(&self, name: &str) {
        if let Some(b) = self.breakers.get(name) {
            b.set_state(BreakerState::Closed).await;
            b.reset();
        }
    }
}
