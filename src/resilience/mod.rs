//! Resilience kernel: retry, circuit breaker, fallback, timeout, and the
//! composite `with_recovery` pipeline every coordinator in this crate wraps
//! its cross-component calls in.

pub mod circuit_breaker;
pub mod fallback;
pub mod recovery;
pub mod retry;
pub mod timeout;

pub use circuit_breaker::{BreakerState, BreakerThresholds, CircuitBreaker, CircuitBreakerRegistry};
pub use fallback::fallback;
pub use recovery::{with_recovery, RecoveryEnvelope, Strategy};
pub use retry::{retry, Backoff, RetryConfig};
pub use timeout::timeout;
