//! Token budget accounting. No direct teacher analogue; grounded loosely on
//! the teacher's `resource` module's counter + threshold-alert shape,
//! generalized from wall-clock resource sampling to a debited token ledger.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::error::CoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BudgetState {
    Ok,
    Warning,
    Exceeded,
}

#[derive(Debug, Clone)]
pub struct TokenBudgetConfig {
    pub max_tokens: u64,
    /// Fraction of `max_tokens` at which `state()` reports `Warning`.
    pub warning_ratio: f64,
}

impl Default for TokenBudgetConfig {
    fn default() -> Self {
        Self { max_tokens: 1_000_000, warning_ratio: 0.8 }
    }
}

/// Tracks cumulative token spend against a ceiling. Debits are atomic so
/// concurrent task completions never race past the ceiling undetected.
pub struct TokenBudgetManager {
    id: String,
    config: TokenBudgetConfig,
    used: AtomicU64,
}

impl TokenBudgetManager {
    pub fn new(id: impl Into<String>, config: TokenBudgetConfig) -> Self {
        Self { id: id.into(), config, used: AtomicU64::new(0) }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn used(&self) -> u64 {
        self.used.load(Ordering::SeqCst)
    }

    pub fn remaining(&self) -> u64 {
        self.config.max_tokens.saturating_sub(self.used())
    }

    pub fn state(&self) -> BudgetState {
        let used = self.used();
        if used >= self.config.max_tokens {
            BudgetState::Exceeded
        } else if used as f64 >= self.config.max_tokens as f64 * self.config.warning_ratio {
            BudgetState::Warning
        } else {
            BudgetState::Ok
        }
    }

    pub fn can_afford(&self, tokens: u64) -> bool {
        self.used().saturating_add(tokens) <= self.config.max_tokens
    }

    /// Debits `tokens` unconditionally, returning `BudgetExceeded` if the
    /// ledger was already over the ceiling (the debit still lands; callers
    /// decide whether to treat this as fatal).
    pub fn debit(&self, tokens: u64) -> Result<(), CoreError> {
        let used = self.used.fetch_add(tokens, Ordering::SeqCst) + tokens;
        if used > self.config.max_tokens {
            return Err(CoreError::budget_exceeded(self.id.clone(), used, self.config.max_tokens));
        }
        Ok(())
    }

    /// Runs `tokens`-costed work only if affordable, debiting first.
    pub async fn with_budget<T, F, Fut>(&self, tokens: u64, op: F) -> Result<T, CoreError>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, CoreError>>,
    {
        if !self.can_afford(tokens) {
            return Err(CoreError::budget_exceeded(self.id.clone(), self.used() + tokens, self.config.max_tokens));
        }
        self.used.fetch_add(tokens, Ordering::SeqCst);
        op().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reports_warning_then_exceeded_thresholds() {
        let manager = TokenBudgetManager::new(
            "b1",
            TokenBudgetConfig { max_tokens: 100, warning_ratio: 0.8 },
        );
        assert_eq!(manager.state(), BudgetState::Ok);
        manager.debit(85).unwrap();
        assert_eq!(manager.state(), BudgetState::Warning);
        assert!(manager.debit(20).is_err());
        assert_eq!(manager.state(), BudgetState::Exceeded);
    }

    #[tokio::test]
    async fn with_budget_rejects_work_it_cannot_afford() {
        let manager = TokenBudgetManager::new("b2", TokenBudgetConfig { max_tokens: 10, warning_ratio: 0.5 });
        let result = manager
            .with_budget(11, || async { Ok::<_, CoreError>(()) })
            .await;
        assert!(matches!(result, Err(CoreError::BudgetExceeded { .. })));
    }
}
