//! Bounded-history usage accounting, grounded loosely on the teacher's
//! `resource` module's ring-buffer sampling (same fixed-capacity-`VecDeque`
//! shape as [`crate::agent::FailureWindow`], applied to cost events instead
//! of pass/fail outcomes).

use std::collections::VecDeque;

use tokio::sync::RwLock;

#[derive(Debug, Clone)]
pub struct UsageEvent {
    pub agent_id: String,
    pub model: String,
    pub provider: String,
    pub tokens: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone, Default)]
pub struct UsageSummary {
    pub total_tokens: u64,
    pub event_count: usize,
}

/// Which field of a [`UsageEvent`] to group by for a dimensioned summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UsageDimension {
    Agent,
    Model,
    Provider,
}

/// Tracks the last `capacity` usage events in memory for dashboards/CLI
/// reporting; older events are evicted FIFO.
pub struct UsageTracker {
    capacity: usize,
    events: RwLock<VecDeque<UsageEvent>>,
}

impl UsageTracker {
    pub fn new(capacity: usize) -> Self {
        Self { capacity, events: RwLock::new(VecDeque::with_capacity(capacity)) }
    }

    pub async fn record(
        &self,
        agent_id: impl Into<String>,
        model: impl Into<String>,
        provider: impl Into<String>,
        tokens: u64,
    ) {
        let mut events = self.events.write().await;
        if events.len() == self.capacity {
            events.pop_front();
        }
        events.push_back(UsageEvent {
            agent_id: agent_id.into(),
            model: model.into(),
            provider: provider.into(),
            tokens,
            timestamp: chrono::Utc::now(),
        });
    }

    pub async fn summary(&self) -> UsageSummary {
        let events = self.events.read().await;
        UsageSummary {
            total_tokens: events.iter().map(|e| e.tokens).sum(),
            event_count: events.len(),
        }
    }

    pub async fn summary_for(&self, agent_id: &str) -> UsageSummary {
        self.summary_by(UsageDimension::Agent, agent_id).await
    }

    pub async fn summary_for_model(&self, model: &str) -> UsageSummary {
        self.summary_by(UsageDimension::Model, model).await
    }

    pub async fn summary_for_provider(&self, provider: &str) -> UsageSummary {
        self.summary_by(UsageDimension::Provider, provider).await
    }

    /// Summarizes events whose `dimension` field equals `key`.
    pub async fn summary_by(&self, dimension: UsageDimension, key: &str) -> UsageSummary {
        let events = self.events.read().await;
        let matching = events.iter().filter(|e| {
            let field: &str = match dimension {
                UsageDimension::Agent => &e.agent_id,
                UsageDimension::Model => &e.model,
                UsageDimension::Provider => &e.provider,
            };
            field == key
        });
        let mut summary = UsageSummary::default();
        for e in matching {
            summary.total_tokens += e.tokens;
            summary.event_count += 1;
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn evicts_oldest_event_beyond_capacity() {
        let tracker = UsageTracker::new(2);
        tracker.record("a", "claude-3", "anthropic", 10).await;
        tracker.record("a", "claude-3", "anthropic", 20).await;
        tracker.record("a", "claude-3", "anthropic", 30).await;
        let summary = tracker.summary().await;
        assert_eq!(summary.event_count, 2);
        assert_eq!(summary.total_tokens, 50);
    }

    #[tokio::test]
    async fn summary_for_filters_by_agent() {
        let tracker = UsageTracker::new(10);
        tracker.record("a", "claude-3", "anthropic", 5).await;
        tracker.record("b", "gpt-4", "openai", 7).await;
        let summary = tracker.summary_for("a").await;
        assert_eq!(summary.total_tokens, 5);
        assert_eq!(summary.event_count, 1);
    }

    #[tokio::test]
    async fn summary_for_model_and_provider_group_independently_of_agent() {
        let tracker = UsageTracker::new(10);
        tracker.record("a", "claude-3", "anthropic", 5).await;
        tracker.record("b", "claude-3", "anthropic", 9).await;
        tracker.record("c", "gpt-4", "openai", 7).await;

        let by_model = tracker.summary_for_model("claude-3").await;
        assert_eq!(by_model.event_count, 2);
        assert_eq!(by_model.total_tokens, 14);

        let by_provider = tracker.summary_for_provider("openai").await;
        assert_eq!(by_provider.event_count, 1);
        assert_eq!(by_provider.total_tokens, 7);
    }
}
