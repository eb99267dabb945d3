//! Channel-agnostic, never-throwing notification fan-out. Grounded loosely
//! on the teacher's `resource` module's broadcast-channel observer pattern,
//! generalized from resource samples to leveled, rate-limited notices.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::warn;

const ROLLING_WINDOW: Duration = Duration::from_secs(3600);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum NotifyLevel {
    Info,
    Warning,
    Critical,
}

#[derive(Debug, Clone)]
pub struct Notice {
    pub level: NotifyLevel,
    pub title: String,
    pub body: String,
}

/// A delivery channel (log line, webhook, desktop notification, ...).
/// Implementations should not panic; a channel failing to deliver is
/// reported back through the `Result`, never propagated as an exception
/// that would abort delivery to the remaining channels.
#[async_trait]
pub trait NotifyChannel: Send + Sync {
    fn name(&self) -> &str;
    async fn send(&self, notice: &Notice) -> Result<(), String>;
}

pub struct LogChannel;

#[async_trait]
impl NotifyChannel for LogChannel {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, notice: &Notice) -> Result<(), String> {
        match notice.level {
            NotifyLevel::Info => tracing::info!(title = %notice.title, "{}", notice.body),
            NotifyLevel::Warning => tracing::warn!(title = %notice.title, "{}", notice.body),
            NotifyLevel::Critical => tracing::error!(title = %notice.title, "{}", notice.body),
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct DeliveryOutcome {
    pub channel: String,
    pub ok: bool,
    pub error: Option<String>,
}

/// Fans a notice out to every registered channel, enforcing a minimum level,
/// an optional title whitelist, and a rolling "at most `rate_limit_per_hour`
/// notices per hour" budget. Never returns an `Err`: individual channel
/// failures surface in the returned outcome list.
pub struct Notifier {
    channels: Vec<Arc<dyn NotifyChannel>>,
    min_level: NotifyLevel,
    rate_limit_per_hour: u32,
    sent_at_ms: Mutex<VecDeque<i64>>,
    whitelist: Option<HashSet<String>>,
}

impl Notifier {
    pub fn new(min_level: NotifyLevel, rate_limit_per_hour: u32) -> Self {
        Self {
            channels: Vec::new(),
            min_level,
            rate_limit_per_hour,
            sent_at_ms: Mutex::new(VecDeque::new()),
            whitelist: None,
        }
    }

    pub fn add_channel(mut self, channel: Arc<dyn NotifyChannel>) -> Self {
        self.channels.push(channel);
        self
    }

    /// Restricts delivery to notices whose `title` is in `titles`; notices
    /// outside the whitelist are dropped before the rate limiter sees them.
    pub fn with_whitelist(mut self, titles: impl IntoIterator<Item = String>) -> Self {
        self.whitelist = Some(titles.into_iter().collect());
        self
    }

    fn now_ms() -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    /// Evicts timestamps older than the rolling window, then admits the
    /// current send only if it stays within `rate_limit_per_hour`.
    async fn admit_for_rate_limit(&self) -> bool {
        let now = Self::now_ms();
        let window_start = now - ROLLING_WINDOW.as_millis() as i64;
        let mut sent = self.sent_at_ms.lock().await;
        while matches!(sent.front(), Some(&t) if t < window_start) {
            sent.pop_front();
        }
        if sent.len() as u32 >= self.rate_limit_per_hour {
            return false;
        }
        sent.push_back(now);
        true
    }

    /// Delivers to every registered channel. Returns an empty outcome list
    /// if the notice is below `min_level`, outside the whitelist (when set),
    /// or the rolling-hour rate limit is exhausted.
    pub async fn notify(&self, notice: Notice) -> Vec<DeliveryOutcome> {
        if notice.level < self.min_level {
            return Vec::new();
        }
        if let Some(whitelist) = &self.whitelist {
            if !whitelist.contains(&notice.title) {
                return Vec::new();
            }
        }
        if !self.admit_for_rate_limit().await {
            return Vec::new();
        }

        let mut outcomes = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            let outcome = match channel.send(&notice).await {
                Ok(()) => DeliveryOutcome { channel: channel.name().to_string(), ok: true, error: None },
                Err(e) => {
                    warn!(channel = channel.name(), error = %e, "notification delivery failed");
                    DeliveryOutcome { channel: channel.name().to_string(), ok: false, error: Some(e) }
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingChannel;

    #[async_trait]
    impl NotifyChannel for FailingChannel {
        fn name(&self) -> &str {
            "failing"
        }

        async fn send(&self, _notice: &Notice) -> Result<(), String> {
            Err("unreachable endpoint".into())
        }
    }

    fn notice(title: &str) -> Notice {
        Notice { level: NotifyLevel::Critical, title: title.into(), body: "b".into() }
    }

    #[tokio::test]
    async fn below_min_level_notices_are_dropped() {
        let notifier = Notifier::new(NotifyLevel::Warning, 100).add_channel(Arc::new(LogChannel));
        let outcomes = notifier
            .notify(Notice { level: NotifyLevel::Info, title: "t".into(), body: "b".into() })
            .await;
        assert!(outcomes.is_empty());
    }

    #[tokio::test]
    async fn channel_failure_is_reported_not_propagated() {
        let notifier = Notifier::new(NotifyLevel::Info, 100).add_channel(Arc::new(FailingChannel));
        let outcomes = notifier.notify(notice("t")).await;
        assert_eq!(outcomes.len(), 1);
        assert!(!outcomes[0].ok);
    }

    #[tokio::test]
    async fn rolling_window_caps_at_configured_count_per_hour() {
        let notifier = Notifier::new(NotifyLevel::Info, 2).add_channel(Arc::new(LogChannel));
        assert!(!notifier.notify(notice("a")).await.is_empty());
        assert!(!notifier.notify(notice("b")).await.is_empty());
        assert!(notifier.notify(notice("c")).await.is_empty());
    }

    #[tokio::test]
    async fn whitelist_drops_titles_outside_the_set() {
        let notifier = Notifier::new(NotifyLevel::Info, 100)
            .add_channel(Arc::new(LogChannel))
            .with_whitelist(["allowed".to_string()]);
        assert!(notifier.notify(notice("allowed")).await.len() == 1);
        assert!(notifier.notify(notice("blocked")).await.is_empty());
    }
}
