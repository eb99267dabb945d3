//! In-process publish/subscribe message bus with request/response
//! correlation. Single-threaded-cooperative: handlers for a given publish
//! are awaited sequentially, so a slow handler back-pressures only that
//! publish call, never the bus itself.
//!
//! Grounded on the teacher's per-recipient mailbox routing and typed
//! message-bus request/response pattern, generalized to a closed
//! [`MessageType`] enum plus a predicate escape hatch per the typed
//! event-bus design note.

mod message;

pub use message::{Message, MessageBuilder, MessageType, Priority};

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{oneshot, RwLock};
use tracing::{debug, warn};

use crate::error::CoreError;

type BoxFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
type Handler = Box<dyn Fn(Message) -> BoxFuture<'static> + Send + Sync>;
type Predicate = Box<dyn Fn(&Message) -> bool + Send + Sync>;

struct Entry {
    id: u64,
    predicate: Predicate,
    handler: Handler,
    terminated: Arc<AtomicBool>,
}

/// A handle to a live subscription. `unsubscribe` is idempotent and safe to
/// call reentrantly from within a handler.
#[derive(Clone)]
pub struct Subscription {
    id: u64,
    terminated: Arc<AtomicBool>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn unsubscribe(&self) {
        self.terminated.store(true, Ordering::SeqCst);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

/// The bus. Cheaply cloneable; clones share the same subscription table.
#[derive(Clone)]
pub struct MessageBus {
    inner: Arc<RwLock<Vec<Entry>>>,
    next_id: Arc<AtomicU64>,
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(Vec::new())),
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Registers a predicate-matched subscription.
    pub async fn subscribe<F, Fut>(&self, predicate: impl Fn(&Message) -> bool + Send + Sync + 'static, handler: F) -> Subscription
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let terminated = Arc::new(AtomicBool::new(false));
        let entry = Entry {
            id,
            predicate: Box::new(predicate),
            handler: Box::new(move |msg| Box::pin(handler(msg))),
            terminated: terminated.clone(),
        };
        self.inner.write().await.push(entry);
        Subscription { id, terminated }
    }

    /// Convenience: subscribes to a single [`MessageType`].
    pub async fn on<F, Fut>(&self, message_type: MessageType, handler: F) -> Subscription
    where
        F: Fn(Message) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.subscribe(move |m| m.message_type == message_type, handler)
            .await
    }

    /// Drops all subscriptions.
    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }

    /// Delivers `msg` to every live, matching subscription in registration
    /// order. Handler failures (panics are not caught; async handlers
    /// should return `()` and log their own errors) never abort delivery to
    /// remaining subscribers and never fail `publish`.
    pub async fn publish(&self, msg: Message) {
        // Snapshot predicates/handlers aren't cloneable, so we hold the read
        // lock only long enough to check a match, then invoke the handler
        // without holding the lock (handlers may re-enter the bus).
        let snapshot_len = self.inner.read().await.len();
        for idx in 0..snapshot_len {
            let (matched, terminated) = {
                let guard = self.inner.read().await;
                match guard.get(idx) {
                    Some(entry) if !entry.terminated.load(Ordering::SeqCst) => {
                        (((entry.predicate)(&msg)), false)
                    }
                    Some(_) => (false, true),
                    None => (false, true),
                }
            };
            if terminated || !matched {
                continue;
            }
            // Re-acquire to invoke, since the handler is not `Clone` and we
            // must not hold the lock across the await (locking discipline
            // in §5: no lock may span a suspending operation).
            let fut = {
                let guard = self.inner.read().await;
                guard.get(idx).map(|entry| (entry.handler)(msg.clone()))
            };
            if let Some(fut) = fut {
                debug!(message_id = %msg.id, subscription_idx = idx, "dispatching message");
                fut.await;
            }
        }
        self.sweep_terminated().await;
    }

    async fn sweep_terminated(&self) {
        let mut guard = self.inner.write().await;
        guard.retain(|e| !e.terminated.load(Ordering::SeqCst));
    }

    /// Publishes `msg` and resolves with the first response whose
    /// `correlation_id == msg.id`, or rejects with `Timeout` after
    /// `timeout_ms`. The ephemeral subscription installed for this call is
    /// always removed, win or lose.
    pub async fn request(&self, msg: Message, timeout_ms: u64) -> Result<Message, CoreError> {
        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(std::sync::Mutex::new(Some(tx)));
        let correlation_id = msg.id.clone();

        let sub = self
            .subscribe(
                move |m| m.correlation_id.as_deref() == Some(correlation_id.as_str()),
                move |m| {
                    let tx = tx.clone();
                    async move {
                        if let Some(tx) = tx.lock().unwrap().take() {
                            let _ = tx.send(m);
                        }
                    }
                },
            )
            .await;

        self.publish(msg).await;

        let result = tokio::time::timeout(Duration::from_millis(timeout_ms), rx).await;
        sub.unsubscribe();

        match result {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) | Err(_) => {
                warn!(timeout_ms, "bus request timed out waiting for response");
                Err(CoreError::timeout(Duration::from_millis(timeout_ms)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn publish_subscribe_match_delivers_payload_once() {
        let bus = MessageBus::new();
        let calls = Arc::new(AtomicU32::new(0));
        let seen_payload = Arc::new(tokio::sync::Mutex::new(None));

        let calls_clone = calls.clone();
        let seen_clone = seen_payload.clone();
        bus.on(MessageType::TaskSubmit, move |m| {
            let calls = calls_clone.clone();
            let seen = seen_clone.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                *seen.lock().await = Some(m.payload);
            }
        })
        .await;

        let msg = MessageBuilder::new(MessageType::TaskSubmit)
            .source("t")
            .target("u")
            .payload(serde_json::json!({"x": 1}))
            .build();
        bus.publish(msg).await;

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(*seen_payload.lock().await, Some(serde_json::json!({"x": 1})));
    }

    #[tokio::test]
    async fn request_response_resolves_on_matching_correlation_id() {
        let bus = MessageBus::new();
        let bus_clone = bus.clone();
        bus.on(MessageType::TaskSubmit, move |m| {
            let bus = bus_clone.clone();
            async move {
                let response = MessageBuilder::new(MessageType::TaskResult)
                    .correlation_id(m.id.clone())
                    .payload(serde_json::json!({"ok": true}))
                    .build();
                bus.publish(response).await;
            }
        })
        .await;

        let request_msg = MessageBuilder::new(MessageType::TaskSubmit).build();
        let request_id = request_msg.id.clone();
        let response = bus.request(request_msg, 5_000).await.unwrap();
        assert_eq!(response.correlation_id.as_deref(), Some(request_id.as_str()));
        assert_eq!(response.payload, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn request_times_out_when_nobody_responds() {
        let bus = MessageBus::new();
        let msg = MessageBuilder::new(MessageType::TaskSubmit).build();
        let result = bus.request(msg, 50).await;
        assert!(matches!(result, Err(CoreError::Timeout { .. })));
    }

    #[tokio::test]
    async fn unsubscribe_is_idempotent_and_stops_delivery() {
        let bus = MessageBus::new();
        let calls = Arc::new(AtomicU32::new(0));
        let calls_clone = calls.clone();
        let sub = bus
            .on(MessageType::TaskSubmit, move |_m| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                }
            })
            .await;

        sub.unsubscribe();
        sub.unsubscribe();

        bus.publish(MessageBuilder::new(MessageType::TaskSubmit).build())
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
