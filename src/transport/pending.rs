//! Shared pending-request correlation map. Each transport owns exactly one
//! of these; per Design Note "Pending-request map", writes are coalesced
//! through the transport's own receive loop (single writer), matching the
//! teacher's `McpClient` pattern.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use tokio::sync::{oneshot, RwLock};

use crate::transport::jsonrpc::{JsonRpcResponse, RequestId};

#[derive(Default)]
pub struct PendingRequests {
    next_id: AtomicI64,
    waiters: RwLock<HashMap<RequestId, oneshot::Sender<JsonRpcResponse>>>,
}

impl PendingRequests {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&self) -> RequestId {
        RequestId::Number(self.next_id.fetch_add(1, Ordering::SeqCst))
    }

    pub async fn register(&self, id: RequestId) -> oneshot::Receiver<JsonRpcResponse> {
        let (tx, rx) = oneshot::channel();
        self.waiters.write().await.insert(id, tx);
        rx
    }

    /// Resolves a pending waiter if `id` matches one; returns `true` if consumed.
    pub async fn resolve(&self, id: &RequestId, response: JsonRpcResponse) -> bool {
        if let Some(tx) = self.waiters.write().await.remove(id) {
            let _ = tx.send(response);
            true
        } else {
            false
        }
    }

    pub async fn remove(&self, id: &RequestId) {
        self.waiters.write().await.remove(id);
    }

    /// Fails every pending request, e.g. on transport disconnect.
    pub async fn fail_all(&self) {
        let mut guard = self.waiters.write().await;
        // Dropping the senders causes their receivers to observe a closed
        // channel; callers map that to `NotConnected`/`Disconnected`.
        guard.clear();
    }

    pub async fn is_empty(&self) -> bool {
        self.waiters.read().await.is_empty()
    }
}

pub type SharedPending = Arc<PendingRequests>;
