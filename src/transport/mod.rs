//! Duplex JSON-RPC transport abstraction: a generic [`Transport`] trait with
//! stdio (child-process) and WebSocket (auto-reconnecting) realizations.
//!
//! Grounded on the teacher's `mcp::client::McpClient` (pending-request
//! correlation, select-loop receive), `mcp::jsonrpc` (envelope types),
//! `ai-session::mcp::transport` (stdio/WebSocket split sink/stream), and
//! `ai-session::core::process::ProcessHandle` (child-process lifecycle).

pub mod jsonrpc;
pub mod pending;
pub mod stdio;
pub mod websocket;

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::broadcast;

pub use jsonrpc::{JsonRpcError, JsonRpcNotification, JsonRpcResponse, RequestId};

use crate::error::CoreError;

#[derive(Debug, Clone)]
pub struct CloseEvent {
    pub code: Option<u16>,
    pub reason: Option<String>,
}

/// Common duplex JSON-RPC transport contract. Notifications, transport-level
/// errors, and close events are delivered via broadcast channels rather than
/// registered callbacks — the idiomatic Rust shape for the same
/// "onMessage/onError/onClose" surface.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self) -> Result<(), CoreError>;
    async fn disconnect(&self) -> Result<(), CoreError>;

    /// Sends a request and awaits its correlated response, bounded by `timeout`.
    async fn send_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<JsonRpcResponse, CoreError>;

    async fn send_notification(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), CoreError>;

    fn is_connected(&self) -> bool;

    fn subscribe_messages(&self) -> broadcast::Receiver<JsonRpcNotification>;
    fn subscribe_errors(&self) -> broadcast::Receiver<String>;
    fn subscribe_close(&self) -> broadcast::Receiver<CloseEvent>;
}

/// Closed-form reconnect backoff per Design Note "Reconnect/backoff math":
/// `delay_n = min(base * 2^(n-1), cap)`. Never accumulates drift because it
/// is a pure function of the attempt number, not a running total.
pub fn reconnect_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let ms = (base.as_millis() as f64) * 2f64.powi(attempt as i32 - 1);
    Duration::from_millis(ms.min(cap.as_millis() as f64) as u64)
}
