//! WebSocket transport with bounded-exponential-backoff auto-reconnect.
//!
//! Grounded on `ai-session::mcp::transport::HttpTransport` (split
//! sink/stream over `tokio-tungstenite`) with reconnect/backoff logic added
//! per Design Note "Reconnect/backoff math" (`delay_n = min(base*2^(n-1),
//! cap)`), which the teacher does not implement.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{broadcast, oneshot, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;

use crate::error::CoreError;
use crate::transport::jsonrpc::{JsonRpcBuilder, JsonRpcMessage, JsonRpcResponse};
use crate::transport::pending::PendingRequests;
use crate::transport::{reconnect_delay, CloseEvent, Transport};

type WsSink = futures_util::stream::SplitSink<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
    WsMessage,
>;
type WsStream = futures_util::stream::SplitStream<
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>,
>;

pub struct WebSocketTransportConfig {
    pub url: String,
    pub max_reconnect_attempts: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for WebSocketTransportConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            max_reconnect_attempts: 10,
            base_backoff: Duration::from_millis(500),
            max_backoff: Duration::from_secs(30),
        }
    }
}

pub struct WebSocketTransport {
    config: WebSocketTransportConfig,
    sink: Arc<Mutex<Option<WsSink>>>,
    pending: Arc<PendingRequests>,
    connected: Arc<AtomicBool>,
    reconnect_attempts: Arc<AtomicU32>,
    /// Set on an explicit `disconnect()` so the supervisor loop knows not to
    /// reconnect after a deliberate close.
    closing: Arc<AtomicBool>,
    message_tx: broadcast::Sender<crate::transport::JsonRpcNotification>,
    error_tx: broadcast::Sender<String>,
    close_tx: broadcast::Sender<CloseEvent>,
}

impl WebSocketTransport {
    pub fn new(config: WebSocketTransportConfig) -> Self {
        let (message_tx, _) = broadcast::channel(256);
        let (error_tx, _) = broadcast::channel(64);
        let (close_tx, _) = broadcast::channel(8);
        Self {
            config,
            sink: Arc::new(Mutex::new(None)),
            pending: Arc::new(PendingRequests::new()),
            connected: Arc::new(AtomicBool::new(false)),
            reconnect_attempts: Arc::new(AtomicU32::new(0)),
            closing: Arc::new(AtomicBool::new(false)),
            message_tx,
            error_tx,
            close_tx,
        }
    }

    /// Current count of consecutive reconnect attempts since the last
    /// successful dial (reset to 0 on every successful connection).
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::SeqCst)
    }
}

/// Reads frames until the connection closes, returning `true` for a clean
/// (code 1000) closure the supervisor should not reconnect after.
async fn read_until_closed(
    stream: &mut WsStream,
    pending: &Arc<PendingRequests>,
    message_tx: &broadcast::Sender<crate::transport::JsonRpcNotification>,
    error_tx: &broadcast::Sender<String>,
    close_tx: &broadcast::Sender<CloseEvent>,
) -> bool {
    loop {
        match stream.next().await {
            Some(Ok(WsMessage::Text(text))) => match JsonRpcMessage::from_str(&text) {
                Ok(JsonRpcMessage::Response(resp)) => {
                    pending.resolve(&resp.id, resp).await;
                }
                Ok(JsonRpcMessage::Notification(n)) => {
                    let _ = message_tx.send(n);
                }
                Ok(JsonRpcMessage::Request(_)) => {
                    let _ = error_tx.send("unsupported inbound request frame".into());
                }
                Err(e) => {
                    let _ = error_tx.send(format!("malformed frame: {e}"));
                }
            },
            Some(Ok(WsMessage::Ping(_))) | Some(Ok(WsMessage::Pong(_))) => {}
            Some(Ok(WsMessage::Close(frame))) => {
                let code = frame.as_ref().map(|f| u16::from(f.code));
                let normal_closure = code == Some(1000);
                let _ = close_tx.send(CloseEvent {
                    code,
                    reason: frame.map(|f| f.reason.to_string()),
                });
                return normal_closure;
            }
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                let _ = error_tx.send(format!("websocket error: {e}"));
                return false;
            }
            None => {
                let _ = close_tx.send(CloseEvent { code: None, reason: Some("stream ended".into()) });
                return false;
            }
        }
    }
}

/// Owns the connection's lifetime: dials, serves frames until closure, and
/// on an abnormal closure redials with bounded exponential backoff. Runs as
/// a single detached task for the whole lifetime of a `connect()` call, so
/// the transport itself (not a caller's retry policy) drives reconnection.
#[allow(clippy::too_many_arguments)]
async fn run_supervisor(
    url: String,
    base_backoff: Duration,
    max_backoff: Duration,
    max_reconnect_attempts: u32,
    sink: Arc<Mutex<Option<WsSink>>>,
    pending: Arc<PendingRequests>,
    connected: Arc<AtomicBool>,
    reconnect_attempts: Arc<AtomicU32>,
    closing: Arc<AtomicBool>,
    message_tx: broadcast::Sender<crate::transport::JsonRpcNotification>,
    error_tx: broadcast::Sender<String>,
    close_tx: broadcast::Sender<CloseEvent>,
    mut ready_tx: Option<oneshot::Sender<Result<(), CoreError>>>,
) {
    loop {
        if closing.load(Ordering::SeqCst) {
            return;
        }

        match tokio_tungstenite::connect_async(&url).await {
            Ok((stream, _response)) => {
                let (new_sink, mut stream) = stream.split();
                *sink.lock().await = Some(new_sink);
                connected.store(true, Ordering::SeqCst);
                reconnect_attempts.store(0, Ordering::SeqCst);
                if let Some(tx) = ready_tx.take() {
                    let _ = tx.send(Ok(()));
                }

                let normal_closure =
                    read_until_closed(&mut stream, &pending, &message_tx, &error_tx, &close_tx).await;
                connected.store(false, Ordering::SeqCst);
                pending.fail_all().await;

                if normal_closure || closing.load(Ordering::SeqCst) {
                    return;
                }
            }
            Err(e) => {
                let err = CoreError::protocol(format!("websocket connect failed: {e}"));
                if let Some(tx) = ready_tx.take() {
                    // The very first dial failed: report it synchronously to
                    // the caller of `connect()` rather than retrying silently.
                    let _ = tx.send(Err(err));
                    return;
                }
                let _ = error_tx.send(err.to_string());
            }
        }

        if closing.load(Ordering::SeqCst) {
            return;
        }
        let attempt = reconnect_attempts.fetch_add(1, Ordering::SeqCst) + 1;
        if attempt > max_reconnect_attempts {
            let _ = close_tx.send(CloseEvent {
                code: None,
                reason: Some("max reconnect attempts exceeded".into()),
            });
            return;
        }
        let delay = reconnect_delay(attempt, base_backoff, max_backoff);
        tokio::time::sleep(delay).await;
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self) -> Result<(), CoreError> {
        self.closing.store(false, Ordering::SeqCst);
        self.reconnect_attempts.store(0, Ordering::SeqCst);

        let (ready_tx, ready_rx) = oneshot::channel();
        tokio::spawn(run_supervisor(
            self.config.url.clone(),
            self.config.base_backoff,
            self.config.max_backoff,
            self.config.max_reconnect_attempts,
            self.sink.clone(),
            self.pending.clone(),
            self.connected.clone(),
            self.reconnect_attempts.clone(),
            self.closing.clone(),
            self.message_tx.clone(),
            self.error_tx.clone(),
            self.close_tx.clone(),
            Some(ready_tx),
        ));

        ready_rx
            .await
            .map_err(|_| CoreError::protocol("websocket connect task dropped before reporting"))?
    }

    async fn disconnect(&self) -> Result<(), CoreError> {
        self.closing.store(true, Ordering::SeqCst);
        self.connected.store(false, Ordering::SeqCst);
        if let Some(mut sink) = self.sink.lock().await.take() {
            let _ = sink
                .send(WsMessage::Close(Some(tokio_tungstenite::tungstenite::protocol::CloseFrame {
                    code: tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode::Normal,
                    reason: "client disconnect".into(),
                })))
                .await;
        }
        self.pending.fail_all().await;
        Ok(())
    }

    async fn send_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Duration,
    ) -> Result<JsonRpcResponse, CoreError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(CoreError::NotConnected);
        }
        let id = self.pending.next_id();
        let req = JsonRpcBuilder::request(id.clone(), method, params);
        let rx = self.pending.register(id.clone()).await;

        {
            let mut guard = self.sink.lock().await;
            let sink = guard.as_mut().ok_or(CoreError::NotConnected)?;
            sink.send(WsMessage::Text(req.to_line()?)).await.map_err(|e| {
                CoreError::protocol(format!("websocket send failed: {e}"))
            })?;
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(CoreError::NotConnected),
            Err(_) => {
                self.pending.remove(&id).await;
                Err(CoreError::timeout(timeout))
            }
        }
    }

    async fn send_notification(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<(), CoreError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(CoreError::NotConnected);
        }
        let notif = JsonRpcBuilder::notification(method, params);
        let mut guard = self.sink.lock().await;
        let sink = guard.as_mut().ok_or(CoreError::NotConnected)?;
        sink.send(WsMessage::Text(notif.to_line()?))
            .await
            .map_err(|e| CoreError::protocol(format!("websocket send failed: {e}")))?;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn subscribe_messages(&self) -> broadcast::Receiver<crate::transport::JsonRpcNotification> {
        self.message_tx.subscribe()
    }

    fn subscribe_errors(&self) -> broadcast::Receiver<String> {
        self.error_tx.subscribe()
    }

    fn subscribe_close(&self) -> broadcast::Receiver<CloseEvent> {
        self.close_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reconnect_attempts_never_exceed_configured_max() {
        let config = WebSocketTransportConfig {
            max_reconnect_attempts: 5,
            base_backoff: Duration::from_millis(10),
            max_backoff: Duration::from_secs(1),
            ..Default::default()
        };
        let mut delays = Vec::new();
        for attempt in 1..=config.max_reconnect_attempts {
            delays.push(reconnect_delay(attempt, config.base_backoff, config.max_backoff));
        }
        assert_eq!(delays.len(), 5);
        for pair in delays.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
    }

    #[tokio::test]
    async fn connect_to_unreachable_host_reports_failure_without_hanging() {
        let transport = WebSocketTransport::new(WebSocketTransportConfig {
            url: "ws://127.0.0.1:1".into(),
            max_reconnect_attempts: 1,
            base_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(5),
            ..Default::default()
        });
        let result = tokio::time::timeout(Duration::from_secs(5), transport.connect()).await;
        assert!(result.is_ok(), "connect() must report failure rather than hang");
        assert!(result.unwrap().is_err());
        assert!(!transport.is_connected());
    }
}
