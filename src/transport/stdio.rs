//! Child-process stdio transport: stdin/stdout carry newline-delimited
//! JSON-RPC frames, stderr is treated as diagnostic logging.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{broadcast, Mutex};

use crate::error::CoreError;
use crate::transport::jsonrpc::{JsonRpcBuilder, JsonRpcMessage, JsonRpcResponse};
use crate::transport::pending::PendingRequests;
use crate::transport::{CloseEvent, Transport};

pub struct StdioTransportConfig {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<std::path::PathBuf>,
    pub connect_timeout: Duration,
}

pub struct StdioTransport {
    config: StdioTransportConfig,
    child: Mutex<Option<Child>>,
    stdin: Mutex<Option<ChildStdin>>,
    pending: Arc<PendingRequests>,
    connected: AtomicBool,
    message_tx: broadcast::Sender<crate::transport::JsonRpcNotification>,
    error_tx: broadcast::Sender<String>,
    close_tx: broadcast::Sender<CloseEvent>,
}

impl StdioTransport {
    pub fn new(config: StdioTransportConfig) -> Self {
        let (message_tx, _) = broadcast::channel(256);
        let (error_tx, _) = broadcast::channel(64);
        let (close_tx, _) = broadcast::channel(8);
        Self {
            config,
            child: Mutex::new(None),
            stdin: Mutex::new(None),
            pending: Arc::new(PendingRequests::new()),
            connected: AtomicBool::new(false),
            message_tx,
            error_tx,
            close_tx,
        }
    }

    async fn spawn(&self) -> Result<(), CoreError> {
        let mut cmd = Command::new(&self.config.command);
        cmd.args(&self.config.args)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped());
        if let Some(cwd) = &self.config.cwd {
            cmd.current_dir(cwd);
        }
        for (k, v) in &self.config.env {
            cmd.env(k, v);
        }

        let mut child = cmd.spawn().map_err(CoreError::Io)?;
        let stdout = child.stdout.take().ok_or_else(|| CoreError::internal("no stdout"))?;
        let stderr = child.stderr.take().ok_or_else(|| CoreError::internal("no stderr"))?;
        let stdin = child.stdin.take().ok_or_else(|| CoreError::internal("no stdin"))?;

        *self.stdin.lock().await = Some(stdin);
        *self.child.lock().await = Some(child);
        self.connected.store(true, Ordering::SeqCst);

        let pending = self.pending.clone();
        let message_tx = self.message_tx.clone();
        let error_tx = self.error_tx.clone();
        let close_tx = self.close_tx.clone();

        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match JsonRpcMessage::from_str(line) {
                            Ok(JsonRpcMessage::Response(resp)) => {
                                pending.resolve(&resp.id, resp).await;
                            }
                            Ok(JsonRpcMessage::Notification(n)) => {
                                let _ = message_tx.send(n);
                            }
                            Ok(JsonRpcMessage::Request(_)) => {
                                let _ = error_tx
                                    .send("received unsupported inbound request frame".into());
                            }
                            Err(e) => {
                                let _ = error_tx.send(format!("malformed frame: {e}"));
                            }
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = error_tx.send(format!("stdout read error: {e}"));
                        break;
                    }
                }
            }
            pending.fail_all().await;
            let _ = close_tx.send(CloseEvent { code: None, reason: Some("child exited".into()) });
        });

        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                tracing::debug!(target: "swarmcore::transport::stdio::stderr", "{line}");
            }
        });

        Ok(())
    }
}

/// Sends SIGTERM first on unix and gives the child a moment to exit
/// cleanly, only escalating to a hard kill if it's still alive.
#[cfg(unix)]
async fn terminate_gracefully(child: &mut Child) {
    use nix::sys::signal::{self, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        let _ = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM);
        if tokio::time::timeout(Duration::from_millis(500), child.wait()).await.is_ok() {
            return;
        }
    }
    let _ = child.kill().await;
}

#[cfg(not(unix))]
async fn terminate_gracefully(child: &mut Child) {
    let _ = child.kill().await;
}

#[async_trait]
impl Transport for StdioTransport {
    async fn connect(&self) -> Result<(), CoreError> {
        tokio::time::timeout(self.config.connect_timeout, self.spawn())
            .await
            .map_err(|_| CoreError::timeout(self.config.connect_timeout))??;
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), CoreError> {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(mut child) = self.child.lock().await.take() {
            terminate_gracefully(&mut child).await;
        }
        self.stdin.lock().await.take();
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
        let line = req.to_line()? + "\n";

        let rx = self.pending.register(id.clone()).await;

        {
            let mut guard = self.stdin.lock().await;
            let stdin = guard.as_mut().ok_or(CoreError::NotConnected)?;
            stdin.write_all(line.as_bytes()).await.map_err(CoreError::Io)?;
            stdin.flush().await.map_err(CoreError::Io)?;
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
        let line = notif.to_line()? + "\n";
        let mut guard = self.stdin.lock().await;
        let stdin = guard.as_mut().ok_or(CoreError::NotConnected)?;
        stdin.write_all(line.as_bytes()).await.map_err(CoreError::Io)?;
        stdin.flush().await.map_err(CoreError::Io)?;
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

    #[tokio::test]
    async fn request_while_disconnected_fails_fast() {
        let transport = StdioTransport::new(StdioTransportConfig {
            command: "cat".into(),
            args: vec![],
            env: HashMap::new(),
            cwd: None,
            connect_timeout: Duration::from_secs(5),
        });
        let result = transport
            .send_request("ping", None, Duration::from_millis(100))
            .await;
        assert!(matches!(result, Err(CoreError::NotConnected)));
    }

    #[tokio::test]
    async fn connect_and_exchange_with_cat_echo() {
        let transport = StdioTransport::new(StdioTransportConfig {
            command: "cat".into(),
            args: vec![],
            env: HashMap::new(),
            cwd: None,
            connect_timeout: Duration::from_secs(5),
        });
        transport.connect().await.unwrap();
        assert!(transport.is_connected());
        // `cat` echoes our request frame back verbatim, which parses as a
        // request (not a response) and is reported on the error channel
        // rather than resolving our pending waiter — exercised here only to
        // confirm connect/send plumbing doesn't panic on an unexpected echo.
        let mut errors = transport.subscribe_errors();
        let _ = transport
            .send_notification("ping", None)
            .await;
        let _ = tokio::time::timeout(Duration::from_millis(200), errors.recv()).await;
        transport.disconnect().await.unwrap();
    }
}
