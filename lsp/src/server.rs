//! Running server: owns the child process and its JSON-RPC plumbing.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, bail};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::{Mutex, mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::codec::{MessageReader, MessageWriter};
use crate::command::Invocation;
use crate::diagnostics::filter_by_threshold;
use crate::host::OutputSink;
use crate::launch::{Connection, LaunchRequest, RpcFut, StartFailure};
use crate::protocol::{
    self, InitializeResult, MessageParams, Notification, PublishDiagnosticsParams, Request,
};
use crate::types::{
    DiagnosticSeverity, SessionEvent, SessionId, StopReason, WorkspaceRoot, normalize_path,
};

/// Applies to requests sent after the handshake. The handshake itself waits
/// as long as the server takes.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

const WRITER_CHANNEL_CAPACITY: usize = 64;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<serde_json::Value>>>>;

enum WriterCommand {
    Send(serde_json::Value),
    Shutdown,
}

enum IncomingFrame {
    Response {
        id: u64,
        body: serde_json::Value,
    },
    ServerRequest {
        id: serde_json::Value,
        method: String,
    },
    Notification {
        method: String,
        params: Option<serde_json::Value>,
    },
}

fn parse_incoming(frame: &serde_json::Value) -> Option<IncomingFrame> {
    let id = frame.get("id");
    let method = frame
        .get("method")
        .and_then(|m| m.as_str())
        .map(String::from);
    let has_result_or_error = frame.get("result").is_some() || frame.get("error").is_some();

    match (id, method, has_result_or_error) {
        (Some(id_val), None, true) => Some(IncomingFrame::Response {
            id: id_val.as_u64()?,
            body: frame.clone(),
        }),
        (Some(id_val), Some(method), _) => Some(IncomingFrame::ServerRequest {
            id: id_val.clone(),
            method,
        }),
        (None, Some(method), _) => Some(IncomingFrame::Notification {
            method,
            params: frame.get("params").cloned(),
        }),
        _ => None,
    }
}

/// Routes frames read from the server's stdout.
#[derive(Clone)]
struct FrameRouter {
    session: SessionId,
    root: WorkspaceRoot,
    threshold: Option<DiagnosticSeverity>,
    pending: PendingMap,
    events: mpsc::Sender<SessionEvent>,
    writer_tx: mpsc::Sender<WriterCommand>,
    output: Arc<dyn OutputSink>,
}

impl FrameRouter {
    async fn route(&self, frame: &serde_json::Value) {
        let Some(incoming) = parse_incoming(frame) else {
            tracing::trace!(root = %self.root, "Ignoring malformed JSON-RPC frame");
            return;
        };

        match incoming {
            IncomingFrame::Response { id, body } => {
                let sender = self.pending.lock().await.remove(&id);
                if let Some(tx) = sender {
                    let _ = tx.send(body);
                }
            }
            IncomingFrame::ServerRequest { id, method } => {
                // Steep asks for workspace/configuration and registerCapability;
                // an unanswered request can stall it.
                tracing::debug!(root = %self.root, "Server request {method}, replying method not found");
                let reply = protocol::method_not_found(&id, &method);
                let _ = self.writer_tx.send(WriterCommand::Send(reply)).await;
            }
            IncomingFrame::Notification { method, params } => {
                self.handle_notification(&method, params).await;
            }
        }
    }

    async fn handle_notification(&self, method: &str, params: Option<serde_json::Value>) {
        let Some(params) = params else { return };
        match method {
            "textDocument/publishDiagnostics" => self.publish_diagnostics(params).await,
            "window/logMessage" | "window/showMessage" => {
                match serde_json::from_value::<MessageParams>(params) {
                    Ok(msg) => self
                        .output
                        .append_line(&format!("[{}] {}", msg.label(), msg.message)),
                    Err(e) => tracing::debug!(root = %self.root, "Bad {method} payload: {e}"),
                }
            }
            _ => tracing::trace!(root = %self.root, "Ignoring notification {method}"),
        }
    }

    async fn publish_diagnostics(&self, params: serde_json::Value) {
        let params = match serde_json::from_value::<PublishDiagnosticsParams>(params) {
            Ok(params) => params,
            Err(e) => {
                tracing::debug!(root = %self.root, "Failed to parse publishDiagnostics: {e}");
                return;
            }
        };
        let Some(path) = protocol::file_uri_to_path(&params.uri) else {
            return;
        };
        if !normalize_path(&path).starts_with(self.root.path()) {
            tracing::warn!(
                root = %self.root,
                "Server reported diagnostics outside its root: {}",
                path.display()
            );
            return;
        }

        let items = params
            .diagnostics
            .iter()
            .map(protocol::LspDiagnostic::to_diagnostic)
            .collect();
        let items = filter_by_threshold(items, self.threshold);
        let _ = self
            .events
            .send(SessionEvent::Diagnostics {
                session: self.session,
                root: self.root.clone(),
                path,
                items,
            })
            .await;
    }
}

/// Resolves once the session is stopped. A dropped sender never fires.
async fn stopped(mut cancelled: watch::Receiver<bool>) {
    let fired = cancelled.wait_for(|stopped| *stopped).await.map(|_| ());
    if fired.is_err() {
        std::future::pending::<()>().await;
    }
}

fn spawn(invocation: &Invocation) -> Result<Child> {
    let search_path = invocation.environment.get("PATH");
    let program = which::which_in(
        &invocation.program,
        search_path,
        &invocation.working_directory,
    )
    .with_context(|| format!("{} not found in PATH", invocation.program))?;

    let mut cmd = Command::new(&program);
    cmd.args(&invocation.args)
        .current_dir(&invocation.working_directory)
        .env_clear()
        .envs(&invocation.environment)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    cmd.spawn()
        .with_context(|| format!("spawning {}", program.display()))
}

pub(crate) struct RunningServer {
    root: WorkspaceRoot,
    child: Mutex<Child>,
    writer_tx: mpsc::Sender<WriterCommand>,
    next_id: AtomicU64,
    pending: PendingMap,
    server_version: Option<String>,
    tasks: Vec<JoinHandle<()>>,
}

impl RunningServer {
    /// Spawn the invocation and complete the `initialize` handshake.
    ///
    /// If the session is stopped first, the child is killed and the start
    /// fails with [`StartFailure::Cancelled`].
    pub async fn start(request: LaunchRequest) -> Result<Self, StartFailure> {
        let LaunchRequest {
            session,
            root,
            invocation,
            severity_threshold,
            events,
            output,
            cancelled,
        } = request;

        if *cancelled.borrow() {
            return Err(StartFailure::Cancelled);
        }

        output.append_line(&format!("$ {}", invocation.command_line()));
        let spawn_failure = |reason: String| StartFailure::Spawn {
            program: invocation.program.clone(),
            reason,
        };
        let mut child = spawn(&invocation).map_err(|e| spawn_failure(format!("{e:#}")))?;
        let (Some(stdin), Some(stdout), Some(stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(spawn_failure("stdio was not captured".to_string()));
        };

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        let (writer_tx, mut writer_rx) = mpsc::channel::<WriterCommand>(WRITER_CHANNEL_CAPACITY);
        let writer_root = root.clone();
        let writer_handle = tokio::spawn(async move {
            let mut writer = MessageWriter::new(stdin);
            while let Some(cmd) = writer_rx.recv().await {
                match cmd {
                    WriterCommand::Send(frame) => {
                        if let Err(e) = writer.send(&frame).await {
                            tracing::warn!(root = %writer_root, "Write to server failed: {e:#}");
                            break;
                        }
                    }
                    WriterCommand::Shutdown => break,
                }
            }
        });

        let stderr_output = output.clone();
        let stderr_handle = tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                stderr_output.append_line(&line);
            }
        });

        let router = FrameRouter {
            session,
            root: root.clone(),
            threshold: severity_threshold,
            pending: pending.clone(),
            events,
            writer_tx: writer_tx.clone(),
            output: output.clone(),
        };
        let reader_handle = tokio::spawn(async move {
            let mut reader = MessageReader::new(stdout);
            let reason = loop {
                match reader.next_message().await {
                    Ok(Some(frame)) => router.route(&frame).await,
                    Ok(None) => break StopReason::Exited,
                    Err(e) => break StopReason::Failed(format!("{e:#}")),
                }
            };
            // Wake anyone still waiting for a reply; the server is gone.
            router.pending.lock().await.clear();
            tracing::info!(root = %router.root, session = %router.session, ?reason, "Server output closed");
            let _ = router
                .events
                .send(SessionEvent::ServerStopped {
                    session: router.session,
                    root: router.root.clone(),
                    reason,
                })
                .await;
        });

        let mut server = Self {
            root,
            child: Mutex::new(child),
            writer_tx,
            next_id: AtomicU64::new(1),
            pending,
            server_version: None,
            tasks: vec![writer_handle, stderr_handle, reader_handle],
        };

        let handshake = tokio::select! {
            result = server.initialize() => Some(result),
            () = stopped(cancelled) => None,
        };
        match handshake {
            Some(Ok(version)) => {
                server.server_version = version;
                Ok(server)
            }
            Some(Err(e)) => {
                let failure = StartFailure::Handshake(format!("{e:#}"));
                output.append_line(&failure.to_string());
                Err(failure)
            }
            None => {
                tracing::info!(root = %server.root, session = %session, "Stopped during handshake, killing server");
                output.append_line("Stopped before the handshake completed");
                server.kill().await;
                Err(StartFailure::Cancelled)
            }
        }
    }

    async fn kill(&self) {
        let mut child = self.child.lock().await;
        if let Err(e) = child.kill().await {
            tracing::debug!(root = %self.root, "Failed to kill server: {e}");
        }
    }

    async fn initialize(&self) -> Result<Option<String>> {
        let params =
            protocol::initialize_params(&self.root).context("building initialize params")?;
        let result = self.request("initialize", Some(params), None).await?;
        let result: InitializeResult = serde_json::from_value(result).unwrap_or_else(|e| {
            tracing::debug!(root = %self.root, "Unexpected initialize result shape: {e}");
            InitializeResult::default()
        });

        self.notify("initialized", Some(serde_json::json!({})))
            .await?;

        Ok(result.server_info.and_then(|info| info.version))
    }

    async fn request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
        timeout: Option<Duration>,
    ) -> Result<serde_json::Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let frame = serde_json::to_value(Request::new(id, method, params))
            .context("serializing request")?;

        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);
        if self
            .writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .is_err()
        {
            self.pending.lock().await.remove(&id);
            bail!("writer channel closed");
        }

        let reply = match timeout {
            Some(limit) => {
                if let Ok(reply) = tokio::time::timeout(limit, rx).await {
                    reply
                } else {
                    self.pending.lock().await.remove(&id);
                    bail!("`{method}` timed out after {limit:?}");
                }
            }
            None => rx.await,
        };
        let Ok(body) = reply else {
            bail!("server exited before answering `{method}`");
        };

        if let Some(error) = body.get("error") {
            bail!(
                "`{method}` failed: {}",
                error["message"].as_str().unwrap_or("unknown error")
            );
        }
        Ok(body
            .get("result")
            .cloned()
            .unwrap_or(serde_json::Value::Null))
    }

    async fn notify(&self, method: &str, params: Option<serde_json::Value>) -> Result<()> {
        let frame = serde_json::to_value(Notification::new(method, params))
            .context("serializing notification")?;
        self.writer_tx
            .send(WriterCommand::Send(frame))
            .await
            .map_err(|_| anyhow::anyhow!("writer channel closed"))?;
        Ok(())
    }

    /// `shutdown`/`exit`, then give the process a moment before killing it.
    async fn shutdown(&self) -> Result<()> {
        match self.request("shutdown", None, Some(SHUTDOWN_TIMEOUT)).await {
            Ok(_) => {
                let _ = self.notify("exit", None).await;
            }
            Err(e) => tracing::debug!(root = %self.root, "shutdown request failed: {e:#}"),
        }
        let _ = self.writer_tx.send(WriterCommand::Shutdown).await;

        let mut child = self.child.lock().await;
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, child.wait())
            .await
            .is_err()
        {
            tracing::debug!(root = %self.root, "Server didn't exit in time, killing");
            child.kill().await.context("killing server process")?;
        }
        Ok(())
    }
}

impl Connection for RunningServer {
    fn server_version(&self) -> Option<&str> {
        self.server_version.as_deref()
    }

    fn send_notification<'a>(
        &'a self,
        method: &'a str,
        params: serde_json::Value,
    ) -> RpcFut<'a, ()> {
        Box::pin(self.notify(method, Some(params)))
    }

    fn send_request<'a>(
        &'a self,
        method: &'a str,
        params: Option<serde_json::Value>,
    ) -> RpcFut<'a, serde_json::Value> {
        Box::pin(self.request(method, params, Some(REQUEST_TIMEOUT)))
    }

    fn dispose(&self) -> RpcFut<'_, ()> {
        Box::pin(self.shutdown())
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}
