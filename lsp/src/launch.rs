//! Seams between the lifecycle controller and a live server.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use crate::command::Invocation;
use crate::host::OutputSink;
use crate::server::RunningServer;
use crate::types::{DiagnosticSeverity, SessionEvent, SessionId, WorkspaceRoot};

/// Future returned by [`Connection`] methods.
pub type RpcFut<'a, T> = Pin<Box<dyn Future<Output = anyhow::Result<T>> + Send + 'a>>;

/// Future returned by [`Launcher::launch`].
pub type LaunchFut<'a> =
    Pin<Box<dyn Future<Output = Result<Arc<dyn Connection>, StartFailure>> + Send + 'a>>;

/// Why a session could not be brought to `Running`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StartFailure {
    #[error("invalid command override: {0}")]
    InvalidCommand(String),
    #[error("failed to spawn `{program}`: {reason}")]
    Spawn { program: String, reason: String },
    #[error("initialize handshake failed: {0}")]
    Handshake(String),
    #[error("session was stopped before the handshake completed")]
    Cancelled,
}

/// A server that completed its handshake.
///
/// Holding one is proof of a successful `initialize`.
pub trait Connection: Send + Sync {
    /// `serverInfo.version` from the handshake, if the server sent one.
    fn server_version(&self) -> Option<&str>;

    /// Fire-and-forget notification.
    fn send_notification<'a>(&'a self, method: &'a str, params: serde_json::Value)
    -> RpcFut<'a, ()>;

    /// Request awaiting its `result`. A JSON-RPC error reply is an `Err`.
    fn send_request<'a>(
        &'a self,
        method: &'a str,
        params: Option<serde_json::Value>,
    ) -> RpcFut<'a, serde_json::Value>;

    /// Shut the server down and release the process.
    fn dispose(&self) -> RpcFut<'_, ()>;
}

/// Everything a launcher needs to bring up one session.
pub struct LaunchRequest {
    pub session: SessionId,
    pub root: WorkspaceRoot,
    pub invocation: Invocation,
    pub severity_threshold: Option<DiagnosticSeverity>,
    pub events: mpsc::Sender<SessionEvent>,
    pub output: Arc<dyn OutputSink>,
    /// Flips to `true` when the session is stopped before the handshake
    /// completes. The launcher must then release the process and return
    /// [`StartFailure::Cancelled`].
    pub cancelled: watch::Receiver<bool>,
}

/// Spawns a server and completes its handshake.
///
/// No timeout is applied: a server that never answers `initialize` keeps
/// its root in `Starting` until it is stopped, which fires
/// [`LaunchRequest::cancelled`].
pub trait Launcher: Send + Sync {
    fn launch(&self, request: LaunchRequest) -> LaunchFut<'_>;
}

/// Launches real child processes speaking JSON-RPC over stdio.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLauncher;

impl Launcher for ProcessLauncher {
    fn launch(&self, request: LaunchRequest) -> LaunchFut<'_> {
        Box::pin(async move {
            let server = RunningServer::start(request).await?;
            Ok(Arc::new(server) as Arc<dyn Connection>)
        })
    }
}
