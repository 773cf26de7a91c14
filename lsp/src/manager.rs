//! `SessionManager`: public API consumed by the host.
//!
//! Owns the root → session registry and drives every lifecycle transition.
//! Start and stop outcomes are values; nothing a single server does can make
//! a host-level call fail.
//!
//! Registry and store locks are synchronous and never held across an
//! `.await`, so concurrent calls for one root observe a single reservation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::mpsc;

use crate::command::{self, Resolution, SkipReason};
use crate::diagnostics::DiagnosticsStore;
use crate::host::{Host, OutputSink, STATUS_TIMEOUT, SettingsSource};
use crate::launch::{Connection, LaunchRequest, Launcher, StartFailure};
use crate::protocol::{GROUPS_METHOD, TYPECHECK_GROUPS_METHOD};
use crate::registry::SessionRegistry;
use crate::session::{Session, SessionState};
use crate::types::{
    DiagnosticsSnapshot, ServerVersion, SessionEvent, SessionId, StopReason, WorkspaceRoot,
};
use crate::wait::wait_for;

/// Channel capacity for the event channel between server tasks and the manager.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default poll-wait for a stop that lands on a `Starting` session: 15s.
pub const DEFAULT_STOP_ATTEMPTS: u32 = 150;
pub const DEFAULT_STOP_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Started { version: Option<String> },
    AlreadyActive,
    Skipped(SkipReason),
    Failed(StartFailure),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    NotRunning,
    Stopped,
    /// The session never left `Starting` within the poll-wait; it was torn
    /// down anyway.
    StoppedAfterTimeout,
}

/// What a reconcile pass did, in the order it did it.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub stopped: Vec<(WorkspaceRoot, StopOutcome)>,
    pub started: Vec<(WorkspaceRoot, StartOutcome)>,
}

/// How Steep names a type-check unit: `target` or `target.group`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GroupKind {
    Target,
    Group,
}

impl GroupKind {
    #[must_use]
    pub fn of(name: &str) -> Self {
        if name.contains('.') {
            Self::Group
        } else {
            Self::Target
        }
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Target => "target",
            Self::Group => "group",
        }
    }
}

pub struct SessionManager {
    settings: Arc<dyn SettingsSource>,
    launcher: Arc<dyn Launcher>,
    host: Arc<dyn Host>,
    registry: Mutex<SessionRegistry>,
    diagnostics: Mutex<DiagnosticsStore>,
    event_rx: Mutex<mpsc::Receiver<SessionEvent>>,
    event_tx: mpsc::Sender<SessionEvent>,
    next_session: AtomicU64,
    stop_attempts: u32,
    stop_interval: Duration,
}

impl SessionManager {
    pub fn new(
        settings: Arc<dyn SettingsSource>,
        launcher: Arc<dyn Launcher>,
        host: Arc<dyn Host>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            settings,
            launcher,
            host,
            registry: Mutex::new(SessionRegistry::default()),
            diagnostics: Mutex::new(DiagnosticsStore::default()),
            event_rx: Mutex::new(event_rx),
            event_tx,
            next_session: AtomicU64::new(1),
            stop_attempts: DEFAULT_STOP_ATTEMPTS,
            stop_interval: DEFAULT_STOP_INTERVAL,
        }
    }

    /// Override how long a stop waits for a pending handshake.
    #[must_use]
    pub fn with_stop_wait(mut self, attempts: u32, interval: Duration) -> Self {
        self.stop_attempts = attempts;
        self.stop_interval = interval;
        self
    }

    fn registry(&self) -> MutexGuard<'_, SessionRegistry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn diagnostics(&self) -> MutexGuard<'_, DiagnosticsStore> {
        self.diagnostics
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // -- lifecycle ---------------------------------------------------------

    /// Bring up a server for `root` unless one is already registered.
    pub async fn start_session(&self, root: &WorkspaceRoot) -> StartOutcome {
        if self.registry().get(root).is_some() {
            return StartOutcome::AlreadyActive;
        }

        let settings = self.settings.settings(root);
        let invocation = match command::resolve(&settings, root, inherited_environment()) {
            Ok(Resolution::Launch(invocation)) => invocation,
            Ok(Resolution::Skip(reason)) => {
                tracing::info!(root = %root, ?reason, "Not starting steep");
                if reason == SkipReason::Disabled {
                    self.host
                        .show_status(&format!("Steep is disabled: {root}"), STATUS_TIMEOUT);
                }
                return StartOutcome::Skipped(reason);
            }
            Err(e) => {
                let failure = StartFailure::InvalidCommand(e.to_string());
                let output = self.host.open_output(root);
                self.report_start_failure(root, &failure, output.as_ref());
                // No session owns this sink.
                if let Err(e) = output.dispose() {
                    tracing::debug!(root = %root, "Failed to dispose output: {e:#}");
                }
                return StartOutcome::Failed(failure);
            }
        };

        let id = SessionId(self.next_session.fetch_add(1, Ordering::Relaxed));
        let session = Arc::new(Session::new(id, root.clone()));
        if !self.registry().reserve(root, &session) {
            return StartOutcome::AlreadyActive;
        }

        let output = self.host.open_output(root);
        session.attach_output(Arc::clone(&output));
        tracing::info!(root = %root, session = %id, "Starting steep: {}", invocation.command_line());

        let request = LaunchRequest {
            session: id,
            root: root.clone(),
            invocation,
            severity_threshold: settings.diagnostic_severity_threshold,
            events: self.event_tx.clone(),
            output: Arc::clone(&output),
            cancelled: session.cancellation(),
        };

        match self.launcher.launch(request).await {
            Ok(connection) => {
                let version = connection.server_version().map(String::from);
                if let Err(connection) = session.promote(connection) {
                    tracing::info!(root = %root, session = %id, "Stopped during handshake, disposing");
                    dispose_connection(root, connection.as_ref()).await;
                    return StartOutcome::Failed(StartFailure::Cancelled);
                }
                tracing::info!(root = %root, session = %id, version = ?version, "Steep started");
                self.host
                    .set_server_version(&ServerVersion::from_reported(version.as_deref()));
                StartOutcome::Started { version }
            }
            Err(StartFailure::Cancelled) => {
                tracing::info!(root = %root, session = %id, "Handshake cancelled by stop");
                self.registry().remove_if(root, id);
                session.abandon();
                StartOutcome::Failed(StartFailure::Cancelled)
            }
            Err(failure) => {
                self.registry().remove_if(root, id);
                session.abandon();
                self.report_start_failure(root, &failure, output.as_ref());
                StartOutcome::Failed(failure)
            }
        }
    }

    fn report_start_failure(
        &self,
        root: &WorkspaceRoot,
        failure: &StartFailure,
        output: &dyn OutputSink,
    ) {
        tracing::warn!(root = %root, "Failed to start steep: {failure}");
        output.append_line(&format!("Failed to start steep: {failure}"));
        self.host.show_status(
            &format!("Failed to start steep. See OUTPUT for trouble shooting: {root}"),
            STATUS_TIMEOUT,
        );
    }

    /// Tear down the session for `root`.
    ///
    /// The registry entry and the root's diagnostics are gone before this
    /// first suspends, so a concurrent `start_session` may begin a fresh
    /// session immediately. Nothing after that point touches the root's
    /// shared state.
    pub async fn stop_session(&self, root: &WorkspaceRoot) -> StopOutcome {
        let Some(session) = self.registry().remove(root) else {
            return StopOutcome::NotRunning;
        };
        self.diagnostics().clear_under(root.path());
        tracing::info!(root = %root, session = %session.id(), "Stopping steep");

        let settled = wait_for(
            || session.state() != SessionState::Starting,
            self.stop_attempts,
            self.stop_interval,
        )
        .await;
        if settled.is_none() {
            tracing::warn!(
                root = %root,
                session = %session.id(),
                "Steep still starting after {} attempts; stopping anyway",
                self.stop_attempts
            );
        }

        if let Some(teardown) = session.begin_stop() {
            if let Some(connection) = teardown.connection {
                dispose_connection(root, connection.as_ref()).await;
            }
            if let Some(output) = teardown.output
                && let Err(e) = output.dispose()
            {
                tracing::debug!(root = %root, "Failed to dispose output: {e:#}");
            }
            session.finish_stop();
        }

        self.reset_version_if_idle();

        if settled.is_some() {
            StopOutcome::Stopped
        } else {
            StopOutcome::StoppedAfterTimeout
        }
    }

    fn reset_version_if_idle(&self) {
        if !self.has_running_sessions() {
            self.host.set_server_version(&ServerVersion::default());
        }
    }

    // -- reconciler --------------------------------------------------------

    /// Make the registry match `desired`: stop what is no longer wanted,
    /// then start everything wanted.
    pub async fn reconcile(&self, desired: &[WorkspaceRoot]) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let unwanted: Vec<WorkspaceRoot> = self
            .registry()
            .roots()
            .into_iter()
            .filter(|root| !desired.contains(root))
            .collect();

        for root in unwanted {
            let outcome = self.stop_session(&root).await;
            report.stopped.push((root, outcome));
        }
        for root in desired {
            let outcome = self.start_session(root).await;
            report.started.push((root.clone(), outcome));
        }
        report
    }

    /// Host notification that workspace roots were added or removed.
    pub async fn on_roots_changed(
        &self,
        added: &[WorkspaceRoot],
        removed: &[WorkspaceRoot],
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        for root in added {
            let outcome = self.start_session(root).await;
            report.started.push((root.clone(), outcome));
        }
        for root in removed {
            let outcome = self.stop_session(root).await;
            report.stopped.push((root.clone(), outcome));
        }
        report
    }

    /// Stop then start each root in turn, picking up fresh settings.
    pub async fn restart_all(&self, known: &[WorkspaceRoot]) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        for root in known {
            let stopped = self.stop_session(root).await;
            if stopped != StopOutcome::NotRunning {
                report.stopped.push((root.clone(), stopped));
            }
            let started = self.start_session(root).await;
            report.started.push((root.clone(), started));
        }
        report
    }

    /// Host activation.
    pub async fn initialize(&self, roots: &[WorkspaceRoot]) -> ReconcileReport {
        tracing::info!(count = roots.len(), "Initializing steep supervisor");
        self.reconcile(roots).await
    }

    /// Host deactivation: stop every registered session.
    pub async fn shutdown(&self) {
        let roots = self.registry().roots();
        for root in roots {
            let outcome = self.stop_session(&root).await;
            tracing::debug!(root = %root, ?outcome, "Shut down session");
        }
    }

    // -- dispatch ----------------------------------------------------------

    fn running_connections(&self) -> Vec<(WorkspaceRoot, Arc<dyn Connection>)> {
        self.registry()
            .all()
            .into_iter()
            .filter_map(|(root, session)| session.connection().map(|c| (root, c)))
            .collect()
    }

    /// Notify every running session. Returns how many accepted the message.
    pub async fn dispatch_to_all(&self, method: &str, params: serde_json::Value) -> usize {
        let mut delivered = 0;
        for (root, connection) in self.running_connections() {
            match connection.send_notification(method, params.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => tracing::warn!(root = %root, "Failed to send {method}: {e:#}"),
            }
        }
        delivered
    }

    /// Request from every running session and merge the answers.
    ///
    /// Array results are flattened; equal values collapse to the first seen.
    pub async fn query_all(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Vec<serde_json::Value> {
        let mut merged = Vec::new();
        for (root, connection) in self.running_connections() {
            let result = match connection.send_request(method, params.clone()).await {
                Ok(result) => result,
                Err(e) => {
                    tracing::warn!(root = %root, "{method} failed: {e:#}");
                    continue;
                }
            };
            let values = match result {
                serde_json::Value::Array(items) => items,
                serde_json::Value::Null => Vec::new(),
                other => vec![other],
            };
            for value in values {
                if !merged.contains(&value) {
                    merged.push(value);
                }
            }
        }
        merged
    }

    /// Ask every running server to type check its whole project.
    pub async fn typecheck_all(&self) -> usize {
        self.dispatch_to_all(TYPECHECK_GROUPS_METHOD, serde_json::json!({ "groups": [] }))
            .await
    }

    /// Type check only the named targets or groups. Nothing is sent for an
    /// empty selection, which the server would read as "everything".
    pub async fn typecheck_groups(&self, groups: &[String]) -> usize {
        if groups.is_empty() {
            return 0;
        }
        self.dispatch_to_all(TYPECHECK_GROUPS_METHOD, serde_json::json!({ "groups": groups }))
            .await
    }

    /// Group names known to any running server, merged in first-seen order.
    pub async fn groups(&self) -> Vec<String> {
        self.query_all(GROUPS_METHOD, None)
            .await
            .into_iter()
            .filter_map(|value| match value {
                serde_json::Value::String(name) => Some(name),
                _ => None,
            })
            .collect()
    }

    // -- events ------------------------------------------------------------

    /// Drain pending events from server tasks, up to `budget`.
    ///
    /// Non-blocking. Events from sessions no longer registered under their
    /// root are dropped.
    pub fn poll_events(&self, budget: usize) -> usize {
        let mut rx = self.event_rx.lock().unwrap_or_else(PoisonError::into_inner);
        let mut count = 0;
        while count < budget {
            match rx.try_recv() {
                Ok(event) => {
                    self.handle_event(event);
                    count += 1;
                }
                Err(mpsc::error::TryRecvError::Empty | mpsc::error::TryRecvError::Disconnected) => {
                    break;
                }
            }
        }
        count
    }

    fn is_current(&self, root: &WorkspaceRoot, session: SessionId) -> bool {
        self.registry()
            .get(root)
            .is_some_and(|s| s.id() == session)
    }

    fn handle_event(&self, event: SessionEvent) {
        match event {
            SessionEvent::Diagnostics {
                session,
                root,
                path,
                items,
            } => {
                if !self.is_current(&root, session) {
                    tracing::trace!(root = %root, session = %session, "Dropping stale diagnostics");
                    return;
                }
                tracing::debug!(
                    path = %path.display(),
                    count = items.len(),
                    "Diagnostics updated"
                );
                self.diagnostics().update(path, items);
            }
            SessionEvent::ServerStopped {
                session,
                root,
                reason,
            } => {
                let Some(stopped) = self.registry().remove_if(&root, session) else {
                    tracing::debug!(root = %root, session = %session, "Stale stop event");
                    return;
                };
                match &reason {
                    StopReason::Exited => {
                        tracing::info!(root = %root, session = %session, "Steep exited");
                    }
                    StopReason::Failed(msg) => {
                        tracing::warn!(root = %root, session = %session, error = %msg, "Steep failed");
                    }
                }
                stopped.abandon();
                self.diagnostics().clear_under(root.path());
                self.reset_version_if_idle();
                self.host
                    .show_status(&format!("Steep stopped: {root}"), STATUS_TIMEOUT);
            }
        }
    }

    // -- queries -----------------------------------------------------------

    #[must_use]
    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics().snapshot()
    }

    #[must_use]
    pub fn session(&self, root: &WorkspaceRoot) -> Option<Arc<Session>> {
        self.registry().get(root)
    }

    /// Roots with a registered session, in any state.
    #[must_use]
    pub fn roots(&self) -> Vec<WorkspaceRoot> {
        self.registry().roots()
    }

    #[must_use]
    pub fn is_supervised(&self, root: &WorkspaceRoot) -> bool {
        self.registry().get(root).is_some()
    }

    #[must_use]
    pub fn has_running_sessions(&self) -> bool {
        self.registry()
            .all()
            .iter()
            .any(|(_, s)| s.state() == SessionState::Running)
    }

    #[must_use]
    pub fn session_count(&self) -> usize {
        self.registry().len()
    }

    /// Get a reference to the event sender (for testing).
    #[cfg(test)]
    pub(crate) fn event_tx(&self) -> &mpsc::Sender<SessionEvent> {
        &self.event_tx
    }
}

async fn dispose_connection(root: &WorkspaceRoot, connection: &dyn Connection) {
    if let Err(e) = connection.dispose().await {
        tracing::debug!(root = %root, "Failed to dispose connection: {e:#}");
    }
}

/// The supervisor's environment, minus entries that aren't valid UTF-8.
fn inherited_environment() -> Vec<(String, String)> {
    std::env::vars_os()
        .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?)))
        .collect()
}
