//! Supervisor for Steep language-server sessions, one per workspace root.

pub mod codec;
pub mod command;
pub mod host;
pub mod launch;
pub mod session;
pub mod types;
pub mod wait;

pub(crate) mod diagnostics;
pub(crate) mod protocol;
pub(crate) mod registry;
pub(crate) mod server;

mod manager;

pub use command::{Invocation, Resolution, SkipReason, TokenizeError, resolve, tokenize};
pub use diagnostics::filter_by_threshold;
pub use host::{Host, OutputSink, STATUS_TIMEOUT, SettingsSource};
pub use launch::{Connection, LaunchFut, LaunchRequest, Launcher, ProcessLauncher, RpcFut, StartFailure};
pub use manager::{
    DEFAULT_STOP_ATTEMPTS, DEFAULT_STOP_INTERVAL, GroupKind, ReconcileReport, SessionManager,
    StartOutcome, StopOutcome,
};
pub use protocol::{GROUPS_METHOD, PathToUriError, TYPECHECK_GROUPS_METHOD};
pub use session::{Session, SessionState};
pub use types::{
    DEFAULT_LOG_LEVEL, DEFAULT_MARKER_FILE, Diagnostic, DiagnosticSeverity, DiagnosticsSnapshot,
    ServerVersion, SessionEvent, SessionId, Settings, StopReason, WorkspaceRoot,
};
pub use wait::wait_for;
