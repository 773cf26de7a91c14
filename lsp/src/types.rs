//! Public types shared between the supervisor and its host.
//!
//! The host hands in [`WorkspaceRoot`]s and a [`Settings`] source, and reads
//! back [`DiagnosticsSnapshot`]s and [`ServerVersion`]s. Server tasks report
//! to the manager through [`SessionEvent`]s.

use std::fmt;
use std::num::NonZeroU32;
use std::path::{Component, Path, PathBuf};

/// Marker file looked up in each root when no `steepfile` is configured.
pub const DEFAULT_MARKER_FILE: &str = "Steepfile";

/// Log level handed to the server when no `loglevel` is configured.
pub const DEFAULT_LOG_LEVEL: &str = "warn";

/// Identity of one workspace root.
///
/// Stored lexically normalized so `/a/./b` and `/a/c/../b` name the same
/// session slot.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct WorkspaceRoot(PathBuf);

impl WorkspaceRoot {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self(normalize_path(path.as_ref()))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.0
    }

    /// Path of `relative` inside this root.
    #[must_use]
    pub fn join(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.0.join(relative)
    }

    /// Last path component, used as the workspace folder name.
    #[must_use]
    pub fn name(&self) -> String {
        self.0
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.0.display().to_string())
    }
}

impl fmt::Display for WorkspaceRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

impl From<PathBuf> for WorkspaceRoot {
    fn from(path: PathBuf) -> Self {
        Self::new(path)
    }
}

impl From<&Path> for WorkspaceRoot {
    fn from(path: &Path) -> Self {
        Self::new(path)
    }
}

pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut out = Vec::new();
    for c in path.components() {
        match c {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other),
        }
    }
    out.iter().collect()
}

/// Configuration snapshot read each time a session starts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    /// Marker file whose presence enables the root (`steepfile`).
    pub marker_file_name: String,
    /// Exported as `BUNDLE_GEMFILE` when set (`gemfile`).
    pub dependency_manifest_path: Option<String>,
    /// Passed as `--log-level` (`loglevel`).
    pub log_level: String,
    /// Passed as `--jobs` when set (`jobs`).
    pub job_count: Option<NonZeroU32>,
    pub enabled: bool,
    /// Shell-style command line replacing the detected launcher (`command`).
    pub command_override: String,
    /// Exports `RUBY_YJIT_ENABLE=true` (`enableYJIT`).
    pub experimental_runtime_flag: bool,
    /// Diagnostics at this severity or milder are hidden (`hideDiagnostics`).
    pub diagnostic_severity_threshold: Option<DiagnosticSeverity>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            marker_file_name: DEFAULT_MARKER_FILE.to_string(),
            dependency_manifest_path: None,
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            job_count: None,
            enabled: true,
            command_override: String::new(),
            experimental_runtime_flag: true,
            diagnostic_severity_threshold: None,
        }
    }
}

/// Severity level for a diagnostic. Ordered most severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum DiagnosticSeverity {
    Error = 1,
    Warning = 2,
    Information = 3,
    Hint = 4,
}

impl DiagnosticSeverity {
    /// Convert from LSP numeric severity (1=Error, 2=Warning, 3=Info, 4=Hint).
    ///
    /// Returns `None` for values outside the LSP-defined range.
    #[must_use]
    pub fn from_lsp(value: u64) -> Option<Self> {
        match value {
            1 => Some(Self::Error),
            2 => Some(Self::Warning),
            3 => Some(Self::Information),
            4 => Some(Self::Hint),
            _ => None,
        }
    }

    /// Parse a configured severity name. Only the exact names `Error`,
    /// `Warning`, `Information` and `Hint` are accepted.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "Error" => Some(Self::Error),
            "Warning" => Some(Self::Warning),
            "Information" => Some(Self::Information),
            "Hint" => Some(Self::Hint),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_error(self) -> bool {
        self == Self::Error
    }

    #[must_use]
    pub fn label(self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warning => "warning",
            Self::Information => "info",
            Self::Hint => "hint",
        }
    }
}

/// A single diagnostic published by a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    severity: DiagnosticSeverity,
    message: String,
    /// 0-indexed.
    line: u32,
    /// 0-indexed.
    col: u32,
    source: String,
}

impl Diagnostic {
    #[must_use]
    pub fn new(
        severity: DiagnosticSeverity,
        message: String,
        line: u32,
        col: u32,
        source: String,
    ) -> Self {
        Self {
            severity,
            message,
            line,
            col,
            source,
        }
    }

    #[must_use]
    pub fn severity(&self) -> DiagnosticSeverity {
        self.severity
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Format as `path:line:col: severity: [source] message`, 1-indexed.
    #[must_use]
    pub fn display_with_path(&self, path: &Path) -> String {
        format!(
            "{}:{}:{}: {}: [{}] {}",
            path.display(),
            self.line + 1,
            self.col + 1,
            self.severity.label(),
            self.source,
            self.message,
        )
    }
}

/// Process-unique generation number of a session.
///
/// A root can be stopped and started again while events from the old
/// server are still queued; the id tells them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why a server's output stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    Exited,
    Failed(String),
}

/// Event sent from a session's reader task to the manager.
#[derive(Debug)]
pub enum SessionEvent {
    /// Filtered diagnostics for one file.
    Diagnostics {
        session: SessionId,
        root: WorkspaceRoot,
        path: PathBuf,
        items: Vec<Diagnostic>,
    },
    /// The server closed its stdout or produced an unreadable frame.
    ServerStopped {
        session: SessionId,
        root: WorkspaceRoot,
        reason: StopReason,
    },
}

/// Version reported by a connected server, exposed to the host as context
/// flags. `Default` is the "no server connected" value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerVersion {
    version: Option<String>,
    major: u32,
    minor: u32,
}

impl ServerVersion {
    /// Build from the `serverInfo.version` string, if the server sent one.
    #[must_use]
    pub fn from_reported(version: Option<&str>) -> Self {
        let Some(version) = version else {
            return Self::default();
        };
        let mut parts = version.split('.').map(leading_number);
        let major = parts.next().flatten().unwrap_or(0);
        let minor = parts.next().flatten().unwrap_or(0);
        Self {
            version: Some(version.to_string()),
            major,
            minor,
        }
    }

    #[must_use]
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    #[must_use]
    pub fn major(&self) -> u32 {
        self.major
    }

    #[must_use]
    pub fn minor(&self) -> u32 {
        self.minor
    }
}

/// Digits at the start of a version component (`"3rc1"` → 3).
fn leading_number(part: &str) -> Option<u32> {
    let end = part
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(part.len());
    part[..end].parse().ok()
}

/// Stored diagnostics across all roots, error files first.
#[derive(Debug, Clone, Default)]
pub struct DiagnosticsSnapshot {
    files: Vec<(PathBuf, Vec<Diagnostic>)>,
}

impl DiagnosticsSnapshot {
    pub(crate) fn new(files: Vec<(PathBuf, Vec<Diagnostic>)>) -> Self {
        Self { files }
    }

    #[must_use]
    pub fn files(&self) -> &[(PathBuf, Vec<Diagnostic>)] {
        &self.files
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub(crate) fn count(&self, severity: DiagnosticSeverity) -> usize {
        self.files
            .iter()
            .flat_map(|(_, items)| items)
            .filter(|d| d.severity() == severity)
            .count()
    }

    /// `E:<errors> W:<warnings>`, or empty when no file has diagnostics.
    #[must_use]
    pub fn status_string(&self) -> String {
        if self.is_empty() {
            return String::new();
        }
        format!(
            "E:{} W:{}",
            self.count(DiagnosticSeverity::Error),
            self.count(DiagnosticSeverity::Warning)
        )
    }
}
