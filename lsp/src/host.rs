//! Interfaces to the editor-side collaborators.
//!
//! The supervisor never talks to a UI directly. It reads settings through a
//! [`SettingsSource`], surfaces short-lived notices and version flags through
//! a [`Host`], and writes troubleshooting output to one [`OutputSink`] per
//! root.

use std::sync::Arc;
use std::time::Duration;

use crate::types::{ServerVersion, Settings, WorkspaceRoot};

/// How long start-failure and disabled notices stay visible.
pub const STATUS_TIMEOUT: Duration = Duration::from_secs(3);

/// Provides a fresh settings snapshot each time a session starts.
pub trait SettingsSource: Send + Sync {
    fn settings(&self, root: &WorkspaceRoot) -> Settings;
}

/// Fixed settings, independent of the root.
impl SettingsSource for Settings {
    fn settings(&self, _root: &WorkspaceRoot) -> Settings {
        self.clone()
    }
}

/// Per-root log channel.
pub trait OutputSink: Send + Sync {
    fn append_line(&self, line: &str);

    /// Release the channel. Failures are logged by the caller and discarded.
    fn dispose(&self) -> anyhow::Result<()>;
}

pub trait Host: Send + Sync {
    /// Show a transient status message.
    fn show_status(&self, message: &str, timeout: Duration);

    /// Publish the connected server's version for host-side feature gating.
    /// Called with `ServerVersion::default()` when no server is connected.
    fn set_server_version(&self, version: &ServerVersion);

    /// Open the output sink for a session about to start.
    fn open_output(&self, root: &WorkspaceRoot) -> Arc<dyn OutputSink>;
}
