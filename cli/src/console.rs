//! Terminal-backed host: notices on stderr, server output on stdout.

use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use steep_lsp::{Host, OutputSink, ServerVersion, WorkspaceRoot};

#[derive(Debug, Default)]
pub struct ConsoleHost {
    version: Mutex<ServerVersion>,
}

impl ConsoleHost {
    pub fn server_version(&self) -> ServerVersion {
        self.version
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Host for ConsoleHost {
    fn show_status(&self, message: &str, _timeout: Duration) {
        eprintln!("{message}");
    }

    fn set_server_version(&self, version: &ServerVersion) {
        tracing::debug!(
            version = ?version.version(),
            major = version.major(),
            minor = version.minor(),
            "Server version flags updated"
        );
        *self.version.lock().unwrap_or_else(PoisonError::into_inner) = version.clone();
    }

    fn open_output(&self, root: &WorkspaceRoot) -> Arc<dyn OutputSink> {
        Arc::new(ConsoleOutput {
            prefix: format!("[{}]", root.name()),
        })
    }
}

/// Per-root output channel, each line tagged with the root's folder name.
pub struct ConsoleOutput {
    prefix: String,
}

impl OutputSink for ConsoleOutput {
    fn append_line(&self, line: &str) {
        println!("{} {line}", self.prefix);
    }

    fn dispose(&self) -> anyhow::Result<()> {
        std::io::stdout().flush()?;
        Ok(())
    }
}
