//! Severity filtering and the per-file diagnostics store.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use crate::types::{Diagnostic, DiagnosticSeverity, DiagnosticsSnapshot};

/// Drop diagnostics at `threshold` severity or milder.
///
/// With no threshold everything passes. With `Warning`, only errors survive.
#[must_use]
pub fn filter_by_threshold(
    items: Vec<Diagnostic>,
    threshold: Option<DiagnosticSeverity>,
) -> Vec<Diagnostic> {
    match threshold {
        None => items,
        Some(threshold) => items
            .into_iter()
            .filter(|d| d.severity() < threshold)
            .collect(),
    }
}

fn has_errors(items: &[Diagnostic]) -> bool {
    items.iter().any(|d| d.severity().is_error())
}

#[derive(Default)]
pub(crate) struct DiagnosticsStore {
    data: HashMap<PathBuf, Vec<Diagnostic>>,
}

impl DiagnosticsStore {
    /// Replace the diagnostics of `path`. An empty list clears the file.
    pub fn update(&mut self, path: PathBuf, items: Vec<Diagnostic>) {
        if items.is_empty() {
            self.data.remove(&path);
        } else {
            self.data.insert(path, items);
        }
    }

    /// Forget every file under `root`, used when its session goes away.
    pub fn clear_under(&mut self, root: &Path) {
        self.data.retain(|path, _| !path.starts_with(root));
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        let mut files: Vec<_> = self
            .data
            .iter()
            .map(|(path, items)| (path.clone(), items.clone()))
            .collect();
        files.sort_by(|(a_path, a), (b_path, b)| {
            has_errors(b)
                .cmp(&has_errors(a))
                .then_with(|| a_path.cmp(b_path))
        });
        DiagnosticsSnapshot::new(files)
    }
}
