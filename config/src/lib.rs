//! Settings files for the supervisor.
//!
//! `~/.steep/config.toml` holds the user's defaults; `<root>/.steep/config.toml`
//! overrides them field by field for one root. Both are re-read every time a
//! session starts.

use std::num::NonZeroU32;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use steep_lsp::{DiagnosticSeverity, Settings, SettingsSource, WorkspaceRoot};

const CONFIG_DIR: &str = ".steep";
const CONFIG_FILE: &str = "config.toml";

/// Raw contents of one config file. Absent keys fall through to the next
/// layer.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
pub struct SteepConfig {
    pub steepfile: Option<String>,
    pub gemfile: Option<String>,
    pub loglevel: Option<String>,
    pub jobs: Option<NonZeroU32>,
    pub enabled: Option<bool>,
    pub command: Option<String>,
    #[serde(rename = "enableYJIT")]
    pub enable_yjit: Option<bool>,
    /// `Error`, `Warning`, `Information` or `Hint`.
    #[serde(rename = "hideDiagnostics")]
    pub hide_diagnostics: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
}

impl ConfigError {
    pub fn path(&self) -> &PathBuf {
        match self {
            ConfigError::Read { path, .. } | ConfigError::Parse { path, .. } => path,
        }
    }
}

impl SteepConfig {
    /// Load one file. A missing file is `Ok(None)`.
    pub fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        if !path.exists() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;

        toml::from_str(&content)
            .map(Some)
            .map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })
    }

    /// `other` wins wherever it sets a key.
    #[must_use]
    pub fn overlay(self, other: Self) -> Self {
        Self {
            steepfile: other.steepfile.or(self.steepfile),
            gemfile: other.gemfile.or(self.gemfile),
            loglevel: other.loglevel.or(self.loglevel),
            jobs: other.jobs.or(self.jobs),
            enabled: other.enabled.or(self.enabled),
            command: other.command.or(self.command),
            enable_yjit: other.enable_yjit.or(self.enable_yjit),
            hide_diagnostics: other.hide_diagnostics.or(self.hide_diagnostics),
        }
    }

    #[must_use]
    pub fn to_settings(&self) -> Settings {
        let defaults = Settings::default();
        Settings {
            marker_file_name: self.steepfile.clone().unwrap_or(defaults.marker_file_name),
            dependency_manifest_path: self.gemfile.clone().filter(|g| !g.trim().is_empty()),
            log_level: self.loglevel.clone().unwrap_or(defaults.log_level),
            job_count: self.jobs,
            enabled: self.enabled.unwrap_or(defaults.enabled),
            command_override: self.command.clone().unwrap_or_default(),
            experimental_runtime_flag: self
                .enable_yjit
                .unwrap_or(defaults.experimental_runtime_flag),
            diagnostic_severity_threshold: self
                .hide_diagnostics
                .as_deref()
                .and_then(parse_threshold),
        }
    }
}

fn parse_threshold(name: &str) -> Option<DiagnosticSeverity> {
    if name.trim().is_empty() {
        return None;
    }
    let severity = DiagnosticSeverity::from_name(name);
    if severity.is_none() {
        tracing::warn!("Ignoring unknown hideDiagnostics value {name:?}");
    }
    severity
}

#[must_use]
pub fn global_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(CONFIG_DIR).join(CONFIG_FILE))
}

#[must_use]
pub fn root_config_path(root: &WorkspaceRoot) -> PathBuf {
    root.join(CONFIG_DIR).join(CONFIG_FILE)
}

/// Settings source backed by the global and per-root config files.
#[derive(Debug, Clone)]
pub struct FileSettingsSource {
    global: Option<PathBuf>,
}

impl Default for FileSettingsSource {
    fn default() -> Self {
        Self::new()
    }
}

impl FileSettingsSource {
    #[must_use]
    pub fn new() -> Self {
        Self {
            global: global_config_path(),
        }
    }

    /// Use `global` instead of `~/.steep/config.toml`; `None` skips the
    /// global layer.
    #[must_use]
    pub fn with_global_path(global: Option<PathBuf>) -> Self {
        Self { global }
    }

    /// A broken file is logged and treated as empty.
    fn layer(path: &Path) -> SteepConfig {
        match SteepConfig::load_from(path) {
            Ok(config) => config.unwrap_or_default(),
            Err(err) => {
                tracing::warn!(path = %err.path().display(), "{err}; using defaults");
                SteepConfig::default()
            }
        }
    }
}

impl SettingsSource for FileSettingsSource {
    fn settings(&self, root: &WorkspaceRoot) -> Settings {
        let global = self
            .global
            .as_deref()
            .map(Self::layer)
            .unwrap_or_default();
        let local = Self::layer(&root_config_path(root));
        global.overlay(local).to_settings()
    }
}
