//! Turns a settings snapshot into the server invocation for one root.

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::types::{Settings, WorkspaceRoot};

/// Project-local launcher checked when no command override is set.
pub const BINSTUB_PATH: &str = "bin/steep";

/// Dependency-manager wrapper used when there is no binstub.
pub const FALLBACK_PROGRAM: &str = "bundle";

const FALLBACK_ARGS: [&str; 2] = ["exec", "steep"];

const SUBCOMMAND: &str = "langserver";

pub const INTERPRETER_OPTIONS_VAR: &str = "RUBYOPT";
pub const MANIFEST_VAR: &str = "BUNDLE_GEMFILE";
pub const RUNTIME_FLAG_VAR: &str = "RUBY_YJIT_ENABLE";

/// Appended to `RUBYOPT` so the server reads sources as UTF-8.
const ENCODING_FLAG: &str = "-EUTF-8";

/// A fully resolved process launch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub program: String,
    pub args: Vec<String>,
    pub working_directory: PathBuf,
    pub environment: BTreeMap<String, String>,
}

impl Invocation {
    /// Shell-quoted command line, for the output log.
    #[must_use]
    pub fn command_line(&self) -> String {
        shell_words::join(std::iter::once(&self.program).chain(&self.args))
    }
}

/// Why a root is not started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// `<root>/<steepfile>` does not exist.
    MarkerMissing,
    /// `enabled = false`.
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Launch(Invocation),
    Skip(SkipReason),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TokenizeError {
    #[error("missing closing quote in `{0}`")]
    UnterminatedQuote(String),
    #[error("command `{0}` contains no program")]
    Empty(String),
}

/// Split a shell-style command line into words, honoring quotes and
/// backslash escapes. No expansion is performed.
pub fn tokenize(command: &str) -> Result<Vec<String>, TokenizeError> {
    let words = shell_words::split(command)
        .map_err(|_| TokenizeError::UnterminatedQuote(command.to_string()))?;
    if words.is_empty() {
        return Err(TokenizeError::Empty(command.to_string()));
    }
    Ok(words)
}

/// Resolve how to launch the server for `root`.
///
/// `inherited_env` is the environment the server would otherwise inherit;
/// the overlays are applied on top of it. Only the marker file and the
/// binstub are checked on disk.
pub fn resolve(
    settings: &Settings,
    root: &WorkspaceRoot,
    inherited_env: impl IntoIterator<Item = (String, String)>,
) -> Result<Resolution, TokenizeError> {
    if !root.join(&settings.marker_file_name).exists() {
        return Ok(Resolution::Skip(SkipReason::MarkerMissing));
    }
    if !settings.enabled {
        return Ok(Resolution::Skip(SkipReason::Disabled));
    }

    let (program, mut args) = if settings.command_override.trim().is_empty() {
        let binstub = root.join(BINSTUB_PATH);
        if binstub.is_file() {
            (binstub.to_string_lossy().into_owned(), Vec::new())
        } else {
            (
                FALLBACK_PROGRAM.to_string(),
                FALLBACK_ARGS.iter().map(ToString::to_string).collect(),
            )
        }
    } else {
        let mut words = tokenize(&settings.command_override)?;
        let program = words.remove(0);
        (program, words)
    };
    args.extend(trailing_args(settings));

    Ok(Resolution::Launch(Invocation {
        program,
        args,
        working_directory: root.path().to_path_buf(),
        environment: environment(settings, inherited_env),
    }))
}

fn trailing_args(settings: &Settings) -> Vec<String> {
    let mut args = vec![
        SUBCOMMAND.to_string(),
        format!("--log-level={}", settings.log_level),
        format!("--steepfile={}", settings.marker_file_name),
    ];
    if let Some(jobs) = settings.job_count {
        args.push(format!("--jobs={jobs}"));
    }
    args
}

fn environment(
    settings: &Settings,
    inherited_env: impl IntoIterator<Item = (String, String)>,
) -> BTreeMap<String, String> {
    let mut env: BTreeMap<String, String> = inherited_env.into_iter().collect();

    let existing = env.remove(INTERPRETER_OPTIONS_VAR).unwrap_or_default();
    env.insert(
        INTERPRETER_OPTIONS_VAR.to_string(),
        format!("{existing} {ENCODING_FLAG}"),
    );
    if let Some(manifest) = &settings.dependency_manifest_path {
        env.insert(MANIFEST_VAR.to_string(), manifest.clone());
    }
    if settings.experimental_runtime_flag {
        env.insert(RUNTIME_FLAG_VAR.to_string(), "true".to_string());
    }
    env
}
