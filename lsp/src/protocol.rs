//! JSON-RPC message shapes exchanged with the server.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::types::{Diagnostic, DiagnosticSeverity, WorkspaceRoot};

/// Request enumerating the project's targets and groups.
pub const GROUPS_METHOD: &str = "$/steep/groups";

/// Notification asking the server to type check groups (empty = all).
pub const TYPECHECK_GROUPS_METHOD: &str = "$/steep/typecheck/groups";

/// JSON-RPC "method not found".
pub(crate) const METHOD_NOT_FOUND: i64 = -32601;

#[derive(Debug, thiserror::Error)]
#[error("cannot convert path to file URI: {}", path.display())]
pub struct PathToUriError {
    path: PathBuf,
}

#[derive(Debug, Serialize)]
pub(crate) struct Request<'a> {
    pub jsonrpc: &'static str,
    pub id: u64,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl<'a> Request<'a> {
    pub fn new(id: u64, method: &'a str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method,
            params,
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct Notification<'a> {
    pub jsonrpc: &'static str,
    pub method: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
}

impl<'a> Notification<'a> {
    pub fn new(method: &'a str, params: Option<serde_json::Value>) -> Self {
        Self {
            jsonrpc: "2.0",
            method,
            params,
        }
    }
}

pub(crate) fn method_not_found(id: &serde_json::Value, method: &str) -> serde_json::Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": {
            "code": METHOD_NOT_FOUND,
            "message": format!("Method not found: {method}")
        }
    })
}

pub(crate) fn initialize_params(root: &WorkspaceRoot) -> Result<serde_json::Value, PathToUriError> {
    let root_uri = path_to_file_uri(root.path())?;
    Ok(serde_json::json!({
        "processId": std::process::id(),
        "clientInfo": { "name": env!("CARGO_PKG_NAME"), "version": env!("CARGO_PKG_VERSION") },
        "rootUri": root_uri.as_str(),
        "capabilities": {
            "textDocument": {
                "publishDiagnostics": { "relatedInformation": false }
            },
            "window": { "workDoneProgress": false }
        },
        "workspaceFolders": [{
            "uri": root_uri.as_str(),
            "name": root.name()
        }]
    }))
}

/// The parts of the `initialize` result the supervisor reads.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct InitializeResult {
    #[serde(default)]
    pub server_info: Option<ServerInfo>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ServerInfo {
    #[allow(dead_code)]
    pub name: String,
    #[serde(default)]
    pub version: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PublishDiagnosticsParams {
    pub uri: String,
    pub diagnostics: Vec<LspDiagnostic>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LspDiagnostic {
    pub range: LspRange,
    pub severity: Option<u64>,
    pub code: Option<serde_json::Value>,
    pub source: Option<String>,
    pub message: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LspRange {
    pub start: LspPosition,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LspPosition {
    pub line: u32,
    pub character: u32,
}

impl LspDiagnostic {
    /// Missing or out-of-range severities are treated as warnings.
    /// Steep puts its diagnostic id in `code`, so prefer it as the source.
    pub fn to_diagnostic(&self) -> Diagnostic {
        let source = match &self.code {
            Some(serde_json::Value::String(code)) => code.clone(),
            _ => self.source.clone().unwrap_or_else(|| String::from("steep")),
        };
        Diagnostic::new(
            self.severity
                .and_then(DiagnosticSeverity::from_lsp)
                .unwrap_or(DiagnosticSeverity::Warning),
            self.message.clone(),
            self.range.start.line,
            self.range.start.character,
            source,
        )
    }
}

/// `window/logMessage` and `window/showMessage` payload.
#[derive(Debug, Deserialize)]
pub(crate) struct MessageParams {
    #[serde(rename = "type")]
    pub kind: u8,
    pub message: String,
}

impl MessageParams {
    pub fn label(&self) -> &'static str {
        match self.kind {
            1 => "Error",
            2 => "Warn",
            3 => "Info",
            _ => "Log",
        }
    }
}

pub(crate) fn path_to_file_uri(path: &Path) -> Result<url::Url, PathToUriError> {
    url::Url::from_file_path(path).map_err(|()| PathToUriError {
        path: path.to_path_buf(),
    })
}

pub(crate) fn file_uri_to_path(uri: &str) -> Option<PathBuf> {
    url::Url::parse(uri)
        .ok()
        .and_then(|u| u.to_file_path().ok())
}
