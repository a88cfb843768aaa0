use crate::source::error::SourceError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// Source language of a script
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScriptKind {
    Js,
    Ts,
    Tsx,
    Md,
}

impl ScriptKind {
    pub fn from_path(path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .unwrap_or_default();

        match extension.as_str() {
            "ts" | "mts" | "cts" => ScriptKind::Ts,
            "tsx" | "jsx" => ScriptKind::Tsx,
            "md" | "markdown" => ScriptKind::Md,
            _ => ScriptKind::Js,
        }
    }
}

/// Where a script's text came from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptOrigin {
    File(PathBuf),
    Eval,
    Repl,
}

impl fmt::Display for ScriptOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptOrigin::File(path) => write!(f, "{}", path.display()),
            ScriptOrigin::Eval => f.write_str("<eval>"),
            ScriptOrigin::Repl => f.write_str("<repl>"),
        }
    }
}

/// A script loaded for a single invocation.
///
/// Immutable once created; watch mode builds a fresh one for every change event.
#[derive(Debug, Clone)]
pub struct ScriptSource {
    origin: ScriptOrigin,
    raw_text: String,
    kind: ScriptKind,
    args: Vec<String>,
}

impl ScriptSource {
    /// Read a script file from disk
    pub async fn load(path: &Path, args: Vec<String>) -> Result<Self, SourceError> {
        let metadata = tokio::fs::metadata(path).await.ok();
        if !metadata.map(|m| m.is_file()).unwrap_or(false) {
            return Err(SourceError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let raw_text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| SourceError::Io {
                operation: "read script".to_string(),
                path: path.display().to_string(),
                error: e.to_string(),
            })?;

        let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());

        Ok(Self {
            kind: ScriptKind::from_path(path),
            origin: ScriptOrigin::File(absolute),
            raw_text,
            args,
        })
    }

    pub fn eval(code: impl Into<String>, kind: ScriptKind, args: Vec<String>) -> Self {
        Self {
            origin: ScriptOrigin::Eval,
            raw_text: code.into(),
            kind,
            args,
        }
    }

    pub fn repl(code: impl Into<String>, kind: ScriptKind) -> Self {
        Self {
            origin: ScriptOrigin::Repl,
            raw_text: code.into(),
            kind,
            args: Vec::new(),
        }
    }

    pub fn origin(&self) -> &ScriptOrigin {
        &self.origin
    }

    pub fn raw_text(&self) -> &str {
        &self.raw_text
    }

    pub fn kind(&self) -> ScriptKind {
        self.kind
    }

    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn display_name(&self) -> String {
        self.origin.to_string()
    }

    /// Directory that relative imports and `require` calls resolve against
    pub fn directory(&self) -> PathBuf {
        match &self.origin {
            ScriptOrigin::File(path) => path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(|| PathBuf::from(".")),
            ScriptOrigin::Eval | ScriptOrigin::Repl => {
                std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
            }
        }
    }

    /// Path of the script file, or a pseudo-path inside the working directory
    pub fn filename(&self) -> PathBuf {
        match &self.origin {
            ScriptOrigin::File(path) => path.clone(),
            other => self.directory().join(other.to_string()),
        }
    }
}
