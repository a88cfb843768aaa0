use thiserror::Error;

/// Errors raised while loading and preparing script source text
#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Script not found: {path}")]
    FileNotFound { path: String },

    #[error("I/O error during {operation} on {path}: {error}")]
    Io {
        operation: String,
        path: String,
        error: String,
    },

    #[error(transparent)]
    Transpile(#[from] TranspileError),

    #[error("Invalid source pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Syntax or transform failure reported by a transpiler
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Failed to transpile {file}: {message}")]
pub struct TranspileError {
    pub file: String,
    pub message: String,
}

impl TranspileError {
    pub fn new(file: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            message: message.into(),
        }
    }
}
