use crate::modules::error::{LoadError, ResolveError};
use thiserror::Error;

/// Errors raised by the evaluation context itself
#[derive(Error, Debug)]
pub enum SandboxError {
    #[error("Failed to build sandbox context: {message}")]
    Build { message: String },

    #[error("{name}: {message}")]
    ScriptRuntime {
        name: String,
        message: String,
        stack: Option<String>,
    },

    #[error("Script execution was interrupted")]
    Interrupted,

    #[error("Sandbox worker failed: {message}")]
    Worker { message: String },
}

/// Errors of host primitives; each becomes an exception thrown inside the script
#[derive(Error, Debug)]
pub enum HostError {
    #[error("Unknown host operation: {0}")]
    UnknownOperation(String),

    #[error("Invalid arguments for {operation}: {message}")]
    InvalidPayload { operation: String, message: String },

    #[error(transparent)]
    Load(#[from] LoadError),

    #[error("I/O error during {operation} on {path}: {error}")]
    Io {
        operation: String,
        path: String,
        error: String,
    },

    #[error("Failed to start command '{command}': {error}")]
    Spawn { command: String, error: String },

    #[error("Invalid glob pattern '{pattern}': {error}")]
    Glob { pattern: String, error: String },

    #[error("Prompt failed: {0}")]
    Prompt(String),

    #[error("Target configuration error: {0}")]
    Targets(String),
}

impl HostError {
    /// Constructor name of the error thrown inside the script
    pub fn js_name(&self) -> &'static str {
        match self {
            HostError::Load(LoadError::Resolve(ResolveError::ModuleResolution { .. })) => {
                "ModuleResolutionError"
            }
            HostError::Load(LoadError::Source(_)) => "SyntaxError",
            HostError::InvalidPayload { .. } => "TypeError",
            _ => "Error",
        }
    }

    pub fn io(operation: &str, path: &str, error: impl ToString) -> Self {
        HostError::Io {
            operation: operation.to_string(),
            path: path.to_string(),
            error: error.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_failures_keep_their_name() {
        let error = HostError::Load(LoadError::Resolve(ResolveError::ModuleResolution {
            specifier: "x".to_string(),
            attempted: vec!["esm.sh".to_string()],
        }));
        assert_eq!(error.js_name(), "ModuleResolutionError");
        assert_eq!(error.to_string(), "Cannot resolve module 'x' (tried: esm.sh)");
    }

    #[test]
    fn test_other_failures_are_plain_errors() {
        assert_eq!(HostError::Prompt("eof".to_string()).js_name(), "Error");
    }
}
