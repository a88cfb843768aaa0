use crate::modules::error::{CacheError, LoadError, ResolveError};
use crate::sandbox::error::{HostError, SandboxError};
use crate::source::error::SourceError;
use thiserror::Error;

/// How the supervisor was asked to run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    Single,
    Eval,
    Watch,
    Repl,
}

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Transpile error in {file}: {message}")]
    Transpile { file: String, message: String },

    #[error("Cannot resolve module '{specifier}' (tried: {})", attempted.join(", "))]
    ModuleResolution {
        specifier: String,
        attempted: Vec<String>,
    },

    #[error("{name}: {message}")]
    ScriptRuntime {
        name: String,
        message: String,
        stack: Option<String>,
    },

    #[error("Interrupted")]
    Interrupted,

    #[error("Cache I/O error: {0}")]
    CacheIo(#[from] CacheError),

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl ScriptError {
    pub fn internal(message: impl Into<String>) -> Self {
        ScriptError::Internal {
            message: message.into(),
        }
    }

    /// Whether the error ends the process in `mode`
    pub fn is_fatal(&self, mode: RunMode) -> bool {
        match self {
            ScriptError::CacheIo(_) => false,
            ScriptError::Interrupted | ScriptError::Internal { .. } => true,
            _ => matches!(mode, RunMode::Single | RunMode::Eval),
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            ScriptError::FileNotFound { .. } => 2,
            ScriptError::Interrupted => 130,
            ScriptError::CacheIo(_) => 0,
            _ => 1,
        }
    }

    /// Human-readable report; debug mode appends the underlying error
    pub fn render(&self, debug: bool) -> String {
        let mut text = match self.stack() {
            Some(stack) if stack.contains(&self.to_string()) => format!("❌ {stack}"),
            Some(stack) => format!("❌ {self}\n{stack}"),
            None => format!("❌ {self}"),
        };
        if debug {
            text.push_str(&format!("\n🔍 {self:?}"));
        }
        text
    }

    /// Stack trace reported by the script, if any
    pub fn stack(&self) -> Option<&str> {
        match self {
            ScriptError::ScriptRuntime { stack, .. } => stack.as_deref(),
            _ => None,
        }
    }
}

impl From<SourceError> for ScriptError {
    fn from(error: SourceError) -> Self {
        match error {
            SourceError::FileNotFound { path } => ScriptError::FileNotFound { path },
            SourceError::Transpile(e) => ScriptError::Transpile {
                file: e.file,
                message: e.message,
            },
            other => ScriptError::internal(other.to_string()),
        }
    }
}

impl From<ResolveError> for ScriptError {
    fn from(error: ResolveError) -> Self {
        match error {
            ResolveError::ModuleResolution {
                specifier,
                attempted,
            } => ScriptError::ModuleResolution {
                specifier,
                attempted,
            },
            other => ScriptError::internal(other.to_string()),
        }
    }
}

impl From<LoadError> for ScriptError {
    fn from(error: LoadError) -> Self {
        match error {
            LoadError::Resolve(e) => e.into(),
            LoadError::Source(e) => e.into(),
            other => ScriptError::internal(other.to_string()),
        }
    }
}

impl From<HostError> for ScriptError {
    fn from(error: HostError) -> Self {
        match error {
            HostError::Load(e) => e.into(),
            other => ScriptError::internal(other.to_string()),
        }
    }
}

impl From<SandboxError> for ScriptError {
    fn from(error: SandboxError) -> Self {
        match error {
            SandboxError::ScriptRuntime {
                name,
                message,
                stack,
            } => ScriptError::ScriptRuntime {
                name,
                message,
                stack,
            },
            SandboxError::Interrupted => ScriptError::Interrupted,
            other => ScriptError::internal(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_errors_are_recoverable_in_watch_and_repl() {
        let error = ScriptError::ScriptRuntime {
            name: "Error".to_string(),
            message: "boom".to_string(),
            stack: None,
        };
        assert!(error.is_fatal(RunMode::Single));
        assert!(error.is_fatal(RunMode::Eval));
        assert!(!error.is_fatal(RunMode::Watch));
        assert!(!error.is_fatal(RunMode::Repl));
        assert_eq!(error.exit_code(), 1);
        assert_eq!(error.to_string(), "Error: boom");
    }

    #[test]
    fn test_source_errors_map_to_taxonomy() {
        let error: ScriptError = SourceError::FileNotFound {
            path: "missing.ts".to_string(),
        }
        .into();
        assert!(matches!(error, ScriptError::FileNotFound { .. }));
        assert_eq!(error.exit_code(), 2);
    }

    #[test]
    fn test_render_includes_stack_once() {
        let error = ScriptError::ScriptRuntime {
            name: "Error".to_string(),
            message: "boom".to_string(),
            stack: Some("Error: boom\n    at main.js:1:7".to_string()),
        };
        let rendered = error.render(false);
        assert_eq!(rendered.matches("Error: boom").count(), 1);
        assert!(rendered.contains("main.js:1:7"));
        assert!(!rendered.contains("🔍"));
        assert!(error.render(true).contains("🔍"));
    }

    #[test]
    fn test_cache_errors_never_fatal() {
        let error = ScriptError::CacheIo(CacheError::Corruption {
            reason: "bad".to_string(),
        });
        assert!(!error.is_fatal(RunMode::Single));
    }
}
