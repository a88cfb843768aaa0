//! Isolated evaluation context for scripts

pub mod boa;
pub mod error;
pub mod exec;
pub mod globals;
pub mod host;
pub mod output;
pub mod prompt;
pub mod targets;

pub use boa::{BoaBackend, BoaContext};
pub use error::{HostError, SandboxError};
pub use exec::{CommandExecutor, CommandOutput, CommandRequest, CommandSpec, LocalCommandExecutor};
pub use globals::{SandboxGlobals, ScriptEnvironment, GLOBAL_BINDINGS, SCRIPT_MODE_BINDINGS};
pub use host::{HostBindings, HostOp};
pub use output::{CapturedOutput, ConsoleOutput, ScriptOutput, Stream};
pub use prompt::{Prompter, ScriptedPrompter, TerminalPrompter};
pub use targets::{Target, TargetProvider, YamlTargetProvider};

/// Result of running code to completion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionOutcome {
    /// Display form of the completion value
    pub value: Option<String>,
    /// Set when the script called `process.exit`
    pub exit_code: Option<i32>,
}

impl ExecutionOutcome {
    pub fn completed(value: Option<String>) -> Self {
        Self {
            value,
            exit_code: None,
        }
    }

    pub fn exited(code: i32) -> Self {
        Self {
            value: None,
            exit_code: Some(code),
        }
    }
}

/// An engine capable of hosting scripts.
///
/// Contexts are not required to be `Send`; callers build and use them on a
/// single blocking thread.
pub trait SandboxBackend: Send + Sync + 'static {
    type Context;

    /// Create a fresh context exposing exactly `globals`
    fn build(&self, globals: SandboxGlobals) -> Result<Self::Context, SandboxError>;

    /// Evaluate `code` and drive it until it settles and no timers remain
    fn execute(
        &self,
        context: &mut Self::Context,
        code: &str,
        origin: &str,
    ) -> Result<ExecutionOutcome, SandboxError>;

    /// Evaluate one interactive input; returns once its value settles
    fn evaluate(
        &self,
        context: &mut Self::Context,
        code: &str,
    ) -> Result<ExecutionOutcome, SandboxError>;

    /// Ask a running `execute` or `evaluate` to stop at the next opportunity
    fn interrupt(&self);

    /// Forget an earlier interrupt; called before new work is handed over
    fn reset_interrupt(&self);
}
