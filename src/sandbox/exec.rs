//! Command execution backend used by the `$` and `exec` bindings

use crate::sandbox::error::HostError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CommandSpec {
    /// Interpreted by `sh -c`
    Shell(String),
    /// Program followed by its arguments, executed directly
    Argv(Vec<String>),
}

impl CommandSpec {
    pub fn display(&self) -> String {
        match self {
            CommandSpec::Shell(command) => command.clone(),
            CommandSpec::Argv(argv) => shell_words::join(argv),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandRequest {
    pub command: CommandSpec,
    #[serde(default)]
    pub cwd: Option<PathBuf>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub input: Option<String>,
}

impl CommandRequest {
    pub fn shell(command: impl Into<String>) -> Self {
        Self {
            command: CommandSpec::Shell(command.into()),
            cwd: None,
            env: HashMap::new(),
            input: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

/// Runs commands on behalf of a script. Remote backends implement this too.
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute(&self, request: CommandRequest) -> Result<CommandOutput, HostError>;
}

/// Executes commands as local child processes
#[derive(Debug, Default)]
pub struct LocalCommandExecutor;

impl LocalCommandExecutor {
    fn build_command(request: &CommandRequest) -> Result<Command, HostError> {
        let mut cmd = match &request.command {
            CommandSpec::Shell(command) => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(command);
                cmd
            }
            CommandSpec::Argv(argv) => {
                let (program, args) = argv.split_first().ok_or_else(|| HostError::InvalidPayload {
                    operation: "exec".to_string(),
                    message: "Empty command".to_string(),
                })?;
                let mut cmd = Command::new(program);
                cmd.args(args);
                cmd
            }
        };

        if let Some(dir) = &request.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &request.env {
            cmd.env(key, value);
        }

        cmd.stdin(if request.input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());

        Ok(cmd)
    }
}

#[async_trait]
impl CommandExecutor for LocalCommandExecutor {
    async fn execute(&self, request: CommandRequest) -> Result<CommandOutput, HostError> {
        let shown = request.command.display();
        debug!("Executing command: {}", shown);

        let spawn_error = |e: std::io::Error| HostError::Spawn {
            command: shown.clone(),
            error: e.to_string(),
        };

        let mut child = Self::build_command(&request)?
            .spawn()
            .map_err(spawn_error)?;

        if let (Some(input), Some(mut stdin)) = (&request.input, child.stdin.take()) {
            stdin
                .write_all(input.as_bytes())
                .await
                .map_err(spawn_error)?;
        }

        let output = child.wait_with_output().await.map_err(spawn_error)?;

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
        })
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_shell_command_output() {
        let output = LocalCommandExecutor
            .execute(CommandRequest::shell("echo hello && echo oops >&2 && exit 3"))
            .await
            .unwrap();
        assert_eq!(output.stdout, "hello\n");
        assert_eq!(output.stderr, "oops\n");
        assert_eq!(output.exit_code, 3);
    }

    #[tokio::test]
    async fn test_argv_with_input_and_env() {
        let mut request = CommandRequest {
            command: CommandSpec::Argv(vec!["sh".into(), "-c".into(), "cat; echo $GREETING".into()]),
            cwd: None,
            env: HashMap::new(),
            input: Some("piped ".to_string()),
        };
        request.env.insert("GREETING".to_string(), "hi".to_string());

        let output = LocalCommandExecutor.execute(request).await.unwrap();
        assert_eq!(output.stdout, "piped hi\n");
        assert_eq!(output.exit_code, 0);
    }

    #[tokio::test]
    async fn test_missing_program_is_spawn_error() {
        let request = CommandRequest {
            command: CommandSpec::Argv(vec!["definitely-not-a-program-xyz".into()]),
            cwd: None,
            env: HashMap::new(),
            input: None,
        };
        let result = LocalCommandExecutor.execute(request).await;
        assert!(matches!(result, Err(HostError::Spawn { .. })));
    }
}
