//! Host primitives reachable from the sandbox through a single dispatch
//! function. Payloads and replies are JSON; failures come back as
//! `{"err": {"name", "message"}}` and are rethrown inside the script.

use crate::modules::{LoadMode, ModuleLoader};
use crate::sandbox::error::HostError;
use crate::sandbox::exec::{CommandExecutor, CommandRequest, CommandSpec};
use crate::sandbox::output::{ScriptOutput, Stream};
use crate::sandbox::prompt::Prompter;
use crate::sandbox::targets::TargetProvider;
use globset::GlobBuilder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tokio::runtime::Handle;
use tracing::debug;
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOp {
    Console,
    Write,
    Log,
    Exec,
    ReadFile,
    WriteFile,
    AppendFile,
    Exists,
    ReadDir,
    MakeDir,
    Remove,
    Stat,
    Glob,
    Question,
    Confirm,
    LoadModule,
    ListTargets,
    GetTarget,
}

impl FromStr for HostOp {
    type Err = HostError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "console" => Ok(HostOp::Console),
            "output.write" => Ok(HostOp::Write),
            "log" => Ok(HostOp::Log),
            "exec" => Ok(HostOp::Exec),
            "fs.readFile" => Ok(HostOp::ReadFile),
            "fs.writeFile" => Ok(HostOp::WriteFile),
            "fs.appendFile" => Ok(HostOp::AppendFile),
            "fs.exists" => Ok(HostOp::Exists),
            "fs.readdir" => Ok(HostOp::ReadDir),
            "fs.mkdir" => Ok(HostOp::MakeDir),
            "fs.remove" => Ok(HostOp::Remove),
            "fs.stat" => Ok(HostOp::Stat),
            "glob" => Ok(HostOp::Glob),
            "question" => Ok(HostOp::Question),
            "confirm" => Ok(HostOp::Confirm),
            "module.load" => Ok(HostOp::LoadModule),
            "targets.list" => Ok(HostOp::ListTargets),
            "targets.get" => Ok(HostOp::GetTarget),
            other => Err(HostError::UnknownOperation(other.to_string())),
        }
    }
}

impl HostOp {
    fn name(self) -> &'static str {
        match self {
            HostOp::Console => "console",
            HostOp::Write => "output.write",
            HostOp::Log => "log",
            HostOp::Exec => "exec",
            HostOp::ReadFile => "fs.readFile",
            HostOp::WriteFile => "fs.writeFile",
            HostOp::AppendFile => "fs.appendFile",
            HostOp::Exists => "fs.exists",
            HostOp::ReadDir => "fs.readdir",
            HostOp::MakeDir => "fs.mkdir",
            HostOp::Remove => "fs.remove",
            HostOp::Stat => "fs.stat",
            HostOp::Glob => "glob",
            HostOp::Question => "question",
            HostOp::Confirm => "confirm",
            HostOp::LoadModule => "module.load",
            HostOp::ListTargets => "targets.list",
            HostOp::GetTarget => "targets.get",
        }
    }
}

#[derive(Debug, Deserialize)]
struct ConsolePayload {
    level: String,
    text: String,
}

#[derive(Debug, Deserialize)]
struct WritePayload {
    stream: Stream,
    text: String,
}

#[derive(Debug, Deserialize)]
struct LogPayload {
    level: String,
    message: String,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CommandInput {
    Line(String),
    Argv(Vec<String>),
}

#[derive(Debug, Deserialize)]
struct ExecPayload {
    command: CommandInput,
    #[serde(default)]
    shell: bool,
    #[serde(default)]
    cwd: Option<PathBuf>,
    #[serde(default)]
    env: Option<HashMap<String, String>>,
    #[serde(default)]
    input: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PathPayload {
    path: String,
}

#[derive(Debug, Deserialize)]
struct WriteFilePayload {
    path: String,
    data: String,
}

#[derive(Debug, Deserialize)]
struct RecursivePayload {
    path: String,
    #[serde(default = "default_true")]
    recursive: bool,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct GlobPayload {
    pattern: String,
    #[serde(default)]
    cwd: Option<String>,
}

#[derive(Debug, Deserialize)]
struct QuestionPayload {
    prompt: String,
    #[serde(default)]
    default: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ConfirmPayload {
    prompt: String,
    #[serde(default)]
    default: bool,
}

#[derive(Debug, Deserialize)]
struct LoadPayload {
    specifier: String,
    referrer: String,
    mode: String,
}

#[derive(Debug, Deserialize)]
struct TargetPayload {
    name: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct FileStat {
    size: u64,
    is_file: bool,
    is_directory: bool,
    is_symlink: bool,
    modified_ms: Option<u64>,
}

/// The host side of every script-visible primitive
pub struct HostBindings {
    runtime: Handle,
    loader: Arc<ModuleLoader>,
    executor: Arc<dyn CommandExecutor>,
    prompter: Arc<dyn Prompter>,
    output: Arc<dyn ScriptOutput>,
    targets: Option<Arc<dyn TargetProvider>>,
    cwd: PathBuf,
    debug: bool,
}

impl HostBindings {
    pub fn new(
        runtime: Handle,
        loader: Arc<ModuleLoader>,
        executor: Arc<dyn CommandExecutor>,
        prompter: Arc<dyn Prompter>,
        output: Arc<dyn ScriptOutput>,
    ) -> Self {
        Self {
            runtime,
            loader,
            executor,
            prompter,
            output,
            targets: None,
            cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            debug: false,
        }
    }

    pub fn with_targets(mut self, targets: Option<Arc<dyn TargetProvider>>) -> Self {
        self.targets = targets;
        self
    }

    pub fn with_cwd(mut self, cwd: PathBuf) -> Self {
        self.cwd = cwd;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn output(&self) -> &Arc<dyn ScriptOutput> {
        &self.output
    }

    /// Entry point for the sandbox. Never fails; errors are encoded in the reply.
    pub fn dispatch(&self, op: &str, payload: &str) -> String {
        let result = op.parse::<HostOp>().and_then(|op| self.call(op, payload));
        match result {
            Ok(value) => json!({ "ok": value }).to_string(),
            Err(error) => {
                debug!("Host operation {} failed: {}", op, error);
                json!({ "err": { "name": error.js_name(), "message": error.to_string() } })
                    .to_string()
            }
        }
    }

    fn call(&self, op: HostOp, payload: &str) -> Result<Value, HostError> {
        match op {
            HostOp::Console => {
                let p: ConsolePayload = parse(op, payload)?;
                let stream = match p.level.as_str() {
                    "warn" | "error" => Stream::Stderr,
                    _ => Stream::Stdout,
                };
                self.output.write_line(stream, &p.text);
                Ok(Value::Null)
            }
            HostOp::Write => {
                let p: WritePayload = parse(op, payload)?;
                self.output.write(p.stream, &p.text);
                Ok(Value::Null)
            }
            HostOp::Log => {
                let p: LogPayload = parse(op, payload)?;
                self.log(&p.level, &p.message);
                Ok(Value::Null)
            }
            HostOp::Exec => {
                let p: ExecPayload = parse(op, payload)?;
                let request = self.command_request(p)?;
                let output = self.runtime.block_on(self.executor.execute(request))?;
                to_value(op, output)
            }
            HostOp::ReadFile => {
                let p: PathPayload = parse(op, payload)?;
                let path = self.resolve_path(&p.path);
                let content = std::fs::read_to_string(&path)
                    .map_err(|e| HostError::io("read file", &p.path, e))?;
                Ok(Value::String(content))
            }
            HostOp::WriteFile => {
                let p: WriteFilePayload = parse(op, payload)?;
                std::fs::write(self.resolve_path(&p.path), p.data)
                    .map_err(|e| HostError::io("write file", &p.path, e))?;
                Ok(Value::Null)
            }
            HostOp::AppendFile => {
                let p: WriteFilePayload = parse(op, payload)?;
                let mut file = std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(self.resolve_path(&p.path))
                    .map_err(|e| HostError::io("append file", &p.path, e))?;
                file.write_all(p.data.as_bytes())
                    .map_err(|e| HostError::io("append file", &p.path, e))?;
                Ok(Value::Null)
            }
            HostOp::Exists => {
                let p: PathPayload = parse(op, payload)?;
                Ok(Value::Bool(self.resolve_path(&p.path).exists()))
            }
            HostOp::ReadDir => {
                let p: PathPayload = parse(op, payload)?;
                let mut names = Vec::new();
                let entries = std::fs::read_dir(self.resolve_path(&p.path))
                    .map_err(|e| HostError::io("read directory", &p.path, e))?;
                for entry in entries {
                    let entry = entry.map_err(|e| HostError::io("read directory", &p.path, e))?;
                    names.push(entry.file_name().to_string_lossy().to_string());
                }
                names.sort();
                to_value(op, names)
            }
            HostOp::MakeDir => {
                let p: RecursivePayload = parse(op, payload)?;
                let path = self.resolve_path(&p.path);
                let result = if p.recursive {
                    std::fs::create_dir_all(&path)
                } else {
                    std::fs::create_dir(&path)
                };
                result.map_err(|e| HostError::io("create directory", &p.path, e))?;
                Ok(Value::Null)
            }
            HostOp::Remove => {
                let p: RecursivePayload = parse(op, payload)?;
                self.remove(&p.path, p.recursive)?;
                Ok(Value::Null)
            }
            HostOp::Stat => {
                let p: PathPayload = parse(op, payload)?;
                to_value(op, self.stat(&p.path)?)
            }
            HostOp::Glob => {
                let p: GlobPayload = parse(op, payload)?;
                let root = match &p.cwd {
                    Some(cwd) => self.resolve_path(cwd),
                    None => self.cwd.clone(),
                };
                to_value(op, glob_files(&root, &p.pattern)?)
            }
            HostOp::Question => {
                let p: QuestionPayload = parse(op, payload)?;
                let answer = self.prompter.question(&p.prompt, p.default.as_deref())?;
                Ok(Value::String(answer))
            }
            HostOp::Confirm => {
                let p: ConfirmPayload = parse(op, payload)?;
                Ok(Value::Bool(self.prompter.confirm(&p.prompt, p.default)?))
            }
            HostOp::LoadModule => {
                let p: LoadPayload = parse(op, payload)?;
                let mode = match p.mode.as_str() {
                    "require" => LoadMode::Require,
                    _ => LoadMode::Import,
                };
                let record =
                    self.runtime
                        .block_on(self.loader.load(&p.specifier, &p.referrer, mode))?;
                to_value(op, record)
            }
            HostOp::ListTargets => to_value(op, self.targets()?.list()),
            HostOp::GetTarget => {
                let p: TargetPayload = parse(op, payload)?;
                to_value(op, self.targets()?.get(&p.name))
            }
        }
    }

    fn log(&self, level: &str, message: &str) {
        match level {
            "success" => self.output.write_line(Stream::Stdout, &format!("✅ {message}")),
            "step" => self.output.write_line(Stream::Stdout, &format!("🚀 {message}")),
            "warn" => self.output.write_line(Stream::Stderr, &format!("⚠️  {message}")),
            "error" => self.output.write_line(Stream::Stderr, &format!("❌ {message}")),
            "debug" => {
                if self.debug {
                    self.output.write_line(Stream::Stderr, &format!("🔍 {message}"));
                }
            }
            _ => self.output.write_line(Stream::Stdout, message),
        }
    }

    fn command_request(&self, payload: ExecPayload) -> Result<CommandRequest, HostError> {
        let command = match payload.command {
            CommandInput::Line(line) if payload.shell => CommandSpec::Shell(line),
            CommandInput::Line(line) => {
                let argv = shell_words::split(&line).map_err(|e| HostError::InvalidPayload {
                    operation: HostOp::Exec.name().to_string(),
                    message: format!("cannot parse command '{line}': {e}"),
                })?;
                CommandSpec::Argv(argv)
            }
            CommandInput::Argv(argv) if payload.shell => CommandSpec::Shell(shell_words::join(argv)),
            CommandInput::Argv(argv) => CommandSpec::Argv(argv),
        };

        Ok(CommandRequest {
            command,
            cwd: Some(match payload.cwd {
                Some(dir) => self.cwd.join(dir),
                None => self.cwd.clone(),
            }),
            env: payload.env.unwrap_or_default(),
            input: payload.input,
        })
    }

    fn targets(&self) -> Result<&Arc<dyn TargetProvider>, HostError> {
        self.targets
            .as_ref()
            .ok_or_else(|| HostError::Targets("target configuration is not loaded".to_string()))
    }

    fn resolve_path(&self, path: &str) -> PathBuf {
        self.cwd.join(path)
    }

    fn remove(&self, raw: &str, recursive: bool) -> Result<(), HostError> {
        let path = self.resolve_path(raw);
        let metadata = match std::fs::symlink_metadata(&path) {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(HostError::io("remove", raw, e)),
        };
        let result = if metadata.is_dir() {
            if recursive {
                std::fs::remove_dir_all(&path)
            } else {
                std::fs::remove_dir(&path)
            }
        } else {
            std::fs::remove_file(&path)
        };
        result.map_err(|e| HostError::io("remove", raw, e))
    }

    fn stat(&self, raw: &str) -> Result<FileStat, HostError> {
        let path = self.resolve_path(raw);
        let link = std::fs::symlink_metadata(&path).map_err(|e| HostError::io("stat", raw, e))?;
        let metadata = std::fs::metadata(&path).unwrap_or_else(|_| link.clone());
        let modified_ms = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64);

        Ok(FileStat {
            size: metadata.len(),
            is_file: metadata.is_file(),
            is_directory: metadata.is_dir(),
            is_symlink: link.file_type().is_symlink(),
            modified_ms,
        })
    }
}

fn parse<T: DeserializeOwned>(op: HostOp, payload: &str) -> Result<T, HostError> {
    serde_json::from_str(payload).map_err(|e| HostError::InvalidPayload {
        operation: op.name().to_string(),
        message: e.to_string(),
    })
}

fn to_value<T: Serialize>(op: HostOp, value: T) -> Result<Value, HostError> {
    serde_json::to_value(value).map_err(|e| HostError::InvalidPayload {
        operation: op.name().to_string(),
        message: e.to_string(),
    })
}

/// Files under `root` matching `pattern`, as sorted `/`-separated relative paths
pub fn glob_files(root: &Path, pattern: &str) -> Result<Vec<String>, HostError> {
    // `*` stays within one path segment; only `**` crosses directories
    let matcher = GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map_err(|e| HostError::Glob {
            pattern: pattern.to_string(),
            error: e.to_string(),
        })?
        .compile_matcher();

    let mut matches: Vec<String> = WalkDir::new(root)
        .follow_links(false)
        .into_iter()
        .filter_map(|entry| entry.ok())
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let relative = entry.path().strip_prefix(root).ok()?;
            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");
            matcher.is_match(&relative).then_some(relative)
        })
        .collect();

    matches.sort();
    Ok(matches)
}
