use crate::sandbox::host::HostBindings;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Every global a script can see. Anything not listed here does not exist in
/// the sandbox; `targets` only appears in script mode.
pub const GLOBAL_BINDINGS: &[&str] = &[
    "console",
    "process",
    "setTimeout",
    "setInterval",
    "setImmediate",
    "clearTimeout",
    "clearInterval",
    "clearImmediate",
    "queueMicrotask",
    "structuredClone",
    "ModuleResolutionError",
    "$",
    "exec",
    "log",
    "fs",
    "path",
    "glob",
    "question",
    "confirm",
    "sleep",
    "argv",
    "args",
    "require",
    "__import",
    "__filename",
    "__dirname",
    "__meta",
    "module",
    "exports",
];

pub const SCRIPT_MODE_BINDINGS: &[&str] = &["targets"];

/// Data handed to the prelude when a context is built
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScriptEnvironment {
    pub filename: String,
    pub dirname: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: String,
    pub platform: String,
    pub script_mode: bool,
    pub debug: bool,
}

impl ScriptEnvironment {
    /// Snapshot of the current process for a script at `filename`
    pub fn capture(filename: &Path, args: Vec<String>) -> Self {
        let cwd = std::env::current_dir()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|_| ".".to_string());
        let dirname = filename
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| cwd.clone());

        Self {
            filename: filename.display().to_string(),
            dirname,
            args,
            env: std::env::vars().collect(),
            cwd,
            platform: platform_name().to_string(),
            script_mode: false,
            debug: false,
        }
    }

    pub fn with_script_mode(mut self, script_mode: bool) -> Self {
        self.script_mode = script_mode;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

/// Node-style platform identifier
fn platform_name() -> &'static str {
    match std::env::consts::OS {
        "macos" => "darwin",
        "windows" => "win32",
        other => other,
    }
}

/// The binding set for one execution: environment data plus the host
/// primitives it is allowed to call. Built fresh for every run.
#[derive(Clone)]
pub struct SandboxGlobals {
    pub environment: ScriptEnvironment,
    pub host: Arc<HostBindings>,
}

impl SandboxGlobals {
    pub fn new(environment: ScriptEnvironment, host: Arc<HostBindings>) -> Self {
        Self { environment, host }
    }

    /// Names of the globals this set exposes
    pub fn names(&self) -> Vec<&'static str> {
        let mut names = GLOBAL_BINDINGS.to_vec();
        if self.environment.script_mode {
            names.extend_from_slice(SCRIPT_MODE_BINDINGS);
        }
        names
    }

    pub fn environment_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.environment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_snapshot() {
        let env = ScriptEnvironment::capture(Path::new("/work/deploy.ts"), vec!["--fast".into()])
            .with_script_mode(true);
        assert_eq!(env.filename, "/work/deploy.ts");
        assert_eq!(env.dirname, "/work");
        assert_eq!(env.args, vec!["--fast"]);
        assert!(env.script_mode);

        let json: serde_json::Value = serde_json::to_value(&env).unwrap();
        assert_eq!(json["scriptMode"], true);
        assert!(json["env"].is_object());
    }

    #[test]
    fn test_binding_list_has_no_duplicates() {
        let mut names = GLOBAL_BINDINGS.to_vec();
        names.extend_from_slice(SCRIPT_MODE_BINDINGS);
        let unique: std::collections::HashSet<_> = names.iter().collect();
        assert_eq!(unique.len(), names.len());
    }
}
