//! Drives a script through loading, preprocessing and execution, in single,
//! eval, watch and REPL modes.

use crate::modules::{HttpFetcher, ModuleCache, ModuleFetcher, ModuleLoader, ModuleResolver};
use crate::runtime::config::RuntimeConfig;
use crate::runtime::error::{RunMode, ScriptError};
use crate::runtime::repl::{LineReader, ReplSession};
use crate::runtime::state::{RunReport, StateTracker, SupervisorState};
use crate::runtime::watch::{Debouncer, FileWatcher};
use crate::sandbox::{
    BoaBackend, CommandExecutor, ConsoleOutput, ExecutionOutcome, HostBindings,
    LocalCommandExecutor, Prompter, SandboxBackend, SandboxError, SandboxGlobals, ScriptEnvironment,
    ScriptOutput, Stream, TargetProvider, TerminalPrompter, YamlTargetProvider,
};
use crate::source::{OxcTranspiler, ScriptKind, ScriptSource, SourcePreprocessor, Transpiler};
use chrono::Utc;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Assembles an [`ExecutionSupervisor`] and its collaborators
pub struct SupervisorBuilder<B: SandboxBackend = BoaBackend> {
    config: RuntimeConfig,
    backend: B,
    fetcher: Option<Arc<dyn ModuleFetcher>>,
    transpiler: Option<Arc<dyn Transpiler>>,
    executor: Arc<dyn CommandExecutor>,
    prompter: Arc<dyn Prompter>,
    output: Arc<dyn ScriptOutput>,
    targets: Option<Arc<dyn TargetProvider>>,
    cwd: Option<PathBuf>,
}

impl SupervisorBuilder<BoaBackend> {
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            config,
            backend: BoaBackend::new(),
            fetcher: None,
            transpiler: None,
            executor: Arc::new(LocalCommandExecutor),
            prompter: Arc::new(TerminalPrompter),
            output: Arc::new(ConsoleOutput),
            targets: None,
            cwd: None,
        }
    }
}

impl<B: SandboxBackend> SupervisorBuilder<B> {
    pub fn backend<C: SandboxBackend>(self, backend: C) -> SupervisorBuilder<C> {
        SupervisorBuilder {
            config: self.config,
            backend,
            fetcher: self.fetcher,
            transpiler: self.transpiler,
            executor: self.executor,
            prompter: self.prompter,
            output: self.output,
            targets: self.targets,
            cwd: self.cwd,
        }
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn ModuleFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn transpiler(mut self, transpiler: Arc<dyn Transpiler>) -> Self {
        self.transpiler = Some(transpiler);
        self
    }

    pub fn executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn prompter(mut self, prompter: Arc<dyn Prompter>) -> Self {
        self.prompter = prompter;
        self
    }

    pub fn output(mut self, output: Arc<dyn ScriptOutput>) -> Self {
        self.output = output;
        self
    }

    /// Targets to expose; implies script mode
    pub fn targets(mut self, targets: Arc<dyn TargetProvider>) -> Self {
        self.targets = Some(targets);
        self
    }

    pub fn cwd(mut self, cwd: PathBuf) -> Self {
        self.cwd = Some(cwd);
        self
    }

    pub fn build(self) -> Result<ExecutionSupervisor<B>, ScriptError> {
        let cwd = match self.cwd {
            Some(cwd) => cwd,
            None => std::env::current_dir()
                .map_err(|e| ScriptError::internal(format!("cannot read working directory: {e}")))?,
        };

        let cache = Arc::new(ModuleCache::new(&self.config.cache));
        let fetcher: Arc<dyn ModuleFetcher> = match self.fetcher {
            Some(fetcher) => fetcher,
            None => Arc::new(
                HttpFetcher::new(self.config.cdn.timeout)
                    .map_err(|e| ScriptError::internal(e.to_string()))?,
            ),
        };
        let resolver = Arc::new(ModuleResolver::new(self.config.cdn.clone(), cache, fetcher)?);

        let transpiler: Arc<dyn Transpiler> = match self.transpiler {
            Some(transpiler) => transpiler,
            None => Arc::new(OxcTranspiler::new()?),
        };
        let preprocessor = Arc::new(SourcePreprocessor::new(transpiler)?);

        let targets = match self.targets {
            Some(targets) => Some(targets),
            None if self.config.script_mode => {
                let path = YamlTargetProvider::default_path(&cwd);
                debug!("Loading targets from {}", path.display());
                let provider = YamlTargetProvider::load(&path)?;
                Some(Arc::new(provider) as Arc<dyn TargetProvider>)
            }
            None => None,
        };

        Ok(ExecutionSupervisor {
            config: self.config,
            backend: Arc::new(self.backend),
            resolver,
            preprocessor,
            executor: self.executor,
            prompter: self.prompter,
            output: self.output,
            targets,
            cwd,
            state: StateTracker::default(),
        })
    }
}

/// Owns one script's lifecycle and every collaborator it needs
pub struct ExecutionSupervisor<B: SandboxBackend = BoaBackend> {
    config: RuntimeConfig,
    backend: Arc<B>,
    resolver: Arc<ModuleResolver>,
    preprocessor: Arc<SourcePreprocessor>,
    executor: Arc<dyn CommandExecutor>,
    prompter: Arc<dyn Prompter>,
    output: Arc<dyn ScriptOutput>,
    targets: Option<Arc<dyn TargetProvider>>,
    cwd: PathBuf,
    state: StateTracker,
}

impl ExecutionSupervisor<BoaBackend> {
    pub fn builder(config: RuntimeConfig) -> SupervisorBuilder<BoaBackend> {
        SupervisorBuilder::new(config)
    }
}

impl<B: SandboxBackend> ExecutionSupervisor<B> {
    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn resolver(&self) -> &Arc<ModuleResolver> {
        &self.resolver
    }

    pub fn state(&self) -> SupervisorState {
        self.state.current()
    }

    pub fn state_history(&self) -> Vec<SupervisorState> {
        self.state.history()
    }

    /// Stop the running script once its current statement finishes
    pub fn interrupt(&self) {
        self.backend.interrupt();
    }

    /// Run a script file once
    pub async fn run_file(&self, path: &Path, args: Vec<String>) -> Result<RunReport, ScriptError> {
        // Cleared before any await so an interrupt during loading still lands
        self.backend.reset_interrupt();
        let started_at = Utc::now();
        let start = Instant::now();
        self.state.transition(SupervisorState::Loading);

        let source = match ScriptSource::load(path, args).await {
            Ok(source) => source,
            Err(e) => {
                self.state.transition(SupervisorState::Failed);
                return Err(e.into());
            }
        };

        self.run_source(source, started_at, start).await
    }

    /// Run inline code as if it were a script in the working directory
    pub async fn run_eval(&self, code: &str, args: Vec<String>) -> Result<RunReport, ScriptError> {
        self.backend.reset_interrupt();
        let source = ScriptSource::eval(code, self.script_kind(), args);
        self.run_source(source, Utc::now(), Instant::now()).await
    }

    async fn run_source(
        &self,
        source: ScriptSource,
        started_at: chrono::DateTime<Utc>,
        start: Instant,
    ) -> Result<RunReport, ScriptError> {
        let run_id = Uuid::new_v4().to_string();
        let script = source.display_name();
        debug!("Run {} of {}", run_id, script);

        self.state.transition(SupervisorState::Preprocessing);
        let code = match self.preprocessor.preprocess(&source, self.config.typescript) {
            Ok(code) => code,
            Err(e) => {
                self.state.transition(SupervisorState::Failed);
                return Err(e.into());
            }
        };

        self.state.transition(SupervisorState::Executing);
        let globals = self.globals_for(&source);
        let result = self
            .execute(globals, code, source.filename().display().to_string())
            .await;

        // Best-effort cache writes finish before the run is reported
        self.resolver.cache().flush().await;

        match result {
            Ok(outcome) => {
                self.state.transition(SupervisorState::Completed);
                let report = RunReport {
                    run_id,
                    script,
                    state: SupervisorState::Completed,
                    exit_code: outcome.exit_code.unwrap_or(0),
                    started_at,
                    duration: start.elapsed(),
                };
                debug!("Run finished in {:?}", report.duration);
                Ok(report)
            }
            Err(e) => {
                self.state.transition(SupervisorState::Failed);
                Err(e)
            }
        }
    }

    /// Run `path`, then re-run it after every burst of changes until interrupted
    pub async fn run_watch(&self, path: &Path, args: Vec<String>) -> Result<(), ScriptError> {
        self.run_watch_until(path, args, async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
    }

    /// Watch mode that stops when `shutdown` completes
    pub async fn run_watch_until<S>(
        &self,
        path: &Path,
        args: Vec<String>,
        shutdown: S,
    ) -> Result<(), ScriptError>
    where
        S: Future<Output = ()>,
    {
        if !path.is_file() {
            return Err(ScriptError::FileNotFound {
                path: path.display().to_string(),
            });
        }

        let (changes, events) = mpsc::unbounded_channel();
        let watcher = FileWatcher::start(path, changes)?;
        let mut debouncer = Debouncer::new(events, self.config.watch.debounce);
        tokio::pin!(shutdown);

        info!("Watching {} for changes", watcher.target().display());
        let mut first = true;

        loop {
            if !first {
                self.state.transition(SupervisorState::Watching);
                tokio::select! {
                    burst = debouncer.next_burst() => match burst {
                        Some(count) => debug!("Coalesced {} change event(s)", count),
                        None => break,
                    },
                    _ = &mut shutdown => break,
                }
                self.output.clear();
            }
            first = false;

            // Iterations never overlap: the next burst is awaited only after this run ends
            tokio::select! {
                result = self.run_file(path, args.clone()) => match result {
                    Ok(report) if report.exit_code != 0 => {
                        warn!("Script exited with code {}", report.exit_code);
                    }
                    Ok(_) => {}
                    Err(e) if e.is_fatal(RunMode::Watch) => return Err(e),
                    Err(e) => self.report_failure(&e),
                },
                _ = &mut shutdown => {
                    self.interrupt();
                    break;
                }
            }
        }

        drop(watcher);
        self.state.transition(SupervisorState::Idle);
        info!("Stopped watching {}", path.display());
        Ok(())
    }

    /// Interactive session; `make_reader` runs on the session thread
    pub async fn run_repl<F, R>(&self, make_reader: F) -> Result<i32, ScriptError>
    where
        F: FnOnce() -> Result<R, ScriptError> + Send + 'static,
        R: LineReader,
    {
        let source = ScriptSource::repl("", self.script_kind());
        let globals = self.globals_for(&source);
        let backend = self.backend.clone();
        let preprocessor = self.preprocessor.clone();
        let output = self.output.clone();
        let typescript = self.config.typescript;
        let cwd = self.cwd.clone();

        self.backend.reset_interrupt();
        self.state.transition(SupervisorState::Executing);
        let result = tokio::task::spawn_blocking(move || -> Result<i32, ScriptError> {
            let mut reader = make_reader()?;
            let context = backend.build(globals)?;
            let mut session =
                ReplSession::new(backend.as_ref(), context, &preprocessor, output, typescript)?
                    .with_cwd(cwd);
            session.run(&mut reader)
        })
        .await
        .map_err(|e| ScriptError::internal(format!("REPL worker failed: {e}")))?;

        self.resolver.cache().flush().await;
        self.state.transition(match result {
            Ok(_) => SupervisorState::Completed,
            Err(_) => SupervisorState::Failed,
        });
        result
    }

    fn script_kind(&self) -> ScriptKind {
        if self.config.typescript {
            ScriptKind::Ts
        } else {
            ScriptKind::Js
        }
    }

    /// A fresh binding set for one execution
    fn globals_for(&self, source: &ScriptSource) -> SandboxGlobals {
        let loader = Arc::new(ModuleLoader::new(
            self.resolver.clone(),
            self.preprocessor.clone(),
            source.directory(),
        ));
        let host = HostBindings::new(
            Handle::current(),
            loader,
            self.executor.clone(),
            self.prompter.clone(),
            self.output.clone(),
        )
        .with_targets(self.targets.clone())
        .with_cwd(self.cwd.clone())
        .with_debug(self.config.debug);

        let mut environment =
            ScriptEnvironment::capture(&source.filename(), source.args().to_vec())
                .with_script_mode(self.targets.is_some())
                .with_debug(self.config.debug);
        environment.cwd = self.cwd.display().to_string();

        SandboxGlobals::new(environment, Arc::new(host))
    }

    async fn execute(
        &self,
        globals: SandboxGlobals,
        code: String,
        origin: String,
    ) -> Result<ExecutionOutcome, ScriptError> {
        let backend = self.backend.clone();
        let outcome = tokio::task::spawn_blocking(move || -> Result<ExecutionOutcome, SandboxError> {
            let mut context = backend.build(globals)?;
            backend.execute(&mut context, &code, &origin)
        })
        .await
        .map_err(|e| ScriptError::internal(format!("sandbox worker failed: {e}")))??;
        Ok(outcome)
    }

    fn report_failure(&self, error: &ScriptError) {
        for line in error.render(self.config.debug).lines() {
            self.output.write_line(Stream::Stderr, line);
        }
    }
}
