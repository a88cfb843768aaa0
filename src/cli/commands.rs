use crate::cli::options::{CacheCommand, RunOptions, RunTarget};
use crate::cli::output::{
    print_cache_listing, print_cache_stats, print_json, print_preload_results, report_error,
    sorted_entries,
};
use crate::modules::{HttpFetcher, ModuleCache, ModuleResolver};
use crate::runtime::{EditorReader, ExecutionSupervisor, RunReport, RuntimeConfig, ScriptError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// How long an interrupted script gets to finish its current statement
const INTERRUPT_GRACE: Duration = Duration::from_secs(2);

/// Main rustle-script CLI implementation
pub struct RustleScriptCliImpl {
    config: RuntimeConfig,
}

impl RustleScriptCliImpl {
    pub fn new(config: RuntimeConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// Execute `run`; returns the process exit code
    pub async fn run(&self, options: RunOptions) -> i32 {
        let debug = self.config.debug;
        match self.run_inner(options).await {
            Ok(code) => code,
            Err(e) => {
                report_error(&e, debug);
                e.exit_code()
            }
        }
    }

    async fn run_inner(&self, options: RunOptions) -> Result<i32, ScriptError> {
        let mut config = self.config.clone().with_preferred_cdn(options.cdn.clone());
        config.typescript |= options.typescript;

        let supervisor = ExecutionSupervisor::builder(config).build()?;

        match options.target {
            RunTarget::File(path) if options.watch => {
                supervisor.run_watch(&path, options.args).await?;
                Ok(0)
            }
            RunTarget::File(path) => {
                info!("Running {}", path.display());
                let report =
                    interruptible(&supervisor, supervisor.run_file(&path, options.args)).await?;
                Ok(report.exit_code)
            }
            RunTarget::Eval(code) => {
                let report =
                    interruptible(&supervisor, supervisor.run_eval(&code, options.args)).await?;
                Ok(report.exit_code)
            }
            RunTarget::Repl => supervisor.run_repl(EditorReader::new).await,
        }
    }

    /// Execute a `cache` subcommand; returns the process exit code
    pub async fn cache(&self, command: CacheCommand) -> Result<i32, ScriptError> {
        match command {
            CacheCommand::Clear => {
                let cache = ModuleCache::new(&self.config.cache);
                cache.clear().await?;
                println!("🧹 Cleared module cache at {}", cache.root().display());
                Ok(0)
            }
            CacheCommand::Stats { json } => {
                let cache = ModuleCache::new(&self.config.cache);
                let stats = cache.stats().await;
                if json {
                    print_json(&stats)?;
                } else {
                    print_cache_stats(&stats, &cache.root().display().to_string());
                }
                Ok(0)
            }
            CacheCommand::List { json } => {
                let cache = ModuleCache::new(&self.config.cache);
                let listing = cache.list().await;
                if json {
                    print_json(&sorted_entries(&listing))?;
                } else {
                    print_cache_listing(&listing);
                }
                Ok(0)
            }
            CacheCommand::Preload { modules, cdn } => self.preload(modules, cdn).await,
        }
    }

    async fn preload(&self, modules: Vec<String>, cdn: Option<String>) -> Result<i32, ScriptError> {
        let config = self.config.clone().with_preferred_cdn(cdn);
        let cache = Arc::new(ModuleCache::new(&config.cache));
        let fetcher = HttpFetcher::new(config.cdn.timeout)
            .map_err(|e| ScriptError::internal(e.to_string()))?;
        let resolver = ModuleResolver::new(config.cdn.clone(), cache.clone(), Arc::new(fetcher))?;

        println!(
            "📥 Preloading {} module(s) via {}",
            modules.len(),
            resolver.preferred()
        );
        let results = resolver.preload(&modules).await;
        cache.flush().await;

        let failures = print_preload_results(&results);
        Ok(if failures == 0 { 0 } else { 1 })
    }
}

/// Drive a run, stopping it on Ctrl-C after its current statement
async fn interruptible<F>(
    supervisor: &ExecutionSupervisor,
    run: F,
) -> Result<RunReport, ScriptError>
where
    F: Future<Output = Result<RunReport, ScriptError>>,
{
    tokio::pin!(run);
    tokio::select! {
        result = &mut run => result,
        _ = tokio::signal::ctrl_c() => {
            debug!("Interrupt received");
            supervisor.interrupt();
            if tokio::time::timeout(INTERRUPT_GRACE, &mut run).await.is_err() {
                warn!("Script did not stop within {:?}", INTERRUPT_GRACE);
            }
            Err(ScriptError::Interrupted)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::CacheEntry;
    use crate::runtime::CacheConfig;
    use tempfile::TempDir;

    fn cli_for(dir: &TempDir) -> RustleScriptCliImpl {
        let mut config = RuntimeConfig::default();
        config.cache = CacheConfig::at(dir.path().join("cache"));
        RustleScriptCliImpl::new(config)
    }

    #[tokio::test]
    async fn test_cache_clear_then_stats_reports_empty() {
        let dir = TempDir::new().unwrap();
        let cli = cli_for(&dir);

        let cache = ModuleCache::new(&cli.config().cache);
        cache.put(CacheEntry::new("k", "https://esm.sh/lodash", b"x".to_vec()));
        cache.flush().await;

        assert_eq!(cli.cache(CacheCommand::Clear).await.unwrap(), 0);
        let stats = ModuleCache::new(&cli.config().cache).stats().await;
        assert_eq!(stats.entry_count, 0);
    }

    #[tokio::test]
    async fn test_missing_script_exits_with_not_found_code() {
        let dir = TempDir::new().unwrap();
        let cli = cli_for(&dir);
        let options = RunOptions {
            target: RunTarget::File(dir.path().join("missing.js")),
            args: Vec::new(),
            typescript: false,
            watch: false,
            cdn: None,
        };
        assert_eq!(cli.run(options).await, 2);
    }
}
