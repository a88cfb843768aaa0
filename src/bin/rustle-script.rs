use anyhow::Result;
use clap::Parser;
use rustle_script::cli::{Commands, RunOptions, RustleScriptCli, RustleScriptCliImpl};
use rustle_script::runtime::RuntimeConfig;
use tracing::{debug, error};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = RustleScriptCli::parse();
    let config = RuntimeConfig::from_env().with_cache_dir(cli.cache_dir.clone());

    // Logs go to stderr so script output on stdout stays clean
    let level = match (cli.verbosity, config.debug) {
        (0, false) => tracing::Level::WARN,
        (0 | 1, _) => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    debug!("Starting rustle-script v{}", env!("CARGO_PKG_VERSION"));
    debug!("Module cache at {}", config.cache.root.display());

    let app = RustleScriptCliImpl::new(config);
    let code = match cli.command {
        Commands::Run(args) => match RunOptions::try_from(&args) {
            Ok(options) => app.run(options).await,
            Err(message) => {
                eprintln!("❌ {}", message);
                2
            }
        },
        Commands::Cache { command } => match app.cache(command).await {
            Ok(code) => code,
            Err(e) => {
                error!("Cache command failed: {}", e);
                eprintln!("{}", e.render(app.config().debug));
                e.exit_code().max(1)
            }
        },
    };

    std::process::exit(code);
}
