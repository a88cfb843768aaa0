use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

/// Main rustle-script CLI interface
#[derive(Parser, Debug)]
#[command(name = "rustle-script")]
#[command(about = "Run JavaScript, TypeScript and Markdown automation scripts with CDN-resolved modules")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct RustleScriptCli {
    #[command(subcommand)]
    pub command: Commands,

    /// Module cache directory
    #[arg(long, global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Enable verbose output (repeat for more)
    #[arg(short, long = "verbose", action = clap::ArgAction::Count, global = true)]
    pub verbosity: u8,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run a script file, inline code, or an interactive session
    Run(RunArgs),

    /// Inspect and manage the module cache
    Cache {
        #[command(subcommand)]
        command: CacheCommand,
    },
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Script file (.js, .mjs, .ts, .tsx, .md)
    pub file: Option<PathBuf>,

    /// Arguments passed to the script. Everything after the script path is
    /// forwarded verbatim, so runtime flags such as `--watch` go before it.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,

    /// Evaluate inline code instead of a file
    #[arg(short, long, conflicts_with_all = ["repl", "watch"])]
    pub eval: Option<String>,

    /// Start an interactive session
    #[arg(long, conflicts_with = "watch")]
    pub repl: bool,

    /// Treat the script as TypeScript regardless of its extension
    #[arg(long)]
    pub typescript: bool,

    /// Re-run the script whenever the file changes
    #[arg(short, long)]
    pub watch: bool,

    /// Preferred CDN provider for bare module specifiers
    #[arg(long)]
    pub cdn: Option<String>,
}

#[derive(Subcommand, Debug, Clone)]
pub enum CacheCommand {
    /// Delete every cached module
    Clear,

    /// Show entry count and total size
    Stats {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// List cached modules
    List {
        /// Print JSON instead of text
        #[arg(long)]
        json: bool,
    },

    /// Fetch modules into the cache ahead of time
    Preload {
        /// Module specifiers, e.g. `lodash` or `chalk@5`
        #[arg(required = true)]
        modules: Vec<String>,

        /// Preferred CDN provider
        #[arg(long)]
        cdn: Option<String>,
    },
}

/// How `run` should execute
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunTarget {
    File(PathBuf),
    Eval(String),
    Repl,
}

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub target: RunTarget,
    pub args: Vec<String>,
    pub typescript: bool,
    pub watch: bool,
    pub cdn: Option<String>,
}

impl TryFrom<&RunArgs> for RunOptions {
    type Error = String;

    fn try_from(args: &RunArgs) -> Result<Self, Self::Error> {
        let (target, script_args) = match (&args.eval, args.repl, &args.file) {
            (Some(code), _, file) => {
                // With --eval there is no script file; a positional value is the first argument
                let mut script_args: Vec<String> =
                    file.iter().map(|f| f.display().to_string()).collect();
                script_args.extend(args.args.iter().cloned());
                (RunTarget::Eval(code.clone()), script_args)
            }
            (None, true, _) => (RunTarget::Repl, Vec::new()),
            (None, false, Some(file)) => (RunTarget::File(file.clone()), args.args.clone()),
            (None, false, None) => {
                return Err("a script file is required unless --eval or --repl is given".to_string())
            }
        };

        Ok(Self {
            target,
            args: script_args,
            typescript: args.typescript,
            watch: args.watch,
            cdn: args.cdn.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(argv: &[&str]) -> RustleScriptCli {
        RustleScriptCli::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_run_passes_trailing_args_to_script() {
        let cli = parse(&["rustle-script", "run", "deploy.ts", "prod", "--force"]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        let options = RunOptions::try_from(&args).unwrap();
        assert_eq!(options.target, RunTarget::File(PathBuf::from("deploy.ts")));
        assert_eq!(options.args, vec!["prod", "--force"]);
    }

    #[test]
    fn test_runtime_flags_precede_the_script() {
        let cli = parse(&["rustle-script", "run", "--watch", "deploy.ts", "prod", "--watch"]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        let options = RunOptions::try_from(&args).unwrap();
        assert!(options.watch);
        assert_eq!(options.target, RunTarget::File(PathBuf::from("deploy.ts")));
        assert_eq!(options.args, vec!["prod", "--watch"]);
    }

    #[test]
    fn test_eval_and_repl_targets() {
        let cli = parse(&["rustle-script", "run", "--eval", "console.log(1)"]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(
            RunOptions::try_from(&args).unwrap().target,
            RunTarget::Eval("console.log(1)".to_string())
        );

        let cli = parse(&["rustle-script", "run", "--repl", "--typescript"]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        let options = RunOptions::try_from(&args).unwrap();
        assert_eq!(options.target, RunTarget::Repl);
        assert!(options.typescript);
    }

    #[test]
    fn test_run_without_target_is_rejected() {
        let cli = parse(&["rustle-script", "run"]);
        let Commands::Run(args) = cli.command else {
            panic!("expected run");
        };
        assert!(RunOptions::try_from(&args).is_err());
    }

    #[test]
    fn test_eval_conflicts_with_watch() {
        assert!(RustleScriptCli::try_parse_from([
            "rustle-script",
            "run",
            "--eval",
            "1",
            "--watch"
        ])
        .is_err());
    }

    #[test]
    fn test_cache_subcommands() {
        let cli = parse(&[
            "rustle-script",
            "--cache-dir",
            "/tmp/c",
            "cache",
            "preload",
            "lodash",
            "chalk",
            "--cdn",
            "unpkg",
        ]);
        assert_eq!(cli.cache_dir, Some(PathBuf::from("/tmp/c")));
        match cli.command {
            Commands::Cache {
                command: CacheCommand::Preload { modules, cdn },
            } => {
                assert_eq!(modules, vec!["lodash", "chalk"]);
                assert_eq!(cdn.as_deref(), Some("unpkg"));
            }
            other => panic!("unexpected command: {other:?}"),
        }

        let cli = parse(&["rustle-script", "cache", "list", "--json"]);
        assert!(matches!(
            cli.command,
            Commands::Cache {
                command: CacheCommand::List { json: true }
            }
        ));
    }
}
