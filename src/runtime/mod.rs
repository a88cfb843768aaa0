//! Script lifecycle: configuration, supervision, watch mode and the REPL

pub mod config;
pub mod error;
pub mod repl;
pub mod state;
pub mod supervisor;
pub mod watch;

pub use config::{CacheConfig, CdnConfig, CdnProvider, RuntimeConfig, WatchConfig};
pub use error::{RunMode, ScriptError};
pub use repl::{EditorReader, LineReader, ReadOutcome, ReplSession, ScriptedReader};
pub use state::{RunReport, StateTracker, SupervisorState};
pub use supervisor::{ExecutionSupervisor, SupervisorBuilder};
pub use watch::{Debouncer, FileWatcher};
