//! Rustle Script - script execution runtime
//!
//! Runs JavaScript, TypeScript and Markdown-embedded scripts inside an isolated
//! evaluation context, resolving bare module imports through CDN providers and
//! a two-tier module cache. Supports single runs, inline eval, watch mode and
//! an interactive REPL.

pub mod cli;
pub mod modules;
pub mod runtime;
pub mod sandbox;
pub mod source;

pub use modules::{ModuleCache, ModuleResolver};
pub use runtime::{ExecutionSupervisor, RunReport, RuntimeConfig, ScriptError};
pub use source::{ScriptSource, SourcePreprocessor};
