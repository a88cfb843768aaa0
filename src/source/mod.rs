pub mod error;
pub mod esm;
pub mod markdown;
pub mod preprocess;
pub mod script;
pub mod transpile;

pub use error::{SourceError, TranspileError};
pub use esm::{EsmLowering, LoweredSource};
pub use markdown::{MarkdownCode, MarkdownExtractor};
pub use preprocess::{strip_shebang, wrap_async, PreparedSource, SourcePreprocessor};
pub use script::{ScriptKind, ScriptOrigin, ScriptSource};
pub use transpile::{Loader, ModuleFormat, OxcTranspiler, TranspileOptions, Transpiler};
