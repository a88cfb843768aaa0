use thiserror::Error;

/// Errors that can occur during module caching
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("I/O error during {operation}: {error}")]
    IoError { operation: String, error: String },

    #[error("Serialization error during {operation}: {error}")]
    SerializationError { operation: String, error: String },

    #[error("Cache corruption detected: {reason}")]
    Corruption { reason: String },

    #[error("Refusing to remove {path}: outside the cache root")]
    Containment { path: String },
}

/// Errors raised by a single network fetch
#[derive(Error, Debug, Clone)]
pub enum FetchError {
    #[error("HTTP error for {url}: {error}")]
    HttpError { url: String, error: String },

    #[error("HTTP {status} from {url}")]
    Status { url: String, status: u16 },
}

/// Errors that can occur while resolving an import to source text
#[derive(Error, Debug, Clone)]
pub enum ResolveError {
    #[error("Cannot resolve module '{specifier}' (tried: {})", attempted.join(", "))]
    ModuleResolution {
        specifier: String,
        attempted: Vec<String>,
    },

    #[error("Invalid module specifier '{specifier}': {reason}")]
    InvalidSpecifier { specifier: String, reason: String },

    #[error("Unknown CDN provider: {name}")]
    UnknownProvider { name: String },
}

/// Errors that can occur while turning a resolved source into an evaluable module
#[derive(Error, Debug)]
pub enum LoadError {
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    #[error("Module not found: {path}")]
    FileNotFound { path: String },

    #[error("I/O error during {operation} on {path}: {error}")]
    IoError {
        operation: String,
        path: String,
        error: String,
    },

    #[error("Invalid JSON in {path}: {error}")]
    InvalidJson { path: String, error: String },

    #[error("Cannot require ES module {id} synchronously; use import() instead")]
    RequireEsm { id: String },

    #[error(transparent)]
    Source(#[from] crate::source::SourceError),
}
