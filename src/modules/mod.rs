//! Remote module resolution, caching and loading

pub mod cache;
pub mod error;
pub mod fetch;
pub mod loader;
pub mod resolver;
pub mod specifier;

pub use cache::{cache_key, CacheEntry, CacheListing, CacheStats, EntrySummary, ModuleCache};
pub use error::*;
pub use fetch::{FetchedModule, HttpFetcher, ModuleFetcher};
pub use loader::{LoadMode, ModuleLoader, ModuleRecord, RecordFormat};
pub use resolver::{ModuleResolver, ResolvedModule};
pub use specifier::{ImportTarget, Referrer};
