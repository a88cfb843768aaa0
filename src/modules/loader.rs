use crate::modules::error::LoadError;
use crate::modules::resolver::{ModuleResolver, ResolvedModule};
use crate::modules::specifier::{ImportTarget, Referrer};
use crate::source::{ScriptKind, SourcePreprocessor};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;
use url::Url;

/// Extensions tried, in order, for extensionless local specifiers
const LOCAL_EXTENSIONS: &[&str] = &["js", "mjs", "cjs", "ts", "mts", "tsx", "jsx", "json"];
const INDEX_FILES: &[&str] = &["index.js", "index.mjs", "index.ts", "index.json"];

const FACTORY_PARAMS: &str = "exports, module, require, __import, __filename, __dirname, __meta";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoadMode {
    /// `import()` and lowered static imports; the factory may await
    Import,
    /// `require()`; the factory must run synchronously
    Require,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordFormat {
    /// `code` is JSON text
    Json,
    /// `code` evaluates to an async factory function
    Async,
    /// `code` evaluates to a synchronous factory function
    Sync,
}

/// A module ready to be instantiated inside the sandbox
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModuleRecord {
    pub id: String,
    pub filename: String,
    pub dirname: String,
    pub format: RecordFormat,
    pub code: String,
}

/// Loads local files and remote modules into evaluable records
pub struct ModuleLoader {
    resolver: Arc<ModuleResolver>,
    preprocessor: Arc<SourcePreprocessor>,
    script_dir: PathBuf,
}

impl ModuleLoader {
    pub fn new(
        resolver: Arc<ModuleResolver>,
        preprocessor: Arc<SourcePreprocessor>,
        script_dir: PathBuf,
    ) -> Self {
        Self {
            resolver,
            preprocessor,
            script_dir,
        }
    }

    /// Load `specifier` as seen from the module identified by `referrer_id`
    pub async fn load(
        &self,
        specifier: &str,
        referrer_id: &str,
        mode: LoadMode,
    ) -> Result<ModuleRecord, LoadError> {
        let referrer = Referrer::from_id(referrer_id, &self.script_dir);
        match ImportTarget::classify(specifier, &referrer)? {
            ImportTarget::Local { path } => self.load_local(&path, mode).await,
            ImportTarget::Remote { specifier } => self.load_remote(&specifier, mode).await,
        }
    }

    async fn load_local(&self, path: &Path, mode: LoadMode) -> Result<ModuleRecord, LoadError> {
        let path = find_local(path).await.ok_or_else(|| LoadError::FileNotFound {
            path: path.display().to_string(),
        })?;
        debug!("Loading local module {}", path.display());

        let raw = tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| LoadError::IoError {
                operation: "read module".to_string(),
                path: path.display().to_string(),
                error: e.to_string(),
            })?;

        let id = path.display().to_string();
        let dirname = path
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default();

        if path.extension().and_then(|e| e.to_str()) == Some("json") {
            return json_record(id, dirname, raw);
        }

        let prepared = self
            .preprocessor
            .prepare(&raw, ScriptKind::from_path(&path), &id, false)?;
        if mode == LoadMode::Require && prepared.static_module_syntax {
            return Err(LoadError::RequireEsm { id });
        }

        Ok(factory_record(id, dirname, mode, &prepared.code))
    }

    async fn load_remote(&self, specifier: &str, mode: LoadMode) -> Result<ModuleRecord, LoadError> {
        let resolved = self.resolver.resolve(specifier).await?;
        let id = resolved.url().to_string();
        let dirname = Url::parse(&id)
            .and_then(|url| url.join("."))
            .map(|url| url.to_string())
            .unwrap_or_else(|_| id.clone());

        let raw = resolved.content();
        if id.ends_with(".json") {
            return json_record(id, dirname, raw);
        }

        if mode == LoadMode::Require && self.preprocessor.has_static_module_syntax(&raw) {
            return Err(LoadError::RequireEsm { id });
        }

        let code = match resolved.transformed() {
            Some(transformed) => {
                debug!("Using cached transform of {}", id);
                transformed
            }
            None => self.transform_remote(&resolved, &raw)?,
        };

        Ok(factory_record(id, dirname, mode, &code))
    }

    fn transform_remote(&self, resolved: &ResolvedModule, raw: &str) -> Result<String, LoadError> {
        let prepared = self
            .preprocessor
            .prepare(raw, ScriptKind::Js, resolved.url(), false)?;
        if prepared.transpiled {
            self.resolver.store_transformed(resolved, &prepared.code);
        }
        Ok(prepared.code)
    }
}

fn json_record(id: String, dirname: String, raw: String) -> Result<ModuleRecord, LoadError> {
    if let Err(e) = serde_json::from_str::<serde_json::Value>(&raw) {
        return Err(LoadError::InvalidJson {
            path: id,
            error: e.to_string(),
        });
    }
    Ok(ModuleRecord {
        filename: id.clone(),
        id,
        dirname,
        format: RecordFormat::Json,
        code: raw,
    })
}

fn factory_record(id: String, dirname: String, mode: LoadMode, body: &str) -> ModuleRecord {
    let (format, code) = match mode {
        LoadMode::Import => (
            RecordFormat::Async,
            format!("(async function ({FACTORY_PARAMS}) {{{body}\n}})"),
        ),
        LoadMode::Require => (
            RecordFormat::Sync,
            format!("(function ({FACTORY_PARAMS}) {{{body}\n}})"),
        ),
    };
    ModuleRecord {
        filename: id.clone(),
        id,
        dirname,
        format,
        code,
    }
}

async fn is_file(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file())
        .unwrap_or(false)
}

/// Probe a local specifier the way a CommonJS resolver would
async fn find_local(path: &Path) -> Option<PathBuf> {
    if is_file(path).await {
        return Some(path.to_path_buf());
    }

    for extension in LOCAL_EXTENSIONS {
        let mut candidate = path.as_os_str().to_os_string();
        candidate.push(".");
        candidate.push(extension);
        let candidate = PathBuf::from(candidate);
        if is_file(&candidate).await {
            return Some(candidate);
        }
    }

    for index in INDEX_FILES {
        let candidate = path.join(index);
        if is_file(&candidate).await {
            return Some(candidate);
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::cache::ModuleCache;
    use crate::modules::error::FetchError;
    use crate::modules::fetch::{FetchedModule, ModuleFetcher};
    use crate::runtime::config::{CacheConfig, CdnConfig};
    use crate::source::OxcTranspiler;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    struct StaticFetcher {
        body: &'static str,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ModuleFetcher for StaticFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedModule, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(FetchedModule {
                url: url.to_string(),
                content: self.body.as_bytes().to_vec(),
            })
        }
    }

    fn loader(dir: &TempDir, body: &'static str) -> (Arc<StaticFetcher>, ModuleLoader) {
        let fetcher = Arc::new(StaticFetcher {
            body,
            calls: AtomicUsize::new(0),
        });
        let cache = Arc::new(ModuleCache::new(&CacheConfig::at(dir.path().join("cache"))));
        let resolver =
            Arc::new(ModuleResolver::new(CdnConfig::default(), cache, fetcher.clone()).unwrap());
        let preprocessor =
            Arc::new(SourcePreprocessor::new(Arc::new(OxcTranspiler::new().unwrap())).unwrap());
        (
            fetcher,
            ModuleLoader::new(resolver, preprocessor, dir.path().to_path_buf()),
        )
    }

    #[tokio::test]
    async fn test_require_json_file() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("data.json"), r#"{"answer": 42}"#).unwrap();
        let (_, loader) = loader(&dir, "");

        let record = loader.load("./data", "", LoadMode::Require).await.unwrap();
        assert_eq!(record.format, RecordFormat::Json);
        assert_eq!(record.code, r#"{"answer": 42}"#);
    }

    #[tokio::test]
    async fn test_require_commonjs_is_sync_factory() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("lib.js"), "module.exports = 1;").unwrap();
        let (_, loader) = loader(&dir, "");

        let record = loader.load("./lib.js", "", LoadMode::Require).await.unwrap();
        assert_eq!(record.format, RecordFormat::Sync);
        assert!(record.code.starts_with("(function (exports, module, require"));
        assert!(record.code.contains("module.exports = 1;"));
    }

    #[tokio::test]
    async fn test_require_of_remote_esm_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (_, loader) = loader(&dir, "export default 1;\n");

        let result = loader.load("left-pad", "", LoadMode::Require).await;
        assert!(matches!(result, Err(LoadError::RequireEsm { .. })));
    }

    #[tokio::test]
    async fn test_remote_import_is_lowered_and_cached() {
        let dir = TempDir::new().unwrap();
        let (fetcher, loader) = loader(&dir, "export const value = 7;\n");

        let first = loader.load("seven", "", LoadMode::Import).await.unwrap();
        assert_eq!(first.format, RecordFormat::Async);
        assert!(first.code.contains("exports.value = value;"));

        let second = loader.load("seven", "", LoadMode::Import).await.unwrap();
        assert_eq!(first.code, second.code);
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_local_module() {
        let dir = TempDir::new().unwrap();
        let (_, loader) = loader(&dir, "");
        let result = loader.load("./nope", "", LoadMode::Import).await;
        assert!(matches!(result, Err(LoadError::FileNotFound { .. })));
    }
}
