use crate::modules::error::CacheError;
use crate::runtime::config::CacheConfig;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

const RECORD_EXTENSION: &str = "json";

/// Deterministic cache key for a specifier fetched through a provider
pub fn cache_key(provider: &str, specifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(provider.as_bytes());
    hasher.update([0u8]);
    hasher.update(specifier.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// One fetched module. Immutable: updates create a superseding entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub key: String,
    pub url: String,
    pub content: Vec<u8>,
    pub transformed: Option<Vec<u8>>,
    pub timestamp_millis: i64,
}

impl CacheEntry {
    pub fn new(key: impl Into<String>, url: impl Into<String>, content: Vec<u8>) -> Self {
        Self {
            key: key.into(),
            url: url.into(),
            content,
            transformed: None,
            timestamp_millis: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// A newer entry for the same key carrying transformed source
    pub fn with_transformed(&self, transformed: Vec<u8>) -> Self {
        Self {
            key: self.key.clone(),
            url: self.url.clone(),
            content: self.content.clone(),
            transformed: Some(transformed),
            timestamp_millis: chrono::Utc::now()
                .timestamp_millis()
                .max(self.timestamp_millis + 1),
        }
    }

    pub fn size(&self) -> usize {
        self.content.len() + self.transformed.as_ref().map_or(0, Vec::len)
    }

    pub fn age_millis(&self) -> u64 {
        (chrono::Utc::now().timestamp_millis() - self.timestamp_millis).max(0) as u64
    }

    pub fn content_text(&self) -> String {
        String::from_utf8_lossy(&self.content).into_owned()
    }

    pub fn transformed_text(&self) -> Option<String> {
        self.transformed
            .as_ref()
            .map(|t| String::from_utf8_lossy(t).into_owned())
    }
}

/// On-disk form of a cache entry
#[derive(Debug, Serialize, Deserialize)]
struct CacheRecord {
    key: String,
    url: String,
    content: String,
    transformed: Option<String>,
    timestamp: i64,
}

impl CacheRecord {
    fn from_entry(entry: &CacheEntry) -> Self {
        Self {
            key: entry.key.clone(),
            url: entry.url.clone(),
            content: STANDARD.encode(&entry.content),
            transformed: entry.transformed.as_ref().map(|t| STANDARD.encode(t)),
            timestamp: entry.timestamp_millis,
        }
    }

    fn into_entry(self) -> Result<CacheEntry, CacheError> {
        let decode = |field: &str, value: &str| {
            STANDARD.decode(value).map_err(|e| CacheError::Corruption {
                reason: format!("{field} of {}: {e}", self.key),
            })
        };
        let content = decode("content", &self.content)?;
        let transformed = match &self.transformed {
            Some(t) => Some(decode("transformed", t)?),
            None => None,
        };
        Ok(CacheEntry {
            key: self.key.clone(),
            url: self.url.clone(),
            content,
            transformed,
            timestamp_millis: self.timestamp,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheStats {
    pub entry_count: usize,
    pub total_size_bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntrySummary {
    pub url: String,
    pub size: usize,
    pub age_millis: u64,
}

/// Snapshot of cache entries; `iter()` can be called any number of times
#[derive(Debug, Clone)]
pub struct CacheListing {
    entries: Vec<Arc<CacheEntry>>,
}

impl CacheListing {
    pub fn iter(&self) -> impl Iterator<Item = EntrySummary> + '_ {
        self.entries.iter().map(|entry| EntrySummary {
            url: entry.url.clone(),
            size: entry.size(),
            age_millis: entry.age_millis(),
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Two-tier module store: an in-memory index mirroring one record file per key
pub struct ModuleCache {
    root: PathBuf,
    max_age: Option<Duration>,
    entries: RwLock<IndexMap<String, Arc<CacheEntry>>>,
    disk_enumerated: AtomicBool,
    pending_writes: Mutex<Vec<JoinHandle<()>>>,
    write_lock: Arc<Mutex<()>>,
}

impl ModuleCache {
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            root: config.root.clone(),
            max_age: config.max_age,
            entries: RwLock::new(IndexMap::new()),
            disk_enumerated: AtomicBool::new(false),
            pending_writes: Mutex::new(Vec::new()),
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        if let Some(entry) = self.read_entries().get(key).cloned() {
            return self.fresh(entry);
        }

        if !is_valid_key(key) {
            warn!("Ignoring cache lookup with invalid key: {}", key);
            return None;
        }

        let path = self.record_path(key);
        let entry = match load_record(&path).await {
            Ok(Some(entry)) if entry.key == key => Arc::new(entry),
            Ok(Some(_)) => {
                warn!("Cache record {} does not match its key", path.display());
                return None;
            }
            Ok(None) => return None,
            Err(e) => {
                warn!("Treating unreadable cache record as absent: {}", e);
                return None;
            }
        };

        debug!("Module cache hit (disk): {}", entry.url);
        let entry = {
            let mut entries = self.write_entries();
            entries
                .entry(key.to_string())
                .or_insert_with(|| entry.clone())
                .clone()
        };
        self.fresh(entry)
    }

    /// Insert into memory now and persist in the background
    pub fn put(&self, entry: CacheEntry) -> Arc<CacheEntry> {
        let entry = Arc::new(entry);
        {
            let mut entries = self.write_entries();
            entries.shift_remove(&entry.key);
            entries.insert(entry.key.clone(), entry.clone());
        }

        if !is_valid_key(&entry.key) {
            warn!("Not persisting cache entry with invalid key: {}", entry.key);
            return entry;
        }

        let root = self.root.clone();
        let write_lock = self.write_lock.clone();
        let record = entry.clone();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let task = handle.spawn_blocking(move || persist(&root, &record, &write_lock));
                self.lock_pending().push(task);
            }
            Err(_) => persist(&root, &record, &write_lock),
        }

        entry
    }

    /// Wait for every scheduled disk write to finish
    pub async fn flush(&self) {
        let pending: Vec<JoinHandle<()>> = self.lock_pending().drain(..).collect();
        for task in pending {
            if let Err(e) = task.await {
                warn!("Cache write task failed: {}", e);
            }
        }
    }

    pub async fn clear(&self) -> Result<(), CacheError> {
        self.flush().await;
        self.write_entries().clear();

        remove_cache_root(&self.root).await?;
        self.disk_enumerated.store(true, Ordering::SeqCst);
        info!("Cleared module cache at {}", self.root.display());
        Ok(())
    }

    pub async fn stats(&self) -> CacheStats {
        self.enumerate_disk().await;
        let entries = self.read_entries();
        CacheStats {
            entry_count: entries.len(),
            total_size_bytes: entries.values().map(|e| e.size()).sum(),
        }
    }

    pub async fn list(&self) -> CacheListing {
        self.enumerate_disk().await;
        CacheListing {
            entries: self.read_entries().values().cloned().collect(),
        }
    }

    fn fresh(&self, entry: Arc<CacheEntry>) -> Option<Arc<CacheEntry>> {
        match self.max_age {
            Some(max_age) if entry.age_millis() > max_age.as_millis() as u64 => {
                debug!("Cache entry for {} is stale", entry.url);
                None
            }
            _ => Some(entry),
        }
    }

    /// Discover records not yet hydrated into memory, once per process
    async fn enumerate_disk(&self) {
        if self.disk_enumerated.load(Ordering::SeqCst) {
            return;
        }

        let mut discovered = Vec::new();
        match tokio::fs::read_dir(&self.root).await {
            Ok(mut dir) => loop {
                match dir.next_entry().await {
                    Ok(Some(item)) => {
                        let path = item.path();
                        if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXTENSION) {
                            continue;
                        }
                        match load_record(&path).await {
                            Ok(Some(entry)) => discovered.push(entry),
                            Ok(None) => {}
                            Err(e) => warn!("Skipping unreadable cache record: {}", e),
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        warn!("Failed to enumerate cache directory: {}", e);
                        break;
                    }
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(
                "Failed to read cache directory {}: {}",
                self.root.display(),
                e
            ),
        }

        let mut entries = self.write_entries();
        for entry in discovered {
            entries
                .entry(entry.key.clone())
                .or_insert_with(|| Arc::new(entry));
        }
        entries.sort_by(|_, a, _, b| a.timestamp_millis.cmp(&b.timestamp_millis));
        self.disk_enumerated.store(true, Ordering::SeqCst);
    }

    fn record_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}.{RECORD_EXTENSION}"))
    }

    fn read_entries(&self) -> std::sync::RwLockReadGuard<'_, IndexMap<String, Arc<CacheEntry>>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_entries(&self) -> std::sync::RwLockWriteGuard<'_, IndexMap<String, Arc<CacheEntry>>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }

    fn lock_pending(&self) -> std::sync::MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.pending_writes.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn is_valid_key(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

async fn load_record(path: &Path) -> Result<Option<CacheEntry>, CacheError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(CacheError::IoError {
                operation: format!("read {}", path.display()),
                error: e.to_string(),
            })
        }
    };

    let record: CacheRecord =
        serde_json::from_str(&content).map_err(|e| CacheError::SerializationError {
            operation: format!("deserialize {}", path.display()),
            error: e.to_string(),
        })?;

    record.into_entry().map(Some)
}

/// Best-effort atomic write of one record; failures are logged
fn persist(root: &Path, entry: &CacheEntry, write_lock: &Mutex<()>) {
    let _guard = write_lock.lock().unwrap_or_else(|e| e.into_inner());
    if let Err(e) = write_record(root, entry) {
        warn!("Failed to persist cache entry for {}: {}", entry.url, e);
    }
}

fn write_record(root: &Path, entry: &CacheEntry) -> Result<(), CacheError> {
    let io_error = |operation: &str, e: std::io::Error| CacheError::IoError {
        operation: operation.to_string(),
        error: e.to_string(),
    };

    std::fs::create_dir_all(root).map_err(|e| io_error("create cache directory", e))?;

    let final_path = root.join(format!("{}.{RECORD_EXTENSION}", entry.key));

    // A superseding entry may already have been written by a later put
    if let Ok(existing) = std::fs::read_to_string(&final_path) {
        if let Ok(record) = serde_json::from_str::<CacheRecord>(&existing) {
            if record.timestamp > entry.timestamp_millis {
                return Ok(());
            }
        }
    }

    let content = serde_json::to_string(&CacheRecord::from_entry(entry)).map_err(|e| {
        CacheError::SerializationError {
            operation: "serialize cache record".to_string(),
            error: e.to_string(),
        }
    })?;

    let temp_path = root.join(format!(".{}.{}.tmp", entry.key, Uuid::new_v4()));
    std::fs::write(&temp_path, content).map_err(|e| io_error("write cache record", e))?;
    if let Err(e) = std::fs::rename(&temp_path, &final_path) {
        let _ = std::fs::remove_file(&temp_path);
        return Err(io_error("commit cache record", e));
    }

    debug!("Persisted cache entry {}", entry.key);
    Ok(())
}

/// Remove the cache root, refusing anything that escapes it
async fn remove_cache_root(root: &Path) -> Result<(), CacheError> {
    let containment = || CacheError::Containment {
        path: root.display().to_string(),
    };

    let metadata = match tokio::fs::symlink_metadata(root).await {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e) => {
            return Err(CacheError::IoError {
                operation: "inspect cache root".to_string(),
                error: e.to_string(),
            })
        }
    };

    if metadata.file_type().is_symlink() || !metadata.is_dir() {
        return Err(containment());
    }

    let canonical = tokio::fs::canonicalize(root)
        .await
        .map_err(|e| CacheError::IoError {
            operation: "resolve cache root".to_string(),
            error: e.to_string(),
        })?;
    let home = dirs::home_dir().and_then(|h| std::fs::canonicalize(h).ok());
    if canonical.parent().is_none() || home.as_deref() == Some(canonical.as_path()) {
        return Err(containment());
    }

    let io_error = |operation: &str, e: std::io::Error| CacheError::IoError {
        operation: operation.to_string(),
        error: e.to_string(),
    };

    let mut dir = tokio::fs::read_dir(&canonical)
        .await
        .map_err(|e| io_error("read cache directory", e))?;
    while let Some(item) = dir
        .next_entry()
        .await
        .map_err(|e| io_error("read directory entry", e))?
    {
        let path = item.path();
        if !path.starts_with(&canonical) {
            return Err(CacheError::Containment {
                path: path.display().to_string(),
            });
        }
        let file_type = item
            .file_type()
            .await
            .map_err(|e| io_error("inspect cache entry", e))?;
        if file_type.is_dir() {
            tokio::fs::remove_dir_all(&path)
                .await
                .map_err(|e| io_error("remove cache directory", e))?;
        } else {
            tokio::fs::remove_file(&path)
                .await
                .map_err(|e| io_error("remove cache record", e))?;
        }
    }

    tokio::fs::remove_dir(&canonical)
        .await
        .map_err(|e| io_error("remove cache root", e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn cache_in(dir: &TempDir) -> ModuleCache {
        ModuleCache::new(&CacheConfig::at(dir.path().join("modules")))
    }

    #[test]
    fn test_cache_key_is_deterministic() {
        assert_eq!(cache_key("esm.sh", "lodash"), cache_key("esm.sh", "lodash"));
        assert_ne!(cache_key("esm.sh", "lodash"), cache_key("unpkg", "lodash"));
        assert_eq!(cache_key("esm.sh", "lodash").len(), 64);
    }

    #[tokio::test]
    async fn test_put_then_get_from_memory() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        let key = cache_key("esm.sh", "lodash");

        cache.put(CacheEntry::new(&key, "https://esm.sh/lodash", b"export default 1".to_vec()));
        let entry = cache.get(&key).await.unwrap();
        assert_eq!(entry.content_text(), "export default 1");
    }

    #[tokio::test]
    async fn test_record_round_trips_across_instances() {
        let dir = TempDir::new().unwrap();
        let key = cache_key("esm.sh", "chalk");
        let original = CacheEntry::new(&key, "https://esm.sh/chalk", vec![0, 159, 146, 150])
            .with_transformed(b"exports.default = 1".to_vec());

        let cache = cache_in(&dir);
        cache.put(original.clone());
        cache.flush().await;

        let reopened = cache_in(&dir);
        let entry = reopened.get(&key).await.unwrap();
        assert_eq!(*entry, original);
    }

    #[tokio::test]
    async fn test_corrupt_record_is_absent() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        let key = cache_key("esm.sh", "broken");
        std::fs::create_dir_all(cache.root()).unwrap();
        std::fs::write(cache.root().join(format!("{key}.json")), "{not json").unwrap();

        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_stale_entries_are_misses() {
        let dir = TempDir::new().unwrap();
        let mut config = CacheConfig::at(dir.path().join("modules"));
        config.max_age = Some(Duration::from_secs(60));
        let cache = ModuleCache::new(&config);

        let key = cache_key("esm.sh", "old");
        let mut entry = CacheEntry::new(&key, "https://esm.sh/old", b"1".to_vec());
        entry.timestamp_millis -= 120_000;
        cache.put(entry);

        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_stats_enumerates_disk_once() {
        let dir = TempDir::new().unwrap();
        let writer = cache_in(&dir);
        writer.put(CacheEntry::new(cache_key("esm.sh", "a"), "https://esm.sh/a", vec![1; 10]));
        writer.put(CacheEntry::new(cache_key("esm.sh", "b"), "https://esm.sh/b", vec![1; 5]));
        writer.flush().await;

        let reader = cache_in(&dir);
        let stats = reader.stats().await;
        assert_eq!(stats.entry_count, 2);
        assert_eq!(stats.total_size_bytes, 15);
    }

    #[tokio::test]
    async fn test_listing_is_restartable_and_ordered() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        cache.put(CacheEntry::new(cache_key("esm.sh", "first"), "https://esm.sh/first", vec![1]));
        cache.put(CacheEntry::new(cache_key("esm.sh", "second"), "https://esm.sh/second", vec![1, 2]));

        let listing = cache.list().await;
        let first_pass: Vec<String> = listing.iter().map(|s| s.url).collect();
        let second_pass: Vec<String> = listing.iter().map(|s| s.url).collect();
        assert_eq!(first_pass, vec!["https://esm.sh/first", "https://esm.sh/second"]);
        assert_eq!(first_pass, second_pass);
    }

    #[tokio::test]
    async fn test_clear_then_stats_is_empty() {
        let dir = TempDir::new().unwrap();
        let cache = cache_in(&dir);
        cache.put(CacheEntry::new(cache_key("esm.sh", "x"), "https://esm.sh/x", vec![1, 2, 3]));

        cache.clear().await.unwrap();
        assert!(!cache.root().exists());
        assert_eq!(cache.stats().await.entry_count, 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_clear_refuses_symlinked_root() {
        let dir = TempDir::new().unwrap();
        let outside = dir.path().join("outside");
        std::fs::create_dir_all(&outside).unwrap();
        std::fs::write(outside.join("keep.txt"), "keep").unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink(&outside, &link).unwrap();

        let cache = ModuleCache::new(&CacheConfig::at(&link));
        let result = cache.clear().await;
        assert!(matches!(result, Err(CacheError::Containment { .. })));
        assert!(outside.join("keep.txt").exists());
    }
}
