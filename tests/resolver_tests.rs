//! Module resolution through the two-tier cache

use async_trait::async_trait;
use rustle_script::modules::{
    cache_key, FetchError, FetchedModule, ModuleCache, ModuleFetcher, ModuleResolver,
    ResolveError,
};
use rustle_script::runtime::{CacheConfig, CdnConfig};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// In-memory CDN that counts requests per URL
#[derive(Default)]
struct CountingFetcher {
    delay: Option<Duration>,
    unreachable: bool,
    requests: Mutex<HashMap<String, usize>>,
}

impl CountingFetcher {
    fn total(&self) -> usize {
        self.requests.lock().unwrap().values().sum()
    }
}

#[async_trait]
impl ModuleFetcher for CountingFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedModule, FetchError> {
        *self
            .requests
            .lock()
            .unwrap()
            .entry(url.to_string())
            .or_default() += 1;
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.unreachable {
            return Err(FetchError::HttpError {
                url: url.to_string(),
                error: "connection refused".to_string(),
            });
        }
        Ok(FetchedModule {
            url: url.to_string(),
            content: format!("export default {:?};", url).into_bytes(),
        })
    }
}

fn resolver_at(root: &std::path::Path, fetcher: Arc<CountingFetcher>) -> ModuleResolver {
    let cache = Arc::new(ModuleCache::new(&CacheConfig::at(root)));
    ModuleResolver::new(CdnConfig::default(), cache, fetcher).unwrap()
}

#[tokio::test]
async fn test_second_resolution_is_a_cache_hit() {
    let dir = TempDir::new().unwrap();
    let fetcher = Arc::new(CountingFetcher::default());
    let resolver = resolver_at(dir.path(), fetcher.clone());

    let first = resolver.resolve("lodash").await.unwrap();
    let second = resolver.resolve("lodash").await.unwrap();

    assert_eq!(first.url(), "https://esm.sh/lodash");
    assert_eq!(first.content(), second.content());
    assert_eq!(fetcher.total(), 1);
}

#[tokio::test]
async fn test_disk_records_serve_a_new_process() {
    let dir = TempDir::new().unwrap();
    let fetcher = Arc::new(CountingFetcher::default());
    let resolver = resolver_at(dir.path(), fetcher.clone());
    resolver.resolve("chalk@5").await.unwrap();
    resolver.cache().flush().await;

    let restarted = resolver_at(dir.path(), fetcher.clone());
    let resolved = restarted.resolve("chalk@5").await.unwrap();
    assert_eq!(resolved.url(), "https://esm.sh/chalk@5");
    assert_eq!(fetcher.total(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_resolutions_share_one_fetch() {
    let dir = TempDir::new().unwrap();
    let fetcher = Arc::new(CountingFetcher {
        delay: Some(Duration::from_millis(50)),
        ..Default::default()
    });
    let resolver = Arc::new(resolver_at(dir.path(), fetcher.clone()));

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let resolver = resolver.clone();
            tokio::spawn(async move { resolver.resolve("zod").await })
        })
        .collect();

    for task in futures::future::join_all(tasks).await {
        assert!(task.unwrap().is_ok());
    }
    assert_eq!(fetcher.total(), 1);
}

#[tokio::test]
async fn test_preload_fetches_each_distinct_specifier_once() {
    let dir = TempDir::new().unwrap();
    let fetcher = Arc::new(CountingFetcher {
        delay: Some(Duration::from_millis(10)),
        ..Default::default()
    });
    let resolver = resolver_at(dir.path(), fetcher.clone());

    let specifiers: Vec<String> = ["lodash", "chalk", "lodash"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    let results = resolver.preload(&specifiers).await;

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].0, "lodash");
    assert_eq!(results[2].0, "lodash");
    assert!(results.iter().all(|(_, r)| r.is_ok()));
    assert_eq!(fetcher.total(), 2);
}

#[tokio::test]
async fn test_unreachable_providers_write_nothing() {
    let dir = TempDir::new().unwrap();
    let fetcher = Arc::new(CountingFetcher {
        unreachable: true,
        ..Default::default()
    });
    let resolver = resolver_at(dir.path(), fetcher.clone());

    match resolver.resolve("left-pad").await {
        Err(ResolveError::ModuleResolution {
            specifier,
            attempted,
        }) => {
            assert_eq!(specifier, "left-pad");
            assert_eq!(attempted, vec!["esm.sh", "jsdelivr", "unpkg", "skypack"]);
        }
        other => panic!("expected resolution failure, got {:?}", other.map(|m| m.url().to_string())),
    }
    resolver.cache().flush().await;

    assert_eq!(fetcher.total(), 4);
    assert_eq!(resolver.cache().stats().await.entry_count, 0);
}

#[tokio::test]
async fn test_corrupt_record_is_refetched_and_overwritten() {
    let dir = TempDir::new().unwrap();
    let key = cache_key("esm.sh", "dayjs");
    let record = dir.path().join(format!("{key}.json"));
    std::fs::write(&record, "{ not json").unwrap();

    let fetcher = Arc::new(CountingFetcher::default());
    let resolver = resolver_at(dir.path(), fetcher.clone());
    let resolved = resolver.resolve("dayjs").await.unwrap();
    resolver.cache().flush().await;

    assert_eq!(resolved.url(), "https://esm.sh/dayjs");
    assert_eq!(fetcher.total(), 1);

    let restarted = resolver_at(dir.path(), fetcher.clone());
    restarted.resolve("dayjs").await.unwrap();
    assert_eq!(fetcher.total(), 1);
    assert!(std::fs::read_to_string(&record).unwrap().contains("esm.sh/dayjs"));
}
