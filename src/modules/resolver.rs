use crate::modules::cache::{cache_key, CacheEntry, ModuleCache};
use crate::modules::error::ResolveError;
use crate::modules::fetch::ModuleFetcher;
use crate::runtime::config::CdnConfig;
use dashmap::DashMap;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Provider name used for specifiers that are already absolute URLs
pub const DIRECT_URL_PROVIDER: &str = "url";

/// Source text of a resolved remote module
#[derive(Debug, Clone)]
pub struct ResolvedModule {
    pub entry: Arc<CacheEntry>,
}

impl ResolvedModule {
    pub fn url(&self) -> &str {
        &self.entry.url
    }

    pub fn content(&self) -> String {
        self.entry.content_text()
    }

    pub fn transformed(&self) -> Option<String> {
        self.entry.transformed_text()
    }
}

/// Resolves bare specifiers through an ordered list of CDN providers, backed by the module cache
pub struct ModuleResolver {
    cdn: CdnConfig,
    cache: Arc<ModuleCache>,
    fetcher: Arc<dyn ModuleFetcher>,
    in_flight: DashMap<String, Arc<Mutex<()>>>,
}

impl ModuleResolver {
    pub fn new(
        cdn: CdnConfig,
        cache: Arc<ModuleCache>,
        fetcher: Arc<dyn ModuleFetcher>,
    ) -> Result<Self, ResolveError> {
        if cdn.provider(&cdn.preferred).is_none() {
            return Err(ResolveError::UnknownProvider {
                name: cdn.preferred.clone(),
            });
        }

        Ok(Self {
            cdn,
            cache,
            fetcher,
            in_flight: DashMap::new(),
        })
    }

    pub fn preferred(&self) -> &str {
        &self.cdn.preferred
    }

    pub fn cache(&self) -> &Arc<ModuleCache> {
        &self.cache
    }

    pub fn key_for(&self, specifier: &str) -> String {
        if is_url(specifier) {
            cache_key(DIRECT_URL_PROVIDER, specifier)
        } else {
            cache_key(&self.cdn.preferred, specifier)
        }
    }

    pub async fn resolve(&self, specifier: &str) -> Result<ResolvedModule, ResolveError> {
        let key = self.key_for(specifier);

        if let Some(entry) = self.cache.get(&key).await {
            debug!("Module cache hit: {}", specifier);
            return Ok(ResolvedModule { entry });
        }

        let gate = self
            .in_flight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();

        let result = {
            let _guard = gate.lock().await;

            // Another resolution may have filled the cache while we waited
            match self.cache.get(&key).await {
                Some(entry) => {
                    debug!("Module resolved by concurrent request: {}", specifier);
                    Ok(ResolvedModule { entry })
                }
                None => self.fetch_from_providers(specifier, &key).await,
            }
        };

        self.in_flight
            .remove_if(&key, |_, g| Arc::strong_count(g) <= 2);
        result
    }

    /// Resolve many specifiers concurrently, keeping input order
    pub async fn preload(
        &self,
        specifiers: &[String],
    ) -> Vec<(String, Result<ResolvedModule, ResolveError>)> {
        let results = join_all(specifiers.iter().map(|s| self.resolve(s))).await;
        specifiers.iter().cloned().zip(results).collect()
    }

    /// Supersede a resolved entry with its lowered form
    pub fn store_transformed(&self, resolved: &ResolvedModule, transformed: &str) -> ResolvedModule {
        let entry = resolved.entry.with_transformed(transformed.as_bytes().to_vec());
        ResolvedModule {
            entry: self.cache.put(entry),
        }
    }

    async fn fetch_from_providers(
        &self,
        specifier: &str,
        key: &str,
    ) -> Result<ResolvedModule, ResolveError> {
        let attempts: Vec<(String, String)> = if is_url(specifier) {
            vec![(DIRECT_URL_PROVIDER.to_string(), specifier.to_string())]
        } else {
            self.cdn
                .attempt_order()
                .into_iter()
                .map(|p| (p.name.clone(), p.url_for(specifier)))
                .collect()
        };

        let mut attempted = Vec::new();
        for (provider, url) in attempts {
            attempted.push(provider.clone());
            match self.fetcher.fetch(&url).await {
                Ok(fetched) => {
                    info!("Fetched {} from {}", specifier, provider);
                    let entry = self
                        .cache
                        .put(CacheEntry::new(key, fetched.url, fetched.content));
                    return Ok(ResolvedModule { entry });
                }
                Err(e) => {
                    warn!("Provider {} failed for {}: {}", provider, specifier, e);
                }
            }
        }

        Err(ResolveError::ModuleResolution {
            specifier: specifier.to_string(),
            attempted,
        })
    }
}

fn is_url(specifier: &str) -> bool {
    specifier.starts_with("https://") || specifier.starts_with("http://")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::error::FetchError;
    use crate::modules::fetch::FetchedModule;
    use crate::runtime::config::CacheConfig;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct ScriptedFetcher {
        failing_hosts: Vec<&'static str>,
        requests: StdMutex<Vec<String>>,
    }

    #[async_trait]
    impl ModuleFetcher for ScriptedFetcher {
        async fn fetch(&self, url: &str) -> Result<FetchedModule, FetchError> {
            self.requests.lock().unwrap().push(url.to_string());
            if self.failing_hosts.iter().any(|h| url.contains(h)) {
                return Err(FetchError::Status {
                    url: url.to_string(),
                    status: 503,
                });
            }
            Ok(FetchedModule {
                url: url.to_string(),
                content: format!("export default {:?};", url).into_bytes(),
            })
        }
    }

    fn resolver(dir: &TempDir, fetcher: Arc<ScriptedFetcher>) -> ModuleResolver {
        let cache = Arc::new(ModuleCache::new(&CacheConfig::at(dir.path())));
        ModuleResolver::new(CdnConfig::default(), cache, fetcher).unwrap()
    }

    #[tokio::test]
    async fn test_falls_back_to_next_provider() {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(ScriptedFetcher {
            failing_hosts: vec!["esm.sh"],
            ..Default::default()
        });
        let resolver = resolver(&dir, fetcher.clone());

        let resolved = resolver.resolve("lodash").await.unwrap();
        assert_eq!(resolved.url(), "https://cdn.jsdelivr.net/npm/lodash/+esm");
        assert_eq!(fetcher.requests.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_all_providers_failing_names_attempts() {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(ScriptedFetcher {
            failing_hosts: vec!["esm.sh", "jsdelivr", "unpkg", "skypack"],
            ..Default::default()
        });
        let resolver = resolver(&dir, fetcher);

        match resolver.resolve("missing-pkg").await {
            Err(ResolveError::ModuleResolution {
                specifier,
                attempted,
            }) => {
                assert_eq!(specifier, "missing-pkg");
                assert_eq!(attempted, vec!["esm.sh", "jsdelivr", "unpkg", "skypack"]);
            }
            other => panic!("expected resolution error, got {other:?}"),
        }
        assert_eq!(resolver.cache().stats().await.entry_count, 0);
    }

    #[tokio::test]
    async fn test_direct_urls_skip_providers() {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(ScriptedFetcher::default());
        let resolver = resolver(&dir, fetcher.clone());

        resolver.resolve("https://example.com/mod.js").await.unwrap();
        assert_eq!(
            *fetcher.requests.lock().unwrap(),
            vec!["https://example.com/mod.js".to_string()]
        );
    }

    #[test]
    fn test_unknown_preferred_provider_is_rejected() {
        let dir = TempDir::new().unwrap();
        let cache = Arc::new(ModuleCache::new(&CacheConfig::at(dir.path())));
        let mut cdn = CdnConfig::default();
        cdn.preferred = "nowhere".to_string();
        let result = ModuleResolver::new(cdn, cache, Arc::new(ScriptedFetcher::default()));
        assert!(matches!(result, Err(ResolveError::UnknownProvider { .. })));
    }
}
