use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_DEBUG: &str = "RUSTLE_DEBUG";
pub const ENV_SCRIPT_MODE: &str = "RUSTLE_SCRIPT_MODE";
pub const ENV_CACHE_DIR: &str = "RUSTLE_CACHE_DIR";
pub const ENV_CDN: &str = "RUSTLE_CDN";
pub const ENV_CACHE_MAX_AGE: &str = "RUSTLE_CACHE_MAX_AGE";

/// Configuration for one script runtime instance
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RuntimeConfig {
    pub cache: CacheConfig,
    pub cdn: CdnConfig,
    pub watch: WatchConfig,
    pub debug: bool,
    /// Initialize the configuration layer so scripts see `targets`
    pub script_mode: bool,
    /// Transpile every script as TypeScript regardless of extension
    pub typescript: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub root: PathBuf,
    /// Entries older than this are treated as misses
    #[serde(with = "serde_duration_opt")]
    pub max_age: Option<Duration>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CdnProvider {
    pub name: String,
    /// URL template containing a `{specifier}` placeholder
    pub template: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CdnConfig {
    pub providers: Vec<CdnProvider>,
    pub preferred: String,
    #[serde(with = "serde_duration")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WatchConfig {
    #[serde(with = "serde_duration_millis")]
    pub debounce: Duration,
}

impl RuntimeConfig {
    /// Defaults overlaid with the process environment
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env(|name| std::env::var(name).ok());
        config
    }

    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup(ENV_DEBUG) {
            self.debug = is_truthy(&value);
        }
        if let Some(value) = lookup(ENV_SCRIPT_MODE) {
            self.script_mode = is_truthy(&value);
        }
        if let Some(dir) = lookup(ENV_CACHE_DIR).filter(|d| !d.trim().is_empty()) {
            self.cache.root = PathBuf::from(dir);
        }
        if let Some(cdn) = lookup(ENV_CDN).filter(|c| !c.trim().is_empty()) {
            self.cdn.preferred = cdn.trim().to_string();
        }
        if let Some(secs) = lookup(ENV_CACHE_MAX_AGE).and_then(|s| s.trim().parse::<u64>().ok()) {
            self.cache.max_age = Some(Duration::from_secs(secs));
        }
    }

    pub fn with_cache_dir(mut self, dir: Option<PathBuf>) -> Self {
        if let Some(dir) = dir {
            self.cache.root = dir;
        }
        self
    }

    pub fn with_preferred_cdn(mut self, cdn: Option<String>) -> Self {
        if let Some(cdn) = cdn {
            self.cdn.preferred = cdn;
        }
        self
    }
}

impl CacheConfig {
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            max_age: None,
        }
    }

    pub fn default_root() -> PathBuf {
        dirs::cache_dir()
            .map(|dir| dir.join("rustle-script").join("modules"))
            .unwrap_or_else(|| PathBuf::from(".rustle-cache").join("modules"))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self::at(Self::default_root())
    }
}

impl CdnProvider {
    pub fn new(name: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            template: template.into(),
        }
    }

    pub fn url_for(&self, specifier: &str) -> String {
        self.template.replace("{specifier}", specifier)
    }
}

impl CdnConfig {
    pub fn builtin_providers() -> Vec<CdnProvider> {
        vec![
            CdnProvider::new("esm.sh", "https://esm.sh/{specifier}"),
            CdnProvider::new("jsdelivr", "https://cdn.jsdelivr.net/npm/{specifier}/+esm"),
            CdnProvider::new("unpkg", "https://unpkg.com/{specifier}?module"),
            CdnProvider::new("skypack", "https://cdn.skypack.dev/{specifier}"),
        ]
    }

    pub fn provider(&self, name: &str) -> Option<&CdnProvider> {
        self.providers.iter().find(|p| p.name == name)
    }

    /// Preferred provider first, then the rest in list order
    pub fn attempt_order(&self) -> Vec<&CdnProvider> {
        let mut order: Vec<&CdnProvider> = self.provider(&self.preferred).into_iter().collect();
        order.extend(self.providers.iter().filter(|p| p.name != self.preferred));
        order
    }
}

impl Default for CdnConfig {
    fn default() -> Self {
        Self {
            providers: Self::builtin_providers(),
            preferred: "esm.sh".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(150),
        }
    }
}

pub fn is_truthy(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

mod serde_duration {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = u64::deserialize(deserializer)?;
        Ok(Duration::from_secs(secs))
    }
}

mod serde_duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

mod serde_duration_opt {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => Some(d.as_secs()).serialize(serializer),
            None => None::<u64>.serialize(serializer),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs_opt = Option::<u64>::deserialize(deserializer)?;
        Ok(secs_opt.map(Duration::from_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_attempt_order_starts_with_preferred() {
        let mut cdn = CdnConfig::default();
        cdn.preferred = "unpkg".to_string();
        let names: Vec<&str> = cdn.attempt_order().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["unpkg", "esm.sh", "jsdelivr", "skypack"]);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            (ENV_DEBUG, "yes"),
            (ENV_SCRIPT_MODE, "0"),
            (ENV_CACHE_DIR, "/tmp/rustle-cache"),
            (ENV_CDN, "jsdelivr"),
            (ENV_CACHE_MAX_AGE, "60"),
        ]
        .into_iter()
        .collect();

        let mut config = RuntimeConfig::default();
        config.apply_env(|name| env.get(name).map(|v| v.to_string()));

        assert!(config.debug);
        assert!(!config.script_mode);
        assert_eq!(config.cache.root, PathBuf::from("/tmp/rustle-cache"));
        assert_eq!(config.cdn.preferred, "jsdelivr");
        assert_eq!(config.cache.max_age, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_provider_url_template() {
        let cdn = CdnConfig::default();
        let jsdelivr = cdn.provider("jsdelivr").unwrap();
        assert_eq!(
            jsdelivr.url_for("lodash@4"),
            "https://cdn.jsdelivr.net/npm/lodash@4/+esm"
        );
    }

    #[test]
    fn test_config_round_trips_through_yaml() {
        let config = RuntimeConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: RuntimeConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.watch.debounce, Duration::from_millis(150));
        assert_eq!(parsed.cdn.providers.len(), 4);
    }
}
