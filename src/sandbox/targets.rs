use crate::sandbox::error::HostError;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Location of the configuration file, relative to the working directory
pub const CONFIG_FILE: &str = ".rustle/config.yaml";

/// A configured remote destination, as exposed to scripts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub name: String,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: String,
    #[serde(flatten)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

fn default_kind() -> String {
    "ssh".to_string()
}

/// Read-only access to configured targets
pub trait TargetProvider: Send + Sync {
    fn list(&self) -> Vec<Target>;

    fn get(&self, name: &str) -> Option<Target> {
        self.list().into_iter().find(|t| t.name == name)
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    targets: IndexMap<String, TargetProperties>,
}

#[derive(Debug, Deserialize)]
struct TargetProperties {
    #[serde(rename = "type", default = "default_kind")]
    kind: String,
    #[serde(flatten)]
    properties: serde_json::Map<String, serde_json::Value>,
}

/// Targets from the `targets:` section of the YAML configuration file
#[derive(Debug, Clone, Default)]
pub struct YamlTargetProvider {
    targets: Vec<Target>,
}

impl YamlTargetProvider {
    pub fn default_path(cwd: &Path) -> PathBuf {
        cwd.join(CONFIG_FILE)
    }

    /// Load targets; a missing file yields an empty list
    pub fn load(path: &Path) -> Result<Self, HostError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(HostError::io("read config", &path.display().to_string(), e)),
        };
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self, HostError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let config: ConfigFile =
            serde_yaml::from_str(content).map_err(|e| HostError::Targets(e.to_string()))?;

        let targets = config
            .targets
            .into_iter()
            .map(|(name, props)| Target {
                name,
                kind: props.kind,
                properties: props.properties,
            })
            .collect();

        Ok(Self { targets })
    }
}

impl TargetProvider for YamlTargetProvider {
    fn list(&self) -> Vec<Target> {
        self.targets.clone()
    }
}
