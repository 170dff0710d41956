//! Per-resource-type registration: target repository, path rules, webhook.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::settings::{default_branch, default_webhook_retries, default_webhook_timeout};
use super::WebhookDefaults;
use crate::error::ConfigError;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookMode {
    /// One delivery when the job reaches a terminal state.
    #[default]
    Single,
    /// One delivery per pipeline stage.
    Staged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub url: String,

    #[serde(default)]
    pub mode: WebhookMode,

    /// Per-call timeout in seconds.
    #[serde(default = "default_webhook_timeout")]
    pub timeout: u64,

    /// Total delivery attempts.
    #[serde(default = "default_webhook_retries")]
    pub retries: u32,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: String::new(),
            mode: WebhookMode::Single,
            timeout: default_webhook_timeout(),
            retries: default_webhook_retries(),
        }
    }
}

impl WebhookConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    fn builtin(enabled: bool, url: &str, mode: WebhookMode, defaults: &WebhookDefaults) -> Self {
        Self {
            enabled,
            url: url.to_string(),
            mode,
            timeout: defaults.timeout_secs,
            retries: defaults.retries,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceTypeConfig {
    /// Filled from the map key when loaded from a file.
    #[serde(default)]
    pub name: String,

    /// Deployment repository manifests are committed to.
    pub repo_url: String,

    #[serde(default = "default_branch")]
    pub branch: String,

    /// Template directory; defaults to the type name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template_dir: Option<String>,

    /// Whether manifest paths include the cluster segment.
    #[serde(default = "default_true")]
    pub cluster_aware: bool,

    #[serde(default)]
    pub webhook: WebhookConfig,

    /// Flavors published for this type.
    #[serde(default = "default_flavors")]
    pub flavors: Vec<String>,
}

fn default_true() -> bool {
    true
}

fn default_flavors() -> Vec<String> {
    vec!["custom".to_string()]
}

impl ResourceTypeConfig {
    pub fn new(name: impl Into<String>, repo_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            repo_url: repo_url.into(),
            branch: default_branch(),
            template_dir: None,
            cluster_aware: true,
            webhook: WebhookConfig::default(),
            flavors: default_flavors(),
        }
    }

    pub fn template_dir(&self) -> &str {
        self.template_dir
            .as_deref()
            .map(|dir| dir.trim_end_matches('/'))
            .filter(|dir| !dir.is_empty())
            .unwrap_or(self.name.as_str())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.name.is_empty() {
            return Err(ConfigError::Validation {
                message: "resource type name must not be empty".to_string(),
            });
        }
        if self.repo_url.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: format!("resource type '{}' has no repo_url", self.name),
            });
        }
        if self.webhook.enabled && self.webhook.url.trim().is_empty() {
            return Err(ConfigError::Validation {
                message: format!("resource type '{}' enables a webhook without url", self.name),
            });
        }
        if self.webhook.retries == 0 {
            return Err(ConfigError::Validation {
                message: format!("resource type '{}' webhook retries must be >= 1", self.name),
            });
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct ResourceTypesFile {
    #[serde(default)]
    resource_types: BTreeMap<String, ResourceTypeConfig>,
}

/// Registry of resource types.
///
/// Entries are swapped whole: a job holds the `Arc` it looked up for the
/// duration of its execution, so re-registration never changes a config
/// under a running job.
#[derive(Debug, Default)]
pub struct ResourceTypeRegistry {
    types: RwLock<HashMap<String, Arc<ResourceTypeConfig>>>,
}

impl ResourceTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry seeded with the stock resource types.
    pub fn builtin(defaults: &WebhookDefaults) -> Self {
        let registry = Self::new();
        for config in builtin_types(defaults) {
            registry.insert(config);
        }
        registry
    }

    pub fn get(&self, name: &str) -> Option<Arc<ResourceTypeConfig>> {
        let types = self.types.read().unwrap_or_else(|poisoned| {
            log::warn!("ResourceTypeRegistry lock was poisoned, recovering");
            poisoned.into_inner()
        });
        types.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let types = self.types.read().unwrap_or_else(|poisoned| poisoned.into_inner());
        let mut names: Vec<String> = types.keys().cloned().collect();
        names.sort();
        names
    }

    /// Validates and registers a type, replacing any previous registration.
    pub fn register(&self, config: ResourceTypeConfig) -> Result<(), ConfigError> {
        config.validate()?;
        self.insert(config);
        Ok(())
    }

    fn insert(&self, config: ResourceTypeConfig) {
        let mut types = self.types.write().unwrap_or_else(|poisoned| {
            log::warn!("ResourceTypeRegistry lock was poisoned, recovering");
            poisoned.into_inner()
        });
        log::debug!("Registered resource type '{}'", config.name);
        types.insert(config.name.clone(), Arc::new(config));
    }

    /// Loads a `resource_types:` map from YAML and registers every entry.
    pub fn load_from_file(&self, path: &Path) -> Result<usize, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        let count = self.load_from_str(&content)?;
        log::info!(
            "Loaded {} resource type(s) from {}",
            count,
            path.display()
        );
        Ok(count)
    }

    pub fn load_from_str(&self, content: &str) -> Result<usize, ConfigError> {
        let file: ResourceTypesFile = serde_yaml::from_str(content)?;
        let mut loaded = Vec::with_capacity(file.resource_types.len());
        for (name, mut config) in file.resource_types {
            config.name = name;
            config.validate()?;
            loaded.push(config);
        }
        let count = loaded.len();
        for config in loaded {
            self.insert(config);
        }
        Ok(count)
    }
}

fn builtin_types(defaults: &WebhookDefaults) -> Vec<ResourceTypeConfig> {
    let sizes = ["small", "medium", "large", "custom"];
    let flavors = |list: &[&str]| list.iter().map(|f| f.to_string()).collect::<Vec<_>>();

    vec![
        ResourceTypeConfig {
            template_dir: Some("namespaces".to_string()),
            webhook: WebhookConfig::builtin(
                false,
                "https://webhook.example.com/namespace",
                WebhookMode::Single,
                defaults,
            ),
            flavors: flavors(&sizes),
            ..ResourceTypeConfig::new(
                "namespace",
                "https://github.com/org/namespace-resources-gitops.git",
            )
        },
        ResourceTypeConfig {
            template_dir: Some("vms".to_string()),
            cluster_aware: false,
            webhook: WebhookConfig::builtin(
                true,
                "https://webhook.example.com/vm",
                WebhookMode::Single,
                defaults,
            ),
            flavors: flavors(&sizes),
            ..ResourceTypeConfig::new("vm", "https://github.com/org/vm-resources-gitops.git")
        },
        ResourceTypeConfig {
            template_dir: Some("apps".to_string()),
            webhook: WebhookConfig::builtin(
                true,
                "https://webhook.example.com/app",
                WebhookMode::Single,
                defaults,
            ),
            flavors: flavors(&sizes),
            ..ResourceTypeConfig::new("app", "https://github.com/org/app-resources-gitops.git")
        },
        ResourceTypeConfig {
            template_dir: Some("databases".to_string()),
            cluster_aware: false,
            webhook: WebhookConfig::builtin(
                true,
                "https://webhook.example.com/database",
                WebhookMode::Single,
                defaults,
            ),
            flavors: flavors(&sizes),
            ..ResourceTypeConfig::new(
                "database",
                "https://github.com/org/database-resources-gitops.git",
            )
        },
        ResourceTypeConfig {
            template_dir: Some("osimage".to_string()),
            cluster_aware: false,
            webhook: WebhookConfig::builtin(
                true,
                "https://webhook.example.com/osimage",
                WebhookMode::Staged,
                defaults,
            ),
            flavors: flavors(&["ubuntu-small", "rhel-custom", "custom"]),
            ..ResourceTypeConfig::new(
                "osimage",
                "https://github.com/org/os-image-builds-gitops.git",
            )
        },
        ResourceTypeConfig {
            template_dir: Some("misc".to_string()),
            webhook: WebhookConfig::builtin(
                true,
                "https://webhook.example.com/misc",
                WebhookMode::Single,
                defaults,
            ),
            flavors: flavors(&["dns-record", "certificate", "secret", "custom"]),
            ..ResourceTypeConfig::new("misc", "https://github.com/org/misc-infra-gitops.git")
        },
    ]
}
