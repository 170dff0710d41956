//! Process-wide settings loaded from YAML with environment overrides.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::secrets::SecretSource;

/// Which execution backend carries jobs from submission to a worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Volatile job map, one task per job, lost on restart.
    #[default]
    InProcess,
    /// SQLite-backed job store and queue drained by a worker pool.
    Durable,
}

impl std::str::FromStr for ExecutionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "in_process" | "inprocess" | "memory" => Ok(Self::InProcess),
            "durable" | "queue" => Ok(Self::Durable),
            other => Err(format!("unknown execution mode '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AppConfig {
    #[serde(default)]
    pub mode: ExecutionMode,

    /// Simulates webhook deliveries and sync engine calls instead of
    /// performing them.
    #[serde(default)]
    pub dev_mode: bool,

    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub git: GitSettings,

    #[serde(default)]
    pub templates: TemplateSettings,

    #[serde(default)]
    pub sync: SyncSettings,

    #[serde(default)]
    pub webhook: WebhookDefaults,

    #[serde(default)]
    pub workers: WorkerSettings,

    #[serde(default)]
    pub retry: RetryPolicy,

    #[serde(default)]
    pub in_process: InProcessSettings,

    #[serde(default)]
    pub logging: LoggingSettings,

    /// Optional YAML file with a `resource_types:` map layered over the
    /// built-in registrations.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_types_file: Option<PathBuf>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::default(),
            dev_mode: false,
            database: DatabaseSettings::default(),
            git: GitSettings::default(),
            templates: TemplateSettings::default(),
            sync: SyncSettings::default(),
            webhook: WebhookDefaults::default(),
            workers: WorkerSettings::default(),
            retry: RetryPolicy::default(),
            in_process: InProcessSettings::default(),
            logging: LoggingSettings::default(),
            resource_types_file: None,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// Defaults to `~/.tenantops/data/tenantops.db`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitSettings {
    /// Root for local working copies. Defaults to `~/.tenantops/repos`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    #[serde(default = "default_user_name")]
    pub user_name: String,

    #[serde(default = "default_user_email")]
    pub user_email: String,

    #[serde(default)]
    pub auth: GitAuthSettings,

    /// Upper bound for any network-facing git command.
    #[serde(default = "default_git_timeout")]
    pub timeout_secs: u64,
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            cache_dir: None,
            user_name: default_user_name(),
            user_email: default_user_email(),
            auth: GitAuthSettings::default(),
            timeout_secs: default_git_timeout(),
        }
    }
}

impl GitSettings {
    pub fn cache_root(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(|| {
            tenantops_home()
                .map(|home| home.join("repos"))
                .unwrap_or_else(|| std::env::temp_dir().join("tenantops-repos"))
        })
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_user_name() -> String {
    "tenantops".to_string()
}

fn default_user_email() -> String {
    "tenantops@localhost".to_string()
}

fn default_git_timeout() -> u64 {
    120
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitAuthSettings {
    #[serde(default, rename = "type")]
    pub auth_type: GitAuthType,

    #[serde(default)]
    pub token: SecretSource,

    /// Path to the SSH private key. Defaults to `~/.ssh/id_ed25519`.
    #[serde(default)]
    pub ssh_key_path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum GitAuthType {
    #[default]
    None,
    Token,
    SshKey,
}

/// Where manifest templates come from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSettings {
    /// Git repository holding `<resource_type>/<flavor>.yaml` templates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,

    #[serde(default = "default_branch")]
    pub branch: String,

    /// Local template directory, used when no repository is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_dir: Option<PathBuf>,
}

impl Default for TemplateSettings {
    fn default() -> Self {
        Self {
            repo_url: None,
            branch: default_branch(),
            local_dir: None,
        }
    }
}

pub(crate) fn default_branch() -> String {
    "main".to_string()
}

/// Connection settings for the reconciliation engine (Argo CD).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Bearer token. Takes precedence over username/password.
    #[serde(default)]
    pub token: SecretSource,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default)]
    pub password: SecretSource,

    #[serde(default = "default_project")]
    pub project: String,

    #[serde(default = "default_destination_server")]
    pub destination_server: String,

    #[serde(default = "default_sync_timeout")]
    pub timeout_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            url: None,
            token: SecretSource::default(),
            username: None,
            password: SecretSource::default(),
            project: default_project(),
            destination_server: default_destination_server(),
            timeout_secs: default_sync_timeout(),
        }
    }
}

fn default_project() -> String {
    "default".to_string()
}

fn default_destination_server() -> String {
    "https://kubernetes.default.svc".to_string()
}

fn default_sync_timeout() -> u64 {
    30
}

/// Defaults applied to built-in webhook registrations and delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookDefaults {
    #[serde(default = "default_webhook_timeout")]
    pub timeout_secs: u64,

    #[serde(default = "default_webhook_retries")]
    pub retries: u32,

    /// Unit of the `2^attempt` backoff between delivery attempts.
    #[serde(default = "default_backoff_unit")]
    pub backoff_unit_ms: u64,
}

impl Default for WebhookDefaults {
    fn default() -> Self {
        Self {
            timeout_secs: default_webhook_timeout(),
            retries: default_webhook_retries(),
            backoff_unit_ms: default_backoff_unit(),
        }
    }
}

impl WebhookDefaults {
    pub fn backoff_unit(&self) -> Duration {
        Duration::from_millis(self.backoff_unit_ms)
    }
}

pub(crate) fn default_webhook_timeout() -> u64 {
    30
}

pub(crate) fn default_webhook_retries() -> u32 {
    3
}

fn default_backoff_unit() -> u64 {
    1000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerSettings {
    /// Number of durable queue consumers. Defaults to the CPU count.
    #[serde(default = "default_worker_count")]
    pub count: usize,

    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// How long a leased queue entry stays invisible to other workers.
    #[serde(default = "default_lease")]
    pub lease_secs: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            count: default_worker_count(),
            poll_interval_ms: default_poll_interval(),
            lease_secs: default_lease(),
        }
    }
}

impl WorkerSettings {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn lease(&self) -> Duration {
        Duration::from_secs(self.lease_secs)
    }
}

fn default_worker_count() -> usize {
    num_cpus::get().max(1)
}

fn default_poll_interval() -> u64 {
    500
}

fn default_lease() -> u64 {
    300
}

/// Bounded exponential retry for transient job failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[serde(default = "default_base_delay")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay_ms: default_base_delay(),
            max_delay_ms: default_max_delay(),
        }
    }
}

impl RetryPolicy {
    /// Countdown before retrying after the given (1-based) failed attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self.base_delay_ms.saturating_mul(1u64 << exponent);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }

    /// Whether another execution is allowed after `attempts` have run.
    pub fn allows_retry(&self, attempts: u32) -> bool {
        attempts <= self.max_retries
    }
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> u64 {
    30_000
}

fn default_max_delay() -> u64 {
    600_000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InProcessSettings {
    /// Pause between submission and the first execution attempt.
    #[serde(default = "default_simulated_latency")]
    pub simulated_latency_ms: u64,
}

impl Default for InProcessSettings {
    fn default() -> Self {
        Self {
            simulated_latency_ms: default_simulated_latency(),
        }
    }
}

impl InProcessSettings {
    pub fn simulated_latency(&self) -> Duration {
        Duration::from_millis(self.simulated_latency_ms)
    }
}

fn default_simulated_latency() -> u64 {
    2000
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Returns `~/.tenantops`.
pub fn tenantops_home() -> Option<PathBuf> {
    dirs::home_dir().map(|h| h.join(".tenantops"))
}

impl AppConfig {
    /// Loads the config file (if any), then applies environment overrides
    /// and validates the result.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadFile {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_yaml(&content)
    }

    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Applies overrides from a variable lookup (normally the process
    /// environment).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(mode) = get("TENANTOPS_MODE") {
            self.mode = mode.parse().map_err(|_| ConfigError::InvalidEnv {
                name: "TENANTOPS_MODE".to_string(),
                value: mode.clone(),
            })?;
        }
        if let Some(dev) = get("TENANTOPS_DEV_MODE") {
            self.dev_mode = parse_bool("TENANTOPS_DEV_MODE", &dev)?;
        }
        if let Some(path) = get("TENANTOPS_DATABASE_PATH") {
            self.database.path = Some(PathBuf::from(path));
        }
        if let Some(url) = get("TEMPLATE_REPO_URL") {
            self.templates.repo_url = Some(url);
        }
        if let Some(branch) = get("TEMPLATE_REPO_BRANCH") {
            self.templates.branch = branch;
        }
        if get("GIT_TOKEN").is_some() {
            self.git.auth.auth_type = GitAuthType::Token;
            self.git.auth.token = SecretSource::from_env("GIT_TOKEN");
        }
        if let Some(name) = get("GIT_USERNAME") {
            self.git.user_name = name;
        }
        if let Some(url) = get("ARGOCD_URL") {
            self.sync.url = Some(url);
            self.sync.enabled = true;
        }
        if get("ARGOCD_TOKEN").is_some() {
            self.sync.token = SecretSource::from_env("ARGOCD_TOKEN");
        }
        if let Some(user) = get("ARGOCD_USERNAME") {
            self.sync.username = Some(user);
        }
        if get("ARGOCD_PASSWORD").is_some() {
            self.sync.password = SecretSource::from_env("ARGOCD_PASSWORD");
        }
        if let Some(timeout) = get("WEBHOOK_TIMEOUT") {
            self.webhook.timeout_secs = parse_number("WEBHOOK_TIMEOUT", &timeout)?;
        }
        if let Some(retries) = get("WEBHOOK_RETRIES") {
            self.webhook.retries = parse_number("WEBHOOK_RETRIES", &retries)?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers.count == 0 {
            return Err(ConfigError::Validation {
                message: "workers.count must be at least 1".to_string(),
            });
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Validation {
                message: "retry.base_delay_ms must not exceed retry.max_delay_ms".to_string(),
            });
        }
        if self.sync.enabled && !self.dev_mode && self.sync.url.is_none() {
            return Err(ConfigError::Validation {
                message: "sync.url is required when sync is enabled".to_string(),
            });
        }
        if self.mode == ExecutionMode::Durable && self.database_path().is_none() {
            return Err(ConfigError::Validation {
                message: "durable mode needs database.path (no home directory found)".to_string(),
            });
        }
        if self.templates.repo_url.is_some() && self.templates.local_dir.is_some() {
            log::warn!("Both templates.repo_url and templates.local_dir set; using the repository");
        }
        Ok(())
    }

    pub fn database_path(&self) -> Option<PathBuf> {
        self.database
            .path
            .clone()
            .or_else(|| tenantops_home().map(|home| home.join("data").join("tenantops.db")))
    }
}

fn parse_bool(name: &str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidEnv {
            name: name.to_string(),
            value: value.to_string(),
        }),
    }
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
        name: name.to_string(),
        value: value.to_string(),
    })
}
