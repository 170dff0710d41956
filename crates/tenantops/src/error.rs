use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TenantOpsError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("GitOps error: {0}")]
    GitOps(#[from] crate::gitops::GitOpsError),

    #[error("Render error: {0}")]
    Render(#[from] crate::render::RenderError),

    #[error("Provisioning error: {0}")]
    Provision(#[from] crate::provisioner::ProvisionError),

    #[error("Secret error: {0}")]
    Secret(#[from] crate::secrets::SecretError),

    #[error("Logging setup failed: {0}")]
    Logging(String),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("Invalid value '{value}' for environment variable {name}")]
    InvalidEnv { name: String, value: String },

    #[error("Config validation failed: {message}")]
    Validation { message: String },
}

pub type Result<T> = std::result::Result<T, TenantOpsError>;
