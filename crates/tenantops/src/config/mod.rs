//! Configuration: process settings and the resource type registry.

pub mod resource_types;
pub mod settings;

pub use resource_types::{ResourceTypeConfig, ResourceTypeRegistry, WebhookConfig, WebhookMode};
pub use settings::{
    tenantops_home, AppConfig, DatabaseSettings, ExecutionMode, GitAuthSettings, GitAuthType,
    GitSettings, InProcessSettings, LoggingSettings, RetryPolicy, SyncSettings, TemplateSettings,
    WebhookDefaults, WorkerSettings,
};
