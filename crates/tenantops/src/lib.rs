pub mod config;
pub mod db;
pub mod error;
pub mod gitops;
pub mod jobs;
pub mod keyed_lock;
pub mod logging;
pub mod notify;
pub mod provisioner;
pub mod render;
pub mod resources;
pub mod secrets;
pub mod sync;

pub use config::{
    AppConfig, ExecutionMode, ResourceTypeConfig, ResourceTypeRegistry, WebhookConfig,
};
pub use db::Database;
pub use error::{ConfigError, Result, TenantOpsError};
pub use gitops::{GitOpsError, ManifestDeployer, ManifestTarget, RepositoryCache};
pub use jobs::{
    Job, JobError, JobManager, JobOperation, JobStatus, JobSubmission, JobUpdate, WorkerPool,
};
pub use logging::init_logging;
pub use notify::WebhookNotifier;
pub use provisioner::{ProvisionError, ProvisionRequest, Provisioner, ResourceStatus};
pub use render::{ManifestRenderer, RenderError, TemplateSource};
pub use resources::{KindRegistry, Resource, ResourceKind, Spec};
pub use secrets::{resolve_secret, resolve_secret_optional, SecretError, SecretSource};
pub use sync::{AppStatus, SyncClient};
