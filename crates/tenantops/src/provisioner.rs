//! The provisioning facade: validates requests, reserves resource
//! identities, submits jobs and answers status queries.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{tenantops_home, AppConfig, ExecutionMode, ResourceTypeRegistry};
use crate::db::{Database, DatabaseError};
use crate::error::ConfigError;
use crate::gitops::{
    validate_segment, GitOpsError, ManifestDeployer, RepositoryCache, TenantManifest,
};
use crate::jobs::{
    ExecutionBackend, InProcessBackend, Job, JobError, JobFilter, JobLedger, JobManager,
    JobOperation, JobProcessor, JobStore, JobSubmission, MemoryJobStore, ProcessorDeps,
    QueueBackend, SqliteJobStore, WorkerPool,
};
use crate::notify::WebhookNotifier;
use crate::render::{ManifestRenderer, TemplateSource};
use crate::resources::{
    KindRegistry, Reservation, Resource, ResourceStore, Spec, STATUS_CREATING, STATUS_DELETING,
    STATUS_UPDATING,
};
use crate::sync::{client_from_settings, AppStatus, SyncClient, SyncError};

#[derive(Error, Debug)]
pub enum ProvisionError {
    /// Rejected before any job was created.
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Store error: {0}")]
    Store(#[from] DatabaseError),

    #[error("Job error: {0}")]
    Job(#[from] JobError),

    #[error("Sync engine setup failed: {0}")]
    Sync(#[from] SyncError),

    #[error("GitOps error: {0}")]
    GitOps(#[from] GitOpsError),
}

/// A caller's request to create, update or delete one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionRequest {
    pub tenant_id: String,
    #[serde(default)]
    pub cluster_id: Option<String>,
    pub resource_type: String,
    pub name: String,
    pub operation: JobOperation,
    #[serde(default)]
    pub spec: Spec,
}

/// A resource record plus what the sync engine reports for it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceStatus {
    pub resource: Resource,
    pub sync: Option<AppStatus>,
}

pub struct Provisioner {
    config: AppConfig,
    database: Database,
    resource_types: Arc<ResourceTypeRegistry>,
    kinds: Arc<KindRegistry>,
    resources: ResourceStore,
    deployer: Arc<ManifestDeployer>,
    sync: Arc<dyn SyncClient>,
    processor: Arc<JobProcessor>,
    manager: JobManager,
    in_process: Option<Arc<InProcessBackend>>,
}

impl Provisioner {
    /// Wires every component from configuration.
    pub fn from_config(config: AppConfig) -> Result<Self, ProvisionError> {
        let database = match config.database_path() {
            Some(path) => Database::open(&path)?,
            None if config.mode == ExecutionMode::InProcess => Database::open_in_memory()?,
            None => {
                return Err(ConfigError::Validation {
                    message: "durable mode needs a database path".to_string(),
                }
                .into())
            }
        };

        let resource_types = Arc::new(ResourceTypeRegistry::builtin(&config.webhook));
        if let Some(path) = &config.resource_types_file {
            resource_types.load_from_file(path)?;
        }

        let kinds = Arc::new(KindRegistry::builtin());
        let cache = Arc::new(RepositoryCache::from_settings(&config.git));
        let renderer = Arc::new(ManifestRenderer::new(
            template_source(&config),
            Arc::clone(&cache),
            Arc::clone(&kinds),
        ));
        let deployer = Arc::new(ManifestDeployer::new(cache));
        let sync = client_from_settings(&config.sync, config.dev_mode)?;
        let notifier = WebhookNotifier::new(config.dev_mode, config.webhook.backoff_unit());
        let resources = ResourceStore::new(database.clone());

        let store: Arc<dyn JobStore> = match config.mode {
            ExecutionMode::InProcess => Arc::new(MemoryJobStore::new()),
            ExecutionMode::Durable => Arc::new(SqliteJobStore::new(database.clone())),
        };
        let ledger = Arc::new(JobLedger::new(store));

        let processor = Arc::new(JobProcessor::new(ProcessorDeps {
            ledger: Arc::clone(&ledger),
            resource_types: Arc::clone(&resource_types),
            renderer,
            deployer: Arc::clone(&deployer),
            sync: Arc::clone(&sync),
            notifier,
            resources: resources.clone(),
            retry: config.retry,
        }));

        let in_process = match config.mode {
            ExecutionMode::InProcess => Some(Arc::new(InProcessBackend::new(
                Arc::clone(&processor),
                config.in_process.simulated_latency(),
            ))),
            ExecutionMode::Durable => None,
        };
        let backend: Arc<dyn ExecutionBackend> = match &in_process {
            Some(backend) => backend.clone(),
            None => Arc::new(QueueBackend::new(database.clone())),
        };
        let manager = JobManager::new(ledger, backend);

        log::info!(
            "Provisioner ready ({} backend, {} resource types)",
            manager.backend_name(),
            resource_types.names().len()
        );

        Ok(Self {
            config,
            database,
            resource_types,
            kinds,
            resources,
            deployer,
            sync,
            processor,
            manager,
            in_process,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn database(&self) -> &Database {
        &self.database
    }

    /// Live registry; re-registering a type affects jobs started afterwards.
    pub fn resource_types(&self) -> &Arc<ResourceTypeRegistry> {
        &self.resource_types
    }

    pub fn jobs(&self) -> &JobManager {
        &self.manager
    }

    /// Validates the request, reserves or claims the resource and submits
    /// the job. Returns the job id without waiting for execution.
    pub async fn submit(&self, request: ProvisionRequest) -> Result<String, ProvisionError> {
        let Some(type_config) = self.resource_types.get(&request.resource_type) else {
            return Err(ProvisionError::Validation(format!(
                "unknown resource type '{}'",
                request.resource_type
            )));
        };

        let cluster_id = request.cluster_id.clone().filter(|c| !c.is_empty());
        let mut segments = vec![
            request.tenant_id.as_str(),
            request.resource_type.as_str(),
            request.name.as_str(),
        ];
        segments.extend(cluster_id.as_deref());
        for segment in segments {
            validate_segment(segment).map_err(|e| ProvisionError::Validation(e.to_string()))?;
        }

        if request.operation != JobOperation::Delete {
            self.kinds
                .validate(&request.resource_type, &request.name, &request.spec)
                .map_err(ProvisionError::Validation)?;
            if let Some(flavor) = request.spec.get("flavor").and_then(|f| f.as_str()) {
                if !type_config.flavors.iter().any(|f| f == flavor) {
                    log::debug!(
                        "Flavor '{}' is not published for {}; resolving anyway",
                        flavor,
                        request.resource_type
                    );
                }
            }
        }

        let claim = self.claim(&request)?;

        let submission = JobSubmission {
            job_type: format!("{}_{}", request.operation, request.resource_type),
            tenant_id: request.tenant_id,
            cluster_id,
            resource_type: request.resource_type,
            resource_name: request.name,
            operation: request.operation,
            spec: request.spec,
        };
        match self.manager.submit_job(submission).await {
            Ok(job_id) => Ok(job_id),
            Err(e) => {
                self.release(claim);
                Err(e.into())
            }
        }
    }

    /// Undoes a claim whose job never reached a backend.
    fn release(&self, claim: Claim) {
        let released = match &claim {
            Claim::Reserved(id) => self.resources.remove(id),
            Claim::Marked { id, previous } => self.resources.mark_status(id, previous),
        };
        if let Err(e) = released {
            log::warn!("Failed to release resource claim {:?}: {}", claim, e);
        }
    }

    /// Create reserves a new identity; update and delete need an existing one.
    fn claim(&self, request: &ProvisionRequest) -> Result<Claim, ProvisionError> {
        let (tenant, kind, name) = (&request.tenant_id, &request.resource_type, &request.name);
        match request.operation {
            JobOperation::Create => {
                match self
                    .resources
                    .reserve(tenant, kind, name, &request.spec, STATUS_CREATING)?
                {
                    Reservation::Reserved(resource) => Ok(Claim::Reserved(resource.id)),
                    Reservation::Exists(existing) => Err(ProvisionError::Conflict(format!(
                        "resource {} already exists ({})",
                        existing.key(),
                        existing.status
                    ))),
                }
            }
            JobOperation::Update | JobOperation::Delete => {
                let Some(existing) = self.resources.get(tenant, kind, name)? else {
                    return Err(ProvisionError::Conflict(format!(
                        "resource {}/{}/{} does not exist",
                        tenant, kind, name
                    )));
                };
                let status = if request.operation == JobOperation::Update {
                    STATUS_UPDATING
                } else {
                    STATUS_DELETING
                };
                self.resources.mark_status(&existing.id, status)?;
                Ok(Claim::Marked {
                    id: existing.id,
                    previous: existing.status,
                })
            }
        }
    }

    pub fn get_job_status(&self, job_id: &str) -> Result<Option<Job>, ProvisionError> {
        Ok(self.manager.get_job_status(job_id)?)
    }

    pub async fn wait_for_job(
        &self,
        job_id: &str,
        timeout: Duration,
    ) -> Result<Option<Job>, ProvisionError> {
        Ok(self.manager.wait_for_terminal(job_id, timeout).await?)
    }

    pub fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, ProvisionError> {
        Ok(self.manager.list_jobs(filter)?)
    }

    pub fn get_resource(
        &self,
        tenant_id: &str,
        resource_type: &str,
        name: &str,
    ) -> Result<Option<Resource>, ProvisionError> {
        Ok(self.resources.get(tenant_id, resource_type, name)?)
    }

    pub fn list_resources(
        &self,
        tenant_id: &str,
        resource_type: Option<&str>,
    ) -> Result<Vec<Resource>, ProvisionError> {
        Ok(self.resources.list(tenant_id, resource_type)?)
    }

    /// Asks the sync engine about the resource and records its reported
    /// sync state on the resource.
    pub async fn resource_status(
        &self,
        tenant_id: &str,
        resource_type: &str,
        name: &str,
    ) -> Result<Option<ResourceStatus>, ProvisionError> {
        let Some(mut resource) = self.resources.get(tenant_id, resource_type, name)? else {
            return Ok(None);
        };
        let sync = self.sync.get_status(&resource.external_app_name).await;
        if let Some(state) = sync.as_ref().and_then(|s| s.sync_status.clone()) {
            if state != resource.status && self.resources.mark_status(&resource.id, &state)? {
                resource.status = state;
            }
        }
        Ok(Some(ResourceStatus { resource, sync }))
    }

    /// Every committed manifest of `tenant_id` in the type's repository.
    pub async fn list_tenant_manifests(
        &self,
        tenant_id: &str,
        resource_type: &str,
    ) -> Result<Vec<TenantManifest>, ProvisionError> {
        let Some(type_config) = self.resource_types.get(resource_type) else {
            return Err(ProvisionError::Validation(format!(
                "unknown resource type '{}'",
                resource_type
            )));
        };
        Ok(self
            .deployer
            .list_tenant_manifests(&type_config.repo_url, &type_config.branch, tenant_id)
            .await?)
    }

    /// Starts the durable queue consumers. `None` in in-process mode, where
    /// every job runs on its own task.
    pub fn start_workers(&self) -> Option<WorkerPool> {
        match self.config.mode {
            ExecutionMode::Durable => Some(WorkerPool::start(
                Arc::clone(&self.processor),
                self.database.clone(),
                &self.config.workers,
            )),
            ExecutionMode::InProcess => None,
        }
    }

    /// Aborts in-process jobs still running. Durable jobs stay queued.
    pub fn shutdown(&self) {
        if let Some(backend) = &self.in_process {
            backend.abort_all();
        }
    }
}

/// What `claim` changed on the resource row.
#[derive(Debug)]
enum Claim {
    Reserved(String),
    Marked { id: String, previous: String },
}

impl std::fmt::Debug for Provisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Provisioner")
            .field("mode", &self.config.mode)
            .field("manager", &self.manager)
            .finish_non_exhaustive()
    }
}

fn template_source(config: &AppConfig) -> TemplateSource {
    if let Some(url) = &config.templates.repo_url {
        return TemplateSource::Repository {
            url: url.clone(),
            branch: config.templates.branch.clone(),
        };
    }
    let dir = config
        .templates
        .local_dir
        .clone()
        .or_else(|| tenantops_home().map(|home| home.join("templates")))
        .unwrap_or_else(|| PathBuf::from("templates"));
    TemplateSource::Directory(dir)
}
