//! Executes one attempt of a job: render, deploy, sync, record, notify.

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Map, Value};
use tracing::Instrument;

use super::error::JobError;
use super::job::{Job, JobOperation, JobStatus, JobUpdate};
use super::ledger::JobLedger;
use crate::config::{ResourceTypeConfig, ResourceTypeRegistry, RetryPolicy, WebhookMode};
use crate::gitops::{DeleteOutcome, ManifestDeployer, ManifestTarget};
use crate::keyed_lock::KeyedMutex;
use crate::notify::WebhookNotifier;
use crate::render::{ManifestRenderer, RenderRequest, DEFAULT_FLAVOR};
use crate::resources::{
    external_app_name, OperationRecord, Reservation, Resource, ResourceStore, STATUS_CREATING,
    STATUS_DELETE_FAILED, STATUS_FAILED, STATUS_SYNCING, STATUS_UPDATE_FAILED,
};
use crate::sync::{ApplicationSpec, SyncClient};

/// What the caller should do with the job after one `run`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Terminal now.
    Finished,
    /// Failed transiently; run again after the delay.
    RetryAfter(Duration),
    /// Nothing to do: unknown, already terminal, or refused by the ledger.
    Skipped,
}

/// Collaborators a processor drives.
pub struct ProcessorDeps {
    pub ledger: Arc<JobLedger>,
    pub resource_types: Arc<ResourceTypeRegistry>,
    pub renderer: Arc<ManifestRenderer>,
    pub deployer: Arc<ManifestDeployer>,
    pub sync: Arc<dyn SyncClient>,
    pub notifier: WebhookNotifier,
    pub resources: ResourceStore,
    pub retry: RetryPolicy,
}

pub struct JobProcessor {
    ledger: Arc<JobLedger>,
    resource_types: Arc<ResourceTypeRegistry>,
    renderer: Arc<ManifestRenderer>,
    deployer: Arc<ManifestDeployer>,
    sync: Arc<dyn SyncClient>,
    notifier: WebhookNotifier,
    resources: ResourceStore,
    retry: RetryPolicy,
    locks: KeyedMutex,
}

/// Result of a successful attempt, written back in one update.
#[derive(Debug, Default)]
struct Completion {
    logs: Vec<String>,
    metadata: Map<String, Value>,
}

impl Completion {
    fn log(&mut self, line: impl Into<String>) {
        self.logs.push(line.into());
    }

    fn meta(&mut self, key: &str, value: impl Into<Value>) {
        self.metadata.insert(key.to_string(), value.into());
    }
}

impl JobProcessor {
    pub fn new(deps: ProcessorDeps) -> Self {
        Self {
            ledger: deps.ledger,
            resource_types: deps.resource_types,
            renderer: deps.renderer,
            deployer: deps.deployer,
            sync: deps.sync,
            notifier: deps.notifier,
            resources: deps.resources,
            retry: deps.retry,
            locks: KeyedMutex::new(),
        }
    }

    pub fn ledger(&self) -> &Arc<JobLedger> {
        &self.ledger
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    /// Runs one attempt of `job_id`. Never panics on job errors; every
    /// failure ends up in the job's logs and status.
    pub async fn run(&self, job_id: &str) -> ProcessOutcome {
        let Some(job) = self.load(job_id) else {
            return ProcessOutcome::Skipped;
        };
        if job.is_terminal() {
            log::debug!("Job {} already {}, skipping", job.id, job.status);
            return ProcessOutcome::Skipped;
        }

        let _guard = self.locks.lock(&job.resource_key()).await;

        // Another delivery may have finished it while we waited.
        let Some(job) = self.load(job_id) else {
            return ProcessOutcome::Skipped;
        };
        if job.is_terminal() {
            log::debug!("Job {} already {}, skipping", job.id, job.status);
            return ProcessOutcome::Skipped;
        }

        let span = tracing::info_span!(
            "job",
            job_id = %job.id,
            resource_type = %job.resource_type,
            operation = %job.operation
        );
        self.execute(job).instrument(span).await
    }

    fn load(&self, job_id: &str) -> Option<Job> {
        match self.ledger.get(job_id) {
            Ok(Some(job)) => Some(job),
            Ok(None) => {
                log::warn!("Job {} not found", job_id);
                None
            }
            Err(e) => {
                log::error!("Failed to load job {}: {}", job_id, e);
                None
            }
        }
    }

    async fn execute(&self, job: Job) -> ProcessOutcome {
        let Some(config) = self.resource_types.get(&job.resource_type) else {
            if self.start_attempt(&job).is_none() {
                return ProcessOutcome::Skipped;
            }
            let update = JobUpdate::status(JobStatus::Failed)
                .log(format!("Job failed: unknown resource type '{}'", job.resource_type))
                .terminal();
            self.write(&job.id, &update);
            return ProcessOutcome::Finished;
        };

        let Some(job) = self.start_attempt(&job) else {
            return ProcessOutcome::Skipped;
        };
        log::info!(
            "Processing job {} ({} {}/{}/{}, attempt {})",
            job.id,
            job.operation,
            job.tenant_id,
            job.resource_type,
            job.resource_name,
            job.attempts
        );
        self.notifier
            .send_staged(
                &config.webhook,
                job.webhook_subject(),
                "started",
                &json!({ "attempt": job.attempts }),
            )
            .await;

        let result = match job.operation {
            JobOperation::Create | JobOperation::Update => self.apply(&job, &config).await,
            JobOperation::Delete => self.remove(&job, &config).await,
        };

        match result {
            Ok(completion) => self.complete(&job, &config, completion).await,
            Err(e) => self.fail(&job, &config, e).await,
        }
    }

    /// Moves the job to `InProgress`, first closing out an attempt that a
    /// previous delivery left running.
    fn start_attempt(&self, job: &Job) -> Option<Job> {
        if job.status == JobStatus::InProgress {
            log::warn!(
                "Job {} was left in progress by attempt {}, recording it as failed",
                job.id,
                job.attempts
            );
            let interrupted = JobUpdate::status(JobStatus::Failed)
                .log(format!("Attempt {} was interrupted", job.attempts));
            if !self.retry.allows_retry(job.attempts) {
                self.write(
                    &job.id,
                    &interrupted
                        .log("Retry budget exhausted")
                        .meta("error", "interrupted")
                        .terminal(),
                );
                return None;
            }
            self.write(&job.id, &interrupted);
        }

        let update = JobUpdate::status(JobStatus::InProgress)
            .log(format!("Attempt {} started", job.attempts + 1));
        self.write(&job.id, &update)
    }

    fn write(&self, job_id: &str, update: &JobUpdate) -> Option<Job> {
        match self.ledger.update(job_id, update) {
            Ok(job) => job,
            Err(e) => {
                log::error!("Failed to record update for job {}: {}", job_id, e);
                None
            }
        }
    }

    async fn apply(&self, job: &Job, config: &ResourceTypeConfig) -> Result<Completion, JobError> {
        let mut done = Completion::default();
        let resource = self.ensure_resource(job)?;

        let request = RenderRequest {
            resource_type: &job.resource_type,
            template_dir: config.template_dir(),
            tenant_id: &job.tenant_id,
            cluster_id: job.cluster_id.as_deref(),
            name: &job.resource_name,
            spec: &job.spec,
        };
        let flavor = request.requested_flavor().unwrap_or(DEFAULT_FLAVOR).to_string();
        let manifest = self.renderer.render(&request).await?;
        done.log(format!(
            "Rendered {} manifest ({} flavor)",
            job.resource_type, flavor
        ));
        self.notifier
            .send_staged(
                &config.webhook,
                job.webhook_subject(),
                "rendered",
                &json!({ "flavor": flavor, "bytes": manifest.len() }),
            )
            .await;

        let target = manifest_target(job, config);
        let outcome = self.deployer.deploy(&target, &manifest).await?;
        match &outcome.commit {
            Some(commit) => done.log(format!("Committed {} ({})", outcome.manifest_path, commit)),
            None => done.log(format!("Manifest {} unchanged", outcome.manifest_path)),
        }
        done.meta("manifest_path", outcome.manifest_path.clone());
        done.meta("commit", outcome.commit.clone());
        self.resources.record_deploy(
            &resource.id,
            &job.spec,
            STATUS_SYNCING,
            &outcome.manifest_path,
        )?;
        self.notifier
            .send_staged(
                &config.webhook,
                job.webhook_subject(),
                "committed",
                &json!({ "manifest_path": outcome.manifest_path, "commit": outcome.commit }),
            )
            .await;

        let sync = self.sync_application(job, config, &resource, &mut done).await;
        self.notifier
            .send_staged(&config.webhook, job.webhook_subject(), "synced", &sync)
            .await;
        done.meta("sync", sync);

        let details = json!({
            "manifest_path": outcome.manifest_path,
            "commit": outcome.commit,
            "flavor": flavor,
        });
        self.audit(OperationRecord::success(
            &resource,
            &job.id,
            job.operation.as_str(),
            details,
        ));
        Ok(done)
    }

    async fn remove(&self, job: &Job, config: &ResourceTypeConfig) -> Result<Completion, JobError> {
        let mut done = Completion::default();
        let resource = self
            .resources
            .get(&job.tenant_id, &job.resource_type, &job.resource_name)?;

        let target = manifest_target(job, config);
        match self.deployer.delete(&target).await? {
            DeleteOutcome::Deleted {
                manifest_path,
                commit,
            } => {
                done.log(format!("Deleted {}", manifest_path));
                done.meta("manifest_path", manifest_path);
                done.meta("commit", commit);
            }
            DeleteOutcome::NotFound { manifest_path } => {
                done.log(format!(
                    "Manifest {} not found, nothing to delete",
                    manifest_path
                ));
                done.meta("manifest_path", manifest_path);
                done.meta("commit", Value::Null);
            }
        }
        self.notifier
            .send_staged(
                &config.webhook,
                job.webhook_subject(),
                "committed",
                &Value::Object(done.metadata.clone()),
            )
            .await;

        let app_name = external_app_name(&job.tenant_id, &job.resource_type, &job.resource_name);
        if self.sync.delete(&app_name).await {
            done.log(format!("Deleted application {}", app_name));
        } else {
            done.log(format!("Sync engine could not delete application {}", app_name));
        }

        if let Some(resource) = resource {
            self.audit(OperationRecord::success(
                &resource,
                &job.id,
                job.operation.as_str(),
                Value::Object(done.metadata.clone()),
            ));
            self.resources.remove(&resource.id)?;
        }
        Ok(done)
    }

    /// The resource row for create/update. Only a create that bypassed the
    /// provisioner reserves one here.
    fn ensure_resource(&self, job: &Job) -> Result<Resource, JobError> {
        if let Some(resource) =
            self.resources
                .get(&job.tenant_id, &job.resource_type, &job.resource_name)?
        {
            return Ok(resource);
        }
        if job.operation != JobOperation::Create {
            return Err(JobError::Conflict(format!(
                "resource {} does not exist",
                job.resource_key()
            )));
        }
        match self.resources.reserve(
            &job.tenant_id,
            &job.resource_type,
            &job.resource_name,
            &job.spec,
            STATUS_CREATING,
        )? {
            Reservation::Reserved(resource) | Reservation::Exists(resource) => Ok(resource),
        }
    }

    /// Best effort: failures land in the job logs, never in the outcome.
    async fn sync_application(
        &self,
        job: &Job,
        config: &ResourceTypeConfig,
        resource: &Resource,
        done: &mut Completion,
    ) -> Value {
        let app_name = resource.external_app_name.as_str();
        let app = ApplicationSpec {
            app_name,
            tenant_id: &job.tenant_id,
            resource_type: &job.resource_type,
            repo_url: &config.repo_url,
            branch: &config.branch,
        };

        let created = self.sync.create(&app).await;
        if !created {
            done.log(format!("Sync engine could not create application {}", app_name));
        }
        let synced = self.sync.sync(app_name).await;
        if synced {
            done.log(format!("Sync triggered for {}", app_name));
        } else {
            done.log(format!("Sync engine could not sync application {}", app_name));
        }

        let status = self.sync.get_status(app_name).await;
        if let Some(label) = status.as_ref().and_then(|s| s.sync_status.as_deref()) {
            if let Err(e) = self.resources.mark_status(&resource.id, label) {
                log::warn!("Failed to record sync status for {}: {}", app_name, e);
            }
        }

        json!({
            "app_name": app_name,
            "created": created,
            "synced": synced,
            "status": status,
        })
    }

    async fn complete(&self, job: &Job, config: &ResourceTypeConfig, done: Completion) -> ProcessOutcome {
        let update = JobUpdate::status(JobStatus::Completed)
            .logs(done.logs)
            .log("Job completed")
            .merge_metadata(done.metadata);
        let Some(finished) = self.write(&job.id, &update) else {
            return ProcessOutcome::Skipped;
        };
        log::info!("Job {} completed", job.id);

        self.notify_terminal(&finished, config, "completed").await;
        ProcessOutcome::Finished
    }

    async fn fail(&self, job: &Job, config: &ResourceTypeConfig, error: JobError) -> ProcessOutcome {
        let message = error.to_string();
        let resource = self
            .resources
            .get(&job.tenant_id, &job.resource_type, &job.resource_name)
            .unwrap_or_else(|e| {
                log::warn!("Failed to load resource for job {}: {}", job.id, e);
                None
            });
        if let Some(resource) = &resource {
            self.audit(OperationRecord::failure(
                resource,
                &job.id,
                job.operation.as_str(),
                &message,
            ));
        }

        if error.is_retryable() && self.retry.allows_retry(job.attempts) {
            let delay = self.retry.delay_for(job.attempts);
            log::warn!(
                "Job {} attempt {} failed, retrying in {:?}: {}",
                job.id,
                job.attempts,
                delay,
                message
            );
            let update = JobUpdate::status(JobStatus::Failed)
                .log(format!(
                    "Attempt {} failed: {}; retrying in {:?}",
                    job.attempts, message, delay
                ))
                .meta("last_error", message);
            if self.write(&job.id, &update).is_none() {
                return ProcessOutcome::Skipped;
            }
            return ProcessOutcome::RetryAfter(delay);
        }

        log::error!("Job {} failed: {}", job.id, message);
        let update = JobUpdate::status(JobStatus::Failed)
            .log(format!("Job failed: {}", message))
            .meta("error", message)
            .terminal();
        let Some(finished) = self.write(&job.id, &update) else {
            return ProcessOutcome::Skipped;
        };

        if let Some(resource) = &resource {
            // Only a failed create may be re-reserved; the others stay live.
            let label = match job.operation {
                JobOperation::Create => STATUS_FAILED,
                JobOperation::Update => STATUS_UPDATE_FAILED,
                JobOperation::Delete => STATUS_DELETE_FAILED,
            };
            if let Err(e) = self.resources.mark_status(&resource.id, label) {
                log::warn!("Failed to mark resource {} {}: {}", resource.key(), label, e);
            }
        }

        self.notify_terminal(&finished, config, "failed").await;
        ProcessOutcome::Finished
    }

    /// Single-mode configs get one status delivery; staged configs get the
    /// final stage event instead.
    async fn notify_terminal(&self, job: &Job, config: &ResourceTypeConfig, status: &str) {
        let delivered = match config.webhook.mode {
            WebhookMode::Single => {
                self.notifier
                    .send(
                        &config.webhook,
                        job.webhook_subject(),
                        status,
                        &job.logs,
                        &job.metadata,
                    )
                    .await
            }
            WebhookMode::Staged => {
                self.notifier
                    .send_staged(
                        &config.webhook,
                        job.webhook_subject(),
                        status,
                        &Value::Object(job.metadata.clone()),
                    )
                    .await
            }
        };
        if !delivered {
            log::warn!("Webhook for job {} ({}) was not delivered", job.id, status);
        }
    }

    fn audit(&self, record: OperationRecord) {
        if let Err(e) = self.resources.record_operation(&record) {
            log::warn!(
                "Failed to record {} operation for resource {}: {}",
                record.operation,
                record.resource_id,
                e
            );
        }
    }
}

impl std::fmt::Debug for JobProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobProcessor")
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

fn manifest_target(job: &Job, config: &ResourceTypeConfig) -> ManifestTarget {
    ManifestTarget {
        repo_url: config.repo_url.clone(),
        branch: config.branch.clone(),
        tenant_id: job.tenant_id.clone(),
        cluster_id: job.cluster_id.clone(),
        resource_type: job.resource_type.clone(),
        name: job.resource_name.clone(),
        cluster_aware: config.cluster_aware,
    }
}
