use std::sync::Arc;
use std::time::Duration;

use super::backend::ExecutionBackend;
use super::error::JobError;
use super::job::{Job, JobSubmission, JobUpdate};
use super::ledger::JobLedger;
use crate::db::job_repo::JobFilter;

/// Job submission and status, independent of which backend runs the jobs.
#[derive(Clone)]
pub struct JobManager {
    ledger: Arc<JobLedger>,
    backend: Arc<dyn ExecutionBackend>,
}

impl JobManager {
    pub fn new(ledger: Arc<JobLedger>, backend: Arc<dyn ExecutionBackend>) -> Self {
        Self { ledger, backend }
    }

    pub fn ledger(&self) -> &Arc<JobLedger> {
        &self.ledger
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Records the job as `Submitted` and dispatches it. Returns the id as
    /// soon as the job is handed off.
    ///
    /// If dispatch fails the job stays `Submitted` with the failure in its
    /// logs, and the error is returned.
    pub async fn submit_job(&self, submission: JobSubmission) -> Result<String, JobError> {
        let job = self.ledger.record_submission(submission)?;
        if let Err(e) = self.backend.dispatch(&job).await {
            log::error!("Failed to dispatch job {}: {}", job.id, e);
            self.ledger
                .update(&job.id, &JobUpdate::default().log(format!("Dispatch failed: {}", e)))?;
            return Err(e);
        }
        Ok(job.id)
    }

    pub fn get_job_status(&self, job_id: &str) -> Result<Option<Job>, JobError> {
        Ok(self.ledger.get(job_id)?)
    }

    /// The only mutation path for job records.
    pub fn update_job_status(&self, job_id: &str, update: &JobUpdate) -> Result<Option<Job>, JobError> {
        Ok(self.ledger.update(job_id, update)?)
    }

    pub async fn wait_for_terminal(
        &self,
        job_id: &str,
        timeout: Duration,
    ) -> Result<Option<Job>, JobError> {
        Ok(self.ledger.wait_for_terminal(job_id, timeout).await?)
    }

    pub fn list_jobs(&self, filter: &JobFilter) -> Result<Vec<Job>, JobError> {
        Ok(self.ledger.list(filter)?)
    }
}

impl std::fmt::Debug for JobManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobManager")
            .field("backend", &self.backend.name())
            .finish_non_exhaustive()
    }
}
