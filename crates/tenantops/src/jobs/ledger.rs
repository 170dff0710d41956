//! Single entry point for reading and mutating job records.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;

use super::events::{JobEvent, JobEventBroadcaster};
use super::job::{Job, JobSubmission, JobUpdate};
use super::store::{JobStore, UpdateOutcome};
use crate::db::job_repo::JobFilter;
use crate::db::DatabaseError;

/// How often a waiter re-reads the store between events.
const STORE_POLL_INTERVAL: Duration = Duration::from_millis(200);

pub struct JobLedger {
    store: Arc<dyn JobStore>,
    events: JobEventBroadcaster,
}

impl JobLedger {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self {
            store,
            events: JobEventBroadcaster::default(),
        }
    }

    pub fn events(&self) -> &JobEventBroadcaster {
        &self.events
    }

    /// Persists a new `Submitted` job and returns it.
    pub fn record_submission(&self, submission: JobSubmission) -> Result<Job, DatabaseError> {
        let job = Job::from_submission(submission);
        self.store.insert(&job)?;
        log::info!(
            "Job {} submitted: {} {}/{}/{}",
            job.id,
            job.operation,
            job.tenant_id,
            job.resource_type,
            job.resource_name
        );
        self.events.send(JobEvent::from_job(&job, None));
        Ok(job)
    }

    pub fn get(&self, job_id: &str) -> Result<Option<Job>, DatabaseError> {
        self.store.get(job_id)
    }

    pub fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, DatabaseError> {
        self.store.list(filter)
    }

    /// Applies an update. Unknown ids and refused transitions are logged
    /// and return `Ok(None)` with the record untouched.
    pub fn update(&self, job_id: &str, update: &JobUpdate) -> Result<Option<Job>, DatabaseError> {
        match self.store.update(job_id, update)? {
            UpdateOutcome::Applied(job) => {
                log::debug!(
                    "Job {} -> {} (attempt {})",
                    job.id,
                    job.status,
                    job.attempts
                );
                self.events
                    .send(JobEvent::from_job(&job, update.logs.last().cloned()));
                Ok(Some(job))
            }
            UpdateOutcome::Rejected(reason) => {
                log::warn!("Ignoring update for job {}: {}", job_id, reason);
                Ok(None)
            }
            UpdateOutcome::NotFound => {
                log::warn!("Ignoring update for unknown job {}", job_id);
                Ok(None)
            }
        }
    }

    /// Waits until the job is terminal. Returns the job as last seen, which
    /// is not terminal if `timeout` elapsed first, or `None` for an unknown id.
    pub async fn wait_for_terminal(
        &self,
        job_id: &str,
        timeout: Duration,
    ) -> Result<Option<Job>, DatabaseError> {
        // Subscribe before reading so no transition slips between the two.
        let mut rx = self.events.subscribe();
        let Some(mut job) = self.store.get(job_id)? else {
            return Ok(None);
        };
        if job.is_terminal() {
            return Ok(Some(job));
        }

        let deadline = tokio::time::Instant::now() + timeout;
        let expired = tokio::time::sleep_until(deadline);
        tokio::pin!(expired);
        // Workers in another process never publish here, so the store is
        // re-read on every tick as well.
        let mut poll = tokio::time::interval(STORE_POLL_INTERVAL);
        poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut expired => return Ok(Some(job)),
                _ = poll.tick() => {
                    if let Some(latest) = self.store.get(job_id)? {
                        if latest.is_terminal() {
                            return Ok(Some(latest));
                        }
                        job = latest;
                    }
                }
                received = rx.recv() => match received {
                    Ok(event) if event.job_id == job_id && event.terminal => {
                        return self.store.get(job_id);
                    }
                    Ok(_) => {}
                    Err(RecvError::Lagged(skipped)) => {
                        log::debug!("Job event receiver lagged by {}", skipped);
                    }
                    Err(RecvError::Closed) => return self.store.get(job_id),
                },
            }
        }
    }
}

impl std::fmt::Debug for JobLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobLedger")
            .field("events", &self.events)
            .finish_non_exhaustive()
    }
}
