//! Job storage: a volatile map for the in-process backend and SQLite for
//! the durable one.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use serde_json::{Map, Value};

use super::job::{Job, JobOperation, JobStatus, JobUpdate, TransitionError};
use crate::db::job_repo::{self, JobFilter, JobRow};
use crate::db::{format_timestamp, parse_timestamp, Database, DatabaseError};

/// Result of routing an update through a store.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateOutcome {
    Applied(Job),
    Rejected(TransitionError),
    NotFound,
}

/// Writes are serialized; reads may run concurrently.
pub trait JobStore: Send + Sync {
    fn insert(&self, job: &Job) -> Result<(), DatabaseError>;
    fn get(&self, id: &str) -> Result<Option<Job>, DatabaseError>;
    /// Applies `update` atomically with respect to other updates.
    fn update(&self, id: &str, update: &JobUpdate) -> Result<UpdateOutcome, DatabaseError>;
    /// Newest first.
    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, DatabaseError>;
}

// ─── In-memory ──────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: RwLock<HashMap<String, Job>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl JobStore for MemoryJobStore {
    fn insert(&self, job: &Job) -> Result<(), DatabaseError> {
        let mut jobs = match self.jobs.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("MemoryJobStore write lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        jobs.insert(job.id.clone(), job.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<Job>, DatabaseError> {
        let jobs = match self.jobs.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("MemoryJobStore read lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        Ok(jobs.get(id).cloned())
    }

    fn update(&self, id: &str, update: &JobUpdate) -> Result<UpdateOutcome, DatabaseError> {
        let mut jobs = match self.jobs.write() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("MemoryJobStore write lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        let Some(job) = jobs.get_mut(id) else {
            return Ok(UpdateOutcome::NotFound);
        };
        // Apply to a copy so a refused update cannot leave partial changes.
        let mut next = job.clone();
        Ok(match next.apply(update, Utc::now()) {
            Ok(()) => {
                *job = next.clone();
                UpdateOutcome::Applied(next)
            }
            Err(e) => UpdateOutcome::Rejected(e),
        })
    }

    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, DatabaseError> {
        let jobs = match self.jobs.read() {
            Ok(guard) => guard,
            Err(poisoned) => {
                log::warn!("MemoryJobStore read lock was poisoned, recovering");
                poisoned.into_inner()
            }
        };
        let mut matching: Vec<Job> = jobs
            .values()
            .filter(|job| {
                filter.tenant_id.as_ref().map_or(true, |t| &job.tenant_id == t)
                    && filter
                        .resource_type
                        .as_ref()
                        .map_or(true, |t| &job.resource_type == t)
                    && filter
                        .status
                        .as_deref()
                        .map_or(true, |s| job.status.as_str() == s)
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(filter.limit.unwrap_or(100) as usize);
        Ok(matching)
    }
}

// ─── SQLite ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct SqliteJobStore {
    db: Database,
}

impl SqliteJobStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

impl JobStore for SqliteJobStore {
    fn insert(&self, job: &Job) -> Result<(), DatabaseError> {
        job_repo::insert(&self.db, &to_row(job)?)
    }

    fn get(&self, id: &str) -> Result<Option<Job>, DatabaseError> {
        job_repo::find_by_id(&self.db, id)?.map(from_row).transpose()
    }

    fn update(&self, id: &str, update: &JobUpdate) -> Result<UpdateOutcome, DatabaseError> {
        let mut outcome = UpdateOutcome::NotFound;
        job_repo::modify(&self.db, id, |row| {
            let mut job = from_row(row.clone())?;
            match job.apply(update, Utc::now()) {
                Ok(()) => {
                    *row = to_row(&job)?;
                    outcome = UpdateOutcome::Applied(job);
                    Ok(true)
                }
                Err(e) => {
                    outcome = UpdateOutcome::Rejected(e);
                    Ok(false)
                }
            }
        })?;
        Ok(outcome)
    }

    fn list(&self, filter: &JobFilter) -> Result<Vec<Job>, DatabaseError> {
        job_repo::query(&self.db, filter)?
            .into_iter()
            .map(from_row)
            .collect()
    }
}

fn to_row(job: &Job) -> Result<JobRow, DatabaseError> {
    Ok(JobRow {
        id: job.id.clone(),
        job_type: job.job_type.clone(),
        tenant_id: job.tenant_id.clone(),
        cluster_id: job.cluster_id.clone(),
        resource_type: job.resource_type.clone(),
        resource_name: job.resource_name.clone(),
        operation: job.operation.as_str().to_string(),
        spec: serde_json::to_string(&job.spec).map_err(DatabaseError::json("spec"))?,
        status: job.status.as_str().to_string(),
        attempts: job.attempts,
        logs: serde_json::to_string(&job.logs).map_err(DatabaseError::json("logs"))?,
        metadata: serde_json::to_string(&job.metadata).map_err(DatabaseError::json("metadata"))?,
        created_at: format_timestamp(job.created_at),
        updated_at: format_timestamp(job.updated_at),
        finished_at: job.finished_at.map(format_timestamp),
    })
}

fn from_row(row: JobRow) -> Result<Job, DatabaseError> {
    let status = JobStatus::parse(&row.status).unwrap_or_else(|| {
        log::warn!(
            "Unknown job status '{}' for job {}, treating as failed",
            row.status,
            row.id
        );
        JobStatus::Failed
    });
    let operation = JobOperation::parse(&row.operation).unwrap_or_else(|| {
        log::warn!(
            "Unknown operation '{}' for job {}, treating as update",
            row.operation,
            row.id
        );
        JobOperation::Update
    });
    let spec: Map<String, Value> =
        serde_json::from_str(&row.spec).map_err(DatabaseError::json("spec"))?;
    let logs: Vec<String> = serde_json::from_str(&row.logs).map_err(DatabaseError::json("logs"))?;
    let metadata: Map<String, Value> =
        serde_json::from_str(&row.metadata).map_err(DatabaseError::json("metadata"))?;

    Ok(Job {
        id: row.id,
        job_type: row.job_type,
        tenant_id: row.tenant_id,
        cluster_id: row.cluster_id,
        resource_type: row.resource_type,
        resource_name: row.resource_name,
        operation,
        spec,
        status,
        attempts: row.attempts,
        logs,
        metadata,
        created_at: parse_timestamp(&row.created_at),
        updated_at: parse_timestamp(&row.updated_at),
        finished_at: row.finished_at.as_deref().map(parse_timestamp),
    })
}
