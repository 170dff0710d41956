//! Execution backends: where a submitted job goes to be run.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::{AbortHandle, JoinHandle};

use super::error::JobError;
use super::job::Job;
use super::processor::{JobProcessor, ProcessOutcome};
use crate::db::{format_timestamp, queue_repo, Database};

#[async_trait::async_trait]
pub trait ExecutionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    /// Hands the job off for execution. Must not wait for it to run.
    async fn dispatch(&self, job: &Job) -> Result<(), JobError>;
}

// ─── In-process ─────────────────────────────────────────────────────────────

/// Handle to a job running on the in-process backend.
#[derive(Debug)]
pub struct JobHandle {
    job_id: String,
    task: JoinHandle<()>,
}

impl JobHandle {
    pub fn job_id(&self) -> &str {
        &self.job_id
    }

    /// Waits until the task ends, whether finished or aborted.
    pub async fn wait(self) {
        if let Err(e) = self.task.await {
            if e.is_panic() {
                log::error!("Task for job {} panicked: {}", self.job_id, e);
            }
        }
    }

    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// One tokio task per job. Jobs do not survive a restart.
///
/// Tasks on the same resource key run in submission order: each waits for
/// its predecessor's task to end before its first attempt.
pub struct InProcessBackend {
    processor: Arc<JobProcessor>,
    latency: Duration,
    tasks: Mutex<HashMap<String, AbortHandle>>,
    /// Per resource key, closed once the most recently spawned task ends.
    tails: Mutex<HashMap<String, watch::Receiver<()>>>,
}

impl InProcessBackend {
    pub fn new(processor: Arc<JobProcessor>, latency: Duration) -> Self {
        Self {
            processor,
            latency,
            tasks: Mutex::new(HashMap::new()),
            tails: Mutex::new(HashMap::new()),
        }
    }

    /// Starts the job's task: the simulated latency, the wait for earlier
    /// jobs on the same resource, then attempts until the processor stops
    /// asking for a retry.
    pub fn spawn(&self, job: &Job) -> JobHandle {
        let processor = Arc::clone(&self.processor);
        let latency = self.latency;
        let id = job.id.clone();

        let (done_tx, done_rx) = watch::channel(());
        let previous = {
            let mut tails = lock_or_recover(&self.tails, "tail");
            tails.retain(|_, rx| rx.has_changed().is_ok());
            tails.insert(job.resource_key(), done_rx)
        };

        let task = tokio::spawn(async move {
            let _done = done_tx;
            tokio::time::sleep(latency).await;
            if let Some(mut previous) = previous {
                // Ends once the predecessor drops its sender.
                while previous.changed().await.is_ok() {}
            }
            while let ProcessOutcome::RetryAfter(delay) = processor.run(&id).await {
                log::debug!("Job {} retrying in {:?}", id, delay);
                tokio::time::sleep(delay).await;
            }
        });

        let mut tasks = self.tasks();
        tasks.retain(|_, handle| !handle.is_finished());
        tasks.insert(job.id.clone(), task.abort_handle());

        JobHandle {
            job_id: job.id.clone(),
            task,
        }
    }

    /// Aborts a running job's task. Only meant for shutdown.
    pub fn abort(&self, job_id: &str) -> bool {
        match self.tasks().remove(job_id) {
            Some(handle) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    pub fn abort_all(&self) -> usize {
        let drained: Vec<AbortHandle> = self.tasks().drain().map(|(_, h)| h).collect();
        let running = drained.iter().filter(|h| !h.is_finished()).count();
        for handle in drained {
            handle.abort();
        }
        if running > 0 {
            log::info!("Aborted {} in-process job(s)", running);
        }
        running
    }

    pub fn running(&self) -> usize {
        self.tasks().values().filter(|h| !h.is_finished()).count()
    }

    fn tasks(&self) -> std::sync::MutexGuard<'_, HashMap<String, AbortHandle>> {
        lock_or_recover(&self.tasks, "task")
    }
}

fn lock_or_recover<'a, T>(lock: &'a Mutex<T>, name: &str) -> std::sync::MutexGuard<'a, T> {
    match lock.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            log::warn!("InProcessBackend {} map lock was poisoned, recovering", name);
            poisoned.into_inner()
        }
    }
}

#[async_trait::async_trait]
impl ExecutionBackend for InProcessBackend {
    fn name(&self) -> &'static str {
        "in_process"
    }

    async fn dispatch(&self, job: &Job) -> Result<(), JobError> {
        // Detached; the task keeps running without the handle.
        let _ = self.spawn(job);
        Ok(())
    }
}

// ─── Durable ────────────────────────────────────────────────────────────────

/// Enqueues job ids for the worker pool. The job itself must already be
/// persisted in the same database.
#[derive(Debug, Clone)]
pub struct QueueBackend {
    db: Database,
}

impl QueueBackend {
    pub fn new(db: Database) -> Self {
        Self { db }
    }
}

#[async_trait::async_trait]
impl ExecutionBackend for QueueBackend {
    fn name(&self) -> &'static str {
        "durable"
    }

    async fn dispatch(&self, job: &Job) -> Result<(), JobError> {
        queue_repo::enqueue(
            &self.db,
            &job.id,
            &job.resource_key(),
            &format_timestamp(Utc::now()),
        )?;
        log::debug!("Job {} enqueued", job.id);
        Ok(())
    }
}
