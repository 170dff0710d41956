use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::task::JoinHandle;

use super::processor::{JobProcessor, ProcessOutcome};
use crate::config::WorkerSettings;
use crate::db::{format_timestamp, queue_repo, Database};

/// Consumers of the durable job queue.
pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
}

impl WorkerPool {
    /// Starts `settings.count` workers (at least one).
    pub fn start(processor: Arc<JobProcessor>, db: Database, settings: &WorkerSettings) -> Self {
        let worker_count = settings.count.max(1);
        let shutdown = Arc::new(AtomicBool::new(false));
        let owner_prefix = format!("worker-{}", std::process::id());

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let worker = Worker {
                name: format!("{}-{}", owner_prefix, worker_id),
                processor: Arc::clone(&processor),
                db: db.clone(),
                poll_interval: settings.poll_interval(),
                lease: settings.lease(),
                shutdown: Arc::clone(&shutdown),
            };
            workers.push(tokio::spawn(run_worker(worker)));
        }

        info!("Started {} workers", worker_count);

        Self { workers, shutdown }
    }

    pub fn shutdown(&self) {
        info!("Shutting down worker pool...");
        self.shutdown.store(true, Ordering::Relaxed);
    }

    /// Waits for every worker to finish its current job and exit.
    pub async fn wait(self) {
        for (i, worker) in self.workers.into_iter().enumerate() {
            if let Err(e) = worker.await {
                error!("Worker {} panicked: {:?}", i, e);
            } else {
                debug!("Worker {} finished", i);
            }
        }

        info!("All workers have stopped");
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Relaxed)
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }
}

struct Worker {
    name: String,
    processor: Arc<JobProcessor>,
    db: Database,
    poll_interval: Duration,
    lease: Duration,
    shutdown: Arc<AtomicBool>,
}

async fn run_worker(worker: Worker) {
    debug!("{} started", worker.name);

    loop {
        if worker.shutdown.load(Ordering::Relaxed) {
            debug!("{} received shutdown signal", worker.name);
            break;
        }

        let now = Utc::now();
        let lease_until = now
            + chrono::Duration::from_std(worker.lease).unwrap_or_else(|_| chrono::Duration::minutes(5));
        let leased = queue_repo::lease_next(
            &worker.db,
            &worker.name,
            &format_timestamp(now),
            &format_timestamp(lease_until),
        );

        match leased {
            Ok(Some(entry)) => {
                debug!(
                    "{} leased job {} (delivery {})",
                    worker.name, entry.job_id, entry.deliveries
                );
                let outcome = worker.processor.run(&entry.job_id).await;
                settle(&worker, &entry.job_id, outcome);
            }
            Ok(None) => tokio::time::sleep(worker.poll_interval).await,
            Err(e) => {
                error!("{} failed to poll the queue: {}", worker.name, e);
                tokio::time::sleep(worker.poll_interval).await;
            }
        }
    }

    debug!("{} stopped", worker.name);
}

/// Acks finished work; reschedules retries at the countdown.
fn settle(worker: &Worker, job_id: &str, outcome: ProcessOutcome) {
    let result = match outcome {
        ProcessOutcome::Finished | ProcessOutcome::Skipped => {
            queue_repo::ack(&worker.db, job_id).map(|_| ())
        }
        ProcessOutcome::RetryAfter(delay) => {
            let at = Utc::now()
                + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero());
            queue_repo::requeue(&worker.db, job_id, &format_timestamp(at)).map(|_| ())
        }
    };
    if let Err(e) = result {
        // The lease will expire and the entry will be redelivered.
        warn!("{} could not settle job {}: {}", worker.name, job_id, e);
    }
}
