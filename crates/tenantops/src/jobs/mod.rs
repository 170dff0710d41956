//! Job lifecycle: records, status machine, backends and workers.

pub mod backend;
pub mod error;
pub mod events;
pub mod job;
pub mod ledger;
pub mod lifecycle;
pub mod pool;
pub mod processor;
pub mod store;

pub use backend::{ExecutionBackend, InProcessBackend, JobHandle, QueueBackend};
pub use error::JobError;
pub use events::{JobEvent, JobEventBroadcaster};
pub use job::{Job, JobOperation, JobStatus, JobSubmission, JobUpdate, TransitionError};
pub use ledger::JobLedger;
pub use lifecycle::JobManager;
pub use pool::WorkerPool;
pub use processor::{JobProcessor, ProcessOutcome, ProcessorDeps};
pub use store::{JobStore, MemoryJobStore, SqliteJobStore, UpdateOutcome};

pub use crate::db::job_repo::JobFilter;
