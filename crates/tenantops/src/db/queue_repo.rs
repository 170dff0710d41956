//! Durable job queue with leases.
//!
//! Entries are delivered at least once. A leased entry is invisible until
//! its lease expires; an entry is never leased while an older entry for the
//! same resource key is still queued, which keeps work on one resource in
//! submission order across worker processes.

use rusqlite::{params, OptionalExtension, Transaction, TransactionBehavior};

use super::{Database, DatabaseError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueEntry {
    pub seq: i64,
    pub job_id: String,
    pub resource_key: String,
    /// Including this one.
    pub deliveries: u32,
}

pub fn enqueue(
    db: &Database,
    job_id: &str,
    resource_key: &str,
    available_at: &str,
) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO job_queue (job_id, resource_key, available_at, enqueued_at)
             VALUES (?1, ?2, ?3, ?3)",
            params![job_id, resource_key, available_at],
        )?;
        Ok(())
    })
}

/// Leases the next deliverable entry, if any.
///
/// `now` and `lease_until` are timestamps from `db::format_timestamp`.
pub fn lease_next(
    db: &Database,
    worker: &str,
    now: &str,
    lease_until: &str,
) -> Result<Option<QueueEntry>, DatabaseError> {
    db.with_conn(|conn| {
        let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

        let entry = tx
            .query_row(
                "SELECT q.seq, q.job_id, q.resource_key, q.deliveries FROM job_queue q
                 WHERE q.available_at <= ?1
                   AND (q.leased_until IS NULL OR q.leased_until <= ?1)
                   AND NOT EXISTS (
                       SELECT 1 FROM job_queue older
                       WHERE older.resource_key = q.resource_key AND older.seq < q.seq
                   )
                 ORDER BY q.available_at, q.seq
                 LIMIT 1",
                params![now],
                |row| {
                    Ok(QueueEntry {
                        seq: row.get(0)?,
                        job_id: row.get(1)?,
                        resource_key: row.get(2)?,
                        deliveries: row.get(3)?,
                    })
                },
            )
            .optional()?;

        let Some(mut entry) = entry else {
            tx.commit()?;
            return Ok(None);
        };

        tx.execute(
            "UPDATE job_queue SET leased_until = ?2, lease_owner = ?3,
             deliveries = deliveries + 1 WHERE seq = ?1",
            params![entry.seq, lease_until, worker],
        )?;
        tx.commit()?;

        entry.deliveries += 1;
        Ok(Some(entry))
    })
}

/// Releases the lease and makes the entry deliverable again at `available_at`.
pub fn requeue(db: &Database, job_id: &str, available_at: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE job_queue SET available_at = ?2, leased_until = NULL, lease_owner = NULL
             WHERE job_id = ?1",
            params![job_id, available_at],
        )?;
        Ok(changed > 0)
    })
}

/// Removes a finished entry.
pub fn ack(db: &Database, job_id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute("DELETE FROM job_queue WHERE job_id = ?1", params![job_id])?;
        Ok(changed > 0)
    })
}

pub fn len(db: &Database) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row("SELECT COUNT(*) FROM job_queue", [], |r| r.get(0))?;
        Ok(count)
    })
}
