//! Job repository: CRUD for the `jobs` table.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// A raw job row. `spec`, `logs` and `metadata` hold JSON text.
#[derive(Debug, Clone, PartialEq)]
pub struct JobRow {
    pub id: String,
    pub job_type: String,
    pub tenant_id: String,
    pub cluster_id: Option<String>,
    pub resource_type: String,
    pub resource_name: String,
    pub operation: String,
    pub spec: String,
    pub status: String,
    pub attempts: u32,
    pub logs: String,
    pub metadata: String,
    pub created_at: String,
    pub updated_at: String,
    pub finished_at: Option<String>,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            job_type: row.get("job_type")?,
            tenant_id: row.get("tenant_id")?,
            cluster_id: row.get("cluster_id")?,
            resource_type: row.get("resource_type")?,
            resource_name: row.get("resource_name")?,
            operation: row.get("operation")?,
            spec: row.get("spec")?,
            status: row.get("status")?,
            attempts: row.get("attempts")?,
            logs: row.get("logs")?,
            metadata: row.get("metadata")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
            finished_at: row.get("finished_at")?,
        })
    }
}

#[derive(Debug, Default, Clone)]
pub struct JobFilter {
    pub tenant_id: Option<String>,
    pub resource_type: Option<String>,
    pub status: Option<String>,
    pub limit: Option<u64>,
}

pub fn insert(db: &Database, job: &JobRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO jobs (id, job_type, tenant_id, cluster_id, resource_type, resource_name,
             operation, spec, status, attempts, logs, metadata, created_at, updated_at, finished_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                job.id,
                job.job_type,
                job.tenant_id,
                job.cluster_id,
                job.resource_type,
                job.resource_name,
                job.operation,
                job.spec,
                job.status,
                job.attempts,
                job.logs,
                job.metadata,
                job.created_at,
                job.updated_at,
                job.finished_at,
            ],
        )?;
        Ok(())
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| find_in(conn, id))
}

/// Reads, mutates and writes back one job under the connection lock.
///
/// `apply` returns `false` to leave the row untouched. Returns the row as
/// stored afterwards, or `None` if the id is unknown.
pub fn modify<F>(db: &Database, id: &str, apply: F) -> Result<Option<JobRow>, DatabaseError>
where
    F: FnOnce(&mut JobRow) -> Result<bool, DatabaseError>,
{
    db.with_conn(|conn| {
        let Some(mut row) = find_in(conn, id)? else {
            return Ok(None);
        };
        if apply(&mut row)? {
            conn.execute(
                "UPDATE jobs SET status = ?2, attempts = ?3, logs = ?4, metadata = ?5,
                 updated_at = ?6, finished_at = ?7 WHERE id = ?1",
                params![
                    row.id,
                    row.status,
                    row.attempts,
                    row.logs,
                    row.metadata,
                    row.updated_at,
                    row.finished_at,
                ],
            )?;
        }
        Ok(Some(row))
    })
}

pub fn query(db: &Database, filter: &JobFilter) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut conditions = Vec::new();
        let mut values: Vec<String> = Vec::new();

        for (column, value) in [
            ("tenant_id", &filter.tenant_id),
            ("resource_type", &filter.resource_type),
            ("status", &filter.status),
        ] {
            if let Some(value) = value {
                values.push(value.clone());
                conditions.push(format!("{} = ?{}", column, values.len()));
            }
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };
        let sql = format!(
            "SELECT * FROM jobs {} ORDER BY created_at DESC LIMIT {}",
            where_clause,
            filter.limit.unwrap_or(100)
        );

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(values.iter()), JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn count_by_status(db: &Database, status: &str) -> Result<u64, DatabaseError> {
    db.with_conn(|conn| {
        let count: u64 = conn.query_row(
            "SELECT COUNT(*) FROM jobs WHERE status = ?1",
            params![status],
            |r| r.get(0),
        )?;
        Ok(count)
    })
}

fn find_in(conn: &Connection, id: &str) -> Result<Option<JobRow>, DatabaseError> {
    let row = conn
        .query_row("SELECT * FROM jobs WHERE id = ?1", params![id], JobRow::from_row)
        .optional()?;
    Ok(row)
}
