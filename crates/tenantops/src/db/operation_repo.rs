//! Append-only audit trail of lifecycle actions against resources.

use rusqlite::{params, Row};

use super::{Database, DatabaseError};

#[derive(Debug, Clone, PartialEq)]
pub struct OperationRow {
    pub id: String,
    pub resource_id: String,
    pub tenant_id: String,
    pub job_id: Option<String>,
    pub operation: String,
    pub status: String,
    /// JSON text.
    pub details: String,
    pub error_message: Option<String>,
    pub created_at: String,
}

impl OperationRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            resource_id: row.get("resource_id")?,
            tenant_id: row.get("tenant_id")?,
            job_id: row.get("job_id")?,
            operation: row.get("operation")?,
            status: row.get("status")?,
            details: row.get("details")?,
            error_message: row.get("error_message")?,
            created_at: row.get("created_at")?,
        })
    }
}

pub fn insert(db: &Database, op: &OperationRow) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO resource_operations (id, resource_id, tenant_id, job_id, operation,
             status, details, error_message, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                op.id,
                op.resource_id,
                op.tenant_id,
                op.job_id,
                op.operation,
                op.status,
                op.details,
                op.error_message,
                op.created_at,
            ],
        )?;
        Ok(())
    })
}

/// Oldest first.
pub fn list_for_resource(
    db: &Database,
    resource_id: &str,
) -> Result<Vec<OperationRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM resource_operations WHERE resource_id = ?1
             ORDER BY created_at, rowid",
        )?;
        let rows = stmt
            .query_map(params![resource_id], OperationRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}
