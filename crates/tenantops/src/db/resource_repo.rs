//! Resource repository: one row per live (tenant, type, name) identity.

use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{Database, DatabaseError};

/// Status a failed create leaves behind; such a row may be re-reserved.
pub const STATUS_FAILED: &str = "failed";

#[derive(Debug, Clone, PartialEq)]
pub struct ResourceRow {
    pub id: String,
    pub tenant_id: String,
    pub resource_type: String,
    pub name: String,
    /// Last-applied spec as JSON text.
    pub spec: String,
    pub status: String,
    pub manifest_path: Option<String>,
    pub external_app_name: String,
    pub created_at: String,
    pub updated_at: String,
}

impl ResourceRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            tenant_id: row.get("tenant_id")?,
            resource_type: row.get("resource_type")?,
            name: row.get("name")?,
            spec: row.get("spec")?,
            status: row.get("status")?,
            manifest_path: row.get("manifest_path")?,
            external_app_name: row.get("external_app_name")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }
}

/// Result of trying to claim an identity for a new resource.
#[derive(Debug, Clone, PartialEq)]
pub enum Reservation {
    Reserved(ResourceRow),
    /// A live resource already holds the identity.
    Exists(ResourceRow),
}

/// Claims the identity of `row` atomically.
///
/// A previous row left in `failed` state is replaced; any other existing
/// row wins and is returned as `Exists`.
pub fn reserve(db: &Database, row: &ResourceRow) -> Result<Reservation, DatabaseError> {
    db.with_conn(|conn| {
        let existing = find_in(conn, &row.tenant_id, &row.resource_type, &row.name)?;
        match existing {
            Some(existing) if existing.status != STATUS_FAILED => Ok(Reservation::Exists(existing)),
            Some(failed) => {
                conn.execute(
                    "UPDATE resources SET spec = ?2, status = ?3, manifest_path = NULL,
                     updated_at = ?4 WHERE id = ?1",
                    params![failed.id, row.spec, row.status, row.updated_at],
                )?;
                let reserved = ResourceRow {
                    id: failed.id,
                    created_at: failed.created_at,
                    manifest_path: None,
                    ..row.clone()
                };
                Ok(Reservation::Reserved(reserved))
            }
            None => {
                conn.execute(
                    "INSERT INTO resources (id, tenant_id, resource_type, name, spec, status,
                     manifest_path, external_app_name, created_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                    params![
                        row.id,
                        row.tenant_id,
                        row.resource_type,
                        row.name,
                        row.spec,
                        row.status,
                        row.manifest_path,
                        row.external_app_name,
                        row.created_at,
                        row.updated_at,
                    ],
                )?;
                Ok(Reservation::Reserved(row.clone()))
            }
        }
    })
}

pub fn find(
    db: &Database,
    tenant_id: &str,
    resource_type: &str,
    name: &str,
) -> Result<Option<ResourceRow>, DatabaseError> {
    db.with_conn(|conn| find_in(conn, tenant_id, resource_type, name))
}

pub fn list_by_tenant(
    db: &Database,
    tenant_id: &str,
    resource_type: Option<&str>,
) -> Result<Vec<ResourceRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare(
            "SELECT * FROM resources WHERE tenant_id = ?1
             AND (?2 IS NULL OR resource_type = ?2)
             ORDER BY resource_type, name",
        )?;
        let rows = stmt
            .query_map(params![tenant_id, resource_type], ResourceRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

pub fn update_status(
    db: &Database,
    id: &str,
    status: &str,
    updated_at: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE resources SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status, updated_at],
        )?;
        Ok(changed > 0)
    })
}

/// Records the outcome of a successful deploy.
pub fn record_deploy(
    db: &Database,
    id: &str,
    spec: &str,
    status: &str,
    manifest_path: &str,
    updated_at: &str,
) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute(
            "UPDATE resources SET spec = ?2, status = ?3, manifest_path = ?4, updated_at = ?5
             WHERE id = ?1",
            params![id, spec, status, manifest_path, updated_at],
        )?;
        Ok(changed > 0)
    })
}

pub fn delete(db: &Database, id: &str) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let changed = conn.execute("DELETE FROM resources WHERE id = ?1", params![id])?;
        Ok(changed > 0)
    })
}

fn find_in(
    conn: &Connection,
    tenant_id: &str,
    resource_type: &str,
    name: &str,
) -> Result<Option<ResourceRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT * FROM resources WHERE tenant_id = ?1 AND resource_type = ?2 AND name = ?3",
            params![tenant_id, resource_type, name],
            ResourceRow::from_row,
        )
        .optional()?;
    Ok(row)
}
