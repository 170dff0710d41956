//! Typed access to resource rows and their operation log.

use chrono::Utc;

use super::{external_app_name, OperationRecord, OperationStatus, Resource, Spec};
use crate::db::operation_repo::{self, OperationRow};
use crate::db::resource_repo::{self, ResourceRow};
use crate::db::{format_timestamp, parse_timestamp, Database, DatabaseError};

#[derive(Debug, Clone, PartialEq)]
pub enum Reservation {
    Reserved(Resource),
    Exists(Resource),
}

#[derive(Debug, Clone)]
pub struct ResourceStore {
    db: Database,
}

impl ResourceStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Claims `(tenant, type, name)` for a new resource in `status`.
    pub fn reserve(
        &self,
        tenant_id: &str,
        resource_type: &str,
        name: &str,
        spec: &Spec,
        status: &str,
    ) -> Result<Reservation, DatabaseError> {
        let now = format_timestamp(Utc::now());
        let row = ResourceRow {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: tenant_id.to_string(),
            resource_type: resource_type.to_string(),
            name: name.to_string(),
            spec: spec_to_json(spec)?,
            status: status.to_string(),
            manifest_path: None,
            external_app_name: external_app_name(tenant_id, resource_type, name),
            created_at: now.clone(),
            updated_at: now,
        };

        Ok(match resource_repo::reserve(&self.db, &row)? {
            resource_repo::Reservation::Reserved(row) => Reservation::Reserved(to_resource(row)?),
            resource_repo::Reservation::Exists(row) => Reservation::Exists(to_resource(row)?),
        })
    }

    pub fn get(
        &self,
        tenant_id: &str,
        resource_type: &str,
        name: &str,
    ) -> Result<Option<Resource>, DatabaseError> {
        resource_repo::find(&self.db, tenant_id, resource_type, name)?
            .map(to_resource)
            .transpose()
    }

    pub fn list(
        &self,
        tenant_id: &str,
        resource_type: Option<&str>,
    ) -> Result<Vec<Resource>, DatabaseError> {
        resource_repo::list_by_tenant(&self.db, tenant_id, resource_type)?
            .into_iter()
            .map(to_resource)
            .collect()
    }

    pub fn mark_status(&self, id: &str, status: &str) -> Result<bool, DatabaseError> {
        resource_repo::update_status(&self.db, id, status, &format_timestamp(Utc::now()))
    }

    pub fn record_deploy(
        &self,
        id: &str,
        spec: &Spec,
        status: &str,
        manifest_path: &str,
    ) -> Result<bool, DatabaseError> {
        resource_repo::record_deploy(
            &self.db,
            id,
            &spec_to_json(spec)?,
            status,
            manifest_path,
            &format_timestamp(Utc::now()),
        )
    }

    pub fn remove(&self, id: &str) -> Result<bool, DatabaseError> {
        resource_repo::delete(&self.db, id)
    }

    pub fn record_operation(&self, record: &OperationRecord) -> Result<(), DatabaseError> {
        let details =
            serde_json::to_string(&record.details).map_err(DatabaseError::json("details"))?;
        operation_repo::insert(
            &self.db,
            &OperationRow {
                id: record.id.clone(),
                resource_id: record.resource_id.clone(),
                tenant_id: record.tenant_id.clone(),
                job_id: record.job_id.clone(),
                operation: record.operation.clone(),
                status: record.status.as_str().to_string(),
                details,
                error_message: record.error_message.clone(),
                created_at: format_timestamp(record.created_at),
            },
        )
    }

    /// Oldest first.
    pub fn operations(&self, resource_id: &str) -> Result<Vec<OperationRecord>, DatabaseError> {
        operation_repo::list_for_resource(&self.db, resource_id)?
            .into_iter()
            .map(|row| {
                Ok(OperationRecord {
                    details: serde_json::from_str(&row.details)
                        .map_err(DatabaseError::json("details"))?,
                    status: OperationStatus::parse(&row.status),
                    created_at: parse_timestamp(&row.created_at),
                    id: row.id,
                    resource_id: row.resource_id,
                    tenant_id: row.tenant_id,
                    job_id: row.job_id,
                    operation: row.operation,
                    error_message: row.error_message,
                })
            })
            .collect()
    }
}

fn spec_to_json(spec: &Spec) -> Result<String, DatabaseError> {
    serde_json::to_string(spec).map_err(DatabaseError::json("spec"))
}

fn to_resource(row: ResourceRow) -> Result<Resource, DatabaseError> {
    Ok(Resource {
        spec: serde_json::from_str(&row.spec).map_err(DatabaseError::json("spec"))?,
        created_at: parse_timestamp(&row.created_at),
        updated_at: parse_timestamp(&row.updated_at),
        id: row.id,
        tenant_id: row.tenant_id,
        resource_type: row.resource_type,
        name: row.name,
        status: row.status,
        manifest_path: row.manifest_path,
        external_app_name: row.external_app_name,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::{STATUS_CREATING, STATUS_FAILED, STATUS_SYNCING};
    use serde_json::json;

    fn store() -> ResourceStore {
        ResourceStore::new(Database::open_in_memory().unwrap())
    }

    fn spec(value: serde_json::Value) -> Spec {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_reserve_then_conflict() {
        let store = store();
        let s = spec(json!({"labels": {"team": "core"}}));

        let first = store.reserve("acme", "namespace", "payments", &s, STATUS_CREATING).unwrap();
        let Reservation::Reserved(resource) = first else {
            panic!("expected reservation");
        };
        assert_eq!(resource.external_app_name, "acme-namespace-payments");
        assert_eq!(resource.spec, s);

        let second = store.reserve("acme", "namespace", "payments", &s, STATUS_CREATING).unwrap();
        assert!(matches!(second, Reservation::Exists(r) if r.id == resource.id));
    }

    #[test]
    fn test_failed_resource_can_be_reserved_again() {
        let store = store();
        let Reservation::Reserved(first) = store
            .reserve("acme", "vm", "web", &Spec::new(), STATUS_CREATING)
            .unwrap()
        else {
            panic!("expected reservation");
        };
        store.mark_status(&first.id, STATUS_FAILED).unwrap();

        let again = store.reserve("acme", "vm", "web", &Spec::new(), STATUS_CREATING).unwrap();
        match again {
            Reservation::Reserved(r) => {
                assert_eq!(r.id, first.id);
                assert_eq!(r.status, STATUS_CREATING);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_record_deploy_and_list() {
        let store = store();
        let Reservation::Reserved(r) = store
            .reserve("acme", "app", "api", &Spec::new(), STATUS_CREATING)
            .unwrap()
        else {
            panic!("expected reservation");
        };
        let applied = spec(json!({"image": "nginx", "port": 80}));
        assert!(store
            .record_deploy(&r.id, &applied, STATUS_SYNCING, "tenants/acme/app/api/manifest.yaml")
            .unwrap());

        let listed = store.list("acme", Some("app")).unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].spec, applied);
        assert_eq!(listed[0].status, STATUS_SYNCING);
        assert_eq!(
            listed[0].manifest_path.as_deref(),
            Some("tenants/acme/app/api/manifest.yaml")
        );
        assert!(store.list("other", None).unwrap().is_empty());
    }

    #[test]
    fn test_operations_are_append_only_and_ordered() {
        let store = store();
        let Reservation::Reserved(r) = store
            .reserve("acme", "namespace", "payments", &Spec::new(), STATUS_CREATING)
            .unwrap()
        else {
            panic!("expected reservation");
        };

        store
            .record_operation(&OperationRecord::failure(&r, "job-1", "create", "push rejected"))
            .unwrap();
        store
            .record_operation(&OperationRecord::success(
                &r,
                "job-1",
                "create",
                json!({"commit": "abc"}),
            ))
            .unwrap();

        let ops = store.operations(&r.id).unwrap();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].status, OperationStatus::Failed);
        assert_eq!(ops[0].error_message.as_deref(), Some("push rejected"));
        assert_eq!(ops[1].details["commit"], "abc");
    }

    #[test]
    fn test_remove() {
        let store = store();
        let Reservation::Reserved(r) = store
            .reserve("acme", "namespace", "gone", &Spec::new(), STATUS_CREATING)
            .unwrap()
        else {
            panic!("expected reservation");
        };
        assert!(store.remove(&r.id).unwrap());
        assert!(store.get("acme", "namespace", "gone").unwrap().is_none());
        assert!(!store.remove(&r.id).unwrap());
    }
}
