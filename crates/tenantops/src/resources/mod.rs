//! Resource records, their audit trail, and per-kind behavior.

pub mod kinds;
mod store;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub use kinds::{KindRegistry, ResourceKind};
pub use store::{Reservation, ResourceStore};

/// Arbitrary key/value resource specification.
pub type Spec = Map<String, Value>;

pub const STATUS_CREATING: &str = "creating";
pub const STATUS_UPDATING: &str = "updating";
pub const STATUS_DELETING: &str = "deleting";
pub const STATUS_SYNCING: &str = "syncing";
pub const STATUS_FAILED: &str = crate::db::resource_repo::STATUS_FAILED;
/// Left by a failed update; the resource is still live.
pub const STATUS_UPDATE_FAILED: &str = "update_failed";
/// Left by a failed delete; the resource is still live.
pub const STATUS_DELETE_FAILED: &str = "delete_failed";

/// Serialization key for everything touching one resource identity.
pub fn resource_key(tenant_id: &str, resource_type: &str, name: &str) -> String {
    format!("{}/{}/{}", tenant_id, resource_type, name)
}

/// Application name used with the sync engine.
pub fn external_app_name(tenant_id: &str, resource_type: &str, name: &str) -> String {
    format!("{}-{}-{}", tenant_id, resource_type, name)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub tenant_id: String,
    pub resource_type: String,
    pub name: String,
    /// Last-applied spec.
    pub spec: Spec,
    pub status: String,
    pub manifest_path: Option<String>,
    pub external_app_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Resource {
    pub fn key(&self) -> String {
        resource_key(&self.tenant_id, &self.resource_type, &self.name)
    }

    pub fn is_failed(&self) -> bool {
        self.status == STATUS_FAILED
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Success,
    Failed,
}

impl OperationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Self {
        if s == "success" {
            Self::Success
        } else {
            Self::Failed
        }
    }
}

/// One attempted lifecycle action against a resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationRecord {
    pub id: String,
    pub resource_id: String,
    pub tenant_id: String,
    pub job_id: Option<String>,
    /// `create`, `update` or `delete`.
    pub operation: String,
    pub status: OperationStatus,
    pub details: Value,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl OperationRecord {
    pub fn success(resource: &Resource, job_id: &str, operation: &str, details: Value) -> Self {
        Self::new(resource, job_id, operation, OperationStatus::Success, details, None)
    }

    pub fn failure(resource: &Resource, job_id: &str, operation: &str, error: &str) -> Self {
        Self::new(
            resource,
            job_id,
            operation,
            OperationStatus::Failed,
            Value::Object(Map::new()),
            Some(error.to_string()),
        )
    }

    fn new(
        resource: &Resource,
        job_id: &str,
        operation: &str,
        status: OperationStatus,
        details: Value,
        error_message: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            resource_id: resource.id.clone(),
            tenant_id: resource.tenant_id.clone(),
            job_id: Some(job_id.to_string()),
            operation: operation.to_string(),
            status,
            details,
            error_message,
            created_at: Utc::now(),
        }
    }
}
