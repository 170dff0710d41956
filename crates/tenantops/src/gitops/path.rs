//! Repository layout for committed manifests.
//!
//! `tenants/<tenant>/[<cluster>/]<resource_type>/<name>/manifest.yaml`

use std::path::PathBuf;

use super::error::{GitOpsError, Result};

pub const TENANTS_DIR: &str = "tenants";
pub const MANIFEST_FILE: &str = "manifest.yaml";

/// Everything that decides where a manifest lives and how its commit reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestTarget {
    pub repo_url: String,
    pub branch: String,
    pub tenant_id: String,
    pub cluster_id: Option<String>,
    pub resource_type: String,
    pub name: String,
    pub cluster_aware: bool,
}

impl ManifestTarget {
    pub fn relative_path(&self) -> Result<PathBuf> {
        manifest_path(
            &self.tenant_id,
            self.cluster_id.as_deref(),
            &self.resource_type,
            &self.name,
            self.cluster_aware,
        )
    }

    /// Cluster id as it appears in the path, if at all.
    fn effective_cluster(&self) -> Option<&str> {
        effective_cluster(self.cluster_id.as_deref(), self.cluster_aware)
    }

    pub fn commit_message(&self, verb: &str) -> String {
        let mut message = format!(
            "{} {} {} for tenant {}",
            verb, self.resource_type, self.name, self.tenant_id
        );
        if let Some(cluster) = self.effective_cluster() {
            message.push_str(&format!(" in cluster {}", cluster));
        }
        message
    }
}

fn effective_cluster(cluster_id: Option<&str>, cluster_aware: bool) -> Option<&str> {
    cluster_id.filter(|c| cluster_aware && !c.is_empty())
}

/// Builds the repository-relative manifest path.
///
/// Pure: the same inputs always give the same path. The cluster segment is
/// present only when the type is cluster-aware and a cluster id is given.
pub fn manifest_path(
    tenant_id: &str,
    cluster_id: Option<&str>,
    resource_type: &str,
    name: &str,
    cluster_aware: bool,
) -> Result<PathBuf> {
    let mut path = PathBuf::from(TENANTS_DIR);
    path.push(validate_segment(tenant_id)?);
    if let Some(cluster) = effective_cluster(cluster_id, cluster_aware) {
        path.push(validate_segment(cluster)?);
    }
    path.push(validate_segment(resource_type)?);
    path.push(validate_segment(name)?);
    path.push(MANIFEST_FILE);
    Ok(path)
}

/// Directory holding every manifest of one tenant.
pub fn tenant_dir(tenant_id: &str) -> Result<PathBuf> {
    Ok(PathBuf::from(TENANTS_DIR).join(validate_segment(tenant_id)?))
}

/// Accepts a single, non-empty, non-traversing path component.
pub fn validate_segment(segment: &str) -> Result<&str> {
    let reason = if segment.is_empty() {
        Some("must not be empty")
    } else if segment == "." || segment == ".." {
        Some("must not be a relative path component")
    } else if segment.contains('/') || segment.contains('\\') {
        Some("must not contain path separators")
    } else if segment.starts_with('.') {
        Some("must not start with '.'")
    } else if segment.chars().any(|c| c.is_control()) {
        Some("must not contain control characters")
    } else {
        None
    };

    match reason {
        Some(reason) => Err(GitOpsError::InvalidSegment {
            segment: segment.to_string(),
            reason: reason.to_string(),
        }),
        None => Ok(segment),
    }
}
