//! Writes, removes and lists manifests in deployment repositories.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use walkdir::WalkDir;

use super::cache::{RepoLease, RepositoryCache};
use super::error::{GitOpsError, Result};
use super::git::{CommitResult, GitRepository};
use super::path::{tenant_dir, ManifestTarget, MANIFEST_FILE};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeployOutcome {
    /// Repository-relative, `/`-separated.
    pub manifest_path: String,
    /// `None` when the manifest was already up to date.
    pub commit: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DeleteOutcome {
    Deleted {
        manifest_path: String,
        commit: Option<String>,
    },
    NotFound {
        manifest_path: String,
    },
}

/// A committed manifest as read back from a deployment repository.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TenantManifest {
    pub path: String,
    pub content: serde_yaml::Value,
}

#[derive(Debug, Clone)]
pub struct ManifestDeployer {
    cache: Arc<RepositoryCache>,
}

impl ManifestDeployer {
    pub fn new(cache: Arc<RepositoryCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<RepositoryCache> {
        &self.cache
    }

    /// Writes the manifest, commits and pushes.
    ///
    /// Identical content produces no commit and no push. Any failure after
    /// the working copy was touched discards it; a failed push is reported
    /// as retryable.
    pub async fn deploy(&self, target: &ManifestTarget, content: &str) -> Result<DeployOutcome> {
        let relative = target.relative_path()?;
        let lease = self.cache.acquire(&target.repo_url, &target.branch).await?;
        let absolute = lease.path().join(&relative);

        let written = write_and_commit(
            lease.repo(),
            &absolute,
            &relative,
            content,
            &target.commit_message("Deploy"),
        );
        let commit = invalidate_on_error(&lease, written)?;
        let manifest_path = display_path(&relative);

        let Some(hash) = commit.commit_hash else {
            log::info!("Manifest {} unchanged, nothing to push", manifest_path);
            return Ok(DeployOutcome {
                manifest_path,
                commit: None,
            });
        };

        push_or_invalidate(&lease).await?;
        log::info!("Manifest deployed: {} ({})", manifest_path, hash);
        Ok(DeployOutcome {
            manifest_path,
            commit: Some(hash),
        })
    }

    /// Removes the manifest, prunes empty directories, commits and pushes.
    pub async fn delete(&self, target: &ManifestTarget) -> Result<DeleteOutcome> {
        let relative = target.relative_path()?;
        let manifest_path = display_path(&relative);
        let lease = self.cache.acquire(&target.repo_url, &target.branch).await?;
        let absolute = lease.path().join(&relative);

        if !absolute.is_file() {
            log::warn!("Manifest not found: {}", manifest_path);
            return Ok(DeleteOutcome::NotFound { manifest_path });
        }

        let removed = remove_and_commit(
            &lease,
            &absolute,
            &relative,
            &target.commit_message("Delete"),
        );
        let commit = invalidate_on_error(&lease, removed)?;
        if commit.commit_hash.is_some() {
            push_or_invalidate(&lease).await?;
        }

        log::info!("Manifest deleted: {}", manifest_path);
        Ok(DeleteOutcome::Deleted {
            manifest_path,
            commit: commit.commit_hash,
        })
    }

    /// Every committed manifest of one tenant, sorted by path.
    pub async fn list_tenant_manifests(
        &self,
        repo_url: &str,
        branch: &str,
        tenant_id: &str,
    ) -> Result<Vec<TenantManifest>> {
        let relative = tenant_dir(tenant_id)?;
        let lease = self.cache.acquire(repo_url, branch).await?;
        let root = lease.path().join(&relative);
        if !root.is_dir() {
            return Ok(Vec::new());
        }

        let mut manifests = Vec::new();
        for entry in WalkDir::new(&root).sort_by_file_name() {
            let entry = entry.map_err(|e| GitOpsError::FileOperation(e.to_string()))?;
            if !entry.file_type().is_file() || entry.file_name() != MANIFEST_FILE {
                continue;
            }
            let path = entry.path();
            let text = std::fs::read_to_string(path)?;
            let content = serde_yaml::from_str(&text).map_err(|e| GitOpsError::ParseYaml {
                path: path.to_path_buf(),
                message: e.to_string(),
            })?;
            let rel = path.strip_prefix(lease.path()).unwrap_or(path);
            manifests.push(TenantManifest {
                path: display_path(rel),
                content,
            });
        }
        Ok(manifests)
    }
}

fn write_and_commit(
    repo: &GitRepository,
    absolute: &Path,
    relative: &Path,
    content: &str,
    message: &str,
) -> Result<CommitResult> {
    if let Some(parent) = absolute.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(absolute, content).map_err(|e| GitOpsError::WriteFile {
        path: absolute.to_path_buf(),
        source: e,
    })?;
    repo.stage(relative)?;
    repo.commit(message)
}

fn remove_and_commit(
    lease: &RepoLease,
    absolute: &Path,
    relative: &Path,
    message: &str,
) -> Result<CommitResult> {
    std::fs::remove_file(absolute)?;
    prune_empty_parents(absolute, lease.path());
    lease.repo().unstage_removed(relative)?;
    lease.repo().commit(message)
}

/// A half-applied change must not leak into the next job's commit.
fn invalidate_on_error<T>(lease: &RepoLease, result: Result<T>) -> Result<T> {
    if let Err(e) = &result {
        log::warn!("Change failed, discarding working copy: {}", e);
        lease.invalidate();
    }
    result
}

async fn push_or_invalidate(lease: &RepoLease) -> Result<()> {
    if let Err(e) = lease.repo().push().await {
        log::warn!("Push failed, discarding working copy: {}", e);
        lease.invalidate();
        let keep = e.is_retryable() || matches!(e, GitOpsError::GitAuthFailed(_));
        return Err(if keep {
            e
        } else {
            GitOpsError::GitPushRejected(e.to_string())
        });
    }
    Ok(())
}

/// Removes now-empty directories between `file` and `root` (exclusive).
fn prune_empty_parents(file: &Path, root: &Path) {
    let mut current = file.parent();
    while let Some(dir) = current {
        if dir == root || !dir.starts_with(root) {
            break;
        }
        let is_empty = std::fs::read_dir(dir)
            .map(|mut entries| entries.next().is_none())
            .unwrap_or(false);
        if !is_empty || std::fs::remove_dir(dir).is_err() {
            break;
        }
        current = dir.parent();
    }
}

fn display_path(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
