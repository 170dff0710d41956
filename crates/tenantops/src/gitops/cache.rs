//! Local working copies keyed by repository URL.
//!
//! Every user of a working copy goes through [`RepositoryCache::acquire`],
//! which holds the per-URL lock for the lifetime of the returned lease.

use std::path::{Path, PathBuf};

use super::error::Result;
use super::git::GitRepository;
use crate::config::GitSettings;
use crate::keyed_lock::{KeyedGuard, KeyedMutex};

#[derive(Debug)]
pub struct RepositoryCache {
    root: PathBuf,
    settings: GitSettings,
    locks: KeyedMutex,
}

/// Exclusive, freshly synchronized access to one working copy.
#[derive(Debug)]
pub struct RepoLease {
    repo: GitRepository,
    _guard: KeyedGuard,
}

impl RepoLease {
    pub fn repo(&self) -> &GitRepository {
        &self.repo
    }

    pub fn path(&self) -> &Path {
        self.repo.repo_path()
    }

    /// Discards the working copy so the next lease re-clones.
    pub fn invalidate(&self) {
        discard(self.repo.repo_path());
    }
}

impl RepositoryCache {
    pub fn new(root: impl Into<PathBuf>, settings: GitSettings) -> Self {
        Self {
            root: root.into(),
            settings,
            locks: KeyedMutex::new(),
        }
    }

    pub fn from_settings(settings: &GitSettings) -> Self {
        Self::new(settings.cache_root(), settings.clone())
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the working copy for `url` lives.
    pub fn local_path(&self, url: &str) -> PathBuf {
        self.root.join(cache_dir_name(url))
    }

    /// Locks `url`, then brings its working copy up to date.
    ///
    /// An existing copy is fast-forward pulled; if that fails for any
    /// reason it is deleted and cloned again.
    pub async fn acquire(&self, url: &str, branch: &str) -> Result<RepoLease> {
        let guard = self.locks.lock(url).await;
        let path = self.local_path(url);
        let repo = GitRepository::new(&path, branch, self.settings.clone());

        if repo.is_git_repo() {
            match repo.pull().await {
                Ok(result) => {
                    if !result.already_up_to_date {
                        log::debug!("Updated working copy of {}", url);
                    }
                    return Ok(RepoLease {
                        repo,
                        _guard: guard,
                    });
                }
                Err(e) => {
                    log::warn!("Pull of {} failed, re-cloning: {}", url, e);
                    discard(&path);
                }
            }
        } else if path.exists() {
            // Leftover from an interrupted clone.
            discard(&path);
        }

        repo.clone_from(url).await?;
        log::info!("Cloned {} into {}", url, path.display());
        Ok(RepoLease {
            repo,
            _guard: guard,
        })
    }
}

fn discard(path: &Path) {
    if let Err(e) = std::fs::remove_dir_all(path) {
        if e.kind() != std::io::ErrorKind::NotFound {
            log::warn!("Failed to remove working copy {}: {}", path.display(), e);
        }
    }
}

/// Deterministic, filesystem-safe directory name for a repository URL.
///
/// The readable tail is not unique on its own (`a/b` vs `a_b`), so a
/// stable FNV-1a hash of the full URL is appended.
pub fn cache_dir_name(url: &str) -> String {
    let trimmed = url.trim_end_matches('/').trim_end_matches(".git");
    let tail: String = trimmed
        .rsplit(|c| c == '/' || c == ':')
        .take(2)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect::<Vec<_>>()
        .join("_")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();

    format!("{}-{:016x}", tail.trim_matches('_'), fnv1a(url.as_bytes()))
}

fn fnv1a(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    bytes
        .iter()
        .fold(OFFSET, |hash, b| (hash ^ u64::from(*b)).wrapping_mul(PRIME))
}
