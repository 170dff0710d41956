//! Git-backed deployment: working copy cache, manifest layout, and the
//! write/commit/push protocol.

pub mod cache;
pub mod deployer;
pub mod error;
pub mod git;
pub mod path;

pub use cache::{RepoLease, RepositoryCache};
pub use deployer::{DeleteOutcome, DeployOutcome, ManifestDeployer, TenantManifest};
pub use error::{classify_git_error, GitOpsError};
pub use git::GitRepository;
pub use path::{manifest_path, validate_segment, ManifestTarget};
