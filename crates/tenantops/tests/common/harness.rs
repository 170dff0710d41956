//! Isolated environment for pipeline tests.
//!
//! Each harness owns a temp directory with a bare git remote (seeded with
//! one commit on `main`), a template directory, a repository cache root and
//! a database file. Git-backed tests drive the real `git` CLI.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde_json::Value;
use tempfile::TempDir;
use wiremock::MockServer;

use tenantops::config::{GitSettings, WebhookMode};
use tenantops::{
    AppConfig, ExecutionMode, Job, Provisioner, RepositoryCache, ResourceTypeConfig, WebhookConfig,
};

pub const BRANCH: &str = "main";
pub const WAIT: Duration = Duration::from_secs(60);

pub struct TestHarness {
    temp_dir: TempDir,
    /// Bare repository manifests are pushed to.
    pub remote: PathBuf,
    pub templates_dir: PathBuf,
    pub cache_dir: PathBuf,
    pub db_path: PathBuf,
    scratch: AtomicUsize,
}

impl TestHarness {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let base = temp_dir.path();

        let remote = base.join("remote.git");
        let templates_dir = base.join("templates");
        let cache_dir = base.join("cache");
        let db_path = base.join("data").join("tenantops.db");
        std::fs::create_dir_all(&templates_dir).expect("Failed to create templates dir");

        git(base, &["init", "--bare", "remote.git"]);
        let seed = base.join("seed");
        git(base, &["clone", "remote.git", "seed"]);
        git(&seed, &["symbolic-ref", "HEAD", "refs/heads/main"]);
        std::fs::write(seed.join("README.md"), "# deployments\n").expect("Failed to write README");
        git(&seed, &["add", "README.md"]);
        commit(&seed, "Initial commit");
        git(&seed, &["push", "origin", BRANCH]);
        git(&remote, &["symbolic-ref", "HEAD", "refs/heads/main"]);

        Self {
            temp_dir,
            remote,
            templates_dir,
            cache_dir,
            db_path,
            scratch: AtomicUsize::new(0),
        }
    }

    pub fn temp_path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn remote_url(&self) -> String {
        self.remote.to_string_lossy().to_string()
    }

    /// Fast settings: no simulated latency, millisecond retry and backoff.
    pub fn config(&self, mode: ExecutionMode) -> AppConfig {
        let mut config = AppConfig::default();
        config.mode = mode;
        config.database.path = Some(self.db_path.clone());
        config.git.cache_dir = Some(self.cache_dir.clone());
        config.templates.local_dir = Some(self.templates_dir.clone());
        config.in_process.simulated_latency_ms = 0;
        config.retry.max_retries = 2;
        config.retry.base_delay_ms = 10;
        config.retry.max_delay_ms = 50;
        config.webhook.backoff_unit_ms = 10;
        config.workers.count = 2;
        config.workers.poll_interval_ms = 20;
        config
    }

    pub fn provisioner(&self, mode: ExecutionMode) -> Provisioner {
        Provisioner::from_config(self.config(mode)).expect("Failed to build provisioner")
    }

    /// Points `name` at this harness's remote.
    pub fn register_type(
        &self,
        provisioner: &Provisioner,
        name: &str,
        cluster_aware: bool,
        webhook: WebhookConfig,
    ) {
        let mut config = ResourceTypeConfig::new(name, self.remote_url());
        config.cluster_aware = cluster_aware;
        config.webhook = webhook;
        provisioner
            .resource_types()
            .register(config)
            .expect("Failed to register resource type");
    }

    pub fn write_template(&self, resource_type: &str, flavor: &str, content: &str) -> PathBuf {
        let dir = self.templates_dir.join(resource_type);
        std::fs::create_dir_all(&dir).expect("Failed to create template dir");
        let path = dir.join(format!("{}.yaml", flavor));
        std::fs::write(&path, content).expect("Failed to write template");
        path
    }

    /// File content at the tip of `main` in the remote, if present.
    pub fn remote_file(&self, path: &str) -> Option<String> {
        let output = Command::new("git")
            .args(["show", &format!("{}:{}", BRANCH, path)])
            .current_dir(&self.remote)
            .output()
            .expect("Failed to run git show");
        output
            .status
            .success()
            .then(|| String::from_utf8_lossy(&output.stdout).to_string())
    }

    /// Whether any path under `prefix` exists at the tip of `main`.
    pub fn remote_has_tree(&self, prefix: &str) -> bool {
        let listing = git(&self.remote, &["ls-tree", "-r", "--name-only", BRANCH]);
        listing.lines().any(|line| line.starts_with(prefix))
    }

    pub fn remote_commit_count(&self) -> usize {
        git(&self.remote, &["rev-list", "--count", BRANCH])
            .trim()
            .parse()
            .expect("rev-list count is a number")
    }

    pub fn remote_head_message(&self) -> String {
        git(&self.remote, &["log", "-1", "--format=%s", BRANCH])
            .trim()
            .to_string()
    }

    /// Working copy the cache keeps for the remote.
    pub fn cached_copy(&self) -> PathBuf {
        RepositoryCache::new(&self.cache_dir, GitSettings::default()).local_path(&self.remote_url())
    }

    /// A fresh clone to make commits from, as another writer would.
    pub fn scratch_clone(&self) -> PathBuf {
        let n = self.scratch.fetch_add(1, Ordering::Relaxed);
        let name = format!("scratch-{}", n);
        git(
            self.temp_path(),
            &["clone", "--branch", BRANCH, &self.remote_url(), &name],
        );
        self.temp_path().join(name)
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

pub fn webhook(url: String, mode: WebhookMode, retries: u32) -> WebhookConfig {
    WebhookConfig {
        enabled: true,
        url,
        mode,
        timeout: 5,
        retries,
    }
}

/// Terminal webhooks go out after the job is persisted, so callers poll.
pub async fn wait_for_requests(server: &MockServer, count: usize) -> Vec<Value> {
    let deadline = tokio::time::Instant::now() + WAIT;
    loop {
        let received = server.received_requests().await.unwrap_or_default();
        if received.len() >= count || tokio::time::Instant::now() >= deadline {
            return received
                .iter()
                .map(|request| {
                    serde_json::from_slice(&request.body).expect("webhook body is JSON")
                })
                .collect();
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

pub fn assert_log_contains(job: &Job, needle: &str) {
    assert!(
        job.logs.iter().any(|line| line.contains(needle)),
        "no log line contains {:?}: {:#?}",
        needle,
        job.logs
    );
}

pub fn git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("Failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).to_string()
}

pub fn commit(dir: &Path, message: &str) {
    git(
        dir,
        &[
            "-c",
            "user.name=Test",
            "-c",
            "user.email=test@example.com",
            "commit",
            "-m",
            message,
        ],
    );
}
