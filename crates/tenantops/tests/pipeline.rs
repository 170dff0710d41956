//! End-to-end runs of the in-process pipeline against a local bare remote.

mod common;

use common::*;
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use tenantops::config::{ResourceTypeConfig, WebhookMode};
use tenantops::{
    ExecutionMode, JobOperation, JobStatus, JobSubmission, ProvisionError, ProvisionRequest,
    Provisioner, Spec, WebhookConfig,
};

const MANIFEST: &str = "tenants/acme/namespace/payments/manifest.yaml";

fn request(name: &str, operation: JobOperation, spec: Value) -> ProvisionRequest {
    let spec: Spec = match spec {
        Value::Object(map) => map,
        _ => Spec::new(),
    };
    ProvisionRequest {
        tenant_id: "acme".to_string(),
        cluster_id: Some("eu1".to_string()),
        resource_type: "namespace".to_string(),
        name: name.to_string(),
        operation,
        spec,
    }
}

async fn run(provisioner: &Provisioner, request: ProvisionRequest) -> tenantops::Job {
    let job_id = provisioner.submit(request).await.expect("submit");
    provisioner
        .wait_for_job(&job_id, WAIT)
        .await
        .expect("wait")
        .expect("job exists")
}

async fn hook_server(status: u16) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(status))
        .mount(&server)
        .await;
    server
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_create_commits_manifest_and_notifies() {
    let harness = TestHarness::new();
    let server = hook_server(200).await;
    let p = harness.provisioner(ExecutionMode::InProcess);
    harness.register_type(
        &p,
        "namespace",
        false,
        webhook(format!("{}/hook", server.uri()), WebhookMode::Single, 3),
    );

    let job = run(&p, request("payments", JobOperation::Create, json!({}))).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.attempts, 1);
    assert!(job.finished_at.is_some());
    assert_log_contains(&job, "Job completed");
    assert!(job.metadata["commit"].is_string());
    assert_eq!(job.metadata["manifest_path"], MANIFEST);

    let manifest = harness.remote_file(MANIFEST).expect("manifest pushed");
    assert!(manifest.contains("kind: Namespace"));
    assert!(manifest.contains("name: payments"));
    assert!(manifest.contains("tenant.io/id"));
    assert_eq!(
        harness.remote_head_message(),
        "Deploy namespace payments for tenant acme"
    );

    let bodies = wait_for_requests(&server, 1).await;
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["status"], "completed");
    assert_eq!(bodies[0]["job_id"], job.id.as_str());
    assert_eq!(bodies[0]["tenant_id"], "acme");

    let status = p
        .resource_status("acme", "namespace", "payments")
        .await
        .unwrap()
        .expect("resource recorded");
    assert_eq!(status.resource.status, "Synced");
    assert_eq!(status.resource.manifest_path.as_deref(), Some(MANIFEST));
    assert_eq!(
        status.sync.and_then(|s| s.health_status).as_deref(),
        Some("Healthy")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cluster_aware_path() {
    let harness = TestHarness::new();
    let p = harness.provisioner(ExecutionMode::InProcess);
    harness.register_type(&p, "namespace", true, WebhookConfig::default());

    let job = run(&p, request("payments", JobOperation::Create, json!({}))).await;

    assert_eq!(job.status, JobStatus::Completed);
    assert!(harness
        .remote_file("tenants/acme/eu1/namespace/payments/manifest.yaml")
        .is_some());
    assert!(harness.remote_file(MANIFEST).is_none());
    assert_eq!(
        harness.remote_head_message(),
        "Deploy namespace payments for tenant acme in cluster eu1"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_missing_flavor_fails_without_commit() {
    let harness = TestHarness::new();
    let server = hook_server(200).await;
    let p = harness.provisioner(ExecutionMode::InProcess);
    harness.register_type(
        &p,
        "namespace",
        false,
        webhook(format!("{}/hook", server.uri()), WebhookMode::Single, 3),
    );
    let commits = harness.remote_commit_count();

    let job = run(
        &p,
        request("payments", JobOperation::Create, json!({"flavor": "gold"})),
    )
    .await;

    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempts, 1);
    assert!(job.finished_at.is_some());
    assert_log_contains(&job, "TemplateNotFound");
    assert_eq!(harness.remote_commit_count(), commits);
    assert!(!harness.remote_has_tree("tenants/"));

    let bodies = wait_for_requests(&server, 1).await;
    assert_eq!(bodies.len(), 1);
    assert_eq!(bodies[0]["status"], "failed");

    let resource = p
        .get_resource("acme", "namespace", "payments")
        .unwrap()
        .expect("resource recorded");
    assert_eq!(resource.status, "failed");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_flavor_template_from_directory() {
    let harness = TestHarness::new();
    harness.write_template(
        "namespace",
        "small",
        "apiVersion: v1\nkind: Namespace\nmetadata:\n  name: {{ name }}\n  labels:\n    tier: small\n    tenant: {{ tenant_id }}\n",
    );
    let p = harness.provisioner(ExecutionMode::InProcess);
    harness.register_type(&p, "namespace", false, WebhookConfig::default());

    let job = run(
        &p,
        request("payments", JobOperation::Create, json!({"flavor": "small"})),
    )
    .await;

    assert_eq!(job.status, JobStatus::Completed);
    let manifest = harness.remote_file(MANIFEST).expect("manifest pushed");
    assert!(manifest.contains("tier: small"));
    assert!(manifest.contains("tenant: acme"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_update_with_same_spec_makes_no_commit() {
    let harness = TestHarness::new();
    let p = harness.provisioner(ExecutionMode::InProcess);
    harness.register_type(&p, "namespace", false, WebhookConfig::default());

    let created = run(&p, request("payments", JobOperation::Create, json!({}))).await;
    assert_eq!(created.status, JobStatus::Completed);
    let commits = harness.remote_commit_count();

    let unchanged = run(&p, request("payments", JobOperation::Update, json!({}))).await;
    assert_eq!(unchanged.status, JobStatus::Completed);
    assert!(unchanged.metadata["commit"].is_null());
    assert_log_contains(&unchanged, "unchanged");
    assert_eq!(harness.remote_commit_count(), commits);

    let changed = run(
        &p,
        request(
            "payments",
            JobOperation::Update,
            json!({"labels": {"team": "payments"}}),
        ),
    )
    .await;
    assert_eq!(changed.status, JobStatus::Completed);
    assert!(changed.metadata["commit"].is_string());
    assert_eq!(harness.remote_commit_count(), commits + 1);
    let manifest = harness.remote_file(MANIFEST).expect("manifest pushed");
    assert!(manifest.contains("team"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_delete_removes_manifest_and_prunes() {
    let harness = TestHarness::new();
    let p = harness.provisioner(ExecutionMode::InProcess);
    harness.register_type(&p, "namespace", false, WebhookConfig::default());

    run(&p, request("payments", JobOperation::Create, json!({}))).await;
    assert!(harness.remote_file(MANIFEST).is_some());

    let deleted = run(&p, request("payments", JobOperation::Delete, json!({}))).await;
    assert_eq!(deleted.status, JobStatus::Completed);
    assert_log_contains(&deleted, "Deleted tenants/acme/namespace/payments/manifest.yaml");
    assert!(harness.remote_file(MANIFEST).is_none());
    assert!(!harness.remote_has_tree("tenants/"));
    assert!(harness.remote_file("README.md").is_some());
    assert!(p
        .get_resource("acme", "namespace", "payments")
        .unwrap()
        .is_none());

    let again = p
        .submit(request("payments", JobOperation::Delete, json!({})))
        .await;
    assert!(matches!(again, Err(ProvisionError::Conflict(_))));

    // Bypasses the facade's existence check.
    let job_id = p
        .jobs()
        .submit_job(JobSubmission {
            job_type: "delete_namespace".to_string(),
            tenant_id: "acme".to_string(),
            cluster_id: None,
            resource_type: "namespace".to_string(),
            resource_name: "payments".to_string(),
            operation: JobOperation::Delete,
            spec: Spec::new(),
        })
        .await
        .unwrap();
    let job = p.wait_for_job(&job_id, WAIT).await.unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
    assert_log_contains(&job, "not found, nothing to delete");
    assert!(job.metadata["commit"].is_null());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_resource_can_be_recreated() {
    let harness = TestHarness::new();
    let p = harness.provisioner(ExecutionMode::InProcess);
    harness.register_type(&p, "namespace", false, WebhookConfig::default());

    let failed = run(
        &p,
        request("payments", JobOperation::Create, json!({"flavor": "gold"})),
    )
    .await;
    assert_eq!(failed.status, JobStatus::Failed);

    let job = run(&p, request("payments", JobOperation::Create, json!({}))).await;
    assert_eq!(job.status, JobStatus::Completed);
    assert!(harness.remote_file(MANIFEST).is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_concurrent_creates_share_the_repository() {
    let harness = TestHarness::new();
    let p = harness.provisioner(ExecutionMode::InProcess);
    harness.register_type(&p, "namespace", false, WebhookConfig::default());
    let commits = harness.remote_commit_count();

    let names = ["alpha", "beta", "gamma", "delta"];
    let mut ids = Vec::new();
    for name in names {
        ids.push(
            p.submit(request(name, JobOperation::Create, json!({})))
                .await
                .unwrap(),
        );
    }
    for id in &ids {
        let job = p.wait_for_job(id, WAIT).await.unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Completed, "{:#?}", job.logs);
    }

    assert_eq!(harness.remote_commit_count(), commits + names.len());
    for name in names {
        let file = format!("tenants/acme/namespace/{}/manifest.yaml", name);
        assert!(harness.remote_file(&file).is_some(), "{} missing", file);
    }

    let manifests = p.list_tenant_manifests("acme", "namespace").await.unwrap();
    let paths: Vec<_> = manifests.iter().map(|m| m.path.as_str()).collect();
    assert_eq!(
        paths,
        vec![
            "tenants/acme/namespace/alpha/manifest.yaml",
            "tenants/acme/namespace/beta/manifest.yaml",
            "tenants/acme/namespace/delta/manifest.yaml",
            "tenants/acme/namespace/gamma/manifest.yaml",
        ]
    );
    assert_eq!(manifests[0].content["kind"], "Namespace");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_webhook_retried_until_delivered() {
    let harness = TestHarness::new();
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    let p = harness.provisioner(ExecutionMode::InProcess);
    harness.register_type(
        &p,
        "namespace",
        false,
        webhook(format!("{}/hook", server.uri()), WebhookMode::Single, 3),
    );

    let job = run(&p, request("payments", JobOperation::Create, json!({}))).await;
    assert_eq!(job.status, JobStatus::Completed);

    let bodies = wait_for_requests(&server, 3).await;
    assert_eq!(bodies.len(), 3);
    assert!(bodies.iter().all(|b| b["status"] == "completed"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_undelivered_webhook_keeps_job_outcome() {
    let harness = TestHarness::new();
    let server = hook_server(503).await;
    let p = harness.provisioner(ExecutionMode::InProcess);
    harness.register_type(
        &p,
        "namespace",
        false,
        webhook(format!("{}/hook", server.uri()), WebhookMode::Single, 2),
    );

    let job = run(&p, request("payments", JobOperation::Create, json!({}))).await;
    let bodies = wait_for_requests(&server, 2).await;

    assert_eq!(bodies.len(), 2);
    let job = p.get_job_status(&job.id).unwrap().unwrap();
    assert_eq!(job.status, JobStatus::Completed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_staged_webhooks_follow_pipeline() {
    let harness = TestHarness::new();
    let server = hook_server(200).await;
    let p = harness.provisioner(ExecutionMode::InProcess);
    harness.register_type(
        &p,
        "namespace",
        false,
        webhook(format!("{}/hook", server.uri()), WebhookMode::Staged, 3),
    );

    let job = run(&p, request("payments", JobOperation::Create, json!({}))).await;
    assert_eq!(job.status, JobStatus::Completed);

    let bodies = wait_for_requests(&server, 5).await;
    let stages: Vec<_> = bodies
        .iter()
        .map(|b| b["stage"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(
        stages,
        vec!["started", "rendered", "committed", "synced", "completed"]
    );
    assert!(bodies.iter().all(|b| b["job_id"] == job.id.as_str()));
    assert!(bodies.iter().all(|b| b.get("stage_data").is_some()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_diverged_cache_is_recloned() {
    let harness = TestHarness::new();
    let p = harness.provisioner(ExecutionMode::InProcess);
    harness.register_type(&p, "namespace", false, WebhookConfig::default());

    run(&p, request("alpha", JobOperation::Create, json!({}))).await;
    let cached = harness.cached_copy();
    assert!(cached.join(".git").exists());

    // A local commit the remote never sees.
    std::fs::write(cached.join("local-only.txt"), "stray\n").unwrap();
    git(&cached, &["add", "local-only.txt"]);
    commit(&cached, "Local only");

    // Another writer moves the remote on.
    let scratch = harness.scratch_clone();
    std::fs::write(scratch.join("other.txt"), "other writer\n").unwrap();
    git(&scratch, &["add", "other.txt"]);
    commit(&scratch, "Other writer");
    git(&scratch, &["push", "origin", BRANCH]);

    let job = run(&p, request("beta", JobOperation::Create, json!({}))).await;

    assert_eq!(job.status, JobStatus::Completed, "{:#?}", job.logs);
    assert!(harness
        .remote_file("tenants/acme/namespace/beta/manifest.yaml")
        .is_some());
    assert!(harness.remote_file("other.txt").is_some());
    assert!(harness.remote_file("local-only.txt").is_none());
    assert!(!cached.join("local-only.txt").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_jobs_listed_by_tenant() {
    let harness = TestHarness::new();
    let p = harness.provisioner(ExecutionMode::InProcess);
    harness.register_type(&p, "namespace", false, WebhookConfig::default());

    run(&p, request("alpha", JobOperation::Create, json!({}))).await;
    run(&p, request("beta", JobOperation::Create, json!({}))).await;

    let filter = tenantops::jobs::JobFilter {
        tenant_id: Some("acme".to_string()),
        ..Default::default()
    };
    let jobs = p.list_jobs(&filter).unwrap();
    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().all(|j| j.job_type == "create_namespace"));

    let other = tenantops::jobs::JobFilter {
        tenant_id: Some("globex".to_string()),
        ..Default::default()
    };
    assert!(p.list_jobs(&other).unwrap().is_empty());

    let resources = p.list_resources("acme", Some("namespace")).unwrap();
    assert_eq!(resources.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_update_then_delete_run_in_submission_order() {
    let harness = TestHarness::new();
    let mut config = harness.config(ExecutionMode::InProcess);
    config.in_process.simulated_latency_ms = 30;
    let p = Provisioner::from_config(config).expect("Failed to build provisioner");
    harness.register_type(&p, "namespace", false, WebhookConfig::default());

    for name in ["alpha", "beta", "gamma"] {
        let created = run(&p, request(name, JobOperation::Create, json!({}))).await;
        assert_eq!(created.status, JobStatus::Completed, "{:#?}", created.logs);

        let update = p
            .submit(request(name, JobOperation::Update, json!({"labels": {"team": name}})))
            .await
            .unwrap();
        let delete = p
            .submit(request(name, JobOperation::Delete, json!({})))
            .await
            .unwrap();
        let update = p.wait_for_job(&update, WAIT).await.unwrap().unwrap();
        let delete = p.wait_for_job(&delete, WAIT).await.unwrap().unwrap();

        assert_eq!(update.status, JobStatus::Completed, "{:#?}", update.logs);
        assert_eq!(delete.status, JobStatus::Completed, "{:#?}", delete.logs);
        assert!(update.finished_at.unwrap() <= delete.finished_at.unwrap());
        let manifest = format!("tenants/acme/namespace/{}/manifest.yaml", name);
        assert!(harness.remote_file(&manifest).is_none(), "{} survived", manifest);
        assert!(p.get_resource("acme", "namespace", name).unwrap().is_none());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_update_keeps_resource_live() {
    let harness = TestHarness::new();
    let p = harness.provisioner(ExecutionMode::InProcess);
    harness.register_type(&p, "namespace", false, WebhookConfig::default());

    let created = run(&p, request("payments", JobOperation::Create, json!({}))).await;
    assert_eq!(created.status, JobStatus::Completed, "{:#?}", created.logs);

    let updated = run(
        &p,
        request("payments", JobOperation::Update, json!({"flavor": "gold"})),
    )
    .await;
    assert_eq!(updated.status, JobStatus::Failed);
    assert!(updated.is_terminal());

    let resource = p.get_resource("acme", "namespace", "payments").unwrap().unwrap();
    assert_eq!(resource.status, "update_failed");
    assert!(!resource.is_failed());

    let err = p
        .submit(request("payments", JobOperation::Create, json!({})))
        .await
        .unwrap_err();
    assert!(matches!(err, ProvisionError::Conflict(_)));
    assert!(harness.remote_file(MANIFEST).is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_unreachable_remote_is_retried_then_fails() {
    let harness = TestHarness::new();
    let p = harness.provisioner(ExecutionMode::InProcess);
    p.resource_types()
        .register(ResourceTypeConfig::new(
            "namespace",
            "http://127.0.0.1:1/missing.git",
        ))
        .unwrap();

    let job = run(&p, request("payments", JobOperation::Create, json!({}))).await;

    assert_eq!(job.status, JobStatus::Failed, "{:#?}", job.logs);
    assert!(job.is_terminal());
    assert_eq!(job.attempts, 3);
    assert_log_contains(&job, "Attempt 1 failed");
    assert_log_contains(&job, "retrying in 10ms");
    assert_log_contains(&job, "retrying in 20ms");
    assert_log_contains(&job, "Attempt 3 started");
    assert_log_contains(&job, "Job failed");
    let resource = p.get_resource("acme", "namespace", "payments").unwrap().unwrap();
    assert!(resource.is_failed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failed_commit_discards_working_copy() {
    use std::os::unix::fs::PermissionsExt;

    let harness = TestHarness::new();
    let p = harness.provisioner(ExecutionMode::InProcess);
    harness.register_type(&p, "namespace", false, WebhookConfig::default());

    let alpha = run(&p, request("alpha", JobOperation::Create, json!({}))).await;
    assert_eq!(alpha.status, JobStatus::Completed, "{:#?}", alpha.logs);

    let hook = harness.cached_copy().join(".git/hooks/pre-commit");
    std::fs::write(&hook, "#!/bin/sh\nexit 1\n").unwrap();
    std::fs::set_permissions(&hook, std::fs::Permissions::from_mode(0o755)).unwrap();

    let beta = run(&p, request("beta", JobOperation::Create, json!({}))).await;
    assert!(beta.is_terminal(), "{:#?}", beta.logs);
    assert!(!hook.exists());

    let gamma = run(&p, request("gamma", JobOperation::Create, json!({}))).await;
    assert_eq!(gamma.status, JobStatus::Completed, "{:#?}", gamma.logs);
    let changed = git(
        harness.temp_path(),
        &[
            "--git-dir",
            &harness.remote_url(),
            "show",
            "--name-only",
            "--format=",
            BRANCH,
        ],
    );
    let changed: Vec<&str> = changed.lines().filter(|l| !l.is_empty()).collect();
    assert_eq!(changed, vec!["tenants/acme/namespace/gamma/manifest.yaml"]);
}
