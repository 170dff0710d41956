//! Argo CD REST client.

use std::time::Duration;

use reqwest::{Client, RequestBuilder, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::sync::Mutex;

use super::{AppStatus, ApplicationSpec, SyncClient};
use crate::config::SyncSettings;
use crate::gitops::path::TENANTS_DIR;
use crate::secrets::SecretError;

/// Namespace Argo CD keeps its Application objects in.
const ARGOCD_NAMESPACE: &str = "argocd";

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Sync engine is enabled but no URL is configured")]
    MissingUrl,

    #[error("Failed to resolve sync engine credentials: {0}")]
    Secret(#[from] SecretError),

    #[error("Failed to build HTTP client: {0}")]
    Http(#[from] reqwest::Error),
}

#[derive(Debug)]
pub struct ArgoCdClient {
    client: Client,
    base_url: String,
    project: String,
    destination_server: String,
    token: Option<SecretString>,
    username: Option<String>,
    password: Option<SecretString>,
    /// Token obtained from a session login, fetched on first use.
    session: Mutex<Option<SecretString>>,
}

#[derive(Debug, Default, Deserialize)]
struct ApplicationBody {
    #[serde(default)]
    status: ApplicationStatusBody,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ApplicationStatusBody {
    #[serde(default)]
    sync: Option<PhaseBody>,
    #[serde(default)]
    health: Option<PhaseBody>,
    #[serde(default)]
    operation_state: Option<OperationStateBody>,
    #[serde(default)]
    reconciled_at: Option<String>,
    #[serde(default)]
    resources: Vec<Value>,
}

#[derive(Debug, Default, Deserialize)]
struct PhaseBody {
    status: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct OperationStateBody {
    phase: Option<String>,
}

impl From<ApplicationBody> for AppStatus {
    fn from(body: ApplicationBody) -> Self {
        let status = body.status;
        Self {
            sync_status: status.sync.and_then(|s| s.status),
            health_status: status.health.and_then(|h| h.status),
            operation_state: status.operation_state.and_then(|o| o.phase),
            last_sync: status.reconciled_at,
            resource_count: status.resources.len(),
        }
    }
}

impl ArgoCdClient {
    pub fn from_settings(settings: &SyncSettings) -> Result<Self, SyncError> {
        let url = settings
            .url
            .as_deref()
            .filter(|u| !u.trim().is_empty())
            .ok_or(SyncError::MissingUrl)?;

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()?;

        Ok(Self {
            client,
            base_url: url.trim_end_matches('/').to_owned(),
            project: settings.project.clone(),
            destination_server: settings.destination_server.clone(),
            token: settings.token.resolve_optional()?,
            username: settings.username.clone().filter(|u| !u.is_empty()),
            password: settings.password.resolve_optional()?,
            session: Mutex::new(None),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Every application the engine knows about.
    pub async fn list(&self) -> Vec<Value> {
        let url = format!("{}/api/v1/applications", self.base_url);
        let request = self.authorized(self.client.get(&url)).await;
        match request.send().await {
            Ok(response) if response.status().is_success() => {
                match response.json::<Value>().await {
                    Ok(body) => body
                        .get("items")
                        .and_then(Value::as_array)
                        .cloned()
                        .unwrap_or_default(),
                    Err(e) => {
                        log::error!("Invalid application list from Argo CD: {}", e);
                        Vec::new()
                    }
                }
            }
            Ok(response) => {
                log::error!("Failed to list Argo CD applications: {}", response.status());
                Vec::new()
            }
            Err(e) => {
                log::error!("Failed to list Argo CD applications: {}", e);
                Vec::new()
            }
        }
    }

    fn application_payload(&self, app: &ApplicationSpec<'_>) -> Value {
        json!({
            "apiVersion": "argoproj.io/v1alpha1",
            "kind": "Application",
            "metadata": {
                "name": app.app_name,
                "namespace": ARGOCD_NAMESPACE,
            },
            "spec": {
                "project": self.project,
                "source": {
                    "repoURL": app.repo_url,
                    "targetRevision": app.branch,
                    "path": format!("{}/{}", TENANTS_DIR, app.tenant_id),
                },
                "destination": {
                    "server": self.destination_server,
                    "namespace": format!("{}-{}", app.tenant_id, app.resource_type),
                },
                "syncPolicy": {
                    "automated": {
                        "prune": true,
                        "selfHeal": true,
                    }
                }
            }
        })
    }

    async fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        if let Some(token) = &self.token {
            return request.bearer_auth(token.expose_secret());
        }
        match self.session_token().await {
            Some(token) => request.bearer_auth(token.expose_secret()),
            None => request,
        }
    }

    /// Logs in with username/password once and reuses the session token.
    async fn session_token(&self) -> Option<SecretString> {
        let (username, password) = match (&self.username, &self.password) {
            (Some(u), Some(p)) => (u, p),
            _ => return None,
        };

        let mut session = self.session.lock().await;
        if let Some(token) = session.as_ref() {
            return Some(token.clone());
        }

        let url = format!("{}/api/v1/session", self.base_url);
        let body = json!({ "username": username, "password": password.expose_secret() });
        let response = match self.client.post(&url).json(&body).send().await {
            Ok(response) => response,
            Err(e) => {
                log::error!("Failed to authenticate with Argo CD: {}", e);
                return None;
            }
        };
        if response.status() != StatusCode::OK {
            log::error!("Argo CD authentication failed: {}", response.status());
            return None;
        }

        let token = match response.json::<Value>().await {
            Ok(body) => body.get("token").and_then(Value::as_str).map(str::to_owned),
            Err(e) => {
                log::error!("Invalid Argo CD session response: {}", e);
                None
            }
        }?;
        log::info!("Argo CD authentication successful");
        let token = SecretString::from(token);
        *session = Some(token.clone());
        Some(token)
    }

    async fn expect_success(&self, request: RequestBuilder, action: &str, app_name: &str) -> bool {
        match self.authorized(request).await.send().await {
            Ok(response) if response.status().is_success() => {
                log::info!("Argo CD {} succeeded for {}", action, app_name);
                true
            }
            Ok(response) => {
                log::error!(
                    "Argo CD {} failed for {}: {}",
                    action,
                    app_name,
                    response.status()
                );
                false
            }
            Err(e) => {
                log::error!("Argo CD {} failed for {}: {}", action, app_name, e);
                false
            }
        }
    }
}

#[async_trait::async_trait]
impl SyncClient for ArgoCdClient {
    async fn create(&self, app: &ApplicationSpec<'_>) -> bool {
        let url = format!("{}/api/v1/applications", self.base_url);
        let request = self.client.post(&url).json(&self.application_payload(app));
        self.expect_success(request, "create", app.app_name).await
    }

    async fn sync(&self, app_name: &str) -> bool {
        let url = format!("{}/api/v1/applications/{}/sync", self.base_url, app_name);
        let request = self.client.post(&url).json(&json!({}));
        self.expect_success(request, "sync", app_name).await
    }

    async fn get_status(&self, app_name: &str) -> Option<AppStatus> {
        let url = format!("{}/api/v1/applications/{}", self.base_url, app_name);
        let request = self.authorized(self.client.get(&url)).await;
        let response = match request.send().await {
            Ok(response) => response,
            Err(e) => {
                log::error!("Failed to get status of {}: {}", app_name, e);
                return None;
            }
        };
        if !response.status().is_success() {
            log::warn!(
                "Application {} not available in Argo CD: {}",
                app_name,
                response.status()
            );
            return None;
        }
        match response.json::<ApplicationBody>().await {
            Ok(body) => Some(body.into()),
            Err(e) => {
                log::error!("Invalid status for {}: {}", app_name, e);
                None
            }
        }
    }

    async fn delete(&self, app_name: &str) -> bool {
        let url = format!("{}/api/v1/applications/{}", self.base_url, app_name);
        self.expect_success(self.client.delete(&url), "delete", app_name)
            .await
    }
}
