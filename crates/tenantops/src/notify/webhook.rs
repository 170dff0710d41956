//! Lifecycle webhooks with bounded retry and exponential backoff.

use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use reqwest::Client;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::config::{WebhookConfig, WebhookMode};

pub const USER_AGENT: &str = concat!("tenantops-webhook/", env!("CARGO_PKG_VERSION"));

/// Identifies the job a notification is about.
#[derive(Debug, Clone, Copy)]
pub struct WebhookSubject<'a> {
    pub job_id: &'a str,
    pub tenant_id: &'a str,
    pub resource_type: &'a str,
    pub resource_name: &'a str,
}

#[derive(Debug, Serialize)]
struct StatusPayload<'a> {
    job_id: &'a str,
    status: &'a str,
    tenant_id: &'a str,
    resource_type: &'a str,
    resource_name: &'a str,
    timestamp: String,
    logs: &'a [String],
    metadata: &'a Map<String, Value>,
}

#[derive(Debug, Serialize)]
struct StagePayload<'a> {
    job_id: &'a str,
    stage: &'a str,
    tenant_id: &'a str,
    resource_type: &'a str,
    resource_name: &'a str,
    timestamp: String,
    stage_data: &'a Value,
}

#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    dev_mode: bool,
    backoff_unit: Duration,
}

impl WebhookNotifier {
    pub fn new(dev_mode: bool, backoff_unit: Duration) -> Self {
        Self {
            client: Client::new(),
            dev_mode,
            backoff_unit,
        }
    }

    /// Delay before retrying after the failed `attempt` (0-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.backoff_unit
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    /// Status notification. Returns whether it was delivered; a disabled
    /// config counts as delivered.
    pub async fn send(
        &self,
        config: &WebhookConfig,
        subject: WebhookSubject<'_>,
        status: &str,
        logs: &[String],
        metadata: &Map<String, Value>,
    ) -> bool {
        if !config.enabled {
            return true;
        }
        let payload = StatusPayload {
            job_id: subject.job_id,
            status,
            tenant_id: subject.tenant_id,
            resource_type: subject.resource_type,
            resource_name: subject.resource_name,
            timestamp: timestamp(),
            logs,
            metadata,
        };
        self.deliver(config, &payload).await
    }

    /// Stage notification; a no-op unless the config is enabled and staged.
    pub async fn send_staged(
        &self,
        config: &WebhookConfig,
        subject: WebhookSubject<'_>,
        stage: &str,
        stage_data: &Value,
    ) -> bool {
        if !config.enabled || config.mode != WebhookMode::Staged {
            return true;
        }
        let payload = StagePayload {
            job_id: subject.job_id,
            stage,
            tenant_id: subject.tenant_id,
            resource_type: subject.resource_type,
            resource_name: subject.resource_name,
            timestamp: timestamp(),
            stage_data,
        };
        self.deliver(config, &payload).await
    }

    async fn deliver<T: Serialize>(&self, config: &WebhookConfig, payload: &T) -> bool {
        if self.dev_mode {
            log::info!("[dev mode] Simulating webhook to {}", config.url);
            match serde_json::to_string_pretty(payload) {
                Ok(body) => log::info!("[dev mode] Payload: {}", body),
                Err(e) => log::warn!("[dev mode] Unserializable payload: {}", e),
            }
            return true;
        }

        let attempts = config.retries.max(1);
        for attempt in 0..attempts {
            let result = self
                .client
                .post(&config.url)
                .header(reqwest::header::USER_AGENT, USER_AGENT)
                .timeout(config.timeout())
                .json(payload)
                .send()
                .await;

            match result {
                Ok(response) if response.status().is_success() => {
                    log::info!("Webhook delivered to {}", config.url);
                    return true;
                }
                Ok(response) => {
                    log::warn!(
                        "Webhook attempt {} to {} failed with status {}",
                        attempt + 1,
                        config.url,
                        response.status()
                    );
                }
                Err(e) => {
                    log::warn!(
                        "Webhook attempt {} to {} failed: {}",
                        attempt + 1,
                        config.url,
                        e
                    );
                }
            }

            if attempt + 1 < attempts {
                tokio::time::sleep(self.backoff_delay(attempt)).await;
            }
        }

        log::error!(
            "All {} webhook attempts failed for {}",
            attempts,
            config.url
        );
        false
    }
}

/// ISO-8601 UTC with a `Z` suffix.
fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Instant;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn subject() -> WebhookSubject<'static> {
        WebhookSubject {
            job_id: "job-1",
            tenant_id: "acme",
            resource_type: "namespace",
            resource_name: "payments",
        }
    }

    fn config(url: String, mode: WebhookMode, retries: u32) -> WebhookConfig {
        WebhookConfig {
            enabled: true,
            url,
            mode,
            timeout: 5,
            retries,
        }
    }

    fn notifier() -> WebhookNotifier {
        WebhookNotifier::new(false, Duration::from_millis(10))
    }

    #[test]
    fn test_backoff_doubles() {
        let n = WebhookNotifier::new(false, Duration::from_secs(1));
        assert_eq!(n.backoff_delay(0), Duration::from_secs(1));
        assert_eq!(n.backoff_delay(1), Duration::from_secs(2));
        assert_eq!(n.backoff_delay(2), Duration::from_secs(4));
    }

    #[test]
    fn test_timestamp_is_utc_z() {
        let ts = timestamp();
        assert!(ts.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }

    #[tokio::test]
    async fn test_disabled_is_noop() {
        let cfg = WebhookConfig {
            enabled: false,
            url: "http://127.0.0.1:9/unreachable".to_string(),
            ..config(String::new(), WebhookMode::Single, 3)
        };
        assert!(notifier().send(&cfg, subject(), "completed", &[], &Map::new()).await);
    }

    #[tokio::test]
    async fn test_status_payload_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/hook"))
            .and(header("content-type", "application/json"))
            .and(header("user-agent", USER_AGENT))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let cfg = config(format!("{}/hook", server.uri()), WebhookMode::Single, 3);
        let logs = vec!["Job started".to_string()];
        let mut metadata = Map::new();
        metadata.insert("commit".to_string(), json!("abc123"));

        assert!(notifier().send(&cfg, subject(), "completed", &logs, &metadata).await);

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["job_id"], "job-1");
        assert_eq!(body["status"], "completed");
        assert_eq!(body["resource_name"], "payments");
        assert_eq!(body["logs"], json!(["Job started"]));
        assert_eq!(body["metadata"]["commit"], "abc123");
        assert!(body["timestamp"].as_str().unwrap().ends_with('Z'));
    }

    #[tokio::test]
    async fn test_retries_until_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .up_to_n_times(2)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let cfg = config(server.uri(), WebhookMode::Single, 3);
        assert!(notifier().send(&cfg, subject(), "failed", &[], &Map::new()).await);
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_stops_after_retry_count() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let n = WebhookNotifier::new(false, Duration::from_millis(20));
        let cfg = config(server.uri(), WebhookMode::Single, 3);
        let started = Instant::now();
        assert!(!n.send(&cfg, subject(), "failed", &[], &Map::new()).await);

        // 20ms + 40ms between the three attempts, none after the last.
        assert!(started.elapsed() >= Duration::from_millis(60));
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_staged_only_for_staged_configs() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let single = config(server.uri(), WebhookMode::Single, 3);
        assert!(
            notifier()
                .send_staged(&single, subject(), "rendered", &json!({}))
                .await
        );
        assert!(server.received_requests().await.unwrap().is_empty());

        let staged = config(server.uri(), WebhookMode::Staged, 3);
        assert!(
            notifier()
                .send_staged(&staged, subject(), "rendered", &json!({"template": "default"}))
                .await
        );
        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["stage"], "rendered");
        assert_eq!(body["stage_data"]["template"], "default");
    }

    #[tokio::test]
    async fn test_dev_mode_simulates() {
        let server = MockServer::start().await;
        let n = WebhookNotifier::new(true, Duration::from_millis(1));
        let cfg = config(server.uri(), WebhookMode::Single, 3);
        assert!(n.send(&cfg, subject(), "completed", &[], &Map::new()).await);
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
