use super::{AppStatus, ApplicationSpec, SyncClient};

/// Stand-in engine that accepts everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct SimulatedSyncClient;

#[async_trait::async_trait]
impl SyncClient for SimulatedSyncClient {
    async fn create(&self, app: &ApplicationSpec<'_>) -> bool {
        log::info!(
            "[simulated] Create application {} ({}/{})",
            app.app_name,
            app.tenant_id,
            app.resource_type
        );
        true
    }

    async fn sync(&self, app_name: &str) -> bool {
        log::info!("[simulated] Sync application {}", app_name);
        true
    }

    async fn get_status(&self, _app_name: &str) -> Option<AppStatus> {
        Some(AppStatus {
            sync_status: Some("Synced".to_string()),
            health_status: Some("Healthy".to_string()),
            operation_state: Some("Succeeded".to_string()),
            last_sync: Some(chrono::Utc::now().to_rfc3339()),
            resource_count: 1,
        })
    }

    async fn delete(&self, app_name: &str) -> bool {
        log::info!("[simulated] Delete application {}", app_name);
        true
    }
}
