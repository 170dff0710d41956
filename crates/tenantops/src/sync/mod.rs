//! Client side of the continuous-reconciliation engine.
//!
//! Every call is best effort: failures are logged and reported as
//! `false` or `None`, never as errors.

mod argocd;
mod simulated;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use argocd::{ArgoCdClient, SyncError};
pub use simulated::SimulatedSyncClient;

use crate::config::SyncSettings;

/// What the engine needs to know to create an application.
#[derive(Debug, Clone, Copy)]
pub struct ApplicationSpec<'a> {
    pub app_name: &'a str,
    pub tenant_id: &'a str,
    pub resource_type: &'a str,
    /// Deployment repository the manifests live in.
    pub repo_url: &'a str,
    pub branch: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppStatus {
    pub sync_status: Option<String>,
    pub health_status: Option<String>,
    pub operation_state: Option<String>,
    pub last_sync: Option<String>,
    pub resource_count: usize,
}

#[async_trait::async_trait]
pub trait SyncClient: Send + Sync {
    async fn create(&self, app: &ApplicationSpec<'_>) -> bool;
    async fn sync(&self, app_name: &str) -> bool;
    async fn get_status(&self, app_name: &str) -> Option<AppStatus>;
    async fn delete(&self, app_name: &str) -> bool;
}

/// Simulated in development mode or when no engine is configured.
pub fn client_from_settings(
    settings: &SyncSettings,
    dev_mode: bool,
) -> Result<Arc<dyn SyncClient>, SyncError> {
    if dev_mode || !settings.enabled {
        log::info!("Sync engine calls are simulated");
        return Ok(Arc::new(SimulatedSyncClient));
    }
    Ok(Arc::new(ArgoCdClient::from_settings(settings)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disabled_settings_give_simulated_client() {
        assert!(client_from_settings(&SyncSettings::default(), false).is_ok());
    }

    #[test]
    fn test_enabled_without_url_fails() {
        let settings = SyncSettings {
            enabled: true,
            ..Default::default()
        };
        assert!(matches!(
            client_from_settings(&settings, false),
            Err(SyncError::MissingUrl)
        ));
        assert!(client_from_settings(&settings, true).is_ok());
    }
}
