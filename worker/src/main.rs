//! Durable queue worker.
//!
//! Usage: `tenantops-worker [config.yaml]` (or `TENANTOPS_CONFIG`).

use std::path::PathBuf;

use log::{error, info};

use tenantops::{init_logging, AppConfig, ExecutionMode, Provisioner};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config_path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("TENANTOPS_CONFIG").ok())
        .map(PathBuf::from);

    let mut config = AppConfig::load(config_path.as_deref())?;
    init_logging(&config.logging)?;

    if config.mode != ExecutionMode::Durable {
        info!("Worker always consumes the durable queue; overriding mode");
        config.mode = ExecutionMode::Durable;
        config.validate()?;
    }

    let provisioner = Provisioner::from_config(config)?;
    let Some(pool) = provisioner.start_workers() else {
        error!("No worker pool started");
        return Ok(());
    };
    info!(
        "tenantops-worker {} running {} workers",
        env!("CARGO_PKG_VERSION"),
        pool.size()
    );

    tokio::signal::ctrl_c().await?;
    info!("Received interrupt");

    pool.shutdown();
    pool.wait().await;
    Ok(())
}
