//! Process-wide logging setup.
//!
//! Library code logs through the `log` facade; `tracing_log::LogTracer`
//! forwards those records into the tracing subscriber so they carry the
//! enclosing job span.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::LoggingSettings;
use crate::error::{Result, TenantOpsError};

/// Third-party targets that are too chatty at `info`.
const QUIET_TARGETS: &[(&str, &str)] = &[
    ("hyper", "warn"),
    ("hyper_util", "warn"),
    ("reqwest", "warn"),
    ("rustls", "warn"),
];

/// `RUST_LOG` wins over the configured level.
pub fn build_env_filter(level: &str) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    let mut directives = vec![level.to_string()];
    directives.extend(
        QUIET_TARGETS
            .iter()
            .map(|(target, lvl)| format!("{}={}", target, lvl)),
    );
    let filter = directives.join(",");
    EnvFilter::try_new(&filter)
        .map_err(|e| TenantOpsError::Logging(format!("invalid filter '{}': {}", filter, e)))
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init_logging(settings: &LoggingSettings) -> Result<()> {
    // Err means a logger already exists, which is fine.
    tracing_log::LogTracer::init().ok();

    let layer = if settings.json {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
            .with_filter(build_env_filter(&settings.level)?)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_span_events(FmtSpan::CLOSE)
            .with_filter(build_env_filter(&settings.level)?)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| TenantOpsError::Logging(e.to_string()))?;

    tracing::debug!(
        "Logging initialized: level={}, json={}",
        settings.level,
        settings.json
    );
    Ok(())
}
