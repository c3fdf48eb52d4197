//! Tracing subscriber setup.

use crate::config::TelemetryConfig;
use crate::error::{WorkerError, WorkerResult};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter used when `RUST_LOG` is not set.
pub const DEFAULT_LOG_FILTER: &str = "diver_worker=debug,diver_geometry=debug,info";

/// Install the global subscriber. Call once at startup.
pub fn init_tracing(config: &TelemetryConfig) -> WorkerResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let registry = tracing_subscriber::registry().with(env_filter);

    let result = if config.json {
        registry.with(fmt::layer().json()).try_init()
    } else {
        registry.with(fmt::layer()).try_init()
    };
    result.map_err(|e| WorkerError::Telemetry(e.to_string()))?;

    tracing::info!(json = config.json, "Telemetry initialized");
    Ok(())
}
