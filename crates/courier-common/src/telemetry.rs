//! Tracing subscriber setup shared by the pipeline processes.

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use crate::config::ObservabilityConfig;
use crate::error::{CourierError, CourierResult};

/// Install the global tracing subscriber.
///
/// `RUST_LOG` overrides the configured level. Call once per process before
/// opening any connections.
pub fn init_tracing(config: &ObservabilityConfig) -> CourierResult<()> {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    let registry = tracing_subscriber::registry().with(env_filter);

    let result = if config.json_logs {
        registry
            .with(tracing_subscriber::fmt::layer().json())
            .try_init()
    } else {
        registry.with(tracing_subscriber::fmt::layer()).try_init()
    };

    result.map_err(|e| CourierError::Configuration(e.to_string()))
}
