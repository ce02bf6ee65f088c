//! Structured logging.
//!
//! `RUST_LOG` takes precedence over the configured level. The output is
//! pretty for development and JSON for production.

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::ObservabilityConfig;

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &ObservabilityConfig) -> Result<(), tracing_subscriber::util::TryInitError> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| default_filter(&config.log_level));

    let layer = match config.log_format.as_str() {
        "json" => fmt::layer()
            .json()
            .with_target(true)
            .with_current_span(true)
            .boxed(),
        _ => fmt::layer().with_target(true).boxed(),
    };

    tracing_subscriber::registry().with(filter).with(layer).try_init()
}

fn default_filter(level: &str) -> EnvFilter {
    EnvFilter::new(format!("live_relay={level},tower_http=info"))
}
