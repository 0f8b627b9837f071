//! Tracing subscriber initialisation.

use crate::config::TelemetrySettings;
use std::sync::OnceLock;
use tracing_subscriber::{
    EnvFilter, Layer, Registry, fmt, layer::SubscriberExt, util::SubscriberInitExt,
};

static TRACING_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Installs the global tracing subscriber once per process.
///
/// `RUST_LOG` takes precedence over the configured level. An already
/// installed global subscriber is left in place.
pub fn init_tracing(settings: &TelemetrySettings) {
    TRACING_INITIALIZED.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(settings.level.as_str()));
        let output: Box<dyn Layer<Registry> + Send + Sync> = if settings.json {
            fmt::layer().json().with_target(true).boxed()
        } else {
            fmt::layer().compact().with_target(true).boxed()
        };
        if tracing_subscriber::registry()
            .with(output)
            .with(filter)
            .try_init()
            .is_err()
        {
            tracing::debug!("global tracing subscriber already installed");
        }
    });
}
