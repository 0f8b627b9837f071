//! Layered worker configuration.
//!
//! Settings are read from an optional TOML file and then from environment
//! variables prefixed with `HUEFORGE__`, using `__` between nested keys
//! (`HUEFORGE__PIPELINE__CONCURRENCY_LIMIT=4`). Every field has a default.

use crate::generation::services::{PipelineSettings, VariationFailurePolicy};
use crate::worker::RetryPolicy;
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable prefix for overrides.
pub const ENV_PREFIX: &str = "HUEFORGE";

/// Errors raised while loading or validating settings.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// A source could not be read or deserialized.
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),

    /// A value is outside its permitted range.
    #[error("invalid setting {key}: {reason}")]
    Invalid {
        /// Dotted setting key.
        key: &'static str,
        /// Why the value was rejected.
        reason: &'static str,
    },
}

/// Root settings document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Task store connection.
    pub database: DatabaseSettings,
    /// Cold-start retry.
    pub bootstrap: BootstrapSettings,
    /// Pipeline tunables.
    pub pipeline: PipelineConfig,
    /// Reaper thresholds.
    pub reaper: ReaperSettings,
    /// Log output.
    pub telemetry: TelemetrySettings,
}

/// Task store connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    /// `PostgreSQL` connection URL.
    pub url: String,
    /// Maximum pooled connections.
    pub pool_size: u32,
    /// How long one bootstrap attempt waits for a connection, in seconds.
    pub connect_timeout_secs: u64,
}

impl DatabaseSettings {
    /// Returns the per-attempt connection timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            url: "postgres://localhost/hueforge".to_owned(),
            pool_size: 4,
            connect_timeout_secs: 5,
        }
    }
}

/// Cold-start retry settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BootstrapSettings {
    /// Attempts before an invocation gives up.
    pub max_attempts: u32,
    /// Base of the linear backoff, in milliseconds.
    pub base_delay_ms: u64,
}

impl Default for BootstrapSettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 500,
        }
    }
}

/// Pipeline settings as configured.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Object store bucket.
    pub bucket: String,
    /// Variation units in flight.
    pub concurrency_limit: usize,
    /// Per-variation failure handling.
    pub failure_policy: VariationFailurePolicy,
    /// Default palette count.
    pub palette_count: u32,
    /// Deadline for each external call, in seconds.
    pub call_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let defaults = PipelineSettings::default();
        Self {
            bucket: defaults.bucket,
            concurrency_limit: defaults.concurrency_limit,
            failure_policy: defaults.failure_policy,
            palette_count: defaults.palette_count,
            call_timeout_secs: defaults.call_timeout.as_secs(),
        }
    }
}

/// Reaper thresholds.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReaperSettings {
    /// Age of the last heartbeat after which a processing task is failed.
    pub processing_timeout_secs: u64,
    /// Age after which an unclaimed pending task is failed.
    pub pending_timeout_secs: u64,
}

impl Default for ReaperSettings {
    fn default() -> Self {
        Self {
            processing_timeout_secs: 30 * 60,
            pending_timeout_secs: 60 * 60,
        }
    }
}

impl ReaperSettings {
    /// Returns the processing timeout.
    #[must_use]
    pub const fn processing_timeout(&self) -> Duration {
        Duration::from_secs(self.processing_timeout_secs)
    }

    /// Returns the pending timeout.
    #[must_use]
    pub const fn pending_timeout(&self) -> Duration {
        Duration::from_secs(self.pending_timeout_secs)
    }
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TelemetrySettings {
    /// Filter directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for TelemetrySettings {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            json: false,
        }
    }
}

impl Settings {
    /// Loads settings from `path` (if given) and the environment, then
    /// validates them.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError`] when a source is unreadable or a value is
    /// out of range.
    pub fn load(path: Option<&Path>) -> Result<Self, SettingsError> {
        let mut builder = Config::builder();
        if let Some(file) = path {
            builder = builder.add_source(File::from(file).format(FileFormat::Toml));
        }
        let settings: Self = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    /// Rejects values the worker cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`SettingsError::Invalid`] naming the first bad key.
    pub fn validate(&self) -> Result<(), SettingsError> {
        let checks = [
            (
                self.pipeline.concurrency_limit == 0,
                "pipeline.concurrency_limit",
            ),
            (self.pipeline.palette_count == 0, "pipeline.palette_count"),
            (
                self.pipeline.call_timeout_secs == 0,
                "pipeline.call_timeout_secs",
            ),
            (self.bootstrap.max_attempts == 0, "bootstrap.max_attempts"),
            (self.database.pool_size == 0, "database.pool_size"),
            (
                self.database.connect_timeout_secs == 0,
                "database.connect_timeout_secs",
            ),
            (
                self.reaper.processing_timeout_secs == 0,
                "reaper.processing_timeout_secs",
            ),
            (
                self.reaper.pending_timeout_secs == 0,
                "reaper.pending_timeout_secs",
            ),
        ];
        match checks.into_iter().find(|(is_zero, _)| *is_zero) {
            Some((_, key)) => Err(SettingsError::Invalid {
                key,
                reason: "must be greater than zero",
            }),
            None => Ok(()),
        }
    }

    /// Returns the pipeline tunables.
    #[must_use]
    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            bucket: self.pipeline.bucket.clone(),
            concurrency_limit: self.pipeline.concurrency_limit,
            failure_policy: self.pipeline.failure_policy,
            palette_count: self.pipeline.palette_count,
            call_timeout: Duration::from_secs(self.pipeline.call_timeout_secs),
        }
    }

    /// Returns the cold-start retry policy.
    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.bootstrap.max_attempts,
            Duration::from_millis(self.bootstrap.base_delay_ms),
        )
    }
}
