//! Runs one stuck-task reaper pass against `PostgreSQL`.
//!
//! Usage:
//!
//! ```text
//! hueforge-reaper [config-path]
//! ```
//!
//! Settings come from the optional TOML file at `config-path` and from
//! `HUEFORGE__*` environment variables. The process is meant to be started
//! by an external scheduler; each run performs both scans once and exits.

use hueforge::config::{Settings, SettingsError};
use hueforge::generation::adapters::postgres::PostgresTaskStore;
use hueforge::generation::services::{ReapError, StuckTaskReaper};
use hueforge::telemetry::init_tracing;
use hueforge::worker::{InitializationError, connect_pool};
use mockable::DefaultClock;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tokio::runtime::Builder;
use tracing::info;

/// Boxed error type for the main result.
type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
enum ReaperCliError {
    #[error("too many arguments; expected at most a config path")]
    TooManyArgs,
    #[error(transparent)]
    Settings(#[from] SettingsError),
    #[error("runtime init failed: {0}")]
    RuntimeInit(#[source] std::io::Error),
    #[error(transparent)]
    Connect(#[from] InitializationError),
    #[error(transparent)]
    Reap(#[from] ReapError),
}

fn main() -> Result<(), BoxError> {
    let config_path = parse_args(std::env::args_os().skip(1))?;
    let settings = Settings::load(config_path.as_deref())?;
    init_tracing(&settings.telemetry);

    let runtime = Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(ReaperCliError::RuntimeInit)?;
    runtime.block_on(run(&settings))?;
    Ok(())
}

fn parse_args(
    mut args: impl Iterator<Item = std::ffi::OsString>,
) -> Result<Option<PathBuf>, ReaperCliError> {
    let path = args.next().map(PathBuf::from);
    if args.next().is_some() {
        return Err(ReaperCliError::TooManyArgs);
    }
    Ok(path)
}

async fn run(settings: &Settings) -> Result<(), ReaperCliError> {
    let pool = connect_pool(&settings.database).await?;
    let reaper = StuckTaskReaper::new(
        Arc::new(PostgresTaskStore::new(pool)),
        Arc::new(DefaultClock),
    );
    let report = reaper
        .reap(
            settings.reaper.processing_timeout(),
            settings.reaper.pending_timeout(),
        )
        .await?;
    info!(failed = report.count(), "reaper run complete");
    Ok(())
}
