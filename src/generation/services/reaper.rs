//! Out-of-band failure of tasks abandoned past a timeout.

use crate::generation::{
    domain::{TaskId, TaskStatus},
    ports::{TaskStore, TaskStoreError},
};
use chrono::TimeDelta;
use mockable::Clock;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, instrument, warn};

/// Error message written on tasks stuck in `processing`.
pub const PROCESSING_TIMEOUT_MESSAGE: &str = "timed out in processing";

/// Error message written on tasks stuck in `pending`.
pub const PENDING_TIMEOUT_MESSAGE: &str = "never picked up";

/// Tasks failed by one reaper pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReapReport {
    /// Processing tasks whose heartbeat went stale.
    pub timed_out: Vec<TaskId>,
    /// Pending tasks no worker ever claimed.
    pub never_picked_up: Vec<TaskId>,
}

impl ReapReport {
    /// Returns the total number of tasks failed.
    #[must_use]
    pub fn count(&self) -> usize {
        self.timed_out.len() + self.never_picked_up.len()
    }
}

/// Errors returned by a reaper pass.
#[derive(Debug, Clone, Error)]
pub enum ReapError {
    /// A timeout cannot be turned into a cutoff timestamp.
    #[error("timeout of {}s is out of range", .0.as_secs())]
    TimeoutOutOfRange(Duration),

    /// The store scan failed.
    #[error(transparent)]
    Store(#[from] TaskStoreError),
}

/// Fails tasks stuck in `pending` or `processing`.
///
/// Runs independently of every worker; all coordination happens through the
/// conditional writes in [`TaskStore::fail_stale`].
#[derive(Clone)]
pub struct StuckTaskReaper<S, C>
where
    S: TaskStore,
    C: Clock + Send + Sync,
{
    store: Arc<S>,
    clock: Arc<C>,
}

impl<S, C> StuckTaskReaper<S, C>
where
    S: TaskStore,
    C: Clock + Send + Sync,
{
    /// Creates a reaper over `store`.
    #[must_use]
    pub const fn new(store: Arc<S>, clock: Arc<C>) -> Self {
        Self { store, clock }
    }

    /// Runs both scans once.
    ///
    /// Processing tasks are measured from `updated_at`, pending tasks from
    /// `created_at`. Both scans always run; a failing scan does not stop the
    /// other from failing its stale tasks.
    ///
    /// # Errors
    ///
    /// Returns [`ReapError`] when a timeout overflows, or the first scan
    /// failure once both scans have finished.
    #[instrument(
        skip(self),
        fields(
            processing_timeout_secs = processing_timeout.as_secs(),
            pending_timeout_secs = pending_timeout.as_secs(),
        )
    )]
    pub async fn reap(
        &self,
        processing_timeout: Duration,
        pending_timeout: Duration,
    ) -> Result<ReapReport, ReapError> {
        let now = self.clock.utc();
        let processing_cutoff = cutoff(now, processing_timeout)?;
        let pending_cutoff = cutoff(now, pending_timeout)?;

        let (processing_scan, pending_scan) = tokio::join!(
            self.store.fail_stale(
                TaskStatus::Processing,
                processing_cutoff,
                PROCESSING_TIMEOUT_MESSAGE,
                now,
            ),
            self.store.fail_stale(
                TaskStatus::Pending,
                pending_cutoff,
                PENDING_TIMEOUT_MESSAGE,
                now,
            ),
        );
        let timed_out =
            processing_scan.inspect_err(|err| warn!(error = %err, "processing scan failed"));
        let never_picked_up =
            pending_scan.inspect_err(|err| warn!(error = %err, "pending scan failed"));

        let report = ReapReport {
            timed_out: timed_out?,
            never_picked_up: never_picked_up?,
        };
        info!(
            timed_out = report.timed_out.len(),
            never_picked_up = report.never_picked_up.len(),
            "reaper pass finished"
        );
        Ok(report)
    }
}

fn cutoff(
    now: chrono::DateTime<chrono::Utc>,
    timeout: Duration,
) -> Result<chrono::DateTime<chrono::Utc>, ReapError> {
    TimeDelta::from_std(timeout)
        .ok()
        .and_then(|delta| now.checked_sub_signed(delta))
        .ok_or(ReapError::TimeoutOutOfRange(timeout))
}
