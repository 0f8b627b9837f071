//! Stale scans over real timestamps.

use crate::postgres::helpers::{
    StoreContext, batch_for, insert_pending, insert_processing, store_context,
};
use chrono::{TimeDelta, Utc};
use eyre::{OptionExt, ensure};
use hueforge::generation::{
    domain::TaskStatus,
    ports::TaskStore,
    services::{PENDING_TIMEOUT_MESSAGE, PROCESSING_TIMEOUT_MESSAGE, StuckTaskReaper},
};
use mockable::DefaultClock;
use rstest::rstest;
use std::sync::Arc;
use std::time::Duration;

const PROCESSING_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const PENDING_TIMEOUT: Duration = Duration::from_secs(60 * 60);

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn stale_scan_leaves_a_just_completed_task_untouched(
    #[future] store_context: eyre::Result<StoreContext>,
) -> eyre::Result<()> {
    let context = store_context.await?;
    let task = insert_processing(&context.store).await?;
    context
        .store
        .complete(task.id(), &batch_for(&task, 2)?, Utc::now())
        .await?;
    context.backdate(&task, Utc::now() - TimeDelta::hours(2))?;

    let reaped = context
        .store
        .fail_stale(
            TaskStatus::Processing,
            Utc::now(),
            PROCESSING_TIMEOUT_MESSAGE,
            Utc::now(),
        )
        .await?;

    ensure!(reaped.is_empty());
    let stored = context
        .store
        .find_by_id(task.id())
        .await?
        .ok_or_eyre("task disappeared")?;
    ensure!(stored.status() == TaskStatus::Completed);
    ensure!(stored.error_message().is_none());
    ensure!(context.concept_rows_for(&task)? == 1);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn reaper_fails_only_tasks_past_their_timeouts(
    #[future] store_context: eyre::Result<StoreContext>,
) -> eyre::Result<()> {
    let context = store_context.await?;
    let stuck = insert_processing(&context.store).await?;
    context.backdate(&stuck, Utc::now() - TimeDelta::minutes(45))?;
    let busy = insert_processing(&context.store).await?;
    let forgotten = insert_pending(&context.store).await?;
    context.backdate(&forgotten, Utc::now() - TimeDelta::minutes(90))?;
    let queued = insert_pending(&context.store).await?;
    let store = Arc::new(context.store.clone());
    let reaper = StuckTaskReaper::new(Arc::clone(&store), Arc::new(DefaultClock));

    let report = reaper.reap(PROCESSING_TIMEOUT, PENDING_TIMEOUT).await?;

    ensure!(report.timed_out == vec![stuck.id()]);
    ensure!(report.never_picked_up == vec![forgotten.id()]);
    let status_of = |id| {
        let lookup = Arc::clone(&store);
        async move { lookup.find_by_id(id).await.map(|t| t.map(|task| task.status())) }
    };
    ensure!(status_of(busy.id()).await? == Some(TaskStatus::Processing));
    ensure!(status_of(queued.id()).await? == Some(TaskStatus::Pending));
    let reaped = store
        .find_by_id(forgotten.id())
        .await?
        .ok_or_eyre("task disappeared")?;
    ensure!(reaped.error_message() == Some(PENDING_TIMEOUT_MESSAGE));
    Ok(())
}
