//! When steps for generation lifecycle BDD scenarios.

use super::world::{LifecycleWorld, run_async};
use eyre::WrapErr;
use hueforge::generation::services::{StuckTaskReaper, TaskProcessor};
use mockable::DefaultClock;
use rstest_bdd_macros::when;
use std::sync::Arc;
use std::time::Duration;

const MINUTE: u64 = 60;

#[when("two workers process the task simultaneously")]
fn two_workers_process(world: &mut LifecycleWorld) -> Result<(), eyre::Report> {
    let task = world.task()?.clone();
    let (first, second) = (world.processor(), world.processor());
    let (left, right) = run_async(async {
        tokio::join!(first.process(&task), second.process(&task))
    });
    world.outcomes = vec![
        left.wrap_err("first worker")?,
        right.wrap_err("second worker")?,
    ];
    Ok(())
}

#[when(
    "the reaper runs with a processing timeout of {processing:u64} minutes and a pending timeout of {pending:u64} minutes"
)]
fn reaper_runs(
    world: &mut LifecycleWorld,
    processing: u64,
    pending: u64,
) -> Result<(), eyre::Report> {
    let reaper = StuckTaskReaper::new(Arc::clone(&world.store), Arc::new(DefaultClock));
    let report = run_async(reaper.reap(
        Duration::from_secs(processing * MINUTE),
        Duration::from_secs(pending * MINUTE),
    ))
    .wrap_err("reaper pass")?;
    world.reap_report = Some(report);
    Ok(())
}

#[when("a worker processes the task while the reaper fails it mid-run")]
fn worker_races_reaper(world: &mut LifecycleWorld) -> Result<(), eyre::Report> {
    let task = world.task()?.clone();
    let processor = world.processor();
    let reaper = StuckTaskReaper::new(Arc::clone(&world.store), Arc::new(DefaultClock));
    let (outcome, report) = run_async(async move {
        let worker = tokio::spawn(async move { processor.process(&task).await });
        tokio::time::sleep(Duration::from_millis(150)).await;
        let report = reaper
            .reap(Duration::from_millis(50), Duration::from_secs(60 * MINUTE))
            .await
            .wrap_err("reaper pass mid-run")?;
        let outcome = worker.await.wrap_err("join worker")?.wrap_err("worker run")?;
        Ok::<_, eyre::Report>((outcome, report))
    })?;
    world.outcomes = vec![outcome];
    world.reap_report = Some(report);
    Ok(())
}
