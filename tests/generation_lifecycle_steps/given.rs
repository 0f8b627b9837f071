//! Given steps for generation lifecycle BDD scenarios.

use super::world::{LifecycleWorld, run_async};
use chrono::{TimeDelta, Utc};
use eyre::WrapErr;
use hueforge::generation::{
    adapters::memory::ScriptedGenerationClient,
    domain::{
        GenerationParams, OwnerId, PersistedTaskData, Task, TaskId, TaskPayload, TaskStatus,
    },
    ports::TaskStore,
};
use mockable::DefaultClock;
use rstest_bdd_macros::given;
use std::time::Duration;

fn payload(palettes: u32) -> Result<TaskPayload, eyre::Report> {
    let params = GenerationParams::new("a paper crane", "autumn dusk")
        .wrap_err("build generation params")?
        .with_palette_count(palettes);
    Ok(TaskPayload::ConceptGeneration(params))
}

fn seed(world: &mut LifecycleWorld, task: Task) -> Result<(), eyre::Report> {
    run_async(world.store.insert(&task)).wrap_err("seed task")?;
    world.task = Some(task);
    Ok(())
}

fn seed_aged(
    world: &mut LifecycleWorld,
    status: TaskStatus,
    minutes_ago: i64,
) -> Result<(), eyre::Report> {
    let at = Utc::now() - TimeDelta::minutes(minutes_ago);
    let task = Task::from_persisted(PersistedTaskData {
        id: TaskId::new(),
        owner_id: OwnerId::new(),
        status,
        payload: payload(3)?,
        result_id: None,
        error_message: None,
        created_at: at,
        updated_at: at,
    });
    seed(world, task)
}

#[given("a pending generation task requesting {palettes:u32} palettes")]
fn pending_generation_task(world: &mut LifecycleWorld, palettes: u32) -> Result<(), eyre::Report> {
    let task = Task::new(OwnerId::new(), payload(palettes)?, &DefaultClock)
        .wrap_err("create pending task")?;
    seed(world, task)
}

#[given("a processing task last updated {minutes:i64} minutes ago")]
fn processing_task_updated_ago(
    world: &mut LifecycleWorld,
    minutes: i64,
) -> Result<(), eyre::Report> {
    seed_aged(world, TaskStatus::Processing, minutes)
}

#[given("a pending task created {minutes:i64} minutes ago")]
fn pending_task_created_ago(world: &mut LifecycleWorld, minutes: i64) -> Result<(), eyre::Report> {
    seed_aged(world, TaskStatus::Pending, minutes)
}

#[given("base generation takes {millis:u64} milliseconds")]
fn base_generation_latency(world: &mut LifecycleWorld, millis: u64) {
    world.generator =
        ScriptedGenerationClient::new().with_base_latency(Duration::from_millis(millis));
}
