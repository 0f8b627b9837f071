//! Lazy bootstrap and linear-backoff retry tests.

use super::helpers::{WorkerHarness, envelope_for, generation_payload};
use eyre::{bail, ensure};
use hueforge::{
    config::Settings,
    generation::{
        adapters::memory::{InMemoryObjectStore, ScriptedGenerationClient},
        domain::{OwnerId, Task},
    },
    worker::{
        BootstrapError, ExternalClients, InvocationOutcome, RetryPolicy, WorkerEntryPoint,
        WorkerError,
    },
};
use mockable::DefaultClock;
use rstest::rstest;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

fn harness_failing_first(count: u32) -> WorkerHarness {
    WorkerHarness::with_factory(ScriptedGenerationClient::new(), |factory| {
        factory.failing_first(count)
    })
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn bootstrap_recovers_within_attempt_budget() -> eyre::Result<()> {
    let harness = harness_failing_first(2);
    let task = harness.seed(generation_payload(2)?).await?;

    let outcome = harness.entry.handle(&envelope_for(&task)?).await?;

    ensure!(matches!(outcome, InvocationOutcome::Completed(_)));
    ensure!(harness.attempts() == 3);
    ensure!(harness.entry.services().is_initialized());
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn exhausted_bootstrap_surfaces_last_error() -> eyre::Result<()> {
    let harness = harness_failing_first(u32::MAX);
    let task = harness.seed(generation_payload(2)?).await?;

    let result = harness.entry.handle(&envelope_for(&task)?).await;

    let Err(WorkerError::Bootstrap(BootstrapError::Exhausted { attempts, last })) = result else {
        bail!("expected exhausted bootstrap, got {result:?}");
    };
    ensure!(attempts == 3);
    ensure!(last.message() == "database unreachable on attempt 3");
    ensure!(harness.attempts() == 3);
    ensure!(!harness.entry.services().is_initialized());
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn failed_bootstrap_is_retried_on_next_invocation() -> eyre::Result<()> {
    let harness = harness_failing_first(4);
    let task = harness.seed(generation_payload(2)?).await?;
    let body = envelope_for(&task)?;

    let first = harness.entry.handle(&body).await;
    let second = harness.entry.handle(&body).await?;

    ensure!(first.is_err());
    ensure!(matches!(second, InvocationOutcome::Completed(_)));
    ensure!(harness.attempts() == 5);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn warm_invocations_reuse_services() -> eyre::Result<()> {
    let harness = WorkerHarness::new(ScriptedGenerationClient::new());
    for _ in 0..3 {
        let task = harness.seed(generation_payload(1)?).await?;
        harness.entry.handle(&envelope_for(&task)?).await?;
    }

    ensure!(harness.attempts() == 1);
    Ok(())
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn retry_sleeps_grow_linearly() -> eyre::Result<()> {
    let harness = harness_failing_first(u32::MAX);
    let task = harness.seed(generation_payload(1)?).await?;
    let started = Instant::now();

    let result = harness.entry.handle(&envelope_for(&task)?).await;

    ensure!(result.is_err());
    // 10ms after the first failure plus 20ms after the second.
    ensure!(started.elapsed() >= Duration::from_millis(30));
    Ok(())
}

#[rstest]
#[case(1, Duration::from_millis(500))]
#[case(2, Duration::from_secs(1))]
#[case(3, Duration::from_millis(1500))]
fn delay_is_base_times_attempt(#[case] attempt: u32, #[case] expected: Duration) {
    let policy = RetryPolicy::default();
    assert_eq!(policy.delay_after(attempt), expected);
}

#[rstest]
fn zero_attempts_still_tries_once() {
    let policy = RetryPolicy::new(0, Duration::from_millis(1));
    assert_eq!(policy.max_attempts(), 1);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn loaded_settings_drive_postgres_bootstrap() -> eyre::Result<()> {
    let mut settings = Settings::default();
    settings.database.url = "postgres://hueforge@127.0.0.1:1/unreachable".to_owned();
    settings.database.connect_timeout_secs = 1;
    settings.bootstrap.max_attempts = 2;
    settings.bootstrap.base_delay_ms = 10;
    let entry = WorkerEntryPoint::from_settings(
        &settings,
        ExternalClients {
            generator: Arc::new(ScriptedGenerationClient::new()),
            objects: Arc::new(InMemoryObjectStore::new()),
            clock: Arc::new(DefaultClock),
        },
    );
    let task = Task::new(OwnerId::new(), generation_payload(2)?, &DefaultClock)?;

    let started = Instant::now();
    let result = entry.handle(&envelope_for(&task)?).await;

    let Err(WorkerError::Bootstrap(BootstrapError::Exhausted { attempts, .. })) = result else {
        bail!("expected exhausted bootstrap, got {result:?}");
    };
    ensure!(attempts == 2);
    ensure!(!entry.services().is_initialized());
    ensure!(started.elapsed() < Duration::from_secs(30));
    Ok(())
}
