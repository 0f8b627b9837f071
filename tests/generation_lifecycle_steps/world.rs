//! Shared world state for generation lifecycle BDD scenarios.

use std::sync::Arc;

use hueforge::generation::{
    adapters::memory::{InMemoryObjectStore, InMemoryTaskStore, ScriptedGenerationClient},
    domain::Task,
    services::{
        GenerationTaskProcessor, PipelineSettings, ProcessOutcome, ProcessorDeps, ReapReport,
    },
};
use mockable::DefaultClock;
use rstest::fixture;

/// Processor type used by the BDD world.
pub type TestProcessor = GenerationTaskProcessor<
    InMemoryTaskStore,
    ScriptedGenerationClient,
    InMemoryObjectStore,
    DefaultClock,
>;

/// Scenario world for generation lifecycle behaviour tests.
pub struct LifecycleWorld {
    pub store: Arc<InMemoryTaskStore>,
    pub generator: ScriptedGenerationClient,
    pub objects: InMemoryObjectStore,
    pub task: Option<Task>,
    pub outcomes: Vec<ProcessOutcome>,
    pub reap_report: Option<ReapReport>,
}

impl LifecycleWorld {
    /// Creates a world with empty stores.
    #[must_use]
    pub fn new() -> Self {
        Self {
            store: Arc::new(InMemoryTaskStore::new()),
            generator: ScriptedGenerationClient::new(),
            objects: InMemoryObjectStore::new(),
            task: None,
            outcomes: Vec::new(),
            reap_report: None,
        }
    }

    /// Builds a processor sharing this world's adapters.
    #[must_use]
    pub fn processor(&self) -> TestProcessor {
        GenerationTaskProcessor::new(ProcessorDeps {
            store: Arc::clone(&self.store),
            generator: Arc::new(self.generator.clone()),
            objects: Arc::new(self.objects.clone()),
            clock: Arc::new(DefaultClock),
            settings: Arc::new(PipelineSettings {
                concurrency_limit: 3,
                ..PipelineSettings::default()
            }),
        })
    }

    /// Returns the scenario task.
    ///
    /// # Errors
    ///
    /// Returns an error when no task has been seeded yet.
    pub fn task(&self) -> Result<&Task, eyre::Report> {
        self.task
            .as_ref()
            .ok_or_else(|| eyre::eyre!("missing task in scenario world"))
    }

    /// Reloads the scenario task from the store.
    ///
    /// # Errors
    ///
    /// Returns an error when the task is missing or the lookup fails.
    pub fn reload(&self) -> Result<Task, eyre::Report> {
        use hueforge::generation::ports::TaskStore;

        let id = self.task()?.id();
        run_async(self.store.find_by_id(id))?
            .ok_or_else(|| eyre::eyre!("task {id} missing from store"))
    }
}

impl Default for LifecycleWorld {
    fn default() -> Self {
        Self::new()
    }
}

/// Fixture that creates a new scenario world.
#[fixture]
pub fn world() -> LifecycleWorld {
    LifecycleWorld::default()
}

/// Runs an async operation within sync step definitions.
pub fn run_async<T>(future: impl std::future::Future<Output = T>) -> T {
    tokio::task::block_in_place(|| tokio::runtime::Handle::current().block_on(future))
}
