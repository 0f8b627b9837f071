//! Processor lookup by task kind.

use crate::generation::{
    domain::TaskKind,
    ports::{GenerationClient, ObjectStore, TaskStore},
    services::{GenerationTaskProcessor, ProcessorDeps, RefinementTaskProcessor, TaskProcessor},
};
use mockable::Clock;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Maps each [`TaskKind`] to the processor that runs it.
#[derive(Clone, Default)]
pub struct ProcessorRegistry {
    processors: HashMap<TaskKind, Arc<dyn TaskProcessor>>,
}

impl ProcessorRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers both concept processors over shared collaborators.
    #[must_use]
    pub fn with_concept_processors<S, G, O, C>(deps: &ProcessorDeps<S, G, O, C>) -> Self
    where
        S: TaskStore + 'static,
        G: GenerationClient + 'static,
        O: ObjectStore + 'static,
        C: Clock + Send + Sync + 'static,
    {
        Self::new()
            .with(Arc::new(GenerationTaskProcessor::new(deps.clone())))
            .with(Arc::new(RefinementTaskProcessor::new(deps.clone())))
    }

    /// Adds `processor`, replacing any processor for the same kind.
    #[must_use]
    pub fn with(mut self, processor: Arc<dyn TaskProcessor>) -> Self {
        self.register(processor);
        self
    }

    /// Adds `processor` and returns the one it replaced, if any.
    pub fn register(
        &mut self,
        processor: Arc<dyn TaskProcessor>,
    ) -> Option<Arc<dyn TaskProcessor>> {
        self.processors.insert(processor.kind(), processor)
    }

    /// Returns the processor for `kind`.
    #[must_use]
    pub fn get(&self, kind: TaskKind) -> Option<Arc<dyn TaskProcessor>> {
        self.processors.get(&kind).cloned()
    }

    /// Returns `true` when a processor handles `kind`.
    #[must_use]
    pub fn handles(&self, kind: TaskKind) -> bool {
        self.processors.contains_key(&kind)
    }
}

impl fmt::Debug for ProcessorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.processors.keys()).finish()
    }
}
