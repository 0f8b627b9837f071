//! Bounded-concurrency rendering of palette variations.

use super::deadline::with_deadline;
use crate::generation::{
    domain::{
        ConceptId, GenerationDomainError, ImageBytes, ObjectPath, OwnerId, PaletteSpec, Variation,
    },
    ports::{GenerationClient, GenerationError, ObjectStore, ObjectStoreError},
};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, instrument, warn};

/// What the pipeline does when a single variation fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VariationFailurePolicy {
    /// The first failure aborts the remaining units and fails the batch.
    #[default]
    FailAll,
    /// Failed units are dropped; the batch fails only when none succeed.
    BestEffort,
}

/// Tunables shared by the processors and the variation pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    /// Object store bucket receiving every image.
    pub bucket: String,
    /// Maximum number of variation units in flight.
    pub concurrency_limit: usize,
    /// Per-variation failure handling.
    pub failure_policy: VariationFailurePolicy,
    /// Palettes requested when the task payload does not say.
    pub palette_count: u32,
    /// Deadline applied to every external call.
    pub call_timeout: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            bucket: "concepts".to_owned(),
            concurrency_limit: 1,
            failure_policy: VariationFailurePolicy::FailAll,
            palette_count: 7,
            call_timeout: Duration::from_secs(120),
        }
    }
}

/// Input for one pipeline run.
#[derive(Debug, Clone)]
pub struct VariationJob {
    /// Owner used as the first object path segment.
    pub owner_id: OwnerId,
    /// Concept the variations will belong to.
    pub concept_id: ConceptId,
    /// Base image every variation recolors.
    pub base_image: ImageBytes,
    /// One unit of work per palette.
    pub palettes: Vec<PaletteSpec>,
}

/// Errors surfaced by a pipeline run.
#[derive(Debug, Clone, Error)]
pub enum VariationError {
    /// Rendering a variation failed.
    #[error("variation '{palette}' failed to render: {source}")]
    Render {
        /// Palette being rendered.
        palette: String,
        /// Underlying generation failure.
        source: GenerationError,
    },

    /// Uploading a rendered variation failed.
    #[error("variation '{palette}' failed to upload: {source}")]
    Upload {
        /// Palette being uploaded.
        palette: String,
        /// Underlying storage failure.
        source: ObjectStoreError,
    },

    /// The object path could not be built.
    #[error(transparent)]
    InvalidPath(#[from] GenerationDomainError),

    /// Best-effort run in which every unit failed.
    #[error("all {attempted} variations failed")]
    NoneSucceeded {
        /// Number of palettes attempted.
        attempted: usize,
    },

    /// A unit panicked or the pool shut down.
    #[error("variation unit aborted: {0}")]
    Aborted(String),
}

type UnitResult = Result<(usize, Variation), VariationError>;

/// Renders and uploads one variation per palette under a semaphore bound.
pub struct VariationPipeline<G, O, C>
where
    G: GenerationClient + 'static,
    O: ObjectStore + 'static,
    C: Clock + Send + Sync + 'static,
{
    generator: Arc<G>,
    objects: Arc<O>,
    clock: Arc<C>,
    settings: Arc<PipelineSettings>,
}

impl<G, O, C> Clone for VariationPipeline<G, O, C>
where
    G: GenerationClient + 'static,
    O: ObjectStore + 'static,
    C: Clock + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            generator: Arc::clone(&self.generator),
            objects: Arc::clone(&self.objects),
            clock: Arc::clone(&self.clock),
            settings: Arc::clone(&self.settings),
        }
    }
}

impl<G, O, C> VariationPipeline<G, O, C>
where
    G: GenerationClient + 'static,
    O: ObjectStore + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Creates a pipeline.
    #[must_use]
    pub fn new(
        generator: Arc<G>,
        objects: Arc<O>,
        clock: Arc<C>,
        settings: Arc<PipelineSettings>,
    ) -> Self {
        Self {
            generator,
            objects,
            clock,
            settings,
        }
    }

    /// Runs one unit per palette with at most `concurrency_limit` in flight.
    ///
    /// Admission of a new unit waits for a free slot. Variations come back in
    /// palette input order.
    ///
    /// # Errors
    ///
    /// Under [`VariationFailurePolicy::FailAll`] returns the first unit error
    /// and aborts the rest. Under [`VariationFailurePolicy::BestEffort`]
    /// returns [`VariationError::NoneSucceeded`] when no unit succeeds.
    #[instrument(
        skip_all,
        fields(
            concept_id = %job.concept_id,
            palettes = job.palettes.len(),
            limit = self.settings.concurrency_limit,
        )
    )]
    pub async fn run(&self, job: VariationJob) -> Result<Vec<Variation>, VariationError> {
        let VariationJob {
            owner_id,
            concept_id,
            base_image,
            palettes,
        } = job;
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency_limit.max(1)));
        let mut collector = Collector::new(self.settings.failure_policy, palettes.len());
        let mut units = JoinSet::new();

        for (index, palette) in palettes.into_iter().enumerate() {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|err| VariationError::Aborted(err.to_string()))?;
            while let Some(joined) = units.try_join_next() {
                if let Err(err) = collector.accept(joined) {
                    units.abort_all();
                    return Err(err);
                }
            }
            let unit = VariationUnit {
                generator: Arc::clone(&self.generator),
                objects: Arc::clone(&self.objects),
                clock: Arc::clone(&self.clock),
                settings: Arc::clone(&self.settings),
                owner_id,
                concept_id,
                index,
                base_image: base_image.clone(),
                palette,
            };
            units.spawn(async move {
                let result = unit.execute().await;
                drop(permit);
                result
            });
        }

        while let Some(joined) = units.join_next().await {
            if let Err(err) = collector.accept(joined) {
                units.abort_all();
                return Err(err);
            }
        }
        collector.finish()
    }
}

struct VariationUnit<G, O, C> {
    generator: Arc<G>,
    objects: Arc<O>,
    clock: Arc<C>,
    settings: Arc<PipelineSettings>,
    owner_id: OwnerId,
    concept_id: ConceptId,
    index: usize,
    base_image: ImageBytes,
    palette: PaletteSpec,
}

impl<G, O, C> VariationUnit<G, O, C>
where
    G: GenerationClient,
    O: ObjectStore,
    C: Clock + Send + Sync,
{
    async fn execute(self) -> UnitResult {
        let limit = self.settings.call_timeout;
        let rendered = with_deadline(
            limit,
            self.generator
                .render_variation(&self.base_image, &self.palette),
            GenerationError::Timeout,
        )
        .await
        .map_err(|source| VariationError::Render {
            palette: self.palette.name().to_owned(),
            source,
        })?;

        let concept_scope = self.concept_id.to_string();
        let file_name = format!("{}-{}.png", self.index + 1, self.palette.slug());
        let path = ObjectPath::owner_scoped(
            self.owner_id,
            ["variations", concept_scope.as_str(), file_name.as_str()],
        )?;
        let image = with_deadline(
            limit,
            self.objects.store(&self.settings.bucket, &path, rendered),
            ObjectStoreError::Timeout,
        )
        .await
        .map_err(|source| VariationError::Upload {
            palette: self.palette.name().to_owned(),
            source,
        })?;

        debug!(palette = self.palette.name(), path = %path, "variation stored");
        let variation = Variation::new(self.concept_id, self.palette, image, self.clock.utc());
        Ok((self.index, variation))
    }
}

struct Collector {
    policy: VariationFailurePolicy,
    attempted: usize,
    produced: Vec<(usize, Variation)>,
}

impl Collector {
    fn new(policy: VariationFailurePolicy, attempted: usize) -> Self {
        Self {
            policy,
            attempted,
            produced: Vec::with_capacity(attempted),
        }
    }

    fn accept(&mut self, joined: Result<UnitResult, JoinError>) -> Result<(), VariationError> {
        let outcome = match joined {
            Ok(result) => result,
            Err(err) => Err(VariationError::Aborted(err.to_string())),
        };
        match (outcome, self.policy) {
            (Ok(produced), _) => {
                self.produced.push(produced);
                Ok(())
            }
            (Err(err), VariationFailurePolicy::FailAll) => Err(err),
            (Err(err), VariationFailurePolicy::BestEffort) => {
                warn!(error = %err, "variation dropped");
                Ok(())
            }
        }
    }

    fn finish(mut self) -> Result<Vec<Variation>, VariationError> {
        if self.produced.is_empty() && self.attempted > 0 {
            return Err(VariationError::NoneSucceeded {
                attempted: self.attempted,
            });
        }
        self.produced.sort_by_key(|(index, _)| *index);
        Ok(self
            .produced
            .into_iter()
            .map(|(_, variation)| variation)
            .collect())
    }
}
