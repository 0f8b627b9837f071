//! Per-kind task processors and the shared concept pipeline driver.
//!
//! A run moves through `claimed → base ready → stored and palettes ready →
//! variations ready → persisted → done`. Any stage failure collapses into a
//! single conditional `failed` write.

use super::{
    claimer::{ClaimResult, TaskClaimer},
    deadline::with_deadline,
    variations::{PipelineSettings, VariationError, VariationJob, VariationPipeline},
};
use crate::generation::{
    domain::{
        Concept, ConceptBatch, ConceptId, ConceptParams, GenerationDomainError, ObjectPath,
        Task, TaskId, TaskKind, TaskPayload, sanitize_error_message,
    },
    ports::{
        BaseImageRequest, ClaimConstraints, FinalizeOutcome, GenerationClient, GenerationError,
        ObjectStore, ObjectStoreError, RefineImageRequest, TaskStore, TaskStoreError,
    },
};
use async_trait::async_trait;
use mockable::Clock;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, instrument, warn};

/// Terminal result of one processor invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The task completed with this concept.
    Completed(ConceptId),
    /// The task was marked failed with this cause.
    Failed(String),
    /// The task left `processing` underneath the run; nothing was written.
    Abandoned,
    /// Another worker owns the task, or it is no longer pending.
    AlreadyClaimed,
}

/// Errors that escape a processor and should trigger redelivery.
#[derive(Debug, Clone, Error)]
pub enum ProcessError {
    /// The claim write could not be executed.
    #[error("claim failed: {0}")]
    Claim(TaskStoreError),

    /// The terminal `failed` write could not be executed.
    #[error("failed to record task failure: {0}")]
    Finalize(TaskStoreError),

    /// The processor was handed a task of another kind.
    #[error("processor for {expected} received a {actual} task")]
    KindMismatch {
        /// Kind the processor handles.
        expected: TaskKind,
        /// Kind of the task received.
        actual: TaskKind,
    },
}

/// Cause of a stage failure, recorded as the task's error message.
#[derive(Debug, Clone, Error)]
pub enum StageError {
    /// Stored parameters failed validation.
    #[error("invalid task parameters: {0}")]
    InvalidPayload(#[from] GenerationDomainError),

    /// A generation call failed.
    #[error(transparent)]
    Generation(#[from] GenerationError),

    /// Storing the base image failed.
    #[error("failed to store base image: {0}")]
    Storage(#[from] ObjectStoreError),

    /// The generation service proposed no palettes.
    #[error("generation service returned no palettes")]
    NoPalettes,

    /// The variation pipeline failed.
    #[error(transparent)]
    Variations(#[from] VariationError),

    /// Persisting the concept batch failed.
    ///
    /// The recorded message stays fixed; database detail only reaches logs.
    #[error("failed to persist concept")]
    Persistence(#[from] TaskStoreError),
}

/// Processor contract, one implementation per [`TaskKind`].
#[async_trait]
pub trait TaskProcessor: Send + Sync {
    /// Returns the task kind this processor runs.
    fn kind(&self) -> TaskKind;

    /// Claims and runs `task` to a terminal status.
    ///
    /// `task` is the authoritative record read before dispatch; the claim
    /// re-checks its status and owner.
    async fn process(&self, task: &Task) -> Result<ProcessOutcome, ProcessError>;
}

/// How the base image for a run is produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaseImageSource {
    /// Draw a fresh base image.
    Generate(BaseImageRequest),
    /// Refine an existing image.
    Refine(RefineImageRequest),
}

enum RunError {
    Stage(StageError),
    Abandoned,
}

macro_rules! stage_failure_from {
    ($($source:ty),+ $(,)?) => {
        $(
            impl From<$source> for RunError {
                fn from(err: $source) -> Self {
                    Self::Stage(err.into())
                }
            }
        )+
    };
}

stage_failure_from!(
    StageError,
    GenerationDomainError,
    GenerationError,
    ObjectStoreError,
    VariationError,
);

/// Collaborators shared by every processor.
pub struct ProcessorDeps<S, G, O, C>
where
    S: TaskStore + 'static,
    G: GenerationClient + 'static,
    O: ObjectStore + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Task store.
    pub store: Arc<S>,
    /// Generation service client.
    pub generator: Arc<G>,
    /// Object store client.
    pub objects: Arc<O>,
    /// Clock for timestamps.
    pub clock: Arc<C>,
    /// Pipeline tunables.
    pub settings: Arc<PipelineSettings>,
}

impl<S, G, O, C> Clone for ProcessorDeps<S, G, O, C>
where
    S: TaskStore + 'static,
    G: GenerationClient + 'static,
    O: ObjectStore + 'static,
    C: Clock + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            generator: Arc::clone(&self.generator),
            objects: Arc::clone(&self.objects),
            clock: Arc::clone(&self.clock),
            settings: Arc::clone(&self.settings),
        }
    }
}

/// Stage driver shared by the generation and refinement processors.
pub struct ConceptPipeline<S, G, O, C>
where
    S: TaskStore + 'static,
    G: GenerationClient + 'static,
    O: ObjectStore + 'static,
    C: Clock + Send + Sync + 'static,
{
    deps: ProcessorDeps<S, G, O, C>,
    claimer: TaskClaimer<S, C>,
    variations: VariationPipeline<G, O, C>,
}

impl<S, G, O, C> ConceptPipeline<S, G, O, C>
where
    S: TaskStore + 'static,
    G: GenerationClient + 'static,
    O: ObjectStore + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Creates a driver over `deps`.
    #[must_use]
    pub fn new(deps: ProcessorDeps<S, G, O, C>) -> Self {
        let claimer = TaskClaimer::new(Arc::clone(&deps.store), Arc::clone(&deps.clock));
        let variations = VariationPipeline::new(
            Arc::clone(&deps.generator),
            Arc::clone(&deps.objects),
            Arc::clone(&deps.clock),
            Arc::clone(&deps.settings),
        );
        Self {
            deps,
            claimer,
            variations,
        }
    }

    /// Claims `task` and drives it to a terminal status.
    ///
    /// # Errors
    ///
    /// Returns [`ProcessError`] only when the claim or the failure write
    /// cannot be executed; every other failure becomes a `failed` task.
    #[instrument(
        skip_all,
        fields(task_id = %task.id(), task_kind = %task.kind(), owner_id = %task.owner_id())
    )]
    pub async fn drive(
        &self,
        task: &Task,
        source: BaseImageSource,
    ) -> Result<ProcessOutcome, ProcessError> {
        let claimed = match self
            .claimer
            .claim(task.id(), ClaimConstraints::for_owner(task.owner_id()))
            .await
            .map_err(ProcessError::Claim)?
        {
            ClaimResult::Claimed(claimed) => claimed,
            ClaimResult::AlreadyClaimed => return Ok(ProcessOutcome::AlreadyClaimed),
        };

        match self.execute(&claimed, &source).await {
            Ok(batch) => self.finalize_success(claimed.id(), &batch).await,
            Err(RunError::Abandoned) => {
                warn!("task left processing mid-run, abandoning");
                Ok(ProcessOutcome::Abandoned)
            }
            Err(RunError::Stage(cause)) => self.finalize_failure(claimed.id(), &cause).await,
        }
    }

    async fn execute(
        &self,
        task: &Task,
        source: &BaseImageSource,
    ) -> Result<ConceptBatch, RunError> {
        task.payload().validate()?;
        let limit = self.deps.settings.call_timeout;

        let base_image = match source {
            BaseImageSource::Generate(request) => {
                with_deadline(
                    limit,
                    self.deps.generator.generate_base(request),
                    GenerationError::Timeout,
                )
                .await?
            }
            BaseImageSource::Refine(request) => {
                with_deadline(
                    limit,
                    self.deps.generator.refine_base(request),
                    GenerationError::Timeout,
                )
                .await?
            }
        };
        self.heartbeat(task.id()).await?;

        let concept_id = ConceptId::new();
        let concept_scope = concept_id.to_string();
        let base_path = ObjectPath::owner_scoped(
            task.owner_id(),
            ["concepts", concept_scope.as_str(), "base.png"],
        )?;
        let payload = task.payload();
        let palette_count = payload
            .palette_count()
            .unwrap_or(self.deps.settings.palette_count);
        let (base_ref, palettes) = tokio::try_join!(
            async {
                with_deadline(
                    limit,
                    self.deps
                        .objects
                        .store(&self.deps.settings.bucket, &base_path, base_image.clone()),
                    ObjectStoreError::Timeout,
                )
                .await
                .map_err(StageError::from)
            },
            async {
                with_deadline(
                    limit,
                    self.deps
                        .generator
                        .generate_palettes(payload.theme_description(), palette_count),
                    GenerationError::Timeout,
                )
                .await
                .map_err(StageError::from)
            },
        )?;
        if palettes.is_empty() {
            return Err(RunError::Stage(StageError::NoPalettes));
        }
        self.heartbeat(task.id()).await?;

        let variations = self
            .variations
            .run(VariationJob {
                owner_id: task.owner_id(),
                concept_id,
                base_image,
                palettes,
            })
            .await?;
        self.heartbeat(task.id()).await?;

        let concept = Concept::with_id(
            concept_id,
            ConceptParams {
                owner_id: task.owner_id(),
                task_id: task.id(),
                logo_description: payload.logo_description().to_owned(),
                theme_description: payload.theme_description().to_owned(),
                base_image: base_ref,
            },
            self.deps.clock.utc(),
        );
        Ok(ConceptBatch::new(concept, variations))
    }

    async fn heartbeat(&self, task_id: TaskId) -> Result<(), RunError> {
        match self.deps.store.touch(task_id, self.deps.clock.utc()).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(RunError::Abandoned),
            Err(err) => {
                warn!(error = %err, "heartbeat write failed, continuing");
                Ok(())
            }
        }
    }

    async fn finalize_success(
        &self,
        task_id: TaskId,
        batch: &ConceptBatch,
    ) -> Result<ProcessOutcome, ProcessError> {
        let concept_id = batch.concept().id();
        match self
            .deps
            .store
            .complete(task_id, batch, self.deps.clock.utc())
            .await
        {
            Ok(FinalizeOutcome::Applied) => {
                info!(
                    concept_id = %concept_id,
                    variations = batch.variations().len(),
                    "task completed"
                );
                Ok(ProcessOutcome::Completed(concept_id))
            }
            Ok(FinalizeOutcome::Rejected) => {
                warn!("task no longer processing at completion, result discarded");
                Ok(ProcessOutcome::Abandoned)
            }
            Err(err) => {
                warn!(error = %err, "concept batch could not be persisted");
                self.finalize_failure(task_id, &StageError::Persistence(err))
                    .await
            }
        }
    }

    async fn finalize_failure(
        &self,
        task_id: TaskId,
        cause: &StageError,
    ) -> Result<ProcessOutcome, ProcessError> {
        let message = sanitize_error_message(&cause.to_string());
        let outcome = self
            .deps
            .store
            .fail(task_id, &message, self.deps.clock.utc())
            .await
            .map_err(ProcessError::Finalize)?;
        if outcome.is_applied() {
            warn!(cause = %message, "task failed");
            Ok(ProcessOutcome::Failed(message))
        } else {
            warn!(cause = %message, "task already terminal, failure not recorded");
            Ok(ProcessOutcome::Abandoned)
        }
    }
}

/// Runs `concept_generation` tasks.
pub struct GenerationTaskProcessor<S, G, O, C>
where
    S: TaskStore + 'static,
    G: GenerationClient + 'static,
    O: ObjectStore + 'static,
    C: Clock + Send + Sync + 'static,
{
    pipeline: ConceptPipeline<S, G, O, C>,
}

impl<S, G, O, C> GenerationTaskProcessor<S, G, O, C>
where
    S: TaskStore + 'static,
    G: GenerationClient + 'static,
    O: ObjectStore + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Creates the processor.
    #[must_use]
    pub fn new(deps: ProcessorDeps<S, G, O, C>) -> Self {
        Self {
            pipeline: ConceptPipeline::new(deps),
        }
    }
}

#[async_trait]
impl<S, G, O, C> TaskProcessor for GenerationTaskProcessor<S, G, O, C>
where
    S: TaskStore + 'static,
    G: GenerationClient + 'static,
    O: ObjectStore + 'static,
    C: Clock + Send + Sync + 'static,
{
    fn kind(&self) -> TaskKind {
        TaskKind::ConceptGeneration
    }

    async fn process(&self, task: &Task) -> Result<ProcessOutcome, ProcessError> {
        let TaskPayload::ConceptGeneration(params) = task.payload() else {
            return Err(ProcessError::KindMismatch {
                expected: TaskKind::ConceptGeneration,
                actual: task.kind(),
            });
        };
        let request = BaseImageRequest {
            logo_description: params.logo_description.clone(),
            theme_description: params.theme_description.clone(),
        };
        self.pipeline
            .drive(task, BaseImageSource::Generate(request))
            .await
    }
}

/// Runs `concept_refinement` tasks.
pub struct RefinementTaskProcessor<S, G, O, C>
where
    S: TaskStore + 'static,
    G: GenerationClient + 'static,
    O: ObjectStore + 'static,
    C: Clock + Send + Sync + 'static,
{
    pipeline: ConceptPipeline<S, G, O, C>,
}

impl<S, G, O, C> RefinementTaskProcessor<S, G, O, C>
where
    S: TaskStore + 'static,
    G: GenerationClient + 'static,
    O: ObjectStore + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Creates the processor.
    #[must_use]
    pub fn new(deps: ProcessorDeps<S, G, O, C>) -> Self {
        Self {
            pipeline: ConceptPipeline::new(deps),
        }
    }
}

#[async_trait]
impl<S, G, O, C> TaskProcessor for RefinementTaskProcessor<S, G, O, C>
where
    S: TaskStore + 'static,
    G: GenerationClient + 'static,
    O: ObjectStore + 'static,
    C: Clock + Send + Sync + 'static,
{
    fn kind(&self) -> TaskKind {
        TaskKind::ConceptRefinement
    }

    async fn process(&self, task: &Task) -> Result<ProcessOutcome, ProcessError> {
        let TaskPayload::ConceptRefinement(params) = task.payload() else {
            return Err(ProcessError::KindMismatch {
                expected: TaskKind::ConceptRefinement,
                actual: task.kind(),
            });
        };
        let request = RefineImageRequest {
            source_image: params.source_image.clone(),
            refinement_prompt: params.refinement_prompt.clone(),
            logo_description: params.logo_description.clone(),
            preserve_aspects: params.preserve_aspects.clone(),
        };
        self.pipeline.drive(task, BaseImageSource::Refine(request)).await
    }
}
