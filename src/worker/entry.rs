//! Per-message worker entry point.

use super::{
    bootstrap::{
        BootstrapError, ExternalClients, LazyServices, PostgresServiceFactory, RetryPolicy,
        ServiceFactory,
    },
    envelope::InboundMessage,
};
use crate::config::Settings;
use crate::generation::{
    domain::{ConceptId, TaskKind},
    ports::{GenerationClient, ObjectStore, TaskStoreError},
    services::{ProcessError, ProcessOutcome},
};
use mockable::Clock;
use thiserror::Error;
use tracing::{info, instrument, warn};

/// Why an invocation did nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The referenced task does not exist.
    TaskMissing,
    /// The envelope owner does not own the stored task.
    OwnerMismatch,
}

/// Acknowledged result of one invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvocationOutcome {
    /// The task completed with this concept.
    Completed(ConceptId),
    /// The task was marked failed with this cause.
    Failed(String),
    /// Another worker owns the task, or it already finished.
    AlreadyClaimed,
    /// The task was failed or canceled underneath the run.
    Abandoned,
    /// Nothing to do for this envelope.
    Skipped(SkipReason),
    /// The envelope could not be decoded; redelivery cannot help.
    Rejected(String),
}

impl From<ProcessOutcome> for InvocationOutcome {
    fn from(outcome: ProcessOutcome) -> Self {
        match outcome {
            ProcessOutcome::Completed(concept_id) => Self::Completed(concept_id),
            ProcessOutcome::Failed(cause) => Self::Failed(cause),
            ProcessOutcome::Abandoned => Self::Abandoned,
            ProcessOutcome::AlreadyClaimed => Self::AlreadyClaimed,
        }
    }
}

/// Errors that leave the message unacknowledged so it is redelivered.
#[derive(Debug, Clone, Error)]
pub enum WorkerError {
    /// Services could not be initialized.
    #[error(transparent)]
    Bootstrap(#[from] BootstrapError),

    /// The authoritative task record could not be read.
    #[error("failed to load task: {0}")]
    Store(#[from] TaskStoreError),

    /// The processor could not claim or finalize the task.
    #[error(transparent)]
    Process(#[from] ProcessError),

    /// No processor is registered for the stored task kind.
    #[error("no processor registered for {0} tasks")]
    UnregisteredKind(TaskKind),
}

/// Handles one inbound message per call, reusing services across calls.
pub struct WorkerEntryPoint<F>
where
    F: ServiceFactory,
{
    services: LazyServices<F>,
}

impl<G, O, C> WorkerEntryPoint<PostgresServiceFactory<G, O, C>>
where
    G: GenerationClient + 'static,
    O: ObjectStore + 'static,
    C: Clock + Send + Sync + 'static,
{
    /// Creates the production entry point from loaded settings.
    ///
    /// The database section drives the pool, the pipeline section the
    /// processors and the bootstrap section the cold-start retry policy.
    /// Nothing connects until the first message arrives.
    #[must_use]
    pub fn from_settings(settings: &Settings, clients: ExternalClients<G, O, C>) -> Self {
        let factory = PostgresServiceFactory::new(
            settings.database.clone(),
            clients,
            settings.pipeline_settings(),
        );
        Self::new(factory, settings.retry_policy())
    }
}

impl<F> WorkerEntryPoint<F>
where
    F: ServiceFactory,
{
    /// Creates an entry point that bootstraps through `factory`.
    #[must_use]
    pub fn new(factory: F, policy: RetryPolicy) -> Self {
        Self {
            services: LazyServices::new(factory, policy),
        }
    }

    /// Returns the lazily-initialized services.
    #[must_use]
    pub const fn services(&self) -> &LazyServices<F> {
        &self.services
    }

    /// Decodes `body` and dispatches the task it references.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError`] when the message should be redelivered.
    #[instrument(skip_all, fields(body_len = body.len()))]
    pub async fn handle(&self, body: &[u8]) -> Result<InvocationOutcome, WorkerError> {
        match InboundMessage::decode(body) {
            Ok(message) => self.dispatch(&message).await,
            Err(err) => {
                warn!(error = %err, "rejecting inbound message");
                Ok(InvocationOutcome::Rejected(err.to_string()))
            }
        }
    }

    /// Re-reads the referenced task and runs the processor for its kind.
    ///
    /// # Errors
    ///
    /// Returns [`WorkerError`] when the message should be redelivered.
    #[instrument(
        skip_all,
        fields(task_id = %message.task_id, owner_id = %message.owner_id)
    )]
    pub async fn dispatch(
        &self,
        message: &InboundMessage,
    ) -> Result<InvocationOutcome, WorkerError> {
        let services = self.services.get().await?;
        let Some(task) = services.store().find_by_id(message.task_id).await? else {
            warn!("task not found, skipping");
            return Ok(InvocationOutcome::Skipped(SkipReason::TaskMissing));
        };
        if task.owner_id() != message.owner_id {
            warn!(stored_owner = %task.owner_id(), "owner mismatch, skipping");
            return Ok(InvocationOutcome::Skipped(SkipReason::OwnerMismatch));
        }
        if task.kind() != message.task_type {
            warn!(
                announced = %message.task_type,
                stored = %task.kind(),
                "envelope task type differs from stored kind, using stored kind"
            );
        }

        let processor = services
            .processors()
            .get(task.kind())
            .ok_or(WorkerError::UnregisteredKind(task.kind()))?;
        let outcome = InvocationOutcome::from(processor.process(&task).await?);
        info!(outcome = ?outcome, "invocation finished");
        Ok(outcome)
    }
}
