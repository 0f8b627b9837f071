//! Conditional `pending → processing` claim.

use crate::generation::{
    domain::{Task, TaskId},
    ports::{ClaimConstraints, ClaimOutcome, TaskStore, TaskStoreResult},
};
use mockable::Clock;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Outcome of a claim attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimResult {
    /// This caller won the claim and now owns the processing task.
    Claimed(Task),
    /// Another worker won, or the task is no longer pending.
    AlreadyClaimed,
}

impl ClaimResult {
    /// Returns `true` for [`ClaimResult::Claimed`].
    #[must_use]
    pub const fn is_claimed(&self) -> bool {
        matches!(self, Self::Claimed(_))
    }
}

/// Claims tasks through a single conditional write.
///
/// No retries happen here: losing the race is a legitimate terminal outcome
/// for the calling invocation.
#[derive(Clone)]
pub struct TaskClaimer<S, C>
where
    S: TaskStore,
    C: Clock + Send + Sync,
{
    store: Arc<S>,
    clock: Arc<C>,
}

impl<S, C> TaskClaimer<S, C>
where
    S: TaskStore,
    C: Clock + Send + Sync,
{
    /// Creates a claimer over `store`.
    #[must_use]
    pub const fn new(store: Arc<S>, clock: Arc<C>) -> Self {
        Self { store, clock }
    }

    /// Attempts to move `task_id` from pending to processing.
    ///
    /// # Errors
    ///
    /// Returns the store error when the conditional write could not be
    /// executed at all.
    #[instrument(skip(self, constraints), fields(task_id = %task_id))]
    pub async fn claim(
        &self,
        task_id: TaskId,
        constraints: ClaimConstraints,
    ) -> TaskStoreResult<ClaimResult> {
        let outcome = self
            .store
            .claim(task_id, constraints, self.clock.utc())
            .await?;
        match outcome {
            ClaimOutcome::Claimed(task) => {
                debug!(owner_id = %task.owner_id(), "task claimed");
                Ok(ClaimResult::Claimed(task))
            }
            ClaimOutcome::NotPending => {
                debug!("claim lost, task is not pending");
                Ok(ClaimResult::AlreadyClaimed)
            }
        }
    }
}
