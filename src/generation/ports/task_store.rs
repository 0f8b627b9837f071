//! Task store port: typed access to the persisted task record and the
//! concept batches finished tasks produce.

use crate::generation::domain::{ConceptBatch, ConceptId, OwnerId, Task, TaskId, TaskStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

/// Result type for task store operations.
pub type TaskStoreResult<T> = Result<T, TaskStoreError>;

/// Extra equality constraints applied to a claim.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClaimConstraints {
    owner_id: Option<OwnerId>,
}

impl ClaimConstraints {
    /// Claims regardless of owner.
    #[must_use]
    pub const fn none() -> Self {
        Self { owner_id: None }
    }

    /// Claims only when the task belongs to `owner_id`.
    #[must_use]
    pub const fn for_owner(owner_id: OwnerId) -> Self {
        Self {
            owner_id: Some(owner_id),
        }
    }

    /// Returns the required owner, if constrained.
    #[must_use]
    pub const fn owner_id(&self) -> Option<OwnerId> {
        self.owner_id
    }
}

/// Result of the conditional `pending → processing` write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// Exactly one row changed; the returned task is now processing.
    Claimed(Task),
    /// No row matched: the task is not pending or fails the constraints.
    NotPending,
}

/// Result of a conditional terminal write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinalizeOutcome {
    /// The write landed.
    Applied,
    /// The task was no longer in a status that admits the write.
    Rejected,
}

impl FinalizeOutcome {
    /// Returns `true` when the write landed.
    #[must_use]
    pub const fn is_applied(self) -> bool {
        matches!(self, Self::Applied)
    }
}

/// Task persistence contract.
///
/// Every status change is a conditional write against the stored status, so
/// independent workers and the reaper coordinate only through this port.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Stores a new task.
    ///
    /// # Errors
    ///
    /// Returns [`TaskStoreError::DuplicateTask`] when the identifier exists.
    async fn insert(&self, task: &Task) -> TaskStoreResult<()>;

    /// Finds a task by identifier.
    ///
    /// Returns `None` when the task does not exist.
    async fn find_by_id(&self, id: TaskId) -> TaskStoreResult<Option<Task>>;

    /// Sets `status = processing, updated_at = now` where the task is
    /// pending and matches `constraints`.
    async fn claim(
        &self,
        id: TaskId,
        constraints: ClaimConstraints,
        now: DateTime<Utc>,
    ) -> TaskStoreResult<ClaimOutcome>;

    /// Refreshes `updated_at` on a processing task.
    ///
    /// Returns `false` when the task is no longer processing.
    async fn touch(&self, id: TaskId, now: DateTime<Utc>) -> TaskStoreResult<bool>;

    /// Persists the concept batch and marks the task completed as one
    /// transaction, provided the task is still processing.
    ///
    /// Nothing is written when the outcome is [`FinalizeOutcome::Rejected`].
    async fn complete(
        &self,
        id: TaskId,
        batch: &ConceptBatch,
        now: DateTime<Utc>,
    ) -> TaskStoreResult<FinalizeOutcome>;

    /// Marks a pending or processing task failed with `message`.
    ///
    /// Terminal tasks are left untouched and yield
    /// [`FinalizeOutcome::Rejected`].
    async fn fail(
        &self,
        id: TaskId,
        message: &str,
        now: DateTime<Utc>,
    ) -> TaskStoreResult<FinalizeOutcome>;

    /// Fails every task in `status` whose staleness timestamp is older than
    /// `cutoff`: `created_at` for pending tasks, `updated_at` for processing
    /// ones. Returns the identifiers actually rewritten.
    async fn fail_stale(
        &self,
        status: TaskStatus,
        cutoff: DateTime<Utc>,
        message: &str,
        now: DateTime<Utc>,
    ) -> TaskStoreResult<Vec<TaskId>>;

    /// Loads a concept and its variations.
    async fn find_concept(&self, id: ConceptId) -> TaskStoreResult<Option<ConceptBatch>>;
}

/// Errors returned by task store implementations.
#[derive(Debug, Clone, Error)]
pub enum TaskStoreError {
    /// A task with the same identifier already exists.
    #[error("duplicate task identifier: {0}")]
    DuplicateTask(TaskId),

    /// The task was not found.
    #[error("task not found: {0}")]
    NotFound(TaskId),

    /// Only pending and processing tasks can be scanned for staleness.
    #[error("cannot scan {0} tasks for staleness")]
    UnsupportedStaleStatus(TaskStatus),

    /// Persistence-layer failure.
    #[error("persistence error: {0}")]
    Persistence(Arc<dyn std::error::Error + Send + Sync>),
}

impl TaskStoreError {
    /// Wraps a persistence error.
    pub fn persistence(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Persistence(Arc::new(err))
    }
}
