//! In-memory task store for tests and single-process runs.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::generation::{
    domain::{ConceptBatch, ConceptId, Task, TaskId, TaskStatus},
    ports::{
        ClaimConstraints, ClaimOutcome, FinalizeOutcome, TaskStore, TaskStoreError,
        TaskStoreResult,
    },
};

/// Thread-safe in-memory task store.
///
/// Each operation holds the write lock for its whole check-and-set, which
/// gives the same single-winner guarantee as the conditional SQL updates.
#[derive(Debug, Clone, Default)]
pub struct InMemoryTaskStore {
    state: Arc<RwLock<InMemoryState>>,
}

#[derive(Debug, Default)]
struct InMemoryState {
    tasks: HashMap<TaskId, Task>,
    concepts: HashMap<ConceptId, ConceptBatch>,
}

impl InMemoryTaskStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of persisted concepts.
    ///
    /// # Errors
    ///
    /// Returns [`TaskStoreError::Persistence`] when the lock is poisoned.
    pub fn concept_count(&self) -> TaskStoreResult<usize> {
        let state = self.state.read().map_err(lock_error)?;
        Ok(state.concepts.len())
    }
}

fn lock_error<E: std::fmt::Display>(err: E) -> TaskStoreError {
    TaskStoreError::persistence(std::io::Error::other(err.to_string()))
}

fn matches_constraints(task: &Task, constraints: ClaimConstraints) -> bool {
    constraints
        .owner_id()
        .is_none_or(|owner_id| owner_id == task.owner_id())
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert(&self, task: &Task) -> TaskStoreResult<()> {
        let mut state = self.state.write().map_err(lock_error)?;
        if state.tasks.contains_key(&task.id()) {
            return Err(TaskStoreError::DuplicateTask(task.id()));
        }
        state.tasks.insert(task.id(), task.clone());
        Ok(())
    }

    async fn find_by_id(&self, id: TaskId) -> TaskStoreResult<Option<Task>> {
        let state = self.state.read().map_err(lock_error)?;
        Ok(state.tasks.get(&id).cloned())
    }

    async fn claim(
        &self,
        id: TaskId,
        constraints: ClaimConstraints,
        now: DateTime<Utc>,
    ) -> TaskStoreResult<ClaimOutcome> {
        let mut state = self.state.write().map_err(lock_error)?;
        let Some(task) = state.tasks.get_mut(&id) else {
            return Ok(ClaimOutcome::NotPending);
        };
        if task.status() != TaskStatus::Pending || !matches_constraints(task, constraints) {
            return Ok(ClaimOutcome::NotPending);
        }
        task.claim(now).map_err(TaskStoreError::persistence)?;
        Ok(ClaimOutcome::Claimed(task.clone()))
    }

    async fn touch(&self, id: TaskId, now: DateTime<Utc>) -> TaskStoreResult<bool> {
        let mut state = self.state.write().map_err(lock_error)?;
        Ok(state
            .tasks
            .get_mut(&id)
            .is_some_and(|task| task.touch(now)))
    }

    async fn complete(
        &self,
        id: TaskId,
        batch: &ConceptBatch,
        now: DateTime<Utc>,
    ) -> TaskStoreResult<FinalizeOutcome> {
        let mut state = self.state.write().map_err(lock_error)?;
        let Some(task) = state.tasks.get_mut(&id) else {
            return Ok(FinalizeOutcome::Rejected);
        };
        if task.status() != TaskStatus::Processing {
            return Ok(FinalizeOutcome::Rejected);
        }
        let concept_id = batch.concept().id();
        task.complete(concept_id, now)
            .map_err(TaskStoreError::persistence)?;
        state.concepts.insert(concept_id, batch.clone());
        Ok(FinalizeOutcome::Applied)
    }

    async fn fail(
        &self,
        id: TaskId,
        message: &str,
        now: DateTime<Utc>,
    ) -> TaskStoreResult<FinalizeOutcome> {
        let mut state = self.state.write().map_err(lock_error)?;
        let Some(task) = state.tasks.get_mut(&id) else {
            return Ok(FinalizeOutcome::Rejected);
        };
        if task.status().is_terminal() {
            return Ok(FinalizeOutcome::Rejected);
        }
        task.fail(message, now).map_err(TaskStoreError::persistence)?;
        Ok(FinalizeOutcome::Applied)
    }

    async fn fail_stale(
        &self,
        status: TaskStatus,
        cutoff: DateTime<Utc>,
        message: &str,
        now: DateTime<Utc>,
    ) -> TaskStoreResult<Vec<TaskId>> {
        if !matches!(status, TaskStatus::Pending | TaskStatus::Processing) {
            return Err(TaskStoreError::UnsupportedStaleStatus(status));
        }
        let mut state = self.state.write().map_err(lock_error)?;
        let mut reaped = Vec::new();
        for task in state.tasks.values_mut() {
            let is_stale = task.status() == status
                && task.staleness_basis().is_some_and(|basis| basis < cutoff);
            if !is_stale {
                continue;
            }
            task.fail(message, now).map_err(TaskStoreError::persistence)?;
            reaped.push(task.id());
        }
        Ok(reaped)
    }

    async fn find_concept(&self, id: ConceptId) -> TaskStoreResult<Option<ConceptBatch>> {
        let state = self.state.read().map_err(lock_error)?;
        Ok(state.concepts.get(&id).cloned())
    }
}
