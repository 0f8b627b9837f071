//! `PostgreSQL` task store implementation.
//!
//! Every status change is a single conditional `UPDATE`; the affected-row
//! count (or the `RETURNING` set) is the only signal of success.

use super::{
    models::{ConceptRow, NewTaskRow, TaskRow, VariationRow},
    schema::{color_variations, concepts, generation_tasks},
};
use crate::generation::{
    domain::{
        Concept, ConceptBatch, ConceptId, ConceptParams, GenerationDomainError, ImageRef, OwnerId,
        PaletteSpec, PersistedTaskData, Task, TaskId, TaskKind, TaskPayload, TaskStatus, Variation,
        VariationId, sanitize_error_message,
    },
    ports::{
        ClaimConstraints, ClaimOutcome, FinalizeOutcome, TaskStore, TaskStoreError,
        TaskStoreResult,
    },
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::result::{DatabaseErrorKind, Error as DieselError};

/// `PostgreSQL` connection pool type used by generation adapters.
pub type GenerationPgPool = Pool<ConnectionManager<PgConnection>>;

/// `PostgreSQL`-backed task store.
#[derive(Debug, Clone)]
pub struct PostgresTaskStore {
    pool: GenerationPgPool,
}

impl PostgresTaskStore {
    /// Creates a store from a `PostgreSQL` connection pool.
    #[must_use]
    pub const fn new(pool: GenerationPgPool) -> Self {
        Self { pool }
    }

    async fn run_blocking<F, T>(&self, f: F) -> TaskStoreResult<T>
    where
        F: FnOnce(&mut PgConnection) -> TaskStoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut connection = pool.get().map_err(TaskStoreError::persistence)?;
            f(&mut connection)
        })
        .await
        .map_err(TaskStoreError::persistence)?
    }
}

const CLAIM_SQL: &str = concat!(
    "UPDATE generation_tasks SET status = $4, updated_at = $2 ",
    "WHERE id = $1 AND status = $3 AND ($5::uuid IS NULL OR owner_id = $5) ",
    "RETURNING id, owner_id, task_type, status, payload, result_id, error_message, ",
    "created_at, updated_at",
);

#[async_trait]
impl TaskStore for PostgresTaskStore {
    async fn insert(&self, task: &Task) -> TaskStoreResult<()> {
        let task_id = task.id();
        let new_row = to_new_row(task)?;
        self.run_blocking(move |connection| {
            diesel::insert_into(generation_tasks::table)
                .values(&new_row)
                .execute(connection)
                .map_err(|err| match err {
                    DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                        TaskStoreError::DuplicateTask(task_id)
                    }
                    _ => TaskStoreError::persistence(err),
                })?;
            Ok(())
        })
        .await
    }

    async fn find_by_id(&self, id: TaskId) -> TaskStoreResult<Option<Task>> {
        self.run_blocking(move |connection| {
            let row = generation_tasks::table
                .filter(generation_tasks::id.eq(id.into_inner()))
                .select(TaskRow::as_select())
                .first::<TaskRow>(connection)
                .optional()
                .map_err(TaskStoreError::persistence)?;
            row.map(row_to_task).transpose()
        })
        .await
    }

    async fn claim(
        &self,
        id: TaskId,
        constraints: ClaimConstraints,
        now: DateTime<Utc>,
    ) -> TaskStoreResult<ClaimOutcome> {
        let owner = constraints.owner_id().map(OwnerId::into_inner);
        self.run_blocking(move |connection| {
            let row = diesel::sql_query(CLAIM_SQL)
                .bind::<diesel::sql_types::Uuid, _>(id.into_inner())
                .bind::<diesel::sql_types::Timestamptz, _>(now)
                .bind::<diesel::sql_types::Text, _>(TaskStatus::Pending.as_str())
                .bind::<diesel::sql_types::Text, _>(TaskStatus::Processing.as_str())
                .bind::<diesel::sql_types::Nullable<diesel::sql_types::Uuid>, _>(owner)
                .get_result::<TaskRow>(connection)
                .optional()
                .map_err(TaskStoreError::persistence)?;
            match row {
                Some(claimed) => Ok(ClaimOutcome::Claimed(row_to_task(claimed)?)),
                None => Ok(ClaimOutcome::NotPending),
            }
        })
        .await
    }

    async fn touch(&self, id: TaskId, now: DateTime<Utc>) -> TaskStoreResult<bool> {
        self.run_blocking(move |connection| {
            let updated = diesel::update(
                generation_tasks::table
                    .filter(generation_tasks::id.eq(id.into_inner()))
                    .filter(generation_tasks::status.eq(TaskStatus::Processing.as_str())),
            )
            .set(generation_tasks::updated_at.eq(now))
            .execute(connection)
            .map_err(TaskStoreError::persistence)?;
            Ok(updated == 1)
        })
        .await
    }

    async fn complete(
        &self,
        id: TaskId,
        batch: &ConceptBatch,
        now: DateTime<Utc>,
    ) -> TaskStoreResult<FinalizeOutcome> {
        let concept_row = to_concept_row(batch.concept())?;
        let variation_rows = batch
            .variations()
            .iter()
            .map(to_variation_row)
            .collect::<TaskStoreResult<Vec<_>>>()?;
        let concept_id = concept_row.id;

        self.run_blocking(move |connection| {
            connection
                .transaction::<FinalizeOutcome, DieselError, _>(|tx| {
                    let updated = diesel::update(
                        generation_tasks::table
                            .filter(generation_tasks::id.eq(id.into_inner()))
                            .filter(generation_tasks::status.eq(TaskStatus::Processing.as_str())),
                    )
                    .set((
                        generation_tasks::status.eq(TaskStatus::Completed.as_str()),
                        generation_tasks::result_id.eq(Some(concept_id)),
                        generation_tasks::error_message.eq(None::<String>),
                        generation_tasks::updated_at.eq(now),
                    ))
                    .execute(tx)?;
                    if updated == 0 {
                        return Ok(FinalizeOutcome::Rejected);
                    }
                    diesel::insert_into(concepts::table)
                        .values(&concept_row)
                        .execute(tx)?;
                    if !variation_rows.is_empty() {
                        diesel::insert_into(color_variations::table)
                            .values(&variation_rows)
                            .execute(tx)?;
                    }
                    Ok(FinalizeOutcome::Applied)
                })
                .map_err(TaskStoreError::persistence)
        })
        .await
    }

    async fn fail(
        &self,
        id: TaskId,
        message: &str,
        now: DateTime<Utc>,
    ) -> TaskStoreResult<FinalizeOutcome> {
        let stored_message = sanitize_error_message(message);
        self.run_blocking(move |connection| {
            let updated = diesel::update(
                generation_tasks::table
                    .filter(generation_tasks::id.eq(id.into_inner()))
                    .filter(generation_tasks::status.eq_any([
                        TaskStatus::Pending.as_str(),
                        TaskStatus::Processing.as_str(),
                    ])),
            )
            .set((
                generation_tasks::status.eq(TaskStatus::Failed.as_str()),
                generation_tasks::error_message.eq(Some(stored_message)),
                generation_tasks::updated_at.eq(now),
            ))
            .execute(connection)
            .map_err(TaskStoreError::persistence)?;
            if updated == 0 {
                Ok(FinalizeOutcome::Rejected)
            } else {
                Ok(FinalizeOutcome::Applied)
            }
        })
        .await
    }

    async fn fail_stale(
        &self,
        status: TaskStatus,
        cutoff: DateTime<Utc>,
        message: &str,
        now: DateTime<Utc>,
    ) -> TaskStoreResult<Vec<TaskId>> {
        let stored_message = sanitize_error_message(message);
        let changes = (
            generation_tasks::status.eq(TaskStatus::Failed.as_str()),
            generation_tasks::error_message.eq(Some(stored_message)),
            generation_tasks::updated_at.eq(now),
        );
        let scoped = generation_tasks::table.filter(generation_tasks::status.eq(status.as_str()));

        self.run_blocking(move |connection| {
            let reaped = match status {
                TaskStatus::Pending => diesel::update(
                    scoped.filter(generation_tasks::created_at.lt(cutoff)),
                )
                .set(changes)
                .returning(generation_tasks::id)
                .get_results::<uuid::Uuid>(connection),
                TaskStatus::Processing => diesel::update(
                    scoped.filter(generation_tasks::updated_at.lt(cutoff)),
                )
                .set(changes)
                .returning(generation_tasks::id)
                .get_results::<uuid::Uuid>(connection),
                TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Canceled => {
                    return Err(TaskStoreError::UnsupportedStaleStatus(status));
                }
            }
            .map_err(TaskStoreError::persistence)?;
            Ok(reaped.into_iter().map(TaskId::from_uuid).collect())
        })
        .await
    }

    async fn find_concept(&self, id: ConceptId) -> TaskStoreResult<Option<ConceptBatch>> {
        self.run_blocking(move |connection| {
            let Some(concept_row) = concepts::table
                .filter(concepts::id.eq(id.into_inner()))
                .select(ConceptRow::as_select())
                .first::<ConceptRow>(connection)
                .optional()
                .map_err(TaskStoreError::persistence)?
            else {
                return Ok(None);
            };
            let variation_rows = color_variations::table
                .filter(color_variations::concept_id.eq(id.into_inner()))
                .order(color_variations::created_at.asc())
                .select(VariationRow::as_select())
                .load::<VariationRow>(connection)
                .map_err(TaskStoreError::persistence)?;

            let concept = row_to_concept(concept_row)?;
            let variations = variation_rows
                .into_iter()
                .map(row_to_variation)
                .collect::<TaskStoreResult<Vec<_>>>()?;
            Ok(Some(ConceptBatch::new(concept, variations)))
        })
        .await
    }
}

fn to_new_row(task: &Task) -> TaskStoreResult<NewTaskRow> {
    let payload = serde_json::to_value(task.payload()).map_err(TaskStoreError::persistence)?;
    Ok(NewTaskRow {
        id: task.id().into_inner(),
        owner_id: task.owner_id().into_inner(),
        task_type: task.kind().as_str().to_owned(),
        status: task.status().as_str().to_owned(),
        payload,
        result_id: task.result_id().map(ConceptId::into_inner),
        error_message: task.error_message().map(ToOwned::to_owned),
        created_at: task.created_at(),
        updated_at: task.updated_at(),
    })
}

fn row_to_task(row: TaskRow) -> TaskStoreResult<Task> {
    let kind = TaskKind::try_from(row.task_type.as_str()).map_err(TaskStoreError::persistence)?;
    let status = TaskStatus::try_from(row.status.as_str()).map_err(TaskStoreError::persistence)?;
    let payload = serde_json::from_value::<TaskPayload>(row.payload)
        .map_err(TaskStoreError::persistence)?;
    if payload.kind() != kind {
        return Err(TaskStoreError::persistence(
            GenerationDomainError::PayloadKindMismatch {
                kind,
                payload: payload.kind(),
            },
        ));
    }

    Ok(Task::from_persisted(PersistedTaskData {
        id: TaskId::from_uuid(row.id),
        owner_id: OwnerId::from_uuid(row.owner_id),
        status,
        payload,
        result_id: row.result_id.map(ConceptId::from_uuid),
        error_message: row.error_message,
        created_at: row.created_at,
        updated_at: row.updated_at,
    }))
}

fn to_concept_row(concept: &Concept) -> TaskStoreResult<ConceptRow> {
    let base_image =
        serde_json::to_value(concept.base_image()).map_err(TaskStoreError::persistence)?;
    Ok(ConceptRow {
        id: concept.id().into_inner(),
        owner_id: concept.owner_id().into_inner(),
        task_id: concept.task_id().into_inner(),
        logo_description: concept.logo_description().to_owned(),
        theme_description: concept.theme_description().to_owned(),
        base_image,
        created_at: concept.created_at(),
    })
}

fn to_variation_row(variation: &Variation) -> TaskStoreResult<VariationRow> {
    let palette = serde_json::to_value(variation.palette()).map_err(TaskStoreError::persistence)?;
    let image = serde_json::to_value(variation.image()).map_err(TaskStoreError::persistence)?;
    Ok(VariationRow {
        id: variation.id().into_inner(),
        concept_id: variation.concept_id().into_inner(),
        palette,
        image,
        created_at: variation.created_at(),
    })
}

fn row_to_concept(row: ConceptRow) -> TaskStoreResult<Concept> {
    let base_image =
        serde_json::from_value::<ImageRef>(row.base_image).map_err(TaskStoreError::persistence)?;
    let params = ConceptParams {
        owner_id: OwnerId::from_uuid(row.owner_id),
        task_id: TaskId::from_uuid(row.task_id),
        logo_description: row.logo_description,
        theme_description: row.theme_description,
        base_image,
    };
    Ok(Concept::with_id(
        ConceptId::from_uuid(row.id),
        params,
        row.created_at,
    ))
}

fn row_to_variation(row: VariationRow) -> TaskStoreResult<Variation> {
    let palette =
        serde_json::from_value::<PaletteSpec>(row.palette).map_err(TaskStoreError::persistence)?;
    let image =
        serde_json::from_value::<ImageRef>(row.image).map_err(TaskStoreError::persistence)?;
    Ok(Variation::from_persisted(
        VariationId::from_uuid(row.id),
        ConceptId::from_uuid(row.concept_id),
        palette,
        image,
        row.created_at,
    ))
}
