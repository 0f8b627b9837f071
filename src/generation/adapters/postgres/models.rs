//! Diesel row models for generation persistence.

use super::schema::{color_variations, concepts, generation_tasks};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;

/// Query result row for task records.
#[derive(Debug, Clone, Queryable, QueryableByName, Selectable)]
#[diesel(table_name = generation_tasks)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TaskRow {
    /// Task identifier.
    #[diesel(sql_type = diesel::sql_types::Uuid)]
    pub id: uuid::Uuid,
    /// Requesting principal.
    #[diesel(sql_type = diesel::sql_types::Uuid)]
    pub owner_id: uuid::Uuid,
    /// Processor discriminator.
    #[diesel(sql_type = diesel::sql_types::Varchar)]
    pub task_type: String,
    /// Lifecycle status.
    #[diesel(sql_type = diesel::sql_types::Varchar)]
    pub status: String,
    /// Tagged generation parameters.
    #[diesel(sql_type = diesel::sql_types::Jsonb)]
    pub payload: Value,
    /// Produced concept.
    #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Uuid>)]
    pub result_id: Option<uuid::Uuid>,
    /// Failure cause.
    #[diesel(sql_type = diesel::sql_types::Nullable<diesel::sql_types::Text>)]
    pub error_message: Option<String>,
    /// Creation timestamp.
    #[diesel(sql_type = diesel::sql_types::Timestamptz)]
    pub created_at: DateTime<Utc>,
    /// Latest lifecycle timestamp.
    #[diesel(sql_type = diesel::sql_types::Timestamptz)]
    pub updated_at: DateTime<Utc>,
}

/// Insert model for task records.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = generation_tasks)]
pub struct NewTaskRow {
    /// Task identifier.
    pub id: uuid::Uuid,
    /// Requesting principal.
    pub owner_id: uuid::Uuid,
    /// Processor discriminator.
    pub task_type: String,
    /// Lifecycle status.
    pub status: String,
    /// Tagged generation parameters.
    pub payload: Value,
    /// Produced concept.
    pub result_id: Option<uuid::Uuid>,
    /// Failure cause.
    pub error_message: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Latest lifecycle timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Concept row, used for both reads and inserts.
#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = concepts)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ConceptRow {
    /// Concept identifier.
    pub id: uuid::Uuid,
    /// Owning principal.
    pub owner_id: uuid::Uuid,
    /// Originating task.
    pub task_id: uuid::Uuid,
    /// Logo description.
    pub logo_description: String,
    /// Theme description.
    pub theme_description: String,
    /// Serialized base image reference.
    pub base_image: Value,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

/// Variation row, used for both reads and inserts.
#[derive(Debug, Clone, Queryable, Selectable, Insertable)]
#[diesel(table_name = color_variations)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct VariationRow {
    /// Variation identifier.
    pub id: uuid::Uuid,
    /// Parent concept.
    pub concept_id: uuid::Uuid,
    /// Serialized palette.
    pub palette: Value,
    /// Serialized rendering reference.
    pub image: Value,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}
