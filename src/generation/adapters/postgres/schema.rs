//! Diesel schema for generation task persistence.

diesel::table! {
    /// Generation task records.
    generation_tasks (id) {
        /// Task identifier.
        id -> Uuid,
        /// Requesting principal.
        owner_id -> Uuid,
        /// Processor discriminator.
        #[max_length = 50]
        task_type -> Varchar,
        /// Lifecycle status.
        #[max_length = 50]
        status -> Varchar,
        /// Tagged generation parameters.
        payload -> Jsonb,
        /// Produced concept, set once completed.
        result_id -> Nullable<Uuid>,
        /// Failure cause, set once failed.
        error_message -> Nullable<Text>,
        /// Creation timestamp.
        created_at -> Timestamptz,
        /// Latest lifecycle timestamp.
        updated_at -> Timestamptz,
    }
}

diesel::table! {
    /// Concepts produced by completed tasks.
    concepts (id) {
        /// Concept identifier.
        id -> Uuid,
        /// Owning principal.
        owner_id -> Uuid,
        /// Originating task.
        task_id -> Uuid,
        /// Logo description copied from the task.
        logo_description -> Text,
        /// Theme description copied from the task.
        theme_description -> Text,
        /// Stored base image reference.
        base_image -> Jsonb,
        /// Creation timestamp.
        created_at -> Timestamptz,
    }
}

diesel::table! {
    /// Color variations of a concept.
    color_variations (id) {
        /// Variation identifier.
        id -> Uuid,
        /// Parent concept.
        concept_id -> Uuid,
        /// Palette used for the rendering.
        palette -> Jsonb,
        /// Stored rendering reference.
        image -> Jsonb,
        /// Creation timestamp.
        created_at -> Timestamptz,
    }
}

diesel::joinable!(color_variations -> concepts (concept_id));
diesel::joinable!(concepts -> generation_tasks (task_id));
diesel::allow_tables_to_appear_in_same_query!(generation_tasks, concepts, color_variations);
