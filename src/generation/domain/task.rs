//! Task aggregate root and lifecycle types.

use super::{
    ConceptId, GenerationDomainError, ImageRef, OwnerId, ParseTaskKindError,
    ParseTaskStatusError, TaskId,
};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Longest error message persisted on a failed task, in characters.
pub const MAX_ERROR_MESSAGE_CHARS: usize = 500;

/// Task lifecycle status.
///
/// Transitions only move forward: `pending → processing → {completed | failed}`,
/// `pending → failed` (reaper) and either non-terminal status to `canceled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Enqueued and waiting for a worker to claim it.
    Pending,
    /// Claimed by exactly one worker.
    Processing,
    /// Finished with a persisted concept.
    Completed,
    /// Finished without a result.
    Failed,
    /// Withdrawn by the requester.
    Canceled,
}

impl TaskStatus {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }

    /// Returns `true` when no further transition is permitted.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    /// Returns `true` when moving from `self` to `next` is a permitted
    /// forward transition.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (
                Self::Pending,
                Self::Processing | Self::Failed | Self::Canceled
            ) | (
                Self::Processing,
                Self::Completed | Self::Failed | Self::Canceled
            )
        )
    }
}

impl TryFrom<&str> for TaskStatus {
    type Error = ParseTaskStatusError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "canceled" | "cancelled" => Ok(Self::Canceled),
            _ => Err(ParseTaskStatusError(value.to_owned())),
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Discriminator selecting which processor variant runs a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    /// Produce a brand new concept from text descriptions.
    ConceptGeneration,
    /// Produce a new concept by refining an existing base image.
    ConceptRefinement,
}

impl TaskKind {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ConceptGeneration => "concept_generation",
            Self::ConceptRefinement => "concept_refinement",
        }
    }
}

impl TryFrom<&str> for TaskKind {
    type Error = ParseTaskKindError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value.trim() {
            "concept_generation" => Ok(Self::ConceptGeneration),
            "concept_refinement" => Ok(Self::ConceptRefinement),
            _ => Err(ParseTaskKindError(value.to_owned())),
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Text parameters for a fresh concept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerationParams {
    /// Description of the logo to draw.
    pub logo_description: String,
    /// Description of the color theme used to derive palettes.
    pub theme_description: String,
    /// Number of palettes requested; the worker default applies when absent.
    #[serde(default)]
    pub palette_count: Option<u32>,
}

impl GenerationParams {
    /// Creates validated generation parameters.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationDomainError::EmptyLogoDescription`] when the logo
    /// description is blank.
    pub fn new(
        logo_description: impl Into<String>,
        theme_description: impl Into<String>,
    ) -> Result<Self, GenerationDomainError> {
        let params = Self {
            logo_description: logo_description.into(),
            theme_description: theme_description.into(),
            palette_count: None,
        };
        params.validate()?;
        Ok(params)
    }

    /// Overrides the number of palettes requested.
    #[must_use]
    pub const fn with_palette_count(mut self, count: u32) -> Self {
        self.palette_count = Some(count);
        self
    }

    fn validate(&self) -> Result<(), GenerationDomainError> {
        if self.logo_description.trim().is_empty() {
            return Err(GenerationDomainError::EmptyLogoDescription);
        }
        if self.palette_count == Some(0) {
            return Err(GenerationDomainError::ZeroPaletteCount);
        }
        Ok(())
    }
}

/// Parameters for refining an existing base image into a new concept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefinementParams {
    /// Image being refined.
    pub source_image: ImageRef,
    /// Instructions describing the change.
    pub refinement_prompt: String,
    /// Logo description carried onto the new concept.
    pub logo_description: String,
    /// Theme description used to derive palettes.
    pub theme_description: String,
    /// Aspects of the source image that must be kept.
    #[serde(default)]
    pub preserve_aspects: Vec<String>,
    /// Number of palettes requested; the worker default applies when absent.
    #[serde(default)]
    pub palette_count: Option<u32>,
}

impl RefinementParams {
    /// Creates validated refinement parameters.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationDomainError`] when the prompt or logo description
    /// is blank.
    pub fn new(
        source_image: ImageRef,
        refinement_prompt: impl Into<String>,
        logo_description: impl Into<String>,
        theme_description: impl Into<String>,
    ) -> Result<Self, GenerationDomainError> {
        let params = Self {
            source_image,
            refinement_prompt: refinement_prompt.into(),
            logo_description: logo_description.into(),
            theme_description: theme_description.into(),
            preserve_aspects: Vec::new(),
            palette_count: None,
        };
        params.validate()?;
        Ok(params)
    }

    /// Sets the aspects that must survive the refinement.
    #[must_use]
    pub fn with_preserve_aspects(mut self, aspects: impl IntoIterator<Item = String>) -> Self {
        self.preserve_aspects = aspects.into_iter().collect();
        self
    }

    /// Overrides the number of palettes requested.
    #[must_use]
    pub const fn with_palette_count(mut self, count: u32) -> Self {
        self.palette_count = Some(count);
        self
    }

    fn validate(&self) -> Result<(), GenerationDomainError> {
        if self.refinement_prompt.trim().is_empty() {
            return Err(GenerationDomainError::EmptyRefinementPrompt);
        }
        if self.logo_description.trim().is_empty() {
            return Err(GenerationDomainError::EmptyLogoDescription);
        }
        if self.palette_count == Some(0) {
            return Err(GenerationDomainError::ZeroPaletteCount);
        }
        Ok(())
    }
}

/// Opaque generation parameters carried by a task, tagged by kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TaskPayload {
    /// Parameters for [`TaskKind::ConceptGeneration`].
    ConceptGeneration(GenerationParams),
    /// Parameters for [`TaskKind::ConceptRefinement`].
    ConceptRefinement(RefinementParams),
}

impl TaskPayload {
    /// Returns the task kind this payload belongs to.
    #[must_use]
    pub const fn kind(&self) -> TaskKind {
        match self {
            Self::ConceptGeneration(_) => TaskKind::ConceptGeneration,
            Self::ConceptRefinement(_) => TaskKind::ConceptRefinement,
        }
    }

    /// Validates the payload contents.
    ///
    /// Payloads read back from storage bypass the constructors, so processors
    /// re-run this before doing any work.
    ///
    /// # Errors
    ///
    /// Returns the first [`GenerationDomainError`] found.
    pub fn validate(&self) -> Result<(), GenerationDomainError> {
        match self {
            Self::ConceptGeneration(params) => params.validate(),
            Self::ConceptRefinement(params) => params.validate(),
        }
    }

    /// Returns the logo description shared by both variants.
    #[must_use]
    pub fn logo_description(&self) -> &str {
        match self {
            Self::ConceptGeneration(params) => &params.logo_description,
            Self::ConceptRefinement(params) => &params.logo_description,
        }
    }

    /// Returns the theme description shared by both variants.
    #[must_use]
    pub fn theme_description(&self) -> &str {
        match self {
            Self::ConceptGeneration(params) => &params.theme_description,
            Self::ConceptRefinement(params) => &params.theme_description,
        }
    }

    /// Returns the requested palette count, if any.
    #[must_use]
    pub const fn palette_count(&self) -> Option<u32> {
        match self {
            Self::ConceptGeneration(params) => params.palette_count,
            Self::ConceptRefinement(params) => params.palette_count,
        }
    }
}

/// Task aggregate root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    owner_id: OwnerId,
    status: TaskStatus,
    payload: TaskPayload,
    result_id: Option<ConceptId>,
    error_message: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Parameter object for reconstructing a persisted task aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedTaskData {
    /// Persisted task identifier.
    pub id: TaskId,
    /// Persisted requesting principal.
    pub owner_id: OwnerId,
    /// Persisted lifecycle status.
    pub status: TaskStatus,
    /// Persisted generation parameters.
    pub payload: TaskPayload,
    /// Persisted result concept, if completed.
    pub result_id: Option<ConceptId>,
    /// Persisted failure cause, if failed.
    pub error_message: Option<String>,
    /// Persisted creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Persisted latest lifecycle timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Creates a new pending task.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationDomainError`] when the payload is invalid.
    pub fn new(
        owner_id: OwnerId,
        payload: TaskPayload,
        clock: &impl Clock,
    ) -> Result<Self, GenerationDomainError> {
        payload.validate()?;
        let timestamp = clock.utc();
        Ok(Self {
            id: TaskId::new(),
            owner_id,
            status: TaskStatus::Pending,
            payload,
            result_id: None,
            error_message: None,
            created_at: timestamp,
            updated_at: timestamp,
        })
    }

    /// Reconstructs a task from persisted storage.
    #[must_use]
    pub fn from_persisted(data: PersistedTaskData) -> Self {
        Self {
            id: data.id,
            owner_id: data.owner_id,
            status: data.status,
            payload: data.payload,
            result_id: data.result_id,
            error_message: data.error_message,
            created_at: data.created_at,
            updated_at: data.updated_at,
        }
    }

    /// Returns the task identifier.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Returns the task kind.
    #[must_use]
    pub const fn kind(&self) -> TaskKind {
        self.payload.kind()
    }

    /// Returns the requesting principal.
    #[must_use]
    pub const fn owner_id(&self) -> OwnerId {
        self.owner_id
    }

    /// Returns the lifecycle status.
    #[must_use]
    pub const fn status(&self) -> TaskStatus {
        self.status
    }

    /// Returns the generation parameters.
    #[must_use]
    pub const fn payload(&self) -> &TaskPayload {
        &self.payload
    }

    /// Returns the produced concept, set only once completed.
    #[must_use]
    pub const fn result_id(&self) -> Option<ConceptId> {
        self.result_id
    }

    /// Returns the failure cause, set only once failed.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the latest lifecycle timestamp.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Moves a pending task into processing.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationDomainError::InvalidStatusTransition`] unless the
    /// task is pending.
    pub fn claim(&mut self, now: DateTime<Utc>) -> Result<(), GenerationDomainError> {
        self.transition_to(TaskStatus::Processing, now)
    }

    /// Marks a processing task completed with its concept.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationDomainError::InvalidStatusTransition`] unless the
    /// task is processing.
    pub fn complete(
        &mut self,
        concept_id: ConceptId,
        now: DateTime<Utc>,
    ) -> Result<(), GenerationDomainError> {
        self.transition_to(TaskStatus::Completed, now)?;
        self.result_id = Some(concept_id);
        Ok(())
    }

    /// Marks a non-terminal task failed with a sanitized cause.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationDomainError::InvalidStatusTransition`] when the
    /// task is already terminal.
    pub fn fail(&mut self, message: &str, now: DateTime<Utc>) -> Result<(), GenerationDomainError> {
        self.transition_to(TaskStatus::Failed, now)?;
        self.error_message = Some(sanitize_error_message(message));
        Ok(())
    }

    /// Refreshes `updated_at` on a processing task.
    ///
    /// Returns `false` without touching anything when the task is not
    /// processing.
    pub fn touch(&mut self, now: DateTime<Utc>) -> bool {
        if self.status != TaskStatus::Processing {
            return false;
        }
        self.updated_at = now;
        true
    }

    /// Returns the timestamp staleness is measured from for the current
    /// status: `created_at` while pending, `updated_at` while processing.
    #[must_use]
    pub const fn staleness_basis(&self) -> Option<DateTime<Utc>> {
        match self.status {
            TaskStatus::Pending => Some(self.created_at),
            TaskStatus::Processing => Some(self.updated_at),
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Canceled => None,
        }
    }

    /// Applies a validated status transition.
    ///
    /// # Errors
    ///
    /// Returns [`GenerationDomainError::InvalidStatusTransition`] when the
    /// transition is not permitted by [`TaskStatus::can_transition_to`].
    pub fn transition_to(
        &mut self,
        next: TaskStatus,
        now: DateTime<Utc>,
    ) -> Result<(), GenerationDomainError> {
        if !self.status.can_transition_to(next) {
            return Err(GenerationDomainError::InvalidStatusTransition {
                task_id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        self.updated_at = now;
        Ok(())
    }
}

/// Produces the short cause string stored in `error_message`.
///
/// Collapses whitespace runs and truncates to [`MAX_ERROR_MESSAGE_CHARS`]
/// characters.
#[must_use]
pub fn sanitize_error_message(raw: &str) -> String {
    let collapsed = raw.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        return "unknown error".to_owned();
    }
    if collapsed.chars().count() <= MAX_ERROR_MESSAGE_CHARS {
        return collapsed;
    }
    let mut truncated: String = collapsed.chars().take(MAX_ERROR_MESSAGE_CHARS - 3).collect();
    truncated.push_str("...");
    truncated
}
