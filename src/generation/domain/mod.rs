//! Domain model for generation tasks and their artifacts.
//!
//! The domain covers the task lifecycle state machine and the concept and
//! variation records a successful run produces. Infrastructure concerns stay
//! outside this boundary.

mod concept;
mod error;
mod ids;
mod task;

pub use concept::{
    Concept, ConceptBatch, ConceptParams, HexColor, ImageBytes, ImageRef, ObjectPath, PaletteSpec,
    Variation,
};
pub use error::{GenerationDomainError, ParseTaskKindError, ParseTaskStatusError};
pub use ids::{ConceptId, OwnerId, TaskId, VariationId};
pub use task::{
    GenerationParams, MAX_ERROR_MESSAGE_CHARS, PersistedTaskData, RefinementParams, Task,
    TaskKind, TaskPayload, TaskStatus, sanitize_error_message,
};
