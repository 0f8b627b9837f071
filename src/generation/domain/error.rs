//! Error types for generation domain validation and parsing.

use super::{TaskId, TaskKind, TaskStatus};
use thiserror::Error;

/// Errors returned while constructing or mutating generation domain values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationDomainError {
    /// The logo description is empty after trimming.
    #[error("logo description must not be empty")]
    EmptyLogoDescription,

    /// The refinement prompt is empty after trimming.
    #[error("refinement prompt must not be empty")]
    EmptyRefinementPrompt,

    /// A palette request asked for zero palettes.
    #[error("palette count must be positive")]
    ZeroPaletteCount,

    /// A color value is not a `#RRGGBB` hex string.
    #[error("invalid hex color '{0}', expected #RRGGBB")]
    InvalidHexColor(String),

    /// A palette has no colors.
    #[error("palette '{0}' must contain at least one color")]
    EmptyPalette(String),

    /// The payload variant does not belong to the task kind.
    #[error("payload for {payload} cannot be attached to a {kind} task")]
    PayloadKindMismatch {
        /// Kind declared by the task record.
        kind: TaskKind,
        /// Kind implied by the payload variant.
        payload: TaskKind,
    },

    /// The requested lifecycle transition is not permitted.
    #[error("task {task_id} cannot transition from {from} to {to}")]
    InvalidStatusTransition {
        /// Task being transitioned.
        task_id: TaskId,
        /// Current status.
        from: TaskStatus,
        /// Requested status.
        to: TaskStatus,
    },

    /// An object path segment is empty or contains a separator.
    #[error("invalid object path segment '{0}'")]
    InvalidPathSegment(String),
}

/// Error returned while parsing task statuses from persistence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown task status: {0}")]
pub struct ParseTaskStatusError(pub String);

/// Error returned while parsing task kinds from persistence or envelopes.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown task type: {0}")]
pub struct ParseTaskKindError(pub String);
