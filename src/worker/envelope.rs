//! Inbound queue envelope.

use crate::generation::domain::{OwnerId, TaskId, TaskKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Reference to one task, as delivered by the queue.
///
/// Only identifies the task; generation parameters are always re-read from
/// the task store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Task to run.
    pub task_id: TaskId,
    /// Kind announced by the producer.
    pub task_type: TaskKind,
    /// Requesting principal.
    pub owner_id: OwnerId,
}

/// Error returned for envelopes that cannot be decoded.
#[derive(Debug, Error)]
#[error("malformed inbound message: {0}")]
pub struct EnvelopeError(#[from] serde_json::Error);

impl InboundMessage {
    /// Builds the envelope for `task_id`.
    #[must_use]
    pub const fn new(task_id: TaskId, task_type: TaskKind, owner_id: OwnerId) -> Self {
        Self {
            task_id,
            task_type,
            owner_id,
        }
    }

    /// Decodes a JSON envelope.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError`] when the body is not a valid envelope.
    pub fn decode(body: &[u8]) -> Result<Self, EnvelopeError> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Encodes the envelope as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`EnvelopeError`] when serialization fails.
    pub fn encode(&self) -> Result<Vec<u8>, EnvelopeError> {
        Ok(serde_json::to_vec(self)?)
    }
}
