//! Port contracts for the generation pipeline.
//!
//! Ports define infrastructure-agnostic interfaces for the task store and the
//! two external collaborators the pipeline calls.

pub mod generation;
pub mod object_store;
pub mod task_store;

pub use generation::{
    BaseImageRequest, GenerationClient, GenerationError, GenerationResult, RefineImageRequest,
};
pub use object_store::{ObjectStore, ObjectStoreError, ObjectStoreResult};
pub use task_store::{
    ClaimConstraints, ClaimOutcome, FinalizeOutcome, TaskStore, TaskStoreError, TaskStoreResult,
};

#[cfg(test)]
pub use generation::MockGenerationClient;
#[cfg(test)]
pub use object_store::MockObjectStore;
#[cfg(test)]
pub use task_store::MockTaskStore;
