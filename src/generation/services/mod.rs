//! Application services for claiming, processing and reaping generation
//! tasks.

mod claimer;
mod deadline;
mod processor;
mod reaper;
mod variations;

pub use claimer::{ClaimResult, TaskClaimer};
pub use processor::{
    BaseImageSource, ConceptPipeline, GenerationTaskProcessor, ProcessError, ProcessOutcome,
    ProcessorDeps, RefinementTaskProcessor, StageError, TaskProcessor,
};
pub use reaper::{
    PENDING_TIMEOUT_MESSAGE, PROCESSING_TIMEOUT_MESSAGE, ReapError, ReapReport, StuckTaskReaper,
};
pub use variations::{
    PipelineSettings, VariationError, VariationFailurePolicy, VariationJob, VariationPipeline,
};
