//! Generation client port for the external image generation service.

use crate::generation::domain::{ImageBytes, ImageRef, PaletteSpec};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type for generation client calls.
pub type GenerationResult<T> = Result<T, GenerationError>;

/// Request for a fresh base image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseImageRequest {
    /// Logo description.
    pub logo_description: String,
    /// Theme description, used as styling context.
    pub theme_description: String,
}

/// Request for a refined base image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefineImageRequest {
    /// Image being refined.
    pub source_image: ImageRef,
    /// Change instructions.
    pub refinement_prompt: String,
    /// Logo description, used as context.
    pub logo_description: String,
    /// Aspects that must survive the refinement.
    pub preserve_aspects: Vec<String>,
}

/// Contract of the external image generation service.
///
/// Calls may be slow and may fail; none are transactional with the task
/// store.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Produces the base image for a concept.
    async fn generate_base(&self, request: &BaseImageRequest) -> GenerationResult<ImageBytes>;

    /// Produces a refined base image from an existing one.
    async fn refine_base(&self, request: &RefineImageRequest) -> GenerationResult<ImageBytes>;

    /// Proposes `count` palettes for a theme.
    async fn generate_palettes(&self, theme: &str, count: u32)
    -> GenerationResult<Vec<PaletteSpec>>;

    /// Recolors `base_image` with `palette`.
    async fn render_variation(
        &self,
        base_image: &ImageBytes,
        palette: &PaletteSpec,
    ) -> GenerationResult<ImageBytes>;
}

/// Errors returned by generation clients.
#[derive(Debug, Clone, Error)]
pub enum GenerationError {
    /// The service reported a failure; the message is kept verbatim.
    #[error("{0}")]
    Upstream(String),

    /// The service answered with something unusable.
    #[error("invalid generation response: {0}")]
    InvalidResponse(String),

    /// The call exceeded its deadline.
    #[error("generation call timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// Transport-level failure.
    #[error("generation transport error: {0}")]
    Transport(Arc<dyn std::error::Error + Send + Sync>),
}

impl GenerationError {
    /// Wraps a human-readable upstream failure.
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream(message.into())
    }

    /// Wraps a transport error.
    pub fn transport(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Transport(Arc::new(err))
    }
}
