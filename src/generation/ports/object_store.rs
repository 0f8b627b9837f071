//! Object store port for uploaded images.

use crate::generation::domain::{ImageBytes, ImageRef, ObjectPath};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Result type for object store operations.
pub type ObjectStoreResult<T> = Result<T, ObjectStoreError>;

/// Binary object storage contract.
///
/// Each call writes a new, distinctly-named object.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Uploads `bytes` under `path` in `bucket` and returns an accessible
    /// reference.
    async fn store(
        &self,
        bucket: &str,
        path: &ObjectPath,
        bytes: ImageBytes,
    ) -> ObjectStoreResult<ImageRef>;
}

/// Errors returned by object store implementations.
#[derive(Debug, Clone, Error)]
pub enum ObjectStoreError {
    /// The store refused the upload.
    #[error("upload of {path} rejected: {reason}")]
    Rejected {
        /// Target object path.
        path: String,
        /// Reason reported by the store.
        reason: String,
    },

    /// The upload exceeded its deadline.
    #[error("object store call timed out after {}s", .0.as_secs())]
    Timeout(Duration),

    /// Transport-level failure.
    #[error("object store transport error: {0}")]
    Transport(Arc<dyn std::error::Error + Send + Sync>),
}

impl ObjectStoreError {
    /// Wraps a transport error.
    pub fn transport(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Transport(Arc::new(err))
    }
}
