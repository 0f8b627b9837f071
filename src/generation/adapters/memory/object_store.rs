//! In-memory object store.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::generation::{
    domain::{ImageBytes, ImageRef, ObjectPath},
    ports::{ObjectStore, ObjectStoreError, ObjectStoreResult},
};

/// Thread-safe in-memory object store keyed by bucket and path.
#[derive(Debug, Clone, Default)]
pub struct InMemoryObjectStore {
    objects: Arc<RwLock<HashMap<(String, String), ImageBytes>>>,
    rejected_fragment: Arc<RwLock<Option<String>>>,
}

impl InMemoryObjectStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects every upload whose path contains `fragment`.
    #[must_use]
    pub fn rejecting_paths_containing(self, fragment: impl Into<String>) -> Self {
        if let Ok(mut rejected) = self.rejected_fragment.write() {
            *rejected = Some(fragment.into());
        }
        self
    }

    /// Returns the stored bytes at `bucket`/`path`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectStoreError::Transport`] when the lock is poisoned.
    pub fn get(&self, bucket: &str, path: &str) -> ObjectStoreResult<Option<ImageBytes>> {
        let objects = self.objects.read().map_err(lock_error)?;
        Ok(objects.get(&(bucket.to_owned(), path.to_owned())).cloned())
    }

    /// Returns every stored path in `bucket`, sorted.
    ///
    /// # Errors
    ///
    /// Returns [`ObjectStoreError::Transport`] when the lock is poisoned.
    pub fn paths(&self, bucket: &str) -> ObjectStoreResult<Vec<String>> {
        let objects = self.objects.read().map_err(lock_error)?;
        let mut paths: Vec<String> = objects
            .keys()
            .filter(|(stored_bucket, _)| stored_bucket == bucket)
            .map(|(_, path)| path.clone())
            .collect();
        paths.sort();
        Ok(paths)
    }
}

fn lock_error<E: std::fmt::Display>(err: E) -> ObjectStoreError {
    ObjectStoreError::transport(std::io::Error::other(err.to_string()))
}

#[async_trait]
impl ObjectStore for InMemoryObjectStore {
    async fn store(
        &self,
        bucket: &str,
        path: &ObjectPath,
        bytes: ImageBytes,
    ) -> ObjectStoreResult<ImageRef> {
        let is_rejected = self
            .rejected_fragment
            .read()
            .map_err(lock_error)?
            .as_deref()
            .is_some_and(|fragment| path.as_str().contains(fragment));
        if is_rejected {
            return Err(ObjectStoreError::Rejected {
                path: path.to_string(),
                reason: "upload refused".to_owned(),
            });
        }
        let mut objects = self.objects.write().map_err(lock_error)?;
        objects.insert((bucket.to_owned(), path.as_str().to_owned()), bytes);
        Ok(ImageRef::new(
            path.as_str(),
            format!("memory://{bucket}/{path}"),
            None,
        ))
    }
}
