//! In-process storage for tests

use super::StorageBackend;
use crate::error::{DeployError, DeployResult};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Default)]
struct Inner {
    objects: HashMap<String, Vec<u8>>,
    uploads: usize,
    transient_failures: u32,
    failing_names: Vec<(String, bool)>,
}

/// Keeps uploaded objects in a map
///
/// URIs are derived from content, so re-uploading identical bytes yields the
/// same link.
#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Successful uploads so far
    pub fn upload_count(&self) -> usize {
        self.lock().uploads
    }

    /// Bytes stored under `uri`
    pub fn object(&self, uri: &str) -> Option<Vec<u8>> {
        self.lock().objects.get(uri).cloned()
    }

    /// Fail the next `n` uploads with a retryable error
    pub fn fail_next_uploads(&self, n: u32) {
        self.lock().transient_failures = n;
    }

    /// Fail every upload of `file_name`
    pub fn fail_file(&self, file_name: impl Into<String>, permanent: bool) {
        self.lock().failing_names.push((file_name.into(), permanent));
    }

    pub fn clear_failures(&self) {
        let mut inner = self.lock();
        inner.transient_failures = 0;
        inner.failing_names.clear();
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn upload(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> DeployResult<String> {
        let mut inner = self.lock();
        if let Some((_, permanent)) = inner.failing_names.iter().find(|(n, _)| n == file_name) {
            return Err(DeployError::storage(
                "memory",
                format!("upload of {} refused", file_name),
                *permanent,
            ));
        }
        if inner.transient_failures > 0 {
            inner.transient_failures -= 1;
            return Err(DeployError::storage("memory", "service unavailable", false));
        }

        let uri = format!("memory://objects/{}", &hex::encode(Sha256::digest(&bytes))[..16]);
        inner.objects.insert(uri.clone(), bytes);
        inner.uploads += 1;
        Ok(uri)
    }

    fn name(&self) -> &str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn uploads_are_counted_and_addressable() {
        let storage = MemoryStorage::new();
        let uri = storage
            .upload("0.json", b"{}".to_vec(), "application/json")
            .await
            .unwrap();

        assert!(uri.starts_with("memory://objects/"));
        assert_eq!(storage.object(&uri).unwrap(), b"{}");
        assert_eq!(storage.upload_count(), 1);
    }

    #[tokio::test]
    async fn injected_failures() {
        let storage = MemoryStorage::new();
        storage.fail_next_uploads(1);
        let err = storage.upload("a", vec![1], "x").await.unwrap_err();
        assert!(err.is_retryable());
        assert!(storage.upload("a", vec![1], "x").await.is_ok());

        storage.fail_file("b", true);
        let err = storage.upload("b", vec![2], "x").await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
