//! Off-chain asset storage
//!
//! Uploading returns the URI the asset is reachable at. Only the backends
//! that need no third-party account ship here; hosted services plug in
//! through [`StorageBackend`].

mod local;
mod memory;

pub use local::LocalStorage;
pub use memory::MemoryStorage;

use crate::config::deployment::StorageConfig;
use crate::error::{DeployError, DeployResult};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// Destination for images and descriptors
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Store `bytes` and return their public URI.
    ///
    /// Failures are `DeployError::Storage`; `permanent: false` marks the
    /// ones worth retrying.
    async fn upload(&self, file_name: &str, bytes: Vec<u8>, content_type: &str)
        -> DeployResult<String>;

    /// Backend name for logs and errors
    fn name(&self) -> &str;
}

/// Backend for a deployment's storage selection
///
/// Hosted services are not built in; selecting one is a configuration error
/// unless the caller supplies its own [`StorageBackend`].
pub fn for_config(config: &StorageConfig) -> DeployResult<Arc<dyn StorageBackend>> {
    match config {
        StorageConfig::Local { dir } => Ok(Arc::new(LocalStorage::new(dir.clone()))),
        other => Err(DeployError::config(format!(
            "no built-in client for {} storage; supply a StorageBackend for it",
            other
        ))),
    }
}

/// MIME type for an asset file, by extension
pub fn content_type_for(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase);
    match extension.as_deref() {
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}
