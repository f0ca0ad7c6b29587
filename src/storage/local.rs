//! Content-addressed storage in a local directory

use super::StorageBackend;
use crate::error::{DeployError, DeployResult};
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::debug;
use uuid::Uuid;

/// Writes each object as `<sha256 prefix>.<ext>` under a directory
///
/// Identical bytes map to the same file, so re-uploading is harmless.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    dir: PathBuf,
}

impl LocalStorage {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn object_path(&self, file_name: &str, bytes: &[u8]) -> PathBuf {
        let digest = hex::encode(Sha256::digest(bytes));
        let object = match Path::new(file_name).extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{}.{}", &digest[..16], ext.to_ascii_lowercase()),
            None => digest[..16].to_string(),
        };
        self.dir.join(object)
    }
}

#[async_trait]
impl StorageBackend for LocalStorage {
    async fn upload(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        _content_type: &str,
    ) -> DeployResult<String> {
        fs::create_dir_all(&self.dir).await.map_err(|e| {
            DeployError::storage(
                self.name(),
                format!("creating {}: {}", self.dir.display(), e),
                true,
            )
        })?;

        let target = self.object_path(file_name, &bytes);
        if fs::try_exists(&target).await.unwrap_or(false) {
            debug!("{} already stored at {}", file_name, target.display());
            return Ok(file_uri(&target));
        }

        let tmp = self.dir.join(format!(".upload.{}.tmp", Uuid::new_v4()));
        if let Err(e) = fs::write(&tmp, &bytes).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(DeployError::storage(
                self.name(),
                format!("writing {}: {}", tmp.display(), e),
                false,
            ));
        }
        fs::rename(&tmp, &target).await.map_err(|e| {
            DeployError::storage(
                self.name(),
                format!("storing {}: {}", target.display(), e),
                false,
            )
        })?;

        debug!("Stored {} ({} bytes) at {}", file_name, bytes.len(), target.display());
        Ok(file_uri(&target))
    }

    fn name(&self) -> &str {
        "local"
    }
}

fn file_uri(path: &Path) -> String {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    format!("file://{}", absolute.display())
}
