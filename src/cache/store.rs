//! Cache persistence
//!
//! Each save writes the full snapshot to a temporary file next to the target
//! and renames it into place, so a crash mid-save leaves the previous
//! snapshot intact.

use crate::cache::model::Cache;
use crate::error::{DeployError, DeployResult};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

/// Directory of cache files named `<env>-<name>`
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the cache file for `(name, env)`
    pub fn path(&self, name: &str, env: &str) -> PathBuf {
        self.dir.join(format!("{}-{}", env, name))
    }

    /// Bind the store to one cache file
    pub fn file(&self, name: &str, env: &str) -> CacheFile {
        CacheFile {
            path: self.path(name, env),
            name: name.to_string(),
            env: env.to_string(),
        }
    }

    /// Load a cache; fails with `CacheNotFound` if none exists
    pub async fn load(&self, name: &str, env: &str) -> DeployResult<Cache> {
        self.file(name, env).load().await
    }

    /// Load a cache, or start an empty one
    pub async fn load_or_default(&self, name: &str, env: &str) -> DeployResult<Cache> {
        self.file(name, env).load_or_default().await
    }

    /// Persist the complete snapshot
    pub async fn save(&self, name: &str, env: &str, cache: &Cache) -> DeployResult<()> {
        self.file(name, env).save(cache).await
    }
}

/// One cache file, as used by the pipelines
#[derive(Debug, Clone)]
pub struct CacheFile {
    path: PathBuf,
    name: String,
    env: String,
}

impl CacheFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Cluster environment the cache belongs to
    pub fn env(&self) -> &str {
        &self.env
    }

    pub async fn load(&self) -> DeployResult<Cache> {
        let content = match fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(DeployError::CacheNotFound {
                    name: self.name.clone(),
                    env: self.env.clone(),
                });
            }
            Err(e) => {
                return Err(DeployError::io(
                    format!("reading cache file {}", self.path.display()),
                    e,
                ))
            }
        };

        let cache: Cache = serde_json::from_str(&content)?;
        debug!(
            "Loaded cache {} with {} items",
            self.path.display(),
            cache.items.len()
        );
        Ok(cache)
    }

    pub async fn load_or_default(&self) -> DeployResult<Cache> {
        match self.load().await {
            Err(DeployError::CacheNotFound { .. }) => {
                debug!("No cache at {}, starting fresh", self.path.display());
                Ok(Cache::default())
            }
            other => other,
        }
    }

    pub async fn save(&self, cache: &Cache) -> DeployResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| DeployError::io(format!("creating cache directory {}", parent.display()), e))?;
        }

        let content = serde_json::to_string_pretty(cache)?;
        let tmp = self.tmp_path();

        let written = write_synced(&tmp, content.as_bytes()).await;
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp).await;
            return Err(DeployError::io(
                format!("writing cache file {}", tmp.display()),
                e,
            ));
        }

        fs::rename(&tmp, &self.path).await.map_err(|e| {
            DeployError::io(format!("replacing cache file {}", self.path.display()), e)
        })?;

        debug!("Saved cache {} ({} items)", self.path.display(), cache.items.len());
        Ok(())
    }

    fn tmp_path(&self) -> PathBuf {
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.path
            .with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4().simple()))
    }
}

async fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = fs::File::create(path).await?;
    file.write_all(bytes).await?;
    file.sync_all().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_cache() -> Cache {
        let mut cache = Cache::default();
        cache.program.uuid = "Abc123".into();
        let item = cache.item_mut(0);
        item.link = "https://arweave.net/0".into();
        item.name = "Item #0".into();
        item.on_chain = true;
        cache
    }

    #[tokio::test]
    async fn missing_cache_is_not_found() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::new(temp.path());

        let err = store.load("temp", "devnet").await.unwrap_err();
        assert!(matches!(err, DeployError::CacheNotFound { .. }));

        let fresh = store.load_or_default("temp", "devnet").await.unwrap();
        assert!(fresh.items.is_empty());
    }

    #[tokio::test]
    async fn save_and_load_roundtrip() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::new(temp.path().join(".cache"));
        let cache = sample_cache();

        store.save("temp", "devnet", &cache).await.unwrap();
        let loaded = store.load("temp", "devnet").await.unwrap();

        assert_eq!(loaded, cache);
        assert!(temp.path().join(".cache").join("devnet-temp").exists());
    }

    #[tokio::test]
    async fn environments_are_separate() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::new(temp.path());

        store.save("temp", "devnet", &sample_cache()).await.unwrap();
        let err = store.load("temp", "mainnet-beta").await.unwrap_err();
        assert!(matches!(err, DeployError::CacheNotFound { .. }));
    }

    #[tokio::test]
    async fn save_leaves_no_temp_files() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::new(temp.path());

        store.save("temp", "devnet", &sample_cache()).await.unwrap();
        store.save("temp", "devnet", &Cache::default()).await.unwrap();

        let names: Vec<String> = std::fs::read_dir(temp.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["devnet-temp".to_string()]);
        assert!(store.load("temp", "devnet").await.unwrap().items.is_empty());
    }

    #[tokio::test]
    async fn corrupt_cache_is_an_error() {
        let temp = TempDir::new().unwrap();
        let store = CacheStore::new(temp.path());
        std::fs::write(store.path("temp", "devnet"), "{ not json").unwrap();

        let err = store.load_or_default("temp", "devnet").await.unwrap_err();
        assert!(matches!(err, DeployError::Json(_)));
    }
}
