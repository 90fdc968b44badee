//! Local filesystem storage backend
//!
//! Stores objects as files directly under a root directory, mirroring the
//! flat key space of the object store. Writes are atomic (temp file + rename).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};
use tuner_core::config::default_batch_concurrency;
use tuner_core::{Error, Result};
use uuid::Uuid;

use crate::key::object_key;
use crate::listing::{FileGrouper, GlobPattern};
use crate::{FileGroup, StorageBackend};

/// Local filesystem storage backend
///
/// Keys are normalized to their basename, so every object lives directly in
/// `root`. Glob listings still walk nested directories, which lets the backend
/// group files that were placed there by other tools.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    /// Directory holding all objects
    root: PathBuf,

    /// Concurrency limit for batch writes
    batch_concurrency: usize,
}

impl LocalStorage {
    /// Create a new LocalStorage rooted at `root`
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            batch_concurrency: default_batch_concurrency(),
        }
    }

    /// Override the batch-write concurrency limit
    pub fn with_batch_concurrency(mut self, limit: usize) -> Self {
        self.batch_concurrency = limit.max(1);
        self
    }

    /// Get the root directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a key to the file holding it
    fn object_path(&self, path: &str) -> Result<PathBuf> {
        Ok(self.root.join(object_key(path)?))
    }

    /// Generate a unique temporary file path next to `target`
    fn temp_path(target: &Path) -> PathBuf {
        let temp_name = format!(
            ".{}.{}.tmp",
            target.file_name().unwrap_or_default().to_string_lossy(),
            Uuid::new_v4()
        );
        target.with_file_name(temp_name)
    }

    /// Write `data` to `temp_path`, flush it, then move it over `target`
    async fn persist(temp_path: &Path, target: &Path, data: &[u8]) -> Result<()> {
        let mut file = fs::File::create(temp_path)
            .await
            .map_err(|e| Error::Storage {
                message: format!("Failed to create temp file {:?}: {}", temp_path, e),
            })?;

        file.write_all(data).await.map_err(|e| Error::Storage {
            message: format!("Failed to write data: {}", e),
        })?;

        file.sync_all().await.map_err(|e| Error::Storage {
            message: format!("Failed to sync file: {}", e),
        })?;
        drop(file);

        fs::rename(temp_path, target)
            .await
            .map_err(|e| Error::Storage {
                message: format!("Failed to rename {:?} to {:?}: {}", temp_path, target, e),
            })
    }

    /// Every regular file under the root as a `/`-joined relative path
    async fn walk(&self) -> Vec<String> {
        let mut results = Vec::new();
        let mut stack = vec![self.root.clone()];

        while let Some(dir) = stack.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(_) => continue,
            };

            while let Ok(Some(entry)) = entries.next_entry().await {
                let entry_path = entry.path();
                let metadata = match entry.metadata().await {
                    Ok(m) => m,
                    Err(_) => continue,
                };

                if metadata.is_dir() {
                    stack.push(entry_path);
                } else if metadata.is_file() {
                    if let Ok(relative) = entry_path.strip_prefix(&self.root) {
                        let key = relative
                            .components()
                            .map(|c| c.as_os_str().to_string_lossy())
                            .collect::<Vec<_>>()
                            .join("/");
                        if !is_temp_name(&key) {
                            results.push(key);
                        }
                    }
                }
            }
        }

        results.sort();
        results
    }
}

/// In-flight atomic writes are hidden from listings
fn is_temp_name(key: &str) -> bool {
    let name = key.rsplit('/').next().unwrap_or(key);
    name.starts_with('.') && name.ends_with(".tmp")
}

#[async_trait]
impl StorageBackend for LocalStorage {
    #[instrument(skip(self), fields(backend = "local"))]
    async fn read(&self, key: &str) -> Result<Bytes> {
        let full_path = self.object_path(key)?;
        debug!(?full_path, "Reading object");

        match fs::read(&full_path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(Error::StoragePathNotFound {
                path: key.to_string(),
            }),
            Err(e) => Err(Error::Storage {
                message: format!("Failed to read {}: {}", key, e),
            }),
        }
    }

    #[instrument(skip(self, data), fields(backend = "local", size = data.len()))]
    async fn write(&self, key: &str, data: Bytes) -> Result<u64> {
        let full_path = self.object_path(key)?;
        let temp_path = Self::temp_path(&full_path);
        let size = data.len() as u64;

        debug!(?full_path, size, "Writing object atomically");

        fs::create_dir_all(&self.root)
            .await
            .map_err(|e| Error::Storage {
                message: format!("Failed to create directory {:?}: {}", self.root, e),
            })?;

        if let Err(e) = Self::persist(&temp_path, &full_path, &data).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(e);
        }

        Ok(size)
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn delete(&self, key: &str) -> Result<()> {
        let full_path = self.object_path(key)?;
        debug!(?full_path, "Deleting object");

        match fs::remove_file(&full_path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(?full_path, "Object already absent");
                Ok(())
            }
            Err(e) => Err(Error::Storage {
                message: format!("Failed to delete {}: {}", key, e),
            }),
        }
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn exists(&self, key: &str) -> bool {
        match self.object_path(key) {
            Ok(path) => fs::metadata(&path).await.map(|m| m.is_file()).unwrap_or(false),
            Err(_) => false,
        }
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>> {
        let mut results = Vec::new();
        let mut entries = match fs::read_dir(&self.root).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(results),
            Err(e) => {
                return Err(Error::Storage {
                    message: format!("Failed to list {:?}: {}", self.root, e),
                })
            }
        };

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let is_file = entry.metadata().await.map(|m| m.is_file()).unwrap_or(false);
            if is_file && name.starts_with(prefix) && !is_temp_name(&name) {
                results.push(name);
            }
        }

        results.sort();
        debug!(count = results.len(), "Found objects");
        Ok(results)
    }

    #[instrument(skip(self), fields(backend = "local"))]
    async fn list_files(&self, pattern: &str) -> Result<Vec<FileGroup>> {
        let mut grouper = FileGrouper::new(GlobPattern::new(pattern)?);
        for key in self.walk().await {
            grouper.push(&key);
        }
        debug!(matched = grouper.matched(), "Glob listing finished");
        Ok(grouper.finish())
    }

    fn batch_concurrency(&self) -> usize {
        self.batch_concurrency
    }
}
