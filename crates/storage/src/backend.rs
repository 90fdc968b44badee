//! Storage backend trait definition
//!
//! Defines the async interface that all storage backends must implement.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, StreamExt};
use tracing::{debug, warn};
use tuner_core::config::default_batch_concurrency;
use tuner_core::{Error, Result};

use crate::{FileGroup, Payload};

/// Outcome of a batch write
///
/// Items are written independently; one failure never stops the others and
/// nothing is rolled back.
#[derive(Debug, Default)]
pub struct BatchWriteReport {
    /// Keys written successfully, in completion order
    pub written: Vec<String>,

    /// Keys that failed, with the error of their single attempt
    pub failed: Vec<(String, Error)>,
}

impl BatchWriteReport {
    /// True when every item was written
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Async trait for flat-key object stores
///
/// Every key argument is a path-like string; backends reduce it to its final
/// `/` segment before use, so directory structure is never preserved.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Read the object stored under `key`
    ///
    /// # Errors
    /// `StoragePathNotFound` if absent, `Storage` for any other failure
    async fn read(&self, key: &str) -> Result<Bytes>;

    /// Store `data` under `key`, replacing any previous object
    ///
    /// # Returns
    /// Number of bytes written
    async fn write(&self, key: &str, data: Bytes) -> Result<u64>;

    /// Delete the object stored under `key`
    ///
    /// Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Check whether `key` exists
    ///
    /// Any failure, transient or not, is reported as `false`.
    async fn exists(&self, key: &str) -> bool;

    /// List every key starting with `prefix`
    async fn list_by_prefix(&self, prefix: &str) -> Result<Vec<String>>;

    /// List keys matching a shell-glob pattern, grouped by key prefix
    async fn list_files(&self, pattern: &str) -> Result<Vec<FileGroup>>;

    /// Maximum number of writes a batch keeps in flight
    fn batch_concurrency(&self) -> usize {
        default_batch_concurrency()
    }

    /// Write parallel sequences of keys and payloads concurrently
    ///
    /// Text payloads are UTF-8 encoded. At most [`batch_concurrency`] writes
    /// are in flight at once.
    ///
    /// [`batch_concurrency`]: StorageBackend::batch_concurrency
    async fn write_batch(
        &self,
        keys: Vec<String>,
        payloads: Vec<Payload>,
    ) -> Result<BatchWriteReport> {
        if keys.len() != payloads.len() {
            return Err(Error::InvalidArgument {
                message: format!(
                    "batch write got {} keys but {} payloads",
                    keys.len(),
                    payloads.len()
                ),
            });
        }

        let limit = self.batch_concurrency().max(1);
        let total = keys.len();
        debug!(total, limit, "Starting batch write");

        let results: Vec<(String, Result<u64>)> = stream::iter(keys.into_iter().zip(payloads))
            .map(|(key, payload)| async move {
                let result = self.write(&key, payload.into_bytes()).await;
                (key, result)
            })
            .buffer_unordered(limit)
            .collect()
            .await;

        let mut report = BatchWriteReport::default();
        for (key, result) in results {
            match result {
                Ok(_) => report.written.push(key),
                Err(e) => {
                    warn!(%key, error = %e, "Batch item failed");
                    report.failed.push((key, e));
                }
            }
        }

        debug!(
            written = report.written.len(),
            failed = report.failed.len(),
            "Batch write finished"
        );
        Ok(report)
    }
}
