//! Storage - Flat-key object storage for training artifacts
//!
//! Provides async storage operations with support for:
//! - Local filesystem (default feature)
//! - Amazon S3 / S3-compatible storage (with `s3` feature)
//!
//! Keys are always reduced to their basename; the store has no directories.
//!
//! # Example
//!
//! ```no_run
//! use storage::{StorageBackend, LocalStorage};
//! use bytes::Bytes;
//!
//! # async fn example() -> tuner_core::Result<()> {
//! let storage = LocalStorage::new("/tmp/vae-cache");
//! storage.write("latents/img-001.pt", Bytes::from(vec![1, 2, 3])).await?;
//! let data = storage.read("img-001.pt").await?;
//! # Ok(())
//! # }
//! ```

mod backend;
pub mod key;
pub mod listing;
mod local;

#[cfg(feature = "s3")]
mod s3;

pub use backend::{BatchWriteReport, StorageBackend};
pub use key::{normalize_key, Payload};
pub use listing::{FileGroup, GlobPattern};
pub use local::LocalStorage;

#[cfg(feature = "s3")]
pub use s3::S3Storage;
