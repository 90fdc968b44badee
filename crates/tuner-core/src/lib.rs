//! Tuner Core - Foundation for the training infrastructure crates
//!
//! Provides the shared error type, configuration, retry policy and the
//! training-state record exchanged between the trainer, checkpoint hooks and
//! hub publishing.

pub mod config;
pub mod error;
pub mod retry;
pub mod types;

pub use config::TunerConfig;
pub use error::{Error, Result};
pub use retry::{AttemptFailure, Attempted, RetryPolicy};
pub use types::*;
