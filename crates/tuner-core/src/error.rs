//! Error types shared by the storage, checkpoint and publishing crates

use thiserror::Error;

/// Result type alias using the tuner Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for the training infrastructure
#[derive(Error, Debug)]
pub enum Error {
    // Storage errors
    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Storage path not found: {path}")]
    StoragePathNotFound { path: String },

    #[error("Invalid glob pattern '{pattern}': {message}")]
    InvalidPattern { pattern: String, message: String },

    #[error("Invalid argument: {message}")]
    InvalidArgument { message: String },

    // Checkpoint errors
    #[error("Checkpoint not found: {checkpoint}")]
    CheckpointNotFound { checkpoint: String },

    #[error("Checkpoint write failed: {message}")]
    CheckpointWriteFailed { message: String },

    #[error("Checkpoint corrupted: {checkpoint} - {reason}")]
    CheckpointCorrupted { checkpoint: String, reason: String },

    #[error("Unexpected model passed to checkpoint hook: {role}")]
    UnexpectedModel { role: String },

    // Publishing errors
    #[error("No Hugging Face Hub token found; set HF_TOKEN or log in with the hub CLI")]
    MissingToken,

    #[error("Failed to create repository '{repo_id}': {message}")]
    RepoCreationFailed { repo_id: String, message: String },

    #[error("Failed to upload '{path}': {message}")]
    UploadFailed { path: String, message: String },

    #[error("Hub request failed: {message}")]
    Hub { message: String },

    #[error("Invalid preview image '{name}': {reason}")]
    InvalidImage { name: String, reason: String },

    // Configuration errors
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    // Internal errors
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
