//! Checkpoint - retention, training-state persistence and save/load hooks
//!
//! Checkpoints are directories named `{prefix}-{step}` under the run's output
//! directory. Before a new one is written the oldest are removed so that no
//! more than `total_limit` remain.

pub mod adapter;
pub mod discovery;
pub mod hooks;
pub mod retention;
pub mod state;

pub use adapter::{AdapterLayers, AdapterTensor, LoraWeights, LORA_WEIGHTS_FILE};
pub use discovery::{
    find_latest_checkpoint, find_resumable_checkpoint, list_checkpoints, parse_step,
    CheckpointDir,
};
pub use hooks::{CheckpointHooks, CheckpointModel, ModelRole, SaveReport};
pub use retention::{remove_checkpoint, sweep_interrupted, RetentionPolicy};
pub use state::TrainingStateFile;
