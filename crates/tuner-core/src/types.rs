//! Core type definitions shared across the training infrastructure

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Training step and epoch counters
pub type Step = u64;
pub type Epoch = u64;

/// File name of the auxiliary training state inside a checkpoint directory
pub const TRAINING_STATE_FILE: &str = "training_state.json";

/// Auxiliary training counters persisted alongside every checkpoint
///
/// Owned by the training loop; checkpoint hooks receive it on save and hand a
/// restored copy back on load.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingState {
    /// Optimizer steps taken since the start of training
    pub global_step: Step,

    /// Steps taken within the current epoch
    pub epoch_step: Step,

    /// Current epoch (1-based while training is running)
    pub epoch: Epoch,

    /// Data backends that ran out of samples in the current epoch
    pub exhausted_backends: Vec<String>,

    /// Per-backend repeat counters
    pub repeats: BTreeMap<String, u64>,

    /// When this state was last written
    pub saved_at: Option<DateTime<Utc>>,

    /// Any further scalars the training loop wants to keep
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl TrainingState {
    /// Number of fully completed epochs
    pub fn completed_epochs(&self) -> Epoch {
        self.epoch.saturating_sub(1)
    }
}

/// Which weights a training run produces
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelVariant {
    /// Entire weight set (unet and optionally text encoder)
    #[default]
    Full,

    /// Low-rank adapter weights layered on a frozen base model
    Lora,
}

impl ModelVariant {
    /// True for adapter-only training
    pub fn is_adapter(&self) -> bool {
        matches!(self, ModelVariant::Lora)
    }
}

impl std::fmt::Display for ModelVariant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ModelVariant::Full => write!(f, "full"),
            ModelVariant::Lora => write!(f, "lora"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_training_state_keeps_unknown_fields() {
        let json = r#"{"global_step": 1200, "epoch": 3, "ema_decay": 0.999}"#;
        let state: TrainingState = serde_json::from_str(json).unwrap();

        assert_eq!(state.global_step, 1200);
        assert_eq!(state.epoch, 3);
        assert_eq!(state.epoch_step, 0);
        assert_eq!(state.extra.get("ema_decay"), Some(&serde_json::json!(0.999)));

        let back = serde_json::to_value(&state).unwrap();
        assert_eq!(back["ema_decay"], serde_json::json!(0.999));
    }

    #[test]
    fn test_completed_epochs() {
        let state = TrainingState {
            epoch: 4,
            ..Default::default()
        };
        assert_eq!(state.completed_epochs(), 3);
        assert_eq!(TrainingState::default().completed_epochs(), 0);
    }

    #[test]
    fn test_model_variant_serde() {
        let variant: ModelVariant = serde_json::from_str("\"lora\"").unwrap();
        assert!(variant.is_adapter());
        assert_eq!(variant.to_string(), "lora");
        assert_eq!(serde_json::to_string(&ModelVariant::Full).unwrap(), "\"full\"");
    }
}
