//! Save/load hooks invoked by the training accelerator

use std::fmt;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};
use tuner_core::config::CheckpointConfig;
use tuner_core::{Error, ModelVariant, Result, Step, TrainingState, TRAINING_STATE_FILE};

use crate::adapter::{load_lora_weights, save_lora_weights, AdapterLayers};
use crate::discovery::CheckpointDir;
use crate::retention::RetentionPolicy;
use crate::state::TrainingStateFile;

/// Role of a model handed to the hooks
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ModelRole {
    Unet,
    TextEncoder,
    /// Anything else the accelerator tracks (EMA copies, optimizer wrappers)
    Other(String),
}

impl ModelRole {
    /// Sub-directory used for full weight sets
    pub fn subfolder(&self) -> Option<&'static str> {
        match self {
            ModelRole::Unet => Some("unet"),
            ModelRole::TextEncoder => Some("text_encoder"),
            ModelRole::Other(_) => None,
        }
    }
}

impl fmt::Display for ModelRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelRole::Unet => write!(f, "unet"),
            ModelRole::TextEncoder => write!(f, "text_encoder"),
            ModelRole::Other(name) => write!(f, "{}", name),
        }
    }
}

/// A trainable model whose weights go into checkpoints
#[async_trait]
pub trait CheckpointModel: Send + Sync {
    /// Save the full weight set into `dir`
    async fn save_pretrained(&self, dir: &Path) -> Result<()>;

    /// Restore the full weight set from `dir`
    async fn load_pretrained(&mut self, dir: &Path) -> Result<()>;

    /// Current adapter layers
    fn adapter_layers(&self) -> Result<AdapterLayers>;

    /// Replace adapter layers with previously saved ones
    fn load_adapter_layers(&mut self, layers: &AdapterLayers) -> Result<()>;
}

/// Outcome of a checkpoint save
#[derive(Debug, Clone)]
pub struct SaveReport {
    pub checkpoint_dir: PathBuf,
    /// Older checkpoints removed by retention
    pub removed: Vec<CheckpointDir>,
    pub saved: Vec<ModelRole>,
    pub skipped: Vec<ModelRole>,
}

/// Checkpoint hooks for one training run
#[derive(Debug, Clone)]
pub struct CheckpointHooks {
    config: CheckpointConfig,
    variant: ModelVariant,
    retention: RetentionPolicy,
    tolerate_untracked_models: bool,
}

impl CheckpointHooks {
    pub fn new(config: CheckpointConfig, variant: ModelVariant) -> Self {
        let retention = RetentionPolicy::new(config.total_limit);
        Self {
            config,
            variant,
            retention,
            tolerate_untracked_models: false,
        }
    }

    /// Skip models with an unknown role instead of failing
    ///
    /// Needed when the optimizer wraps extra modules the hooks know nothing about.
    pub fn tolerate_untracked_models(mut self, tolerate: bool) -> Self {
        self.tolerate_untracked_models = tolerate;
        self
    }

    pub fn variant(&self) -> ModelVariant {
        self.variant
    }

    pub fn config(&self) -> &CheckpointConfig {
        &self.config
    }

    /// Directory for the checkpoint taken at `step`
    pub fn checkpoint_dir(&self, step: Step) -> PathBuf {
        self.config
            .output_dir
            .join(format!("{}-{}", self.config.prefix, step))
    }

    fn untracked(&self, role: &ModelRole) -> Result<()> {
        if self.tolerate_untracked_models {
            warn!(%role, "Skipping model with unknown role");
            Ok(())
        } else {
            Err(Error::UnexpectedModel {
                role: role.to_string(),
            })
        }
    }

    /// Persist models and training state into `checkpoint_dir`
    ///
    /// Retention runs first, so the new checkpoint is never a removal
    /// candidate. The training-state file is written last and marks the
    /// checkpoint as complete.
    #[instrument(skip(self, models, state), fields(dir = %checkpoint_dir.display(), variant = %self.variant))]
    pub async fn save_state(
        &self,
        models: &[(ModelRole, &dyn CheckpointModel)],
        checkpoint_dir: &Path,
        state: &TrainingState,
    ) -> Result<SaveReport> {
        let output_dir = checkpoint_dir
            .parent()
            .unwrap_or(self.config.output_dir.as_path());
        let removed = self
            .retention
            .enforce(output_dir, &self.config.prefix, Some(checkpoint_dir))
            .await?;

        let mut saved = Vec::new();
        let mut skipped = Vec::new();

        match self.variant {
            ModelVariant::Lora => {
                let mut unet = None;
                let mut text_encoder = None;
                for (role, model) in models {
                    match role {
                        ModelRole::Unet => unet = Some(model.adapter_layers()?),
                        ModelRole::TextEncoder => text_encoder = Some(model.adapter_layers()?),
                        ModelRole::Other(_) => {
                            self.untracked(role)?;
                            skipped.push(role.clone());
                            continue;
                        }
                    }
                    saved.push(role.clone());
                }
                save_lora_weights(checkpoint_dir, unet.as_ref(), text_encoder.as_ref()).await?;
            }
            ModelVariant::Full => {
                for (role, model) in models {
                    let Some(subfolder) = role.subfolder() else {
                        self.untracked(role)?;
                        skipped.push(role.clone());
                        continue;
                    };
                    model.save_pretrained(&checkpoint_dir.join(subfolder)).await?;
                    debug!(%role, "Saved model weights");
                    saved.push(role.clone());
                }
            }
        }

        state.save(&checkpoint_dir.join(TRAINING_STATE_FILE)).await?;

        info!(
            step = state.global_step,
            models = saved.len(),
            removed = removed.len(),
            "Checkpoint saved"
        );

        Ok(SaveReport {
            checkpoint_dir: checkpoint_dir.to_path_buf(),
            removed,
            saved,
            skipped,
        })
    }

    /// Restore models and training state from `checkpoint_dir`
    ///
    /// Returns `None` for the state when the checkpoint has no state file.
    #[instrument(skip(self, models), fields(dir = %checkpoint_dir.display(), variant = %self.variant))]
    pub async fn load_state(
        &self,
        models: &mut [(ModelRole, &mut dyn CheckpointModel)],
        checkpoint_dir: &Path,
    ) -> Result<Option<TrainingState>> {
        let state = TrainingState::load(&checkpoint_dir.join(TRAINING_STATE_FILE)).await?;

        match self.variant {
            ModelVariant::Lora => {
                let weights = load_lora_weights(checkpoint_dir).await?;
                for (role, model) in models.iter_mut() {
                    match role {
                        ModelRole::Unet => model.load_adapter_layers(&weights.unet)?,
                        ModelRole::TextEncoder => model.load_adapter_layers(&weights.text_encoder)?,
                        ModelRole::Other(_) => self.untracked(role)?,
                    }
                }
            }
            ModelVariant::Full => {
                for (role, model) in models.iter_mut() {
                    match role.subfolder() {
                        Some(subfolder) => {
                            model.load_pretrained(&checkpoint_dir.join(subfolder)).await?
                        }
                        None => self.untracked(role)?,
                    }
                }
            }
        }

        if let Some(state) = &state {
            info!(
                global_step = state.global_step,
                epoch = state.epoch,
                "Restored training state"
            );
        }
        Ok(state)
    }
}
