//! Publishing of trained weights, checkpoints and preview images to the hub

use std::path::{Path, PathBuf};
use std::sync::Arc;

use checkpoint::{find_latest_checkpoint, LORA_WEIGHTS_FILE};
use tracing::{info, instrument, warn};
use tuner_core::config::{CheckpointConfig, PublishConfig};
use tuner_core::{AttemptFailure, Attempted, Error, ModelVariant, Result, RetryPolicy, TrainingState};

use crate::hub::{HfHubClient, HubApi, RepoUrl};
use crate::images::{plan_assets, ValidationImages, ASSETS_DIR};
use crate::model_card::{ModelCard, MODEL_CARD_FILE};
use crate::notify::{Notifier, WebhookNotifier};
use crate::token::resolve_token;

const IMAGE_COMMIT_MESSAGE: &str = "Validation image auto-generated by the trainer";
const CARD_COMMIT_MESSAGE: &str = "Model card auto-generated by the trainer";

/// Final state of one retried upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Succeeded { attempts: u32 },
    Failed { attempts: u32, error: String },
}

impl UploadOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, UploadOutcome::Succeeded { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            UploadOutcome::Succeeded { attempts } | UploadOutcome::Failed { attempts, .. } => {
                *attempts
            }
        }
    }
}

impl<T> From<Attempted<T>> for UploadOutcome {
    fn from(attempted: Attempted<T>) -> Self {
        match attempted.result {
            Ok(_) => UploadOutcome::Succeeded {
                attempts: attempted.attempts,
            },
            Err(e) => UploadOutcome::Failed {
                attempts: attempted.attempts,
                error: e.to_string(),
            },
        }
    }
}

/// Upload result for one preview image
#[derive(Debug, Clone)]
pub struct AssetUpload {
    pub label: String,
    pub path_in_repo: String,
    pub outcome: UploadOutcome,
}

/// Everything that happened during one model upload
#[derive(Debug, Clone)]
pub struct PublishReport {
    pub repo: RepoUrl,
    /// Local folder that was published
    pub folder: PathBuf,
    pub assets: Vec<AssetUpload>,
    pub model: UploadOutcome,
}

impl PublishReport {
    /// True when the weights and every image made it to the hub
    pub fn is_success(&self) -> bool {
        self.model.is_success() && self.assets.iter().all(|a| a.outcome.is_success())
    }
}

/// Publishes a training run to a single hub repository
pub struct HubManager {
    config: PublishConfig,
    checkpoint: CheckpointConfig,
    hub: Arc<dyn HubApi>,
    repo: RepoUrl,
    retry: RetryPolicy,
    notifier: Option<Arc<dyn Notifier>>,
}

impl HubManager {
    /// Create the manager and make sure the repository exists
    pub async fn new(
        config: PublishConfig,
        checkpoint: CheckpointConfig,
        hub: Arc<dyn HubApi>,
    ) -> Result<Self> {
        let repo_id = config
            .resolved_repo_id()
            .ok_or_else(|| Error::InvalidConfig {
                message: "publish.repo_id or publish.project_name is required".to_string(),
            })?
            .to_string();

        let repo = hub.create_repo(&repo_id, config.private, true).await?;
        info!(repo_id = %repo.repo_id, url = %repo.url, "Publishing to hub repository");

        let retry = RetryPolicy::fixed(config.max_attempts).with_delay(config.retry_delay);
        Ok(Self {
            config,
            checkpoint,
            hub,
            repo,
            retry,
            notifier: None,
        })
    }

    /// Manager backed by the hub HTTP API
    ///
    /// Fails with `MissingToken` when no token can be found, and installs a
    /// webhook notifier when `webhook_url` is configured.
    pub async fn connect(config: PublishConfig, checkpoint: CheckpointConfig) -> Result<Self> {
        let token = resolve_token(config.token.as_deref())?;
        let hub = Arc::new(HfHubClient::new(config.endpoint.clone(), token)?);
        let webhook = config.webhook_url.clone();

        let manager = Self::new(config, checkpoint, hub).await?;
        Ok(match webhook {
            Some(url) => manager.with_notifier(Arc::new(WebhookNotifier::new(url))),
            None => manager,
        })
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn repo(&self) -> &RepoUrl {
        &self.repo
    }

    async fn notify(&self, message: &str) {
        if let Some(notifier) = &self.notifier {
            notifier.send(message).await;
        }
    }

    /// Folder holding the weights to publish
    fn model_folder(&self, override_path: Option<&Path>) -> PathBuf {
        match (override_path, self.config.model_variant) {
            (Some(path), _) => path.to_path_buf(),
            (None, ModelVariant::Full) => self.checkpoint.output_dir.join("pipeline"),
            (None, ModelVariant::Lora) => self.checkpoint.output_dir.clone(),
        }
    }

    /// Root under which `assets/` is written
    fn assets_root(&self, override_path: Option<&Path>) -> PathBuf {
        override_path
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.checkpoint.output_dir.clone())
    }

    /// Commit message describing the run so far
    pub fn commit_message(&self, state: &TrainingState) -> String {
        let d = &self.config.details;
        let datasets = if d.datasets.is_empty() {
            "(none)".to_string()
        } else {
            d.datasets.join(", ")
        };
        let vae = if d.model_type.to_lowercase().contains("deepfloyd") {
            "DeepFloyd Pixel diffusion (no VAE).".to_string()
        } else {
            format!("VAE: {}", d.vae_model.as_deref().unwrap_or(&d.base_model))
        };

        format!(
            "Trained for {} epochs and {} steps.\n\
             Trained with datasets {}\n\
             Learning rate {}, batch size {}, and {} gradient accumulation steps.\n\
             Used DDPM noise scheduler for training with {} prediction type and rescaled_betas_zero_snr={}\n\
             Using '{}' timestep spacing.\n\
             Base model: {}\n\
             {}",
            state.completed_epochs(),
            state.global_step,
            datasets,
            d.learning_rate,
            d.train_batch_size,
            d.gradient_accumulation_steps,
            d.prediction_type,
            d.rescale_betas_zero_snr,
            d.timestep_spacing,
            d.base_model,
            vae,
        )
    }

    /// Publish the model card, preview images and weights
    ///
    /// Upload failures are retried and then reported in the returned
    /// [`PublishReport`]; only local I/O problems are returned as errors.
    #[instrument(skip(self, images, state), fields(repo_id = %self.repo.repo_id, variant = %self.config.model_variant))]
    pub async fn upload_model(
        &self,
        images: &ValidationImages,
        state: &TrainingState,
        override_path: Option<&Path>,
    ) -> Result<PublishReport> {
        let what = if override_path.is_some() {
            "intermediary checkpoint"
        } else {
            "model"
        };
        self.notify(&format!(
            "Uploading {} to Hugging Face Hub as `{}`.",
            what, self.repo.repo_id
        ))
        .await;

        let folder = self.model_folder(override_path);
        let planned = plan_assets(images, self.config.asset_naming);
        ModelCard {
            repo_id: &self.repo.repo_id,
            details: &self.config.details,
            variant: self.config.model_variant,
            assets: &planned,
        }
        .write(&folder)
        .await?;

        let assets = self.upload_validation_images(images, override_path).await?;

        let commit = self.commit_message(state);
        let hub = self.hub.as_ref();
        let repo_id = self.repo.repo_id.as_str();
        let variant = self.config.model_variant;
        let folder_ref = folder.as_path();
        let commit_ref = commit.as_str();
        let notifier = self.notifier.as_deref();

        let attempted = self
            .retry
            .run(
                "upload model",
                move |_| async move {
                    match variant {
                        ModelVariant::Full => {
                            hub.upload_folder(repo_id, folder_ref, commit_ref).await?;
                        }
                        ModelVariant::Lora => {
                            hub.upload_file(
                                repo_id,
                                &folder_ref.join(LORA_WEIGHTS_FILE),
                                LORA_WEIGHTS_FILE,
                                commit_ref,
                            )
                            .await?;
                            hub.upload_file(
                                repo_id,
                                &folder_ref.join(MODEL_CARD_FILE),
                                MODEL_CARD_FILE,
                                CARD_COMMIT_MESSAGE,
                            )
                            .await?;
                        }
                    }
                    Ok::<(), Error>(())
                },
                move |failure: AttemptFailure| async move {
                    if let Some(notifier) = notifier {
                        notifier
                            .send(&format!(
                                "(attempt {}/{}) Error uploading model to Hugging Face Hub: {}. Retrying...",
                                failure.attempt, failure.max_attempts, failure.message
                            ))
                            .await;
                    }
                },
            )
            .await;

        let model = UploadOutcome::from(attempted);
        match &model {
            UploadOutcome::Succeeded { attempts } => {
                info!(attempts, "Model uploaded");
                self.notify(&format!(
                    "Model is now available [on Hugging Face Hub]({}).",
                    self.repo.url
                ))
                .await;
            }
            UploadOutcome::Failed { attempts, error } => {
                warn!(attempts, %error, "Giving up on model upload");
                self.notify(&format!(
                    "Failed to upload model to Hugging Face Hub after {} attempts: {}",
                    attempts, error
                ))
                .await;
            }
        }

        Ok(PublishReport {
            repo: self.repo.clone(),
            folder,
            assets,
            model,
        })
    }

    /// Publish the highest-step checkpoint below the output directory
    ///
    /// Returns `None` without contacting the hub when no checkpoint exists.
    pub async fn upload_latest_checkpoint(
        &self,
        images: &ValidationImages,
        state: &TrainingState,
    ) -> Result<Option<PublishReport>> {
        let Some(latest) =
            find_latest_checkpoint(&self.checkpoint.output_dir, &self.checkpoint.prefix).await?
        else {
            info!(dir = %self.checkpoint.output_dir.display(), "No checkpoint to upload");
            return Ok(None);
        };

        info!(checkpoint = %latest.path.display(), "Uploading latest checkpoint");
        self.upload_model(images, state, Some(&latest.path))
            .await
            .map(Some)
    }

    /// Write preview images under `assets/` and upload them one by one
    #[instrument(skip(self, images), fields(repo_id = %self.repo.repo_id, images = images.len()))]
    pub async fn upload_validation_images(
        &self,
        images: &ValidationImages,
        override_path: Option<&Path>,
    ) -> Result<Vec<AssetUpload>> {
        if images.is_empty() {
            return Ok(Vec::new());
        }

        let assets_dir = self.assets_root(override_path).join(ASSETS_DIR);
        tokio::fs::create_dir_all(&assets_dir).await?;

        let planned = plan_assets(images, self.config.asset_naming);
        let all_images = images.groups().iter().flat_map(|(_, group)| group.iter());

        let mut uploads = Vec::with_capacity(planned.len());
        for (asset, image) in planned.iter().zip(all_images) {
            let local_path = assets_dir.join(&asset.file_name);
            tokio::fs::write(&local_path, image.as_bytes()).await?;

            let path_in_repo = asset.path_in_repo();
            let hub = self.hub.as_ref();
            let repo_id = self.repo.repo_id.as_str();
            let local = local_path.as_path();
            let remote = path_in_repo.as_str();

            let attempted = self
                .retry
                .run(
                    "upload validation image",
                    move |_| async move {
                        hub.upload_file(repo_id, local, remote, IMAGE_COMMIT_MESSAGE)
                            .await
                    },
                    |_| async {},
                )
                .await;

            let outcome = UploadOutcome::from(attempted);
            info!(
                label = %asset.label,
                path = %path_in_repo,
                success = outcome.is_success(),
                "Validation image processed"
            );
            uploads.push(AssetUpload {
                label: asset.label.clone(),
                path_in_repo,
                outcome,
            });
        }

        Ok(uploads)
    }
}

impl std::fmt::Debug for HubManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HubManager")
            .field("repo", &self.repo)
            .field("variant", &self.config.model_variant)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::images::test_png;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use tempfile::tempdir;
    use tuner_core::config::TrainingDetails;

    /// Hub that fails the first `failures` upload calls
    #[derive(Default)]
    struct MockHub {
        failures: Mutex<usize>,
        always_fail: bool,
        creates: Mutex<Vec<(String, bool, bool)>>,
        uploads: Mutex<Vec<String>>,
        attempts: Mutex<usize>,
    }

    impl MockHub {
        fn failing(times: usize) -> Self {
            Self {
                failures: Mutex::new(times),
                ..Default::default()
            }
        }

        fn broken() -> Self {
            Self {
                always_fail: true,
                ..Default::default()
            }
        }

        fn attempt(&self, path: &str) -> Result<()> {
            *self.attempts.lock() += 1;
            let mut failures = self.failures.lock();
            if self.always_fail || *failures > 0 {
                *failures = failures.saturating_sub(1);
                return Err(Error::Hub {
                    message: "503 Service Unavailable".to_string(),
                });
            }
            self.uploads.lock().push(path.to_string());
            Ok(())
        }
    }

    #[async_trait]
    impl HubApi for MockHub {
        async fn create_repo(
            &self,
            repo_id: &str,
            private: bool,
            exist_ok: bool,
        ) -> Result<RepoUrl> {
            self.creates
                .lock()
                .push((repo_id.to_string(), private, exist_ok));
            Ok(RepoUrl {
                repo_id: repo_id.to_string(),
                url: format!("https://hub.test/{}", repo_id),
            })
        }

        async fn upload_folder(
            &self,
            _repo_id: &str,
            folder: &Path,
            _commit_message: &str,
        ) -> Result<usize> {
            self.attempt(&format!("folder:{}", folder.display()))?;
            Ok(1)
        }

        async fn upload_file(
            &self,
            _repo_id: &str,
            local_path: &Path,
            path_in_repo: &str,
            _commit_message: &str,
        ) -> Result<()> {
            assert!(local_path.exists(), "{} missing", local_path.display());
            self.attempt(path_in_repo)
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        messages: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn send(&self, message: &str) {
            self.messages.lock().push(message.to_string());
        }
    }

    fn configs(root: &Path, variant: ModelVariant) -> (PublishConfig, CheckpointConfig) {
        let publish = PublishConfig {
            repo_id: Some("user/test-model".to_string()),
            model_variant: variant,
            details: TrainingDetails {
                base_model: "base/model".to_string(),
                datasets: vec!["pets".to_string()],
                ..Default::default()
            },
            ..Default::default()
        };
        let checkpoint = CheckpointConfig {
            output_dir: root.to_path_buf(),
            ..Default::default()
        };
        (publish, checkpoint)
    }

    async fn manager(root: &Path, hub: Arc<MockHub>, variant: ModelVariant) -> HubManager {
        let (publish, checkpoint) = configs(root, variant);
        HubManager::new(publish, checkpoint, hub).await.unwrap()
    }

    fn state() -> TrainingState {
        TrainingState {
            global_step: 1200,
            epoch: 4,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_repo_created_once() {
        let dir = tempdir().unwrap();
        let hub = Arc::new(MockHub::default());
        let manager = manager(dir.path(), hub.clone(), ModelVariant::Full).await;

        manager
            .upload_model(&ValidationImages::new(), &state(), None)
            .await
            .unwrap();

        let creates = hub.creates.lock().clone();
        assert_eq!(creates, vec![("user/test-model".to_string(), false, true)]);
    }

    #[tokio::test]
    async fn test_repo_id_falls_back_to_project_name() {
        let dir = tempdir().unwrap();
        let (mut publish, checkpoint) = configs(dir.path(), ModelVariant::Full);
        publish.repo_id = None;
        publish.project_name = Some("my-project".to_string());

        let manager = HubManager::new(publish, checkpoint, Arc::new(MockHub::default()))
            .await
            .unwrap();
        assert_eq!(manager.repo().repo_id, "my-project");
    }

    #[tokio::test]
    async fn test_missing_repo_id() {
        let dir = tempdir().unwrap();
        let (mut publish, checkpoint) = configs(dir.path(), ModelVariant::Full);
        publish.repo_id = Some(" ".to_string());

        let result = HubManager::new(publish, checkpoint, Arc::new(MockHub::default())).await;
        assert!(matches!(result, Err(Error::InvalidConfig { .. })));
    }

    #[tokio::test]
    async fn test_upload_retries_then_succeeds() {
        let dir = tempdir().unwrap();
        let hub = Arc::new(MockHub::failing(2));
        let notifier = Arc::new(RecordingNotifier::default());
        let manager = manager(dir.path(), hub.clone(), ModelVariant::Full)
            .await
            .with_notifier(notifier.clone());

        let report = manager
            .upload_model(&ValidationImages::new(), &state(), None)
            .await
            .unwrap();

        assert_eq!(report.model, UploadOutcome::Succeeded { attempts: 3 });
        assert_eq!(*hub.attempts.lock(), 3);
        assert_eq!(report.folder, dir.path().join("pipeline"));
        assert!(dir.path().join("pipeline").join(MODEL_CARD_FILE).exists());

        let messages = notifier.messages.lock().clone();
        assert_eq!(messages.len(), 4);
        assert!(messages[0].starts_with("Uploading model to Hugging Face Hub"));
        assert!(messages[1].starts_with("(attempt 1/3) Error uploading model"));
        assert!(messages[2].starts_with("(attempt 2/3) Error uploading model"));
        assert!(messages[3].starts_with("Model is now available"));
    }

    #[tokio::test]
    async fn test_upload_exhaustion_is_reported() {
        let dir = tempdir().unwrap();
        let hub = Arc::new(MockHub::broken());
        let notifier = Arc::new(RecordingNotifier::default());
        let manager = manager(dir.path(), hub.clone(), ModelVariant::Full)
            .await
            .with_notifier(notifier.clone());

        let report = manager
            .upload_model(&ValidationImages::new(), &state(), None)
            .await
            .unwrap();

        assert!(matches!(report.model, UploadOutcome::Failed { attempts: 3, .. }));
        assert!(!report.is_success());
        assert_eq!(*hub.attempts.lock(), 3);
        let last = notifier.messages.lock().last().cloned().unwrap();
        assert!(last.starts_with("Failed to upload model"));
    }

    #[tokio::test]
    async fn test_lora_uploads_weights_then_card() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(LORA_WEIGHTS_FILE), b"weights").unwrap();
        let hub = Arc::new(MockHub::default());
        let manager = manager(dir.path(), hub.clone(), ModelVariant::Lora).await;

        let report = manager
            .upload_model(&ValidationImages::new(), &state(), None)
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.folder, dir.path());
        assert_eq!(
            *hub.uploads.lock(),
            vec![LORA_WEIGHTS_FILE.to_string(), MODEL_CARD_FILE.to_string()]
        );
    }

    #[tokio::test]
    async fn test_validation_image_names() {
        let dir = tempdir().unwrap();
        let hub = Arc::new(MockHub::default());
        let manager = manager(dir.path(), hub.clone(), ModelVariant::Full).await;
        let images = ValidationImages::new()
            .with_group("cat", vec![test_png(1)])
            .with_group("dog", vec![test_png(2), test_png(3)]);

        let uploads = manager
            .upload_validation_images(&images, None)
            .await
            .unwrap();

        let paths: Vec<&str> = uploads.iter().map(|u| u.path_in_repo.as_str()).collect();
        assert_eq!(
            paths,
            vec!["assets/image_0_0.png", "assets/image_1_0.png", "assets/image_2_1.png"]
        );
        assert!(dir.path().join("assets/image_2_1.png").exists());
        assert!(uploads.iter().all(|u| u.outcome == UploadOutcome::Succeeded { attempts: 1 }));
    }

    #[tokio::test]
    async fn test_image_retry_stops_on_success() {
        let dir = tempdir().unwrap();
        let hub = Arc::new(MockHub::failing(1));
        let manager = manager(dir.path(), hub.clone(), ModelVariant::Full).await;
        let images = ValidationImages::new().with_group("cat", vec![test_png(1)]);

        let uploads = manager
            .upload_validation_images(&images, None)
            .await
            .unwrap();

        assert_eq!(uploads[0].outcome, UploadOutcome::Succeeded { attempts: 2 });
        assert_eq!(*hub.uploads.lock(), vec!["assets/image_0_0.png".to_string()]);
    }

    #[tokio::test]
    async fn test_latest_checkpoint_selected() {
        let dir = tempdir().unwrap();
        for name in ["checkpoint-3", "checkpoint-10", "checkpoint-2"] {
            std::fs::create_dir_all(dir.path().join(name)).unwrap();
        }
        let hub = Arc::new(MockHub::default());
        let manager = manager(dir.path(), hub.clone(), ModelVariant::Full).await;

        let report = manager
            .upload_latest_checkpoint(&ValidationImages::new(), &state())
            .await
            .unwrap()
            .unwrap();

        assert_eq!(report.folder, dir.path().join("checkpoint-10"));
        assert!(dir.path().join("checkpoint-10").join(MODEL_CARD_FILE).exists());
    }

    #[tokio::test]
    async fn test_no_checkpoint_is_noop() {
        let dir = tempdir().unwrap();
        let hub = Arc::new(MockHub::default());
        let manager = manager(dir.path(), hub.clone(), ModelVariant::Full).await;

        let report = manager
            .upload_latest_checkpoint(&ValidationImages::new(), &state())
            .await
            .unwrap();
        assert!(report.is_none());
        assert_eq!(*hub.attempts.lock(), 0);
    }

    #[tokio::test]
    async fn test_commit_message() {
        let dir = tempdir().unwrap();
        let manager = manager(dir.path(), Arc::new(MockHub::default()), ModelVariant::Full).await;

        let message = manager.commit_message(&state());
        assert!(message.starts_with("Trained for 3 epochs and 1200 steps."));
        assert!(message.contains("Trained with datasets pets"));
        assert!(message.contains("rescaled_betas_zero_snr=false"));
        assert!(message.contains("Using 'trailing' timestep spacing."));
        assert!(message.ends_with("VAE: base/model"));
    }

    #[tokio::test]
    async fn test_commit_message_deepfloyd() {
        let dir = tempdir().unwrap();
        let (mut publish, checkpoint) = configs(dir.path(), ModelVariant::Full);
        publish.details.model_type = "deepfloyd-full".to_string();
        let manager = HubManager::new(publish, checkpoint, Arc::new(MockHub::default()))
            .await
            .unwrap();

        assert!(manager
            .commit_message(&state())
            .ends_with("DeepFloyd Pixel diffusion (no VAE)."));
    }
}
