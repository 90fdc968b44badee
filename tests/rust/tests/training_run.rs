use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use checkpoint::{
    find_resumable_checkpoint, AdapterLayers, AdapterTensor, CheckpointHooks, CheckpointModel,
    ModelRole,
};
use parking_lot::Mutex;
use publishing::{HubApi, HubManager, PreviewImage, RepoUrl, UploadOutcome, ValidationImages};
use std::path::Path;
use std::sync::Arc;
use storage::{LocalStorage, Payload, StorageBackend};
use tuner_core::config::StorageBackendConfig;
use tuner_core::{ModelVariant, TrainingState, TunerConfig};

const PNG: &[u8] = &[0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n', 0, 0, 0, 0];

// Stand-in for a trainable network
struct TinyModel {
    weights: Vec<u8>,
}

#[async_trait]
impl CheckpointModel for TinyModel {
    async fn save_pretrained(&self, dir: &Path) -> tuner_core::Result<()> {
        tokio::fs::create_dir_all(dir).await?;
        tokio::fs::write(dir.join("diffusion_pytorch_model.bin"), &self.weights).await?;
        Ok(())
    }

    async fn load_pretrained(&mut self, dir: &Path) -> tuner_core::Result<()> {
        self.weights = tokio::fs::read(dir.join("diffusion_pytorch_model.bin")).await?;
        Ok(())
    }

    fn adapter_layers(&self) -> tuner_core::Result<AdapterLayers> {
        let values: Vec<f32> = self.weights.iter().map(|&w| w as f32).collect();
        let mut layers = AdapterLayers::new();
        layers.insert(
            "lora_A".to_string(),
            AdapterTensor::from_f32(vec![values.len()], &values),
        );
        Ok(layers)
    }

    fn load_adapter_layers(&mut self, layers: &AdapterLayers) -> tuner_core::Result<()> {
        if let Some(tensor) = layers.get("lora_A") {
            self.weights = tensor
                .data
                .chunks_exact(4)
                .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]) as u8)
                .collect();
        }
        Ok(())
    }
}

// Records uploads, failing the first `flaky` calls
#[derive(Default)]
struct RecordingHub {
    flaky: Mutex<usize>,
    uploaded: Mutex<Vec<String>>,
}

#[async_trait]
impl HubApi for RecordingHub {
    async fn create_repo(
        &self,
        repo_id: &str,
        _private: bool,
        _exist_ok: bool,
    ) -> tuner_core::Result<RepoUrl> {
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
    ) -> tuner_core::Result<usize> {
        {
            let mut flaky = self.flaky.lock();
            if *flaky > 0 {
                *flaky -= 1;
                return Err(tuner_core::Error::Hub {
                    message: "connection reset".to_string(),
                });
            }
        }
        let name = folder
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        self.uploaded.lock().push(format!("folder:{}", name));
        Ok(1)
    }

    async fn upload_file(
        &self,
        _repo_id: &str,
        _local_path: &Path,
        path_in_repo: &str,
        _commit_message: &str,
    ) -> tuner_core::Result<()> {
        self.uploaded.lock().push(path_in_repo.to_string());
        Ok(())
    }
}

fn write_config(dir: &Path, variant: &str, limit: usize) -> Result<TunerConfig> {
    let raw = serde_json::json!({
        "storage": {
            "backend": { "local": { "root": dir.join("cache") } },
            "batch_concurrency": 4
        },
        "checkpoint": {
            "output_dir": dir.join("output"),
            "total_limit": limit
        },
        "publish": {
            "repo_id": "user/tiny-model",
            "model_variant": variant,
            "details": { "base_model": "base/tiny", "datasets": ["tiny-set"] }
        }
    });
    let path = dir.join("config.json");
    std::fs::write(&path, serde_json::to_vec_pretty(&raw)?)?;
    Ok(TunerConfig::from_file(&path)?)
}

#[tokio::test]
async fn test_full_training_run_publishes_latest_checkpoint() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let config = write_config(temp_dir.path(), "full", 2)?;

    let hooks = CheckpointHooks::new(config.checkpoint.clone(), config.publish.model_variant);
    let unet = TinyModel { weights: vec![1, 2] };
    let text_encoder = TinyModel { weights: vec![3] };

    let mut state = TrainingState {
        epoch: 1,
        ..Default::default()
    };
    for step in [100, 200, 300] {
        state.global_step = step;
        hooks
            .save_state(
                &[(ModelRole::Unet, &unet), (ModelRole::TextEncoder, &text_encoder)],
                &hooks.checkpoint_dir(step),
                &state,
            )
            .await?;
    }

    // Only the two most recent checkpoints survive
    let output = &config.checkpoint.output_dir;
    assert!(!output.join("checkpoint-100").exists());
    assert!(output.join("checkpoint-200").exists());
    assert!(output.join("checkpoint-300/unet").exists());

    let resumable = find_resumable_checkpoint(output, "checkpoint").await?.unwrap();
    let mut restored = TinyModel { weights: vec![] };
    let restored_state = hooks
        .load_state(&mut [(ModelRole::Unet, &mut restored)], &resumable.path)
        .await?
        .unwrap();
    assert_eq!(restored_state.global_step, 300);
    assert_eq!(restored.weights, vec![1, 2]);

    let hub = Arc::new(RecordingHub {
        flaky: Mutex::new(1),
        ..Default::default()
    });
    let manager = HubManager::new(config.publish.clone(), config.checkpoint.clone(), hub.clone()).await?;
    let images = ValidationImages::new()
        .with_group("corgi", vec![PreviewImage::from_png("corgi", PNG.to_vec())?])
        .with_group(
            "car",
            vec![
                PreviewImage::from_png("car-a", PNG.to_vec())?,
                PreviewImage::from_png("car-b", PNG.to_vec())?,
            ],
        );

    let report = manager
        .upload_latest_checkpoint(&images, &restored_state)
        .await?
        .unwrap();

    assert!(report.is_success());
    assert_eq!(report.model, UploadOutcome::Succeeded { attempts: 2 });
    assert_eq!(report.folder, output.join("checkpoint-300"));
    assert!(output.join("checkpoint-300/assets/image_2_1.png").exists());
    assert_eq!(
        *hub.uploaded.lock(),
        vec![
            "assets/image_0_0.png",
            "assets/image_1_0.png",
            "assets/image_2_1.png",
            "folder:checkpoint-300",
        ]
    );
    Ok(())
}

#[tokio::test]
async fn test_lora_training_run_round_trip() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let config = write_config(temp_dir.path(), "lora", 1)?;
    assert_eq!(config.publish.model_variant, ModelVariant::Lora);

    let hooks = CheckpointHooks::new(config.checkpoint.clone(), ModelVariant::Lora);
    let unet = TinyModel { weights: vec![5, 6, 7] };

    for step in [10, 20] {
        let state = TrainingState {
            global_step: step,
            epoch: 1,
            ..Default::default()
        };
        hooks
            .save_state(&[(ModelRole::Unet, &unet)], &hooks.checkpoint_dir(step), &state)
            .await?;
    }

    let names: Vec<String> = std::fs::read_dir(&config.checkpoint.output_dir)?
        .map(|e| e.map(|e| e.file_name().to_string_lossy().to_string()))
        .collect::<std::io::Result<_>>()?;
    assert_eq!(names, vec!["checkpoint-20"]);

    let mut restored = TinyModel { weights: vec![] };
    hooks
        .load_state(&mut [(ModelRole::Unet, &mut restored)], &hooks.checkpoint_dir(20))
        .await?;
    assert_eq!(restored.weights, vec![5, 6, 7]);
    Ok(())
}

#[tokio::test]
async fn test_cache_storage_from_config() -> Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let config = write_config(temp_dir.path(), "full", 2)?;

    let StorageBackendConfig::Local { root } = &config.storage.backend else {
        anyhow::bail!("expected a local backend");
    };
    let storage = LocalStorage::new(root).with_batch_concurrency(config.storage.batch_concurrency);

    let keys: Vec<String> = (0..8).map(|i| format!("vae/latents/img-{:03}.pt", i)).collect();
    let payloads: Vec<Payload> = (0..8)
        .map(|i| {
            if i % 2 == 0 {
                Payload::from(Bytes::from(vec![i as u8; 32]))
            } else {
                Payload::from(format!("caption {}", i))
            }
        })
        .collect();

    let report = storage.write_batch(keys, payloads).await?;
    assert!(report.is_complete());
    assert_eq!(report.written.len(), 8);

    assert!(storage.exists("img-003.pt").await);
    assert!(!storage.exists("img-100.pt").await);
    assert_eq!(storage.read("any/prefix/img-003.pt").await?, Bytes::from("caption 3"));

    let groups = storage.list_files("img-00[0-3].pt").await?;
    assert_eq!(groups.len(), 1);
    assert_eq!(groups[0].filenames.len(), 4);
    Ok(())
}
