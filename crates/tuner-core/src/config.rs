//! Configuration types
//!
//! Consumed by the storage, checkpoint and publishing crates. Loaded from a
//! JSON document with [`TunerConfig::from_file`] and checked with
//! [`TunerConfig::validate`].

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::{Error, ModelVariant, Result};

/// Upper bound for the default batch-write concurrency
const MAX_DEFAULT_BATCH_CONCURRENCY: usize = 16;

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TunerConfig {
    /// Object storage settings
    pub storage: StorageConfig,

    /// Checkpoint settings
    pub checkpoint: CheckpointConfig,

    /// Hub publishing settings
    pub publish: PublishConfig,
}

impl TunerConfig {
    /// Read a JSON configuration file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| Error::InvalidConfig {
            message: format!("Failed to read {}: {}", path.display(), e),
        })?;
        let config: TunerConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field invariants
    pub fn validate(&self) -> Result<()> {
        self.storage.validate()?;
        self.checkpoint.validate()?;
        self.publish.validate()
    }
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Storage backend type
    pub backend: StorageBackendConfig,

    /// Maximum number of concurrent writes issued by a batch write
    pub batch_concurrency: usize,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackendConfig::Local {
                root: PathBuf::from("./cache"),
            },
            batch_concurrency: default_batch_concurrency(),
        }
    }
}

impl StorageConfig {
    fn validate(&self) -> Result<()> {
        if self.batch_concurrency == 0 {
            return Err(Error::InvalidConfig {
                message: "storage.batch_concurrency must be at least 1".to_string(),
            });
        }
        match &self.backend {
            StorageBackendConfig::Local { root } if root.as_os_str().is_empty() => {
                Err(Error::InvalidConfig {
                    message: "storage.backend.local.root must not be empty".to_string(),
                })
            }
            StorageBackendConfig::S3(s3) => s3.validate(),
            _ => Ok(()),
        }
    }
}

/// Host parallelism, capped so a batch never floods the remote endpoint
pub fn default_batch_concurrency() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
        .min(MAX_DEFAULT_BATCH_CONCURRENCY)
}

/// Storage backend type
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackendConfig {
    /// Flat directory on the local filesystem
    Local { root: PathBuf },

    /// S3-compatible object store
    S3(S3Config),
}

/// Configuration for an S3-compatible bucket
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    /// S3 bucket name
    pub bucket: String,

    /// AWS region (default: "us-east-1")
    pub region: Option<String>,

    /// Optional custom endpoint URL (for MinIO, R2, LocalStack, etc.)
    pub endpoint_url: Option<String>,

    /// Static access key id; the default provider chain is used when unset
    pub access_key_id: Option<String>,

    /// Static secret access key
    #[serde(skip_serializing)]
    pub secret_access_key: Option<String>,

    /// Force path-style addressing (required for MinIO)
    pub force_path_style: bool,

    /// Maximum number of objects examined by a glob listing (None = whole bucket)
    pub list_scan_limit: Option<usize>,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: String::new(),
            region: Some("us-east-1".to_string()),
            endpoint_url: None,
            access_key_id: None,
            secret_access_key: None,
            force_path_style: false,
            list_scan_limit: None,
        }
    }
}

impl S3Config {
    fn validate(&self) -> Result<()> {
        if self.bucket.is_empty() {
            return Err(Error::InvalidConfig {
                message: "storage.backend.s3.bucket must not be empty".to_string(),
            });
        }
        if self.access_key_id.is_some() != self.secret_access_key.is_some() {
            return Err(Error::InvalidConfig {
                message: "S3 access_key_id and secret_access_key must be set together"
                    .to_string(),
            });
        }
        if self.list_scan_limit == Some(0) {
            return Err(Error::InvalidConfig {
                message: "storage.backend.s3.list_scan_limit must be positive".to_string(),
            });
        }
        Ok(())
    }
}

/// Checkpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckpointConfig {
    /// Directory that holds the `checkpoint-N` directories
    pub output_dir: PathBuf,

    /// Maximum number of checkpoints kept on disk (None = unlimited)
    pub total_limit: Option<usize>,

    /// Directory name prefix; checkpoints are named `{prefix}-{step}`
    pub prefix: String,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("./output"),
            total_limit: None,
            prefix: "checkpoint".to_string(),
        }
    }
}

impl CheckpointConfig {
    fn validate(&self) -> Result<()> {
        if self.total_limit == Some(0) {
            return Err(Error::InvalidConfig {
                message: "checkpoint.total_limit must be a positive integer".to_string(),
            });
        }
        if self.prefix.is_empty() || self.prefix.contains('/') {
            return Err(Error::InvalidConfig {
                message: format!("Invalid checkpoint prefix '{}'", self.prefix),
            });
        }
        Ok(())
    }
}

/// How preview images are named inside the repository
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetNaming {
    /// `image_{ordinal}_{index_in_group}.png`
    #[default]
    Positional,

    /// `{label}_{index_in_group}.png`
    Labelled,
}

/// Hub publishing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PublishConfig {
    /// Repository identifier, e.g. "user/my-model"
    pub repo_id: Option<String>,

    /// Fallback repository name when `repo_id` is unset
    pub project_name: Option<String>,

    /// Hub base URL
    pub endpoint: String,

    /// Create the repository as private
    pub private: bool,

    /// Access token; discovered from the environment when unset
    #[serde(skip_serializing)]
    pub token: Option<String>,

    /// Full model or adapter weights
    pub model_variant: ModelVariant,

    /// Attempts per upload unit
    pub max_attempts: u32,

    /// Pause between attempts
    #[serde(with = "duration_millis")]
    pub retry_delay: Duration,

    /// Preview image naming scheme
    pub asset_naming: AssetNaming,

    /// Optional webhook receiving progress messages
    pub webhook_url: Option<String>,

    /// Training details rendered into the model card and commit message
    pub details: TrainingDetails,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            repo_id: None,
            project_name: None,
            endpoint: "https://huggingface.co".to_string(),
            private: false,
            token: None,
            model_variant: ModelVariant::Full,
            max_attempts: 3,
            retry_delay: Duration::ZERO,
            asset_naming: AssetNaming::Positional,
            webhook_url: None,
            details: TrainingDetails::default(),
        }
    }
}

impl PublishConfig {
    /// Repository id, falling back to the project name
    pub fn resolved_repo_id(&self) -> Option<&str> {
        self.repo_id
            .as_deref()
            .or(self.project_name.as_deref())
            .filter(|id| !id.trim().is_empty())
    }

    fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(Error::InvalidConfig {
                message: "publish.max_attempts must be at least 1".to_string(),
            });
        }
        if self.endpoint.is_empty() {
            return Err(Error::InvalidConfig {
                message: "publish.endpoint must not be empty".to_string(),
            });
        }
        Ok(())
    }
}

/// Description of the training run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingDetails {
    /// Model family, e.g. "sdxl" or "deepfloyd-full"
    pub model_type: String,

    /// Base model the run started from
    pub base_model: String,

    /// VAE used for latents, when it differs from the base model's
    pub vae_model: Option<String>,

    pub learning_rate: f64,
    pub train_batch_size: usize,
    pub gradient_accumulation_steps: usize,
    pub prediction_type: String,
    pub rescale_betas_zero_snr: bool,
    pub timestep_spacing: String,

    /// Whether the text encoder was trained alongside the unet
    pub train_text_encoder: bool,

    /// Main validation prompt
    pub validation_prompt: Option<String>,

    /// Additional validation prompts
    pub validation_prompts: Vec<String>,

    /// Dataset identifiers used for training
    pub datasets: Vec<String>,
}

impl Default for TrainingDetails {
    fn default() -> Self {
        Self {
            model_type: "sdxl".to_string(),
            base_model: String::new(),
            vae_model: None,
            learning_rate: 1e-6,
            train_batch_size: 1,
            gradient_accumulation_steps: 1,
            prediction_type: "epsilon".to_string(),
            rescale_betas_zero_snr: false,
            timestep_spacing: "trailing".to_string(),
            train_text_encoder: false,
            validation_prompt: None,
            validation_prompts: Vec::new(),
            datasets: Vec::new(),
        }
    }
}

/// Duration (de)serialization as integer milliseconds
mod duration_millis {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TunerConfig::default();
        assert_eq!(config.publish.max_attempts, 3);
        assert_eq!(config.publish.retry_delay, Duration::ZERO);
        assert_eq!(config.checkpoint.prefix, "checkpoint");
        assert!(config.checkpoint.total_limit.is_none());
        assert!(config.storage.batch_concurrency >= 1);
        assert!(config.storage.batch_concurrency <= MAX_DEFAULT_BATCH_CONCURRENCY);
        config.validate().unwrap();
    }

    #[test]
    fn test_parse_s3_config() {
        let json = r#"{
            "storage": {
                "backend": {"s3": {"bucket": "training", "endpoint_url": "http://localhost:9000",
                                   "access_key_id": "minio", "secret_access_key": "minio123"}},
                "batch_concurrency": 4
            },
            "checkpoint": {"output_dir": "/data/out", "total_limit": 3},
            "publish": {"repo_id": "me/model", "model_variant": "lora", "retry_delay": 250}
        }"#;
        let config: TunerConfig = serde_json::from_str(json).unwrap();
        config.validate().unwrap();

        match &config.storage.backend {
            StorageBackendConfig::S3(s3) => {
                assert_eq!(s3.bucket, "training");
                assert_eq!(s3.region.as_deref(), Some("us-east-1"));
                assert_eq!(s3.endpoint_url.as_deref(), Some("http://localhost:9000"));
            }
            other => panic!("unexpected backend {:?}", other),
        }
        assert_eq!(config.checkpoint.total_limit, Some(3));
        assert_eq!(config.publish.model_variant, ModelVariant::Lora);
        assert_eq!(config.publish.retry_delay, Duration::from_millis(250));
    }

    #[test]
    fn test_secrets_not_serialized() {
        let mut config = TunerConfig::default();
        config.publish.token = Some("hf_secret".to_string());
        config.storage.backend = StorageBackendConfig::S3(S3Config {
            bucket: "b".to_string(),
            access_key_id: Some("id".to_string()),
            secret_access_key: Some("shh".to_string()),
            ..Default::default()
        });

        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("hf_secret"));
        assert!(!json.contains("shh"));
    }

    #[test]
    fn test_validate_rejects_zero_limit() {
        let mut config = TunerConfig::default();
        config.checkpoint.total_limit = Some(0);
        assert!(matches!(config.validate(), Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_validate_rejects_half_credentials() {
        let mut config = TunerConfig::default();
        config.storage.backend = StorageBackendConfig::S3(S3Config {
            bucket: "b".to_string(),
            access_key_id: Some("id".to_string()),
            ..Default::default()
        });
        assert!(matches!(config.validate(), Err(Error::InvalidConfig { .. })));
    }

    #[test]
    fn test_resolved_repo_id_fallback() {
        let mut publish = PublishConfig {
            project_name: Some("my-project".to_string()),
            ..Default::default()
        };
        assert_eq!(publish.resolved_repo_id(), Some("my-project"));

        publish.repo_id = Some("me/model".to_string());
        assert_eq!(publish.resolved_repo_id(), Some("me/model"));

        publish.repo_id = None;
        publish.project_name = Some("  ".to_string());
        assert_eq!(publish.resolved_repo_id(), None);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(&path, r#"{"checkpoint": {"total_limit": 2}}"#).unwrap();

        let config = TunerConfig::from_file(&path).unwrap();
        assert_eq!(config.checkpoint.total_limit, Some(2));

        let missing = TunerConfig::from_file(dir.path().join("missing.json"));
        assert!(matches!(missing, Err(Error::InvalidConfig { .. })));
    }
}
