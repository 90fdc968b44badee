//! Adapter (LoRA) weight files
//!
//! Adapter layers from the unet and the text encoder are stored together in a
//! single safetensors file, with tensor names prefixed by the owning model.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};

use bytes::Bytes;
use safetensors::tensor::{Dtype, TensorView};
use safetensors::SafeTensors;
use tokio::fs;
use tracing::{debug, info, instrument};
use tuner_core::{Error, Result};

/// Adapter weight file written into every adapter checkpoint
pub const LORA_WEIGHTS_FILE: &str = "pytorch_lora_weights.safetensors";

const UNET_PREFIX: &str = "unet.";
const TEXT_ENCODER_PREFIX: &str = "text_encoder.";

/// One adapter tensor in raw little-endian layout
#[derive(Debug, Clone, PartialEq)]
pub struct AdapterTensor {
    pub dtype: Dtype,
    pub shape: Vec<usize>,
    pub data: Bytes,
}

impl AdapterTensor {
    pub fn new(dtype: Dtype, shape: Vec<usize>, data: impl Into<Bytes>) -> Self {
        Self {
            dtype,
            shape,
            data: data.into(),
        }
    }

    /// f32 tensor from values
    pub fn from_f32(shape: Vec<usize>, values: &[f32]) -> Self {
        let data: Vec<u8> = values.iter().flat_map(|v| v.to_le_bytes()).collect();
        Self::new(Dtype::F32, shape, data)
    }
}

/// Adapter layers keyed by layer name
pub type AdapterLayers = BTreeMap<String, AdapterTensor>;

/// Adapter layers of both models, as read back from disk
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoraWeights {
    pub unet: AdapterLayers,
    pub text_encoder: AdapterLayers,
}

impl LoraWeights {
    pub fn is_empty(&self) -> bool {
        self.unet.is_empty() && self.text_encoder.is_empty()
    }
}

/// Serialize adapter layers into `dir/pytorch_lora_weights.safetensors`
#[instrument(skip(unet, text_encoder), fields(dir = %dir.display()))]
pub async fn save_lora_weights(
    dir: &Path,
    unet: Option<&AdapterLayers>,
    text_encoder: Option<&AdapterLayers>,
) -> Result<PathBuf> {
    if unet.is_none() && text_encoder.is_none() {
        return Err(Error::CheckpointWriteFailed {
            message: "No adapter layers to save".to_string(),
        });
    }

    let mut named: Vec<(String, &AdapterTensor)> = Vec::new();
    for (prefix, layers) in [(UNET_PREFIX, unet), (TEXT_ENCODER_PREFIX, text_encoder)] {
        if let Some(layers) = layers {
            named.extend(layers.iter().map(|(name, t)| (format!("{}{}", prefix, name), t)));
        }
    }

    let views = named
        .iter()
        .map(|(name, t)| {
            TensorView::new(t.dtype, t.shape.clone(), &t.data)
                .map(|view| (name.as_str(), view))
                .map_err(|e| Error::CheckpointWriteFailed {
                    message: format!("Invalid adapter tensor '{}': {}", name, e),
                })
        })
        .collect::<Result<Vec<_>>>()?;

    let mut metadata = HashMap::new();
    metadata.insert("format".to_string(), "pt".to_string());

    let bytes = safetensors::serialize(views, Some(metadata)).map_err(|e| {
        Error::Serialization(format!("Failed to serialize adapter weights: {}", e))
    })?;

    fs::create_dir_all(dir).await?;
    let path = dir.join(LORA_WEIGHTS_FILE);
    let temp_path = dir.join(format!(".{}.tmp", LORA_WEIGHTS_FILE));
    fs::write(&temp_path, &bytes).await?;
    fs::rename(&temp_path, &path).await?;

    info!(
        tensors = named.len(),
        size_bytes = bytes.len(),
        "Saved adapter weights"
    );
    Ok(path)
}

/// Read adapter layers back from `dir/pytorch_lora_weights.safetensors`
///
/// Tensors without a known model prefix are ignored.
#[instrument(fields(dir = %dir.display()))]
pub async fn load_lora_weights(dir: &Path) -> Result<LoraWeights> {
    let path = dir.join(LORA_WEIGHTS_FILE);
    let data = match fs::read(&path).await {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::CheckpointNotFound {
                checkpoint: path.display().to_string(),
            })
        }
        Err(e) => return Err(e.into()),
    };

    let tensors = SafeTensors::deserialize(&data).map_err(|e| Error::CheckpointCorrupted {
        checkpoint: path.display().to_string(),
        reason: e.to_string(),
    })?;

    let mut weights = LoraWeights::default();
    for (name, view) in tensors.tensors() {
        let tensor = AdapterTensor::new(
            view.dtype(),
            view.shape().to_vec(),
            Bytes::copy_from_slice(view.data()),
        );
        if let Some(layer) = name.strip_prefix(UNET_PREFIX) {
            weights.unet.insert(layer.to_string(), tensor);
        } else if let Some(layer) = name.strip_prefix(TEXT_ENCODER_PREFIX) {
            weights.text_encoder.insert(layer.to_string(), tensor);
        } else {
            debug!(%name, "Skipping tensor without a model prefix");
        }
    }

    Ok(weights)
}
