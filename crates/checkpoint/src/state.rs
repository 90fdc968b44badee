//! Persistence of the auxiliary training state

use std::path::Path;

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument, warn};
use tuner_core::{Error, Result, TrainingState};
use uuid::Uuid;

/// JSON file I/O for [`TrainingState`]
#[async_trait]
pub trait TrainingStateFile: Sized {
    /// Write the state atomically, stamping `saved_at`
    async fn save(&self, path: &Path) -> Result<()>;

    /// Read a previously saved state
    ///
    /// A missing file is not an error: training then starts from fresh
    /// counters, so `None` is returned after a warning.
    async fn load(path: &Path) -> Result<Option<Self>>;
}

#[async_trait]
impl TrainingStateFile for TrainingState {
    #[instrument(skip(self), fields(path = %path.display(), global_step = self.global_step))]
    async fn save(&self, path: &Path) -> Result<()> {
        let mut stamped = self.clone();
        stamped.saved_at = Some(Utc::now());
        let json = serde_json::to_vec_pretty(&stamped)?;

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| Error::InvalidArgument {
                message: format!("{} has no file name", path.display()),
            })?;
        let temp_path = path.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

        let mut file = fs::File::create(&temp_path).await?;
        file.write_all(&json).await?;
        file.sync_all().await?;
        drop(file);

        if let Err(e) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(Error::CheckpointWriteFailed {
                message: format!("Failed to persist {}: {}", path.display(), e),
            });
        }

        debug!(bytes = json.len(), "Saved training state");
        Ok(())
    }

    async fn load(path: &Path) -> Result<Option<Self>> {
        let data = match fs::read(path).await {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!(
                    path = %path.display(),
                    "Training state not found, continuing with fresh counters"
                );
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };

        let state = serde_json::from_slice(&data).map_err(|e| Error::CheckpointCorrupted {
            checkpoint: path.display().to_string(),
            reason: e.to_string(),
        })?;
        Ok(Some(state))
    }
}
