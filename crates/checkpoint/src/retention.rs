//! Checkpoint retention
//!
//! Before a new checkpoint is written, the oldest ones are removed so that at
//! most `limit` remain once the new one exists.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, info, warn};
use tuner_core::{Error, Result};

use crate::discovery::{list_checkpoints, CheckpointDir};

/// Suffix of a checkpoint directory whose removal has started
const DELETING_SUFFIX: &str = ".deleting";

/// Maximum number of checkpoints kept on disk
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionPolicy {
    limit: Option<usize>,
}

impl RetentionPolicy {
    /// `None` keeps every checkpoint
    pub fn new(limit: Option<usize>) -> Self {
        Self { limit }
    }

    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Checkpoints to remove before one more is added
    ///
    /// `existing` must be sorted oldest first. With `count >= limit`, the
    /// oldest `count - limit + 1` are selected.
    pub fn plan<'a>(&self, existing: &'a [CheckpointDir]) -> &'a [CheckpointDir] {
        match self.limit {
            Some(limit) if existing.len() >= limit => {
                let remove = (existing.len() + 1).saturating_sub(limit).min(existing.len());
                &existing[..remove]
            }
            _ => &[],
        }
    }

    /// Remove the oldest checkpoints under `output_dir`
    ///
    /// `incoming` is the directory about to be written; it is not counted even
    /// if the caller already created it.
    pub async fn enforce(
        &self,
        output_dir: &Path,
        prefix: &str,
        incoming: Option<&Path>,
    ) -> Result<Vec<CheckpointDir>> {
        if self.limit.is_none() {
            return Ok(Vec::new());
        }

        sweep_interrupted(output_dir).await?;

        let incoming_name = incoming.and_then(|p| p.file_name());
        let existing: Vec<CheckpointDir> = list_checkpoints(output_dir, prefix)
            .await?
            .into_iter()
            .filter(|c| incoming_name.is_none() || c.path.file_name() != incoming_name)
            .collect();

        let removing = self.plan(&existing).to_vec();
        if removing.is_empty() {
            return Ok(removing);
        }

        info!(
            existing = existing.len(),
            removing = removing.len(),
            "Checkpoint limit reached, removing oldest checkpoints"
        );
        info!(
            checkpoints = %removing.iter().map(|c| c.name()).collect::<Vec<_>>().join(", "),
            "Removing checkpoints"
        );

        for checkpoint in &removing {
            remove_checkpoint(&checkpoint.path).await?;
        }

        Ok(removing)
    }
}

/// Hidden name a checkpoint is moved to while it is being deleted
fn deleting_path(path: &Path) -> Result<PathBuf> {
    let name = path.file_name().ok_or_else(|| Error::InvalidArgument {
        message: format!("{} is not a checkpoint directory", path.display()),
    })?;
    Ok(path.with_file_name(format!(
        ".{}{}",
        name.to_string_lossy(),
        DELETING_SUFFIX
    )))
}

/// Delete a checkpoint directory tree
///
/// The directory is renamed to a hidden name first, so an interrupted
/// deletion never leaves a partial tree under a checkpoint name.
pub async fn remove_checkpoint(path: &Path) -> Result<()> {
    let doomed = deleting_path(path)?;
    fs::rename(path, &doomed)
        .await
        .map_err(|e| Error::Storage {
            message: format!("Failed to retire checkpoint {}: {}", path.display(), e),
        })?;

    fs::remove_dir_all(&doomed)
        .await
        .map_err(|e| Error::Storage {
            message: format!("Failed to remove {}: {}", doomed.display(), e),
        })?;

    debug!(checkpoint = %path.display(), "Removed checkpoint");
    Ok(())
}

/// Finish deletions that were interrupted; returns how many were cleaned up
pub async fn sweep_interrupted(output_dir: &Path) -> Result<usize> {
    let mut entries = match fs::read_dir(output_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let mut swept = 0;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if !(name.starts_with('.') && name.ends_with(DELETING_SUFFIX)) {
            continue;
        }
        match fs::remove_dir_all(entry.path()).await {
            Ok(()) => swept += 1,
            Err(e) => warn!(%name, error = %e, "Failed to clean up interrupted deletion"),
        }
    }

    if swept > 0 {
        info!(swept, "Cleaned up interrupted checkpoint deletions");
    }
    Ok(swept)
}
