//! Locating checkpoint directories on disk
//!
//! Checkpoints are directories named `{prefix}-{step}`. They are always
//! ordered by the numeric step, never by the directory name.

use std::path::{Path, PathBuf};

use tokio::fs;
use tracing::{debug, warn};
use tuner_core::{Result, Step, TRAINING_STATE_FILE};

/// A checkpoint directory and the step it was taken at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointDir {
    pub step: Step,
    pub path: PathBuf,
}

impl CheckpointDir {
    /// Directory name, e.g. `checkpoint-1200`
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }
}

/// Parse the step out of `{prefix}-{step}`
pub fn parse_step(name: &str, prefix: &str) -> Option<Step> {
    let digits = name.strip_prefix(prefix)?.strip_prefix('-')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}

/// Checkpoint directories directly under `output_dir`, oldest first
///
/// A missing `output_dir` yields an empty list.
pub async fn list_checkpoints(output_dir: &Path, prefix: &str) -> Result<Vec<CheckpointDir>> {
    let mut checkpoints = Vec::new();

    let mut entries = match fs::read_dir(output_dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(checkpoints),
        Err(e) => return Err(e.into()),
    };

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name().to_string_lossy().to_string();
        if !name.starts_with(prefix) {
            continue;
        }
        let is_dir = entry.metadata().await.map(|m| m.is_dir()).unwrap_or(false);
        if !is_dir {
            continue;
        }
        match parse_step(&name, prefix) {
            Some(step) => checkpoints.push(CheckpointDir {
                step,
                path: entry.path(),
            }),
            None => warn!(%name, "Ignoring directory without a numeric step suffix"),
        }
    }

    checkpoints.sort_by_key(|c| c.step);
    debug!(count = checkpoints.len(), dir = %output_dir.display(), "Listed checkpoints");
    Ok(checkpoints)
}

/// Highest-step checkpoint anywhere below `root`
pub async fn find_latest_checkpoint(root: &Path, prefix: &str) -> Result<Option<CheckpointDir>> {
    let mut latest: Option<CheckpointDir> = None;
    let mut stack = vec![root.to_path_buf()];

    while let Some(dir) = stack.pop() {
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if dir == root && e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) if dir == root => return Err(e.into()),
            Err(_) => continue,
        };

        while let Ok(Some(entry)) = entries.next_entry().await {
            let is_dir = entry.metadata().await.map(|m| m.is_dir()).unwrap_or(false);
            if !is_dir {
                continue;
            }

            let path = entry.path();
            let name = entry.file_name().to_string_lossy().to_string();
            if let Some(step) = parse_step(&name, prefix) {
                let newer = latest
                    .as_ref()
                    .map(|best| (step, &path) > (best.step, &best.path))
                    .unwrap_or(true);
                if newer {
                    latest = Some(CheckpointDir {
                        step,
                        path: path.clone(),
                    });
                }
            }
            stack.push(path);
        }
    }

    Ok(latest)
}

/// Latest checkpoint that can be resumed from
///
/// Directories without a training-state file are treated as corrupt (for
/// example a save that was interrupted) and skipped.
pub async fn find_resumable_checkpoint(
    output_dir: &Path,
    prefix: &str,
) -> Result<Option<CheckpointDir>> {
    for checkpoint in list_checkpoints(output_dir, prefix).await?.into_iter().rev() {
        if fs::metadata(checkpoint.path.join(TRAINING_STATE_FILE)).await.is_ok() {
            return Ok(Some(checkpoint));
        }
        warn!(
            checkpoint = %checkpoint.path.display(),
            "Skipping checkpoint without training state"
        );
    }
    Ok(None)
}
