//! hub-publish entry point
//!
//! Uploads the latest checkpoint of a training run (or the final model with
//! `--final`) to the Hugging Face Hub.

use std::path::PathBuf;

use checkpoint::TrainingStateFile;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use publishing::{HubManager, PreviewImage, ValidationImages};
use tuner_core::{TrainingState, TunerConfig};

#[derive(Debug, Parser)]
#[command(name = "hub-publish", version, about = "Publish a training run to the Hugging Face Hub")]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: PathBuf,

    /// Upload the final model instead of the latest checkpoint
    #[arg(long = "final")]
    final_model: bool,

    /// Training state used for the commit message
    #[arg(long)]
    state: Option<PathBuf>,

    /// Preview image as `label=path.png` (or just a path)
    #[arg(short, long = "image", value_name = "LABEL=PATH")]
    images: Vec<String>,
}

/// Split `label=path`, using the file stem when no label is given
fn parse_image_arg(arg: &str) -> (String, PathBuf) {
    match arg.split_once('=') {
        Some((label, path)) if !label.is_empty() => (label.to_string(), PathBuf::from(path)),
        _ => {
            let path = PathBuf::from(arg.trim_start_matches('='));
            let label = path
                .file_stem()
                .map(|s| s.to_string_lossy().to_string())
                .unwrap_or_else(|| "image".to_string());
            (label, path)
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "hub_publish=info,publishing=info,checkpoint=info,storage=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = TunerConfig::from_file(&args.config)?;

    let mut images = ValidationImages::new();
    for arg in &args.images {
        let (label, path) = parse_image_arg(arg);
        let image = PreviewImage::from_file(&path).await?;
        images.push(label, vec![image]);
    }

    let state = match &args.state {
        Some(path) => TrainingState::load(path).await?.unwrap_or_default(),
        None => TrainingState::default(),
    };

    let manager = HubManager::connect(config.publish, config.checkpoint).await?;

    let report = if args.final_model {
        Some(manager.upload_model(&images, &state, None).await?)
    } else {
        manager.upload_latest_checkpoint(&images, &state).await?
    };

    match report {
        Some(report) if report.is_success() => {
            tracing::info!(url = %report.repo.url, "Publish complete");
            Ok(())
        }
        Some(report) => Err(format!(
            "publish to {} incomplete: model {:?}",
            report.repo.repo_id, report.model
        )
        .into()),
        None => {
            tracing::info!("Nothing to publish");
            Ok(())
        }
    }
}
