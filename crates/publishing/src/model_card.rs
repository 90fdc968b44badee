//! README.md model card pushed with every upload

use std::fmt::Write;
use std::path::{Path, PathBuf};

use tuner_core::config::TrainingDetails;
use tuner_core::{ModelVariant, Result};

use crate::images::PlannedAsset;

pub const MODEL_CARD_FILE: &str = "README.md";

/// Model card contents
#[derive(Debug, Clone)]
pub struct ModelCard<'a> {
    pub repo_id: &'a str,
    pub details: &'a TrainingDetails,
    pub variant: ModelVariant,
    pub assets: &'a [PlannedAsset],
}

impl ModelCard<'_> {
    /// Markdown with YAML front matter
    pub fn render(&self) -> String {
        let d = self.details;
        let mut out = String::new();

        out.push_str("---\n");
        out.push_str("license: creativeml-openrail-m\n");
        let _ = writeln!(out, "base_model: \"{}\"", d.base_model);
        out.push_str("tags:\n");
        for tag in ["stable-diffusion", "stable-diffusion-diffusers", "text-to-image", "diffusers"] {
            let _ = writeln!(out, "  - {}", tag);
        }
        let _ = writeln!(
            out,
            "  - {}",
            if self.variant.is_adapter() { "lora" } else { "full" }
        );
        out.push_str("inference: true\n");
        out.push_str("---\n\n");

        let _ = writeln!(out, "# {}\n", self.repo_id);
        let kind = if self.variant.is_adapter() {
            "a LoRA adapter"
        } else {
            "a full-rank finetune"
        };
        let _ = writeln!(
            out,
            "This is {} derived from [{}](https://huggingface.co/{}).\n",
            kind, d.base_model, d.base_model
        );
        let _ = writeln!(
            out,
            "The text encoder **{}** trained.\n",
            if d.train_text_encoder { "was" } else { "was not" }
        );

        if let Some(prompt) = &d.validation_prompt {
            out.push_str("The main validation prompt used during training was:\n\n");
            let _ = writeln!(out, "```\n{}\n```\n", prompt);
        }

        if !d.validation_prompts.is_empty() {
            out.push_str("## Validation prompts\n\n");
            for prompt in &d.validation_prompts {
                let _ = writeln!(out, "- {}", prompt);
            }
            out.push('\n');
        }

        if !self.assets.is_empty() {
            out.push_str("## Gallery\n\n");
            for asset in self.assets {
                let _ = writeln!(out, "![{}](./{})", asset.label, asset.path_in_repo());
            }
        }

        out
    }

    /// Write `README.md` into `folder`
    pub async fn write(&self, folder: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(folder).await?;
        let path = folder.join(MODEL_CARD_FILE);
        tokio::fs::write(&path, self.render()).await?;
        Ok(path)
    }
}
