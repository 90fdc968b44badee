//! Validation preview images and their names in the repository

use std::collections::HashSet;
use std::path::Path;

use bytes::Bytes;
use tuner_core::config::AssetNaming;
use tuner_core::{Error, Result};

const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', b'\r', b'\n', 0x1a, b'\n'];

/// Repository sub-directory holding preview images
pub const ASSETS_DIR: &str = "assets";

/// An encoded PNG preview image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreviewImage {
    data: Bytes,
}

impl PreviewImage {
    /// Wrap PNG-encoded bytes, checking the PNG signature
    pub fn from_png(name: &str, data: impl Into<Bytes>) -> Result<Self> {
        let data = data.into();
        if !data.starts_with(&PNG_SIGNATURE) {
            return Err(Error::InvalidImage {
                name: name.to_string(),
                reason: "not PNG-encoded".to_string(),
            });
        }
        Ok(Self { data })
    }

    pub async fn from_file(path: &Path) -> Result<Self> {
        let data = tokio::fs::read(path).await?;
        Self::from_png(&path.display().to_string(), data)
    }

    pub fn as_bytes(&self) -> &Bytes {
        &self.data
    }
}

/// Preview images grouped by the prompt (shortname) that produced them
#[derive(Debug, Clone, Default)]
pub struct ValidationImages {
    groups: Vec<(String, Vec<PreviewImage>)>,
}

impl ValidationImages {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, label: impl Into<String>, images: Vec<PreviewImage>) {
        self.groups.push((label.into(), images));
    }

    pub fn with_group(mut self, label: impl Into<String>, images: Vec<PreviewImage>) -> Self {
        self.push(label, images);
        self
    }

    pub fn groups(&self) -> &[(String, Vec<PreviewImage>)] {
        &self.groups
    }

    /// Total number of images across all groups
    pub fn len(&self) -> usize {
        self.groups.iter().map(|(_, images)| images.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Where one preview image goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedAsset {
    pub label: String,
    /// Running position across all groups
    pub ordinal: usize,
    /// Position within its group
    pub index: usize,
    pub file_name: String,
}

impl PlannedAsset {
    pub fn path_in_repo(&self) -> String {
        format!("{}/{}", ASSETS_DIR, self.file_name)
    }
}

/// Lowercase ASCII slug of a prompt label
pub fn slug(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    for c in label.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
        } else if !out.is_empty() && !out.ends_with('-') {
            out.push('-');
        }
    }
    let trimmed = out.trim_end_matches('-');
    if trimmed.is_empty() {
        "image".to_string()
    } else {
        trimmed.to_string()
    }
}

/// File names for every image, in upload order
///
/// Positional names are `image_{ordinal}_{index}.png`. Labelled names are
/// `{slug}_{index}.png`; a name already taken gets the ordinal appended.
pub fn plan_assets(images: &ValidationImages, naming: AssetNaming) -> Vec<PlannedAsset> {
    let mut planned = Vec::with_capacity(images.len());
    let mut taken = HashSet::new();
    let mut ordinal = 0;

    for (label, group) in images.groups() {
        for index in 0..group.len() {
            let file_name = match naming {
                AssetNaming::Positional => format!("image_{}_{}.png", ordinal, index),
                AssetNaming::Labelled => {
                    let name = format!("{}_{}.png", slug(label), index);
                    if taken.contains(&name) {
                        format!("{}_{}_{}.png", slug(label), index, ordinal)
                    } else {
                        name
                    }
                }
            };
            taken.insert(file_name.clone());
            planned.push(PlannedAsset {
                label: label.clone(),
                ordinal,
                index,
                file_name,
            });
            ordinal += 1;
        }
    }

    planned
}

#[cfg(test)]
pub(crate) fn test_png(seed: u8) -> PreviewImage {
    let mut data = PNG_SIGNATURE.to_vec();
    data.extend_from_slice(&[seed; 16]);
    PreviewImage { data: data.into() }
}
