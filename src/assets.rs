//! Asset discovery
//!
//! A collection is a flat set of `<stem>.<image ext>` / `<stem>.json` pairs.
//! Pairs are ordered by numeric stem and given dense indices starting at 0.

use crate::error::{DeployError, DeployResult};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::warn;

const IMAGE_EXTENSIONS: &[&str] = &["png", "gif", "jpg", "jpeg"];
const DESCRIPTOR_EXTENSION: &str = "json";

/// One collection item on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetPair {
    pub index: u32,
    pub image: PathBuf,
    pub descriptor: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Image,
    Descriptor,
}

fn classify(path: &Path) -> Option<Kind> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        Some(Kind::Image)
    } else if ext == DESCRIPTOR_EXTENSION {
        Some(Kind::Descriptor)
    } else {
        None
    }
}

/// Numeric stems first in numeric order, then the rest lexicographically
fn stem_order(a: &str, b: &str) -> Ordering {
    match (a.parse::<u64>(), b.parse::<u64>()) {
        (Ok(x), Ok(y)) => x.cmp(&y).then_with(|| a.cmp(b)),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => a.cmp(b),
    }
}

/// Pair images with descriptors and assign indices
pub fn collect_pairs(files: &[PathBuf]) -> DeployResult<Vec<AssetPair>> {
    let mut images: BTreeMap<String, PathBuf> = BTreeMap::new();
    let mut descriptors: BTreeMap<String, PathBuf> = BTreeMap::new();

    for file in files {
        let Some(kind) = classify(file) else {
            warn!("Skipping {}: not an image or descriptor", file.display());
            continue;
        };
        let stem = file
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| DeployError::config(format!("invalid file name: {}", file.display())))?
            .to_string();

        let slot = match kind {
            Kind::Image => &mut images,
            Kind::Descriptor => &mut descriptors,
        };
        if let Some(previous) = slot.insert(stem.clone(), file.clone()) {
            return Err(DeployError::config(format!(
                "duplicate asset {:?}: {} and {}",
                stem,
                previous.display(),
                file.display()
            )));
        }
    }

    if images.len() != descriptors.len() {
        return Err(DeployError::config(format!(
            "found {} image(s) but {} descriptor(s); every image needs a matching .json",
            images.len(),
            descriptors.len()
        )));
    }

    let mut stems: Vec<String> = images.keys().cloned().collect();
    stems.sort_by(|a, b| stem_order(a, b));

    stems
        .into_iter()
        .enumerate()
        .map(|(index, stem)| {
            let descriptor = descriptors.remove(&stem).ok_or_else(|| {
                DeployError::config(format!("image {:?} has no matching descriptor", stem))
            })?;
            let image = images.remove(&stem).ok_or_else(|| {
                DeployError::Internal(format!("image {:?} vanished while pairing", stem))
            })?;
            Ok(AssetPair {
                index: index as u32,
                image,
                descriptor,
            })
        })
        .collect()
}

/// Regular files in `dir`, sorted by path
pub async fn list_directory(dir: &Path) -> DeployResult<Vec<PathBuf>> {
    let mut entries = fs::read_dir(dir).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            DeployError::PathNotFound(dir.to_path_buf())
        } else {
            DeployError::io(format!("reading directory {}", dir.display()), e)
        }
    })?;

    let mut files = Vec::new();
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| DeployError::io(format!("reading directory {}", dir.display()), e))?
    {
        let file_type = entry
            .file_type()
            .await
            .map_err(|e| DeployError::io(format!("inspecting {}", entry.path().display()), e))?;
        if file_type.is_file() {
            files.push(entry.path());
        }
    }
    files.sort();
    Ok(files)
}
