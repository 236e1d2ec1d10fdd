//! Resolving the set of images a run should process.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::AppError;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp", "tiff"];

pub fn is_image(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// Explicit `paths` plus every image directly inside `dir`, sorted and
/// without duplicates. Explicit paths are taken as given, whatever their
/// extension.
pub fn collect_inputs(paths: &[PathBuf], dir: Option<&Path>) -> Result<Vec<PathBuf>, AppError> {
    let mut inputs: BTreeSet<PathBuf> = paths.iter().cloned().collect();

    if let Some(dir) = dir {
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            if path.is_file() && is_image(&path) {
                inputs.insert(path);
            }
        }
        debug!(dir = %dir.display(), found = inputs.len(), "listed input directory");
    }

    if inputs.is_empty() {
        return Err(AppError::NoInputs);
    }
    Ok(inputs.into_iter().collect())
}
