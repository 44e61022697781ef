//! Newline-delimited patch identifier lists (one file per split).

use crate::types::{BurnDatasetError, DatasetResult};
use std::fs;
use std::path::{Path, PathBuf};

/// Reads a patch list; blank lines are ignored and identifiers are trimmed.
pub fn read_patch_list(path: &Path) -> DatasetResult<Vec<String>> {
    let raw = fs::read_to_string(path).map_err(|e| BurnDatasetError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    let ids: Vec<String> = raw
        .trim()
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect();
    if ids.is_empty() {
        return Err(BurnDatasetError::EmptyList {
            path: path.to_path_buf(),
        });
    }
    Ok(ids)
}

/// Resolves identifiers against `root`; absolute identifiers are kept as-is.
pub fn resolve_patch_paths(root: &Path, ids: &[String]) -> Vec<PathBuf> {
    ids.iter()
        .map(|id| {
            let p = Path::new(id);
            if p.is_absolute() {
                p.to_path_buf()
            } else {
                root.join(p)
            }
        })
        .collect()
}

/// Reads a list and resolves it, defaulting the root to the list's own directory.
pub fn load_patch_list(path: &Path, root: Option<&Path>) -> DatasetResult<Vec<PathBuf>> {
    let ids = read_patch_list(path)?;
    let root = root
        .map(Path::to_path_buf)
        .or_else(|| path.parent().map(Path::to_path_buf))
        .unwrap_or_default();
    Ok(resolve_patch_paths(&root, &ids))
}
