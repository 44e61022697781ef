//! Core types and error definitions for burn_dataset.

use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, BurnDatasetError>;

#[derive(Debug, Error)]
pub enum BurnDatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("patch list {path} contains no patch identifiers")]
    EmptyList { path: PathBuf },
    #[error("malformed patch {path}: {msg}")]
    Malformed { path: PathBuf, msg: String },
    #[error(
        "patch {path} is {found:?} (channels, height, width), expected {expected:?}"
    )]
    ShapeMismatch {
        path: PathBuf,
        expected: (usize, usize, usize),
        found: (usize, usize, usize),
    },
    #[error("{0}")]
    Other(String),
}

/// One training/validation patch held in host memory.
#[derive(Debug, Clone, PartialEq)]
pub struct PatchSample {
    /// Source identifier (file path for on-disk patches).
    pub id: String,
    pub channels: usize,
    pub height: usize,
    pub width: usize,
    /// Input image in CHW layout.
    pub image: Vec<f32>,
    /// Single-channel label plane (HW) holding integral class ids.
    pub label: Vec<f32>,
}

impl PatchSample {
    pub fn dims(&self) -> (usize, usize, usize) {
        (self.channels, self.height, self.width)
    }

    /// Checks that the buffers agree with the declared dimensions.
    pub fn check_buffers(&self) -> Result<(), String> {
        let plane = self.height * self.width;
        if self.image.len() != self.channels * plane {
            return Err(format!(
                "image buffer holds {} values, expected {}",
                self.image.len(),
                self.channels * plane
            ));
        }
        if self.label.len() != plane {
            return Err(format!(
                "label buffer holds {} values, expected {}",
                self.label.len(),
                plane
            ));
        }
        Ok(())
    }
}

/// Expected per-sample geometry, checked for every loaded patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PatchGeometry {
    pub channels: usize,
    pub patch_size: usize,
}

impl PatchGeometry {
    pub fn dims(&self) -> (usize, usize, usize) {
        (self.channels, self.patch_size, self.patch_size)
    }
}
