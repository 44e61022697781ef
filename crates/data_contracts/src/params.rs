use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

fn default_shuffle() -> bool {
    true
}

fn default_model() -> String {
    "unet".to_string()
}

fn default_base_channels() -> usize {
    32
}

fn default_depth() -> usize {
    4
}

fn default_norm_groups() -> usize {
    8
}

/// Data loader options (`loader_opts` section of `params.json`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoaderOpts {
    pub batch_size: usize,
    #[serde(default = "default_shuffle")]
    pub shuffle: bool,
    #[serde(default)]
    pub num_workers: usize,
    pub num_channels: usize,
}

/// Training options (`train_opts` section of `params.json`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrainOpts {
    /// Loss name: one of dice, ce, jaccard, tversky.
    pub loss: String,
}

/// Architecture options (`model_opts` section of `params.json`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModelOpts {
    #[serde(default = "default_model")]
    pub model: String,
    pub num_classes: usize,
    #[serde(default = "default_base_channels")]
    pub base_channels: usize,
    #[serde(default = "default_depth")]
    pub depth: usize,
    #[serde(default = "default_norm_groups")]
    pub norm_groups: usize,
}

/// Run parameters shared between the original training run and fine-tuning.
///
/// Unknown keys are ignored so a full training `params.json` can be passed as-is.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FinetuneParams {
    pub patch_size: usize,
    pub loader_opts: LoaderOpts,
    pub train_opts: TrainOpts,
    pub model_opts: ModelOpts,
}

#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("failed to read params file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse params file {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("model_opts.norm_groups ({groups}) must divide model_opts.base_channels ({channels})")]
    NormGroups { groups: usize, channels: usize },
    #[error("train_opts.loss is empty")]
    EmptyLoss,
}

impl FinetuneParams {
    pub fn from_path(path: &Path) -> Result<Self, ParamsError> {
        let raw = std::fs::read(path).map_err(|source| ParamsError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let params: FinetuneParams =
            serde_json::from_slice(&raw).map_err(|source| ParamsError::Json {
                path: path.to_path_buf(),
                source,
            })?;
        params.validate()?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<(), ParamsError> {
        let positive = [
            ("patch_size", self.patch_size),
            ("loader_opts.batch_size", self.loader_opts.batch_size),
            ("loader_opts.num_channels", self.loader_opts.num_channels),
            ("model_opts.num_classes", self.model_opts.num_classes),
            ("model_opts.base_channels", self.model_opts.base_channels),
            ("model_opts.depth", self.model_opts.depth),
            ("model_opts.norm_groups", self.model_opts.norm_groups),
        ];
        for (field, value) in positive {
            if value == 0 {
                return Err(ParamsError::Zero { field });
            }
        }
        if self.model_opts.base_channels % self.model_opts.norm_groups != 0 {
            return Err(ParamsError::NormGroups {
                groups: self.model_opts.norm_groups,
                channels: self.model_opts.base_channels,
            });
        }
        if self.train_opts.loss.trim().is_empty() {
            return Err(ParamsError::EmptyLoss);
        }
        Ok(())
    }
}
