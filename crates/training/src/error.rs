use burn_dataset::BurnDatasetError;
use data_contracts::ParamsError;
use std::path::PathBuf;
use thiserror::Error;

pub type FinetuneResult<T> = std::result::Result<T, FinetuneError>;

/// Checkpoints, patch lists, or patch files that cannot be used.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("checkpoint not found: {path}")]
    MissingCheckpoint { path: PathBuf },
    #[error("failed to read checkpoint {path}: {message}")]
    Recorder { path: PathBuf, message: String },
    #[error("checkpoint {path} has no parameter `{name}`")]
    MissingParameter { path: PathBuf, name: String },
    #[error("checkpoint {path}: parameter `{name}` has shape {found:?}, expected {expected:?}")]
    ShapeMismatch {
        path: PathBuf,
        name: String,
        expected: Vec<usize>,
        found: Vec<usize>,
    },
    #[error(transparent)]
    Dataset(#[from] BurnDatasetError),
}

/// Invalid run settings; always raised before any data is read.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("unsupported loss `{name}` (expected one of: {})", options.join(", "))]
    UnsupportedLoss {
        name: String,
        options: &'static [&'static str],
    },
    #[error("unknown architecture `{0}` (only `unet` is supported)")]
    UnknownArchitecture(String),
    #[error(
        "crop margins {input}/{label} do not fit a {patch_size}px patch: \
         network output is {output:?}, labels would be {label_size:?}"
    )]
    CropMismatch {
        patch_size: usize,
        input: usize,
        label: usize,
        output: Option<usize>,
        label_size: Option<usize>,
    },
    #[error("{0} must be > 0")]
    NonPositive(&'static str),
    #[error("backend-wgpu feature not enabled; rebuild with --features backend-wgpu or choose ndarray backend")]
    Backend,
    #[error(transparent)]
    Params(#[from] ParamsError),
}

/// Failures inside a forward/backward step; the run is aborted.
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("shape mismatch: {0}")]
    Shape(String),
    #[error("loss diverged to {value} at epoch {epoch}, batch {batch}")]
    NonFinite { epoch: usize, batch: usize, value: f64 },
    #[error("label value {value} at epoch {epoch}, batch {batch} is not a class id in 0..{classes}")]
    InvalidLabel {
        epoch: usize,
        batch: usize,
        value: f32,
        classes: usize,
    },
    #[error("{phase} phase of epoch {epoch} yielded no batches")]
    EmptyPhase { epoch: usize, phase: String },
    #[error("metric: {0}")]
    Metric(String),
    #[error("failed to read tensor back to host: {0}")]
    Readback(String),
}

/// Failures writing run outputs.
#[derive(Debug, Error)]
pub enum IoError {
    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write checkpoint {path}: {message}")]
    Checkpoint { path: PathBuf, message: String },
    #[error("failed to write metrics to {path}: {source}")]
    Metrics {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Error)]
pub enum FinetuneError {
    #[error(transparent)]
    Load(#[from] LoadError),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Compute(#[from] ComputeError),
    #[error(transparent)]
    Io(#[from] IoError),
}

impl From<BurnDatasetError> for FinetuneError {
    fn from(err: BurnDatasetError) -> Self {
        FinetuneError::Load(LoadError::Dataset(err))
    }
}
