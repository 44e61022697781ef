#![recursion_limit = "256"]

//! Recalibration fine-tuning of a frozen segmentation U-Net.
//!
//! The pretrained base is loaded once and frozen; only the per-channel
//! `gamma`/`beta` recalibration is optimised. Each epoch runs a TRAIN and a
//! VALIDATE phase, and the recalibration with the best validation mean IoU
//! is restored at the end.

pub mod checkpoint;
pub mod crop;
pub mod error;
pub mod finetune;
pub mod loss;
pub mod metrics;
pub mod observer;
pub mod schedule;
pub mod util;

pub use checkpoint::{load_parameters, load_pretrained, save_parameters, ParameterState};
pub use crop::{CropGeometry, CropMargins};
pub use error::{ComputeError, ConfigurationError, FinetuneError, FinetuneResult, IoError, LoadError};
pub use finetune::{finetune, BestSnapshot, FinetuneConfig, FinetuneOutcome};
pub use loss::LossKind;
pub use metrics::{batch_mean_iou, mean_iou};
pub use models::{RecalibratedUnet, Recalibration, RecalibrationSnapshot, Unet, UnetConfig};
pub use observer::{
    JsonlObserver, Observers, Phase, PhaseReport, RecordingObserver, RunSummary, TracingObserver,
    TrainingObserver,
};
pub use schedule::StepDecay;
pub use util::{run_finetune, run_finetune_with, FinetuneArgs, FinetunePlan, FinetuneReport};

/// Backend alias for fine-tuning (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn_wgpu::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn_ndarray::NdArray<f32>;
