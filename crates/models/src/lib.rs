//! Burn segmentation models for recalibration fine-tuning.
//!
//! - `Unet`: valid-convolution U-Net with GroupNorm, exposed stage by stage
//!   through [`StagedSegmenter`].
//! - `Recalibration`: trainable per-channel `gamma`/`beta` applied after the
//!   first encoder stage.
//! - `RecalibratedUnet`: frozen base plus recalibration as one module.
//!
//! These are pure Burn modules. Freezing, optimisation, and checkpoints live
//! in the `training` crate.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

pub mod recalibration;
pub mod unet;

pub use recalibration::{
    recalibrated_forward, RecalibratedUnet, Recalibration, RecalibrationSnapshot,
};
pub use unet::{center_crop, ConvBlock, DecoderStage, EncoderStage, Unet, UnetConfig};

/// Stage-level access to an encoder/decoder segmenter.
///
/// Composite models build their forward pass from these calls instead of
/// reaching into the base model's fields.
pub trait StagedSegmenter<B: Backend> {
    fn encoder_depth(&self) -> usize;

    /// Channels of the feature map leaving encoder stage `stage`.
    fn stage_channels(&self, stage: usize) -> usize;

    /// Runs encoder stage `stage`; returns `(features, skip)`.
    fn encode(&self, stage: usize, x: Tensor<B, 4>) -> (Tensor<B, 4>, Tensor<B, 4>);

    fn bottleneck(&self, x: Tensor<B, 4>) -> Tensor<B, 4>;

    /// Runs decoder stage `stage` against the skip produced by encoder stage `stage`.
    fn decode(&self, stage: usize, x: Tensor<B, 4>, skip: Tensor<B, 4>) -> Tensor<B, 4>;

    /// Final 1x1 projection to per-class logits.
    fn project(&self, x: Tensor<B, 4>) -> Tensor<B, 4>;
}

pub mod prelude {
    pub use super::{
        RecalibratedUnet, Recalibration, RecalibrationSnapshot, StagedSegmenter, Unet, UnetConfig,
    };
}
