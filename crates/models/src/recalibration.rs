//! Trainable affine recalibration spliced into a frozen segmenter.

use burn::module::{Module, Param};
use burn::tensor::backend::Backend;
use burn::tensor::{Tensor, TensorData};

use crate::unet::Unet;
use crate::StagedSegmenter;

/// Per-channel scale and shift, `[1, C, 1, 1]` each.
#[derive(Module, Debug)]
pub struct Recalibration<B: Backend> {
    pub gamma: Param<Tensor<B, 4>>,
    pub beta: Param<Tensor<B, 4>>,
}

/// Detached copy of the recalibration values.
#[derive(Debug, Clone, PartialEq)]
pub struct RecalibrationSnapshot {
    pub gamma: TensorData,
    pub beta: TensorData,
}

impl<B: Backend> Recalibration<B> {
    /// Identity transform: `gamma` all ones, `beta` all zeros.
    pub fn new(channels: usize, device: &B::Device) -> Self {
        Self {
            gamma: Param::from_tensor(Tensor::ones([1, channels, 1, 1], device)),
            beta: Param::from_tensor(Tensor::zeros([1, channels, 1, 1], device)),
        }
    }

    pub fn channels(&self) -> usize {
        self.gamma.dims()[1]
    }

    pub fn apply(&self, feature: Tensor<B, 4>) -> Tensor<B, 4> {
        feature * self.gamma.val() + self.beta.val()
    }

    pub fn snapshot(&self) -> RecalibrationSnapshot {
        RecalibrationSnapshot {
            gamma: self.gamma.val().into_data(),
            beta: self.beta.val().into_data(),
        }
    }

    /// Overwrites the live values with `snapshot`, keeping parameter ids.
    pub fn restore(self, snapshot: &RecalibrationSnapshot, device: &B::Device) -> Self {
        let gamma = Tensor::from_data(snapshot.gamma.clone(), device).require_grad();
        let beta = Tensor::from_data(snapshot.beta.clone(), device).require_grad();
        Self {
            gamma: Param::initialized(self.gamma.id, gamma),
            beta: Param::initialized(self.beta.id, beta),
        }
    }
}

/// Forward pass of `base` with `recalibration` applied to the output of the first encoder stage.
pub fn recalibrated_forward<B, M>(
    base: &M,
    recalibration: &Recalibration<B>,
    input: Tensor<B, 4>,
) -> Tensor<B, 4>
where
    B: Backend,
    M: StagedSegmenter<B>,
{
    let depth = base.encoder_depth();
    let mut skips = Vec::with_capacity(depth);

    let (x, skip) = base.encode(0, input);
    skips.push(skip);
    let mut x = recalibration.apply(x);

    for stage in 1..depth {
        let (next, skip) = base.encode(stage, x);
        skips.push(skip);
        x = next;
    }
    x = base.bottleneck(x);
    for (stage, skip) in skips.into_iter().enumerate().rev() {
        x = base.decode(stage, x, skip);
    }
    base.project(x)
}

/// Frozen U-Net plus its recalibration.
///
/// The base is expected to be loaded with `no_grad`; only `recalibration`
/// is handed to the optimizer.
#[derive(Module, Debug)]
pub struct RecalibratedUnet<B: Backend> {
    base: Unet<B>,
    recalibration: Recalibration<B>,
}

impl<B: Backend> RecalibratedUnet<B> {
    pub fn new(base: Unet<B>, device: &B::Device) -> Self {
        let channels = base.stage_channels(0);
        Self {
            base,
            recalibration: Recalibration::new(channels, device),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        recalibrated_forward(&self.base, &self.recalibration, input)
    }

    pub fn base(&self) -> &Unet<B> {
        &self.base
    }

    pub fn recalibration(&self) -> &Recalibration<B> {
        &self.recalibration
    }

    /// Replaces the recalibration through `f`, leaving the base untouched.
    pub fn with_recalibration(self, f: impl FnOnce(Recalibration<B>) -> Recalibration<B>) -> Self {
        Self {
            base: self.base,
            recalibration: f(self.recalibration),
        }
    }
}
