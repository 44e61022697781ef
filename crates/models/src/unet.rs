use burn::module::Module;
use burn::nn::conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig};
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{GroupNorm, GroupNormConfig, PaddingConfig2d};
use burn::tensor::activation::relu;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;

use crate::StagedSegmenter;

/// Spatial shrink of one conv block (two unpadded 3x3 convolutions).
const BLOCK_SHRINK: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnetConfig {
    pub in_channels: usize,
    pub num_classes: usize,
    /// Channels produced by the first encoder stage; doubled at every further stage.
    pub base_channels: usize,
    /// Number of encoder (and decoder) stages.
    pub depth: usize,
    pub norm_groups: usize,
}

impl Default for UnetConfig {
    fn default() -> Self {
        Self {
            in_channels: 4,
            num_classes: 5,
            base_channels: 32,
            depth: 4,
            norm_groups: 8,
        }
    }
}

impl UnetConfig {
    pub fn stage_channels(&self, stage: usize) -> usize {
        self.base_channels << stage
    }

    /// Spatial size of the logits for a square input of side `input`.
    ///
    /// Returns `None` when some stage would shrink the feature map to nothing.
    pub fn output_size(&self, input: usize) -> Option<usize> {
        let shrink = |size: usize| size.checked_sub(BLOCK_SHRINK).filter(|s| *s > 0);
        let mut size = input;
        for _ in 0..self.depth {
            size = shrink(size)? / 2;
            if size == 0 {
                return None;
            }
        }
        size = shrink(size)?;
        for _ in 0..self.depth {
            size = shrink(size * 2)?;
        }
        Some(size)
    }

    pub fn init<B: Backend>(&self, device: &B::Device) -> Unet<B> {
        Unet::new(self, device)
    }
}

#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    conv1: Conv2d<B>,
    norm1: GroupNorm<B>,
    conv2: Conv2d<B>,
    norm2: GroupNorm<B>,
}

impl<B: Backend> ConvBlock<B> {
    pub fn new(in_channels: usize, out_channels: usize, groups: usize, device: &B::Device) -> Self {
        let conv = |cin: usize| {
            Conv2dConfig::new([cin, out_channels], [3, 3])
                .with_padding(PaddingConfig2d::Valid)
                .init(device)
        };
        Self {
            conv1: conv(in_channels),
            norm1: GroupNormConfig::new(groups, out_channels).init(device),
            conv2: conv(out_channels),
            norm2: GroupNormConfig::new(groups, out_channels).init(device),
        }
    }

    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = relu(self.norm1.forward(self.conv1.forward(x)));
        relu(self.norm2.forward(self.conv2.forward(x)))
    }
}

#[derive(Module, Debug)]
pub struct EncoderStage<B: Backend> {
    block: ConvBlock<B>,
    pool: MaxPool2d,
}

impl<B: Backend> EncoderStage<B> {
    /// Returns the pooled features and the pre-pool skip tensor.
    pub fn forward(&self, x: Tensor<B, 4>) -> (Tensor<B, 4>, Tensor<B, 4>) {
        let skip = self.block.forward(x);
        (self.pool.forward(skip.clone()), skip)
    }
}

#[derive(Module, Debug)]
pub struct DecoderStage<B: Backend> {
    up: ConvTranspose2d<B>,
    block: ConvBlock<B>,
}

impl<B: Backend> DecoderStage<B> {
    pub fn forward(&self, x: Tensor<B, 4>, skip: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.up.forward(x);
        let [_, _, h, w] = x.dims();
        let skip = center_crop(skip, h, w);
        self.block.forward(Tensor::cat(vec![skip, x], 1))
    }
}

/// Crops the spatial dims of `x` around its center to `h` x `w`.
pub fn center_crop<B: Backend>(x: Tensor<B, 4>, h: usize, w: usize) -> Tensor<B, 4> {
    let [n, c, xh, xw] = x.dims();
    if xh == h && xw == w {
        return x;
    }
    let top = (xh - h) / 2;
    let left = (xw - w) / 2;
    x.slice([0..n, 0..c, top..top + h, left..left + w])
}

/// U-Net with unpadded convolutions and GroupNorm.
///
/// GroupNorm keeps no running statistics, so the forward pass is identical
/// with or without autodiff.
#[derive(Module, Debug)]
pub struct Unet<B: Backend> {
    encoders: Vec<EncoderStage<B>>,
    bottleneck: ConvBlock<B>,
    /// `decoders[i]` pairs with `encoders[i]`.
    decoders: Vec<DecoderStage<B>>,
    head: Conv2d<B>,
}

impl<B: Backend> Unet<B> {
    pub fn new(cfg: &UnetConfig, device: &B::Device) -> Self {
        let groups = cfg.norm_groups;
        let mut encoders = Vec::with_capacity(cfg.depth);
        let mut decoders = Vec::with_capacity(cfg.depth);
        let mut in_channels = cfg.in_channels;
        for stage in 0..cfg.depth {
            let out = cfg.stage_channels(stage);
            encoders.push(EncoderStage {
                block: ConvBlock::new(in_channels, out, groups, device),
                pool: MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init(),
            });
            decoders.push(DecoderStage {
                up: ConvTranspose2dConfig::new([out * 2, out], [2, 2])
                    .with_stride([2, 2])
                    .init(device),
                block: ConvBlock::new(out * 2, out, groups, device),
            });
            in_channels = out;
        }
        let bottleneck =
            ConvBlock::new(in_channels, cfg.stage_channels(cfg.depth), groups, device);
        let head = Conv2dConfig::new([cfg.base_channels, cfg.num_classes], [1, 1]).init(device);
        Self {
            encoders,
            bottleneck,
            decoders,
            head,
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let mut x = input;
        let mut skips = Vec::with_capacity(self.encoders.len());
        for stage in 0..self.encoders.len() {
            let (next, skip) = self.encode(stage, x);
            skips.push(skip);
            x = next;
        }
        x = self.bottleneck(x);
        for (stage, skip) in skips.into_iter().enumerate().rev() {
            x = self.decode(stage, x, skip);
        }
        self.project(x)
    }

    /// Output planes of the 1x1 head.
    pub fn num_classes(&self) -> usize {
        let [out, _, _, _] = self.head.weight.dims();
        out
    }
}

impl<B: Backend> StagedSegmenter<B> for Unet<B> {
    fn encoder_depth(&self) -> usize {
        self.encoders.len()
    }

    fn stage_channels(&self, stage: usize) -> usize {
        // Conv weights are [out, in, kh, kw].
        let [out, _, _, _] = self.encoders[stage].block.conv2.weight.dims();
        out
    }

    fn encode(&self, stage: usize, x: Tensor<B, 4>) -> (Tensor<B, 4>, Tensor<B, 4>) {
        self.encoders[stage].forward(x)
    }

    fn bottleneck(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.bottleneck.forward(x)
    }

    fn decode(&self, stage: usize, x: Tensor<B, 4>, skip: Tensor<B, 4>) -> Tensor<B, 4> {
        self.decoders[stage].forward(x, skip)
    }

    fn project(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        self.head.forward(x)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_unet_maps_236_to_52() {
        // 240px patches cropped by 2 per side; labels cropped by 94 per side.
        assert_eq!(UnetConfig::default().output_size(236), Some(52));
        assert_eq!(240 - 2 * 94, 52);
    }

    #[test]
    fn too_small_input_has_no_output() {
        let cfg = UnetConfig::default();
        assert_eq!(cfg.output_size(30), None);
        assert_eq!(cfg.output_size(0), None);
    }

    #[test]
    fn shallow_unet_sizes() {
        let cfg = UnetConfig {
            depth: 1,
            ..UnetConfig::default()
        };
        // 20 -> 16 -> pool 8 -> bottleneck 4 -> up 8 -> 4
        assert_eq!(cfg.output_size(20), Some(4));
        assert_eq!(cfg.stage_channels(0), 32);
        assert_eq!(cfg.stage_channels(2), 128);
    }
}
