//! Role-specific spatial crops for inputs and labels.

use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use models::UnetConfig;

use crate::error::{ComputeError, ConfigurationError};

/// Per-side margins removed from inputs and labels; fixed for a whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropMargins {
    pub input: usize,
    pub label: usize,
}

impl Default for CropMargins {
    fn default() -> Self {
        Self { input: 2, label: 94 }
    }
}

/// Spatial sizes after cropping a square patch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropGeometry {
    pub patch_size: usize,
    pub input_size: usize,
    pub label_size: usize,
}

impl CropMargins {
    /// Checks that the cropped label lines up with the network's output for a
    /// cropped input of `patch_size`.
    pub fn validate_for(
        &self,
        unet: &UnetConfig,
        patch_size: usize,
    ) -> Result<CropGeometry, ConfigurationError> {
        let input_size = patch_size.checked_sub(2 * self.input).filter(|s| *s > 0);
        let label_size = patch_size.checked_sub(2 * self.label).filter(|s| *s > 0);
        let output = input_size.and_then(|s| unet.output_size(s));
        match (input_size, label_size, output) {
            (Some(input_size), Some(label_size), Some(out)) if out == label_size => {
                Ok(CropGeometry {
                    patch_size,
                    input_size,
                    label_size,
                })
            }
            _ => Err(ConfigurationError::CropMismatch {
                patch_size,
                input: self.input,
                label: self.label,
                output,
                label_size,
            }),
        }
    }

    pub fn crop_input<B: Backend>(&self, x: Tensor<B, 4>) -> Result<Tensor<B, 4>, ComputeError> {
        crop_spatial(x, self.input)
    }

    pub fn crop_label<B: Backend>(&self, x: Tensor<B, 4>) -> Result<Tensor<B, 4>, ComputeError> {
        crop_spatial(x, self.label)
    }
}

/// Removes `margin` pixels from every side of a `[N, C, H, W]` tensor.
pub fn crop_spatial<B: Backend>(x: Tensor<B, 4>, margin: usize) -> Result<Tensor<B, 4>, ComputeError> {
    let [n, c, h, w] = x.dims();
    if h <= 2 * margin || w <= 2 * margin {
        return Err(ComputeError::Shape(format!(
            "cannot crop {margin}px per side from a {h}x{w} map"
        )));
    }
    if margin == 0 {
        return Ok(x);
    }
    Ok(x.slice([0..n, 0..c, margin..h - margin, margin..w - margin]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    #[test]
    fn default_margins_fit_default_unet() {
        let geometry = CropMargins::default()
            .validate_for(&UnetConfig::default(), 240)
            .unwrap();
        assert_eq!(geometry.input_size, 236);
        assert_eq!(geometry.label_size, 52);
    }

    #[test]
    fn misaligned_label_margin_is_rejected() {
        let margins = CropMargins { input: 2, label: 90 };
        let err = margins.validate_for(&UnetConfig::default(), 240).unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::CropMismatch {
                output: Some(52),
                label_size: Some(60),
                ..
            }
        ));
    }

    #[test]
    fn oversized_margin_is_rejected() {
        let margins = CropMargins { input: 2, label: 120 };
        assert!(margins.validate_for(&UnetConfig::default(), 240).is_err());
    }

    #[test]
    fn crop_removes_margin_from_each_side() {
        let device = Default::default();
        let values: Vec<f32> = (0..36).map(|v| v as f32).collect();
        let x = Tensor::<TestBackend, 1>::from_floats(values.as_slice(), &device).reshape([1, 1, 6, 6]);
        let cropped = crop_spatial(x, 2).unwrap();
        assert_eq!(cropped.dims(), [1, 1, 2, 2]);
        assert_eq!(
            cropped.into_data().to_vec::<f32>().unwrap(),
            vec![14.0, 15.0, 20.0, 21.0]
        );
    }

    #[test]
    fn crop_larger_than_map_fails() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::zeros([1, 1, 4, 4], &device);
        assert!(matches!(crop_spatial(x, 2), Err(ComputeError::Shape(_))));
    }
}
