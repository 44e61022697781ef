//! Parameter records on disk (Burn `BinFileRecorder`, full precision).

use burn::module::{Module, ModuleVisitor, ParamId};
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;
use models::{Unet, UnetConfig};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{ComputeError, IoError, LoadError};

/// Path the recorder actually reads or writes for `path`.
pub fn record_path(path: &Path) -> PathBuf {
    path.with_extension("bin")
}

/// Flattened copy of every float parameter, in visit order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterState {
    entries: Vec<ParameterEntry>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterEntry {
    pub shape: Vec<usize>,
    pub values: Vec<f32>,
}

struct StateCollector {
    keep_values: bool,
    entries: Vec<ParameterEntry>,
    failure: Option<ComputeError>,
}

impl<B: Backend> ModuleVisitor<B> for StateCollector {
    fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D>) {
        let shape = tensor.dims().to_vec();
        let mut values = Vec::new();
        if self.keep_values && self.failure.is_none() {
            match tensor.clone().into_data().convert::<f32>().to_vec::<f32>() {
                Ok(read) => values = read,
                Err(e) => self.failure = Some(ComputeError::Readback(format!("{e:?}"))),
            }
        }
        self.entries.push(ParameterEntry { shape, values });
    }
}

impl ParameterState {
    /// Shapes and values of every float parameter.
    pub fn capture<B: Backend, M: Module<B>>(module: &M) -> Result<Self, ComputeError> {
        let mut collector = Self::collect(module, true);
        match collector.failure.take() {
            Some(err) => Err(err),
            None => Ok(Self {
                entries: collector.entries,
            }),
        }
    }

    /// Shapes only; values are left empty.
    pub fn shapes<B: Backend, M: Module<B>>(module: &M) -> Self {
        Self {
            entries: Self::collect(module, false).entries,
        }
    }

    fn collect<B: Backend, M: Module<B>>(module: &M, keep_values: bool) -> StateCollector {
        let mut collector = StateCollector {
            keep_values,
            entries: Vec::new(),
            failure: None,
        };
        module.visit(&mut collector);
        collector
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ParameterEntry> {
        self.entries.iter()
    }

    /// True when both states hold the same parameters with identical bits.
    pub fn bit_identical(&self, other: &Self) -> bool {
        self.entries.len() == other.entries.len()
            && self.entries.iter().zip(&other.entries).all(|(a, b)| {
                a.shape == b.shape
                    && a.values.len() == b.values.len()
                    && a.values.iter().zip(&b.values).all(|(x, y)| x.to_bits() == y.to_bits())
            })
    }

    /// Largest absolute difference between matching values, `None` if the layouts differ.
    pub fn max_abs_diff(&self, other: &Self) -> Option<f32> {
        if self.entries.len() != other.entries.len() {
            return None;
        }
        let mut max = 0.0f32;
        for (a, b) in self.entries.iter().zip(&other.entries) {
            if a.shape != b.shape || a.values.len() != b.values.len() {
                return None;
            }
            for (x, y) in a.values.iter().zip(&b.values) {
                max = max.max((x - y).abs());
            }
        }
        Some(max)
    }

    fn check_layout(&self, loaded: &Self, path: &Path) -> Result<(), LoadError> {
        for (index, expected) in self.entries.iter().enumerate() {
            let name = format!("parameter #{index}");
            let found = loaded
                .entries
                .get(index)
                .ok_or_else(|| LoadError::MissingParameter {
                    path: path.to_path_buf(),
                    name: name.clone(),
                })?;
            if found.shape != expected.shape {
                return Err(LoadError::ShapeMismatch {
                    path: path.to_path_buf(),
                    name,
                    expected: expected.shape.clone(),
                    found: found.shape.clone(),
                });
            }
        }
        Ok(())
    }
}

/// Writes `module` to `path` (extension forced to `.bin`), creating parent directories.
pub fn save_parameters<B: Backend, M: Module<B>>(module: &M, path: &Path) -> Result<PathBuf, IoError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| IoError::CreateDir {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    module
        .clone()
        .save_file(path, &recorder)
        .map_err(|e| IoError::Checkpoint {
            path: record_path(path),
            message: format!("{e:?}"),
        })?;
    Ok(record_path(path))
}

/// Loads a record into `template`, rejecting records whose parameter shapes differ.
pub fn load_parameters<B: Backend, M: Module<B>>(
    template: M,
    path: &Path,
    device: &B::Device,
) -> Result<M, LoadError> {
    let file = record_path(path);
    if !file.is_file() {
        return Err(LoadError::MissingCheckpoint { path: file });
    }
    let expected = ParameterState::shapes(&template);
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    let loaded = template
        .load_file(path, &recorder, device)
        .map_err(|e| LoadError::Recorder {
            path: file.clone(),
            message: format!("{e:?}"),
        })?;
    expected.check_layout(&ParameterState::shapes(&loaded), &file)?;
    Ok(loaded)
}

/// Restores a pretrained U-Net and freezes every parameter.
pub fn load_pretrained<B: AutodiffBackend>(
    path: &Path,
    cfg: &UnetConfig,
    device: &B::Device,
) -> Result<Unet<B>, LoadError> {
    let unet = load_parameters(cfg.init::<B>(device), path, device)?;
    tracing::info!(
        path = %record_path(path).display(),
        depth = cfg.depth,
        base_channels = cfg.base_channels,
        "loaded pretrained unet"
    );
    Ok(unet.no_grad())
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;
    use models::Recalibration;

    type TestBackend = NdArray<f32>;

    fn tiny() -> UnetConfig {
        UnetConfig {
            in_channels: 2,
            num_classes: 3,
            base_channels: 4,
            depth: 1,
            norm_groups: 2,
        }
    }

    #[test]
    fn capture_lists_every_parameter_once() {
        let device = Default::default();
        let recal = Recalibration::<TestBackend>::new(3, &device);
        let state = ParameterState::capture(&recal).unwrap();
        assert_eq!(state.len(), 2);
        let shapes: Vec<_> = state.iter().map(|e| e.shape.clone()).collect();
        assert_eq!(shapes, vec![vec![1, 3, 1, 1], vec![1, 3, 1, 1]]);
    }

    #[test]
    fn unet_round_trip_is_exact() {
        let tmp = tempfile::tempdir().unwrap();
        let device = Default::default();
        let unet = tiny().init::<TestBackend>(&device);
        let written = save_parameters(&unet, &tmp.path().join("nested/base")).unwrap();
        assert_eq!(written, tmp.path().join("nested/base.bin"));

        let loaded =
            load_parameters(tiny().init::<TestBackend>(&device), &written, &device).unwrap();
        let before = ParameterState::capture(&unet).unwrap();
        let after = ParameterState::capture(&loaded).unwrap();
        assert!(!before.is_empty());
        assert!(before.iter().all(|e| e.values.len() == e.shape.iter().product::<usize>()));
        assert!(before.bit_identical(&after));
    }

    #[test]
    fn missing_file_is_load_error() {
        let tmp = tempfile::tempdir().unwrap();
        let device = Default::default();
        let err = load_parameters(
            tiny().init::<TestBackend>(&device),
            &tmp.path().join("absent.bin"),
            &device,
        )
        .unwrap_err();
        assert!(matches!(err, LoadError::MissingCheckpoint { .. }));
    }

    #[test]
    fn wider_record_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let device = Default::default();
        let wide = UnetConfig {
            base_channels: 8,
            ..tiny()
        };
        let path = save_parameters(&wide.init::<TestBackend>(&device), &tmp.path().join("wide"))
            .unwrap();
        let result = load_parameters(tiny().init::<TestBackend>(&device), &path, &device);
        assert!(matches!(
            result,
            Err(LoadError::ShapeMismatch { .. }) | Err(LoadError::Recorder { .. })
        ));
    }
}
