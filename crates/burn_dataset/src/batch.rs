//! Batch iteration for training and validation.

use crate::list::load_patch_list;
use crate::patch::read_patch;
use crate::types::{BurnDatasetError, DatasetResult, PatchGeometry, PatchSample};
use burn::tensor::{backend::Backend, Tensor};
use rand::rngs::StdRng;
use rand::{seq::SliceRandom, SeedableRng};
use rayon::prelude::*;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// Input/label pair for one batch. Both keep their channel dimension:
/// `inputs` is `[N, C, H, W]`, `labels` is `[N, 1, H, W]` with class ids as floats.
#[derive(Debug, Clone)]
pub struct PatchBatch<B: Backend> {
    pub inputs: Tensor<B, 4>,
    pub labels: Tensor<B, 4>,
}

/// Per-phase batch supplier; the controller pulls from it until it returns `None`.
pub trait BatchSource {
    /// Number of samples per pass.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rewinds to the start of a new pass, reshuffling when configured.
    fn reset(&mut self);

    fn next_batch<B: Backend>(
        &mut self,
        device: &B::Device,
    ) -> DatasetResult<Option<PatchBatch<B>>>;
}

#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub batch_size: usize,
    pub shuffle: bool,
    /// Reader threads; 0 reads on the caller's thread.
    pub num_workers: usize,
    pub seed: Option<u64>,
    pub geometry: PatchGeometry,
}

fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_rng(&mut rand::rng()),
    }
}

/// Stacks samples into batch tensors after checking them against `geometry`.
pub fn assemble_batch<B: Backend>(
    samples: &[PatchSample],
    geometry: PatchGeometry,
    device: &B::Device,
) -> DatasetResult<PatchBatch<B>> {
    if samples.is_empty() {
        return Err(BurnDatasetError::Other("cannot assemble empty batch".into()));
    }
    let (channels, height, width) = geometry.dims();
    let mut images_buf = Vec::with_capacity(samples.len() * channels * height * width);
    let mut labels_buf = Vec::with_capacity(samples.len() * height * width);
    for sample in samples {
        if sample.dims() != geometry.dims() {
            return Err(BurnDatasetError::ShapeMismatch {
                path: PathBuf::from(&sample.id),
                expected: geometry.dims(),
                found: sample.dims(),
            });
        }
        sample.check_buffers().map_err(|msg| BurnDatasetError::Malformed {
            path: PathBuf::from(&sample.id),
            msg,
        })?;
        images_buf.extend_from_slice(&sample.image);
        labels_buf.extend_from_slice(&sample.label);
    }
    let batch_len = samples.len();
    let inputs = Tensor::<B, 1>::from_floats(images_buf.as_slice(), device)
        .reshape([batch_len, channels, height, width]);
    let labels = Tensor::<B, 1>::from_floats(labels_buf.as_slice(), device)
        .reshape([batch_len, 1, height, width]);
    Ok(PatchBatch { inputs, labels })
}

/// Reads patch files named by a split list.
pub struct PatchLoader {
    paths: Vec<PathBuf>,
    order: Vec<usize>,
    cursor: usize,
    cfg: LoaderConfig,
    rng: StdRng,
    pool: Option<rayon::ThreadPool>,
    processed_batches: usize,
    total_load_time: Duration,
}

impl PatchLoader {
    pub fn from_list(list: &Path, root: Option<&Path>, cfg: LoaderConfig) -> DatasetResult<Self> {
        let paths = load_patch_list(list, root)?;
        Self::from_paths(paths, cfg)
    }

    pub fn from_paths(paths: Vec<PathBuf>, cfg: LoaderConfig) -> DatasetResult<Self> {
        if cfg.batch_size == 0 {
            return Err(BurnDatasetError::Other("batch_size must be > 0".into()));
        }
        let pool = if cfg.num_workers > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(cfg.num_workers)
                .thread_name(|i| format!("patch-loader-{i}"))
                .build()
                .map_err(|e| BurnDatasetError::Other(format!("failed to start loader pool: {e}")))?;
            Some(pool)
        } else {
            None
        };
        let rng = seeded_rng(cfg.seed);
        let mut loader = Self {
            order: (0..paths.len()).collect(),
            paths,
            cursor: 0,
            cfg,
            rng,
            pool,
            processed_batches: 0,
            total_load_time: Duration::ZERO,
        };
        loader.reset();
        Ok(loader)
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.cfg
    }

    fn load_slice(&self, slice: &[PathBuf]) -> DatasetResult<Vec<PatchSample>> {
        match &self.pool {
            Some(pool) => pool.install(|| slice.par_iter().map(|p| read_patch(p)).collect()),
            None => slice.iter().map(|p| read_patch(p)).collect(),
        }
    }
}

impl BatchSource for PatchLoader {
    fn len(&self) -> usize {
        self.paths.len()
    }

    fn reset(&mut self) {
        self.cursor = 0;
        if self.cfg.shuffle {
            self.order.shuffle(&mut self.rng);
        }
    }

    fn next_batch<B: Backend>(
        &mut self,
        device: &B::Device,
    ) -> DatasetResult<Option<PatchBatch<B>>> {
        if self.cursor >= self.order.len() {
            if self.processed_batches > 0 {
                tracing::debug!(
                    batches = self.processed_batches,
                    avg_load_ms = self.total_load_time.as_secs_f64() * 1000.0
                        / self.processed_batches as f64,
                    "patch loader pass complete"
                );
            }
            return Ok(None);
        }
        let end = (self.cursor + self.cfg.batch_size).min(self.order.len());
        let slice: Vec<PathBuf> = self.order[self.cursor..end]
            .iter()
            .map(|&i| self.paths[i].clone())
            .collect();
        self.cursor = end;

        let t_load = Instant::now();
        let samples = self.load_slice(&slice)?;
        self.total_load_time += t_load.elapsed();
        self.processed_batches += 1;

        assemble_batch(&samples, self.cfg.geometry, device).map(Some)
    }
}

/// Preloaded samples behind the same contract as [`PatchLoader`].
pub struct InMemoryPatches {
    samples: Vec<PatchSample>,
    order: Vec<usize>,
    cursor: usize,
    batch_size: usize,
    shuffle: bool,
    geometry: PatchGeometry,
    rng: StdRng,
}

impl InMemoryPatches {
    pub fn new(
        samples: Vec<PatchSample>,
        batch_size: usize,
        geometry: PatchGeometry,
    ) -> DatasetResult<Self> {
        if batch_size == 0 {
            return Err(BurnDatasetError::Other("batch_size must be > 0".into()));
        }
        Ok(Self {
            order: (0..samples.len()).collect(),
            samples,
            cursor: 0,
            batch_size,
            shuffle: false,
            geometry,
            rng: seeded_rng(Some(0)),
        })
    }

    pub fn with_shuffle(mut self, seed: u64) -> Self {
        self.shuffle = true;
        self.rng = seeded_rng(Some(seed));
        self
    }
}

impl BatchSource for InMemoryPatches {
    fn len(&self) -> usize {
        self.samples.len()
    }

    fn reset(&mut self) {
        self.cursor = 0;
        if self.shuffle {
            self.order.shuffle(&mut self.rng);
        }
    }

    fn next_batch<B: Backend>(
        &mut self,
        device: &B::Device,
    ) -> DatasetResult<Option<PatchBatch<B>>> {
        if self.cursor >= self.order.len() {
            return Ok(None);
        }
        let end = (self.cursor + self.batch_size).min(self.order.len());
        let batch: Vec<PatchSample> = self.order[self.cursor..end]
            .iter()
            .map(|&i| self.samples[i].clone())
            .collect();
        self.cursor = end;
        assemble_batch(&batch, self.geometry, device).map(Some)
    }
}
