use burn::backend::Autodiff;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn_dataset::{BatchSource, LoaderConfig, PatchGeometry, PatchLoader};
use clap::{Parser, ValueEnum};
use data_contracts::FinetuneParams;
use models::{RecalibratedUnet, UnetConfig};
use std::path::PathBuf;

use crate::checkpoint::{load_pretrained, save_parameters};
use crate::crop::{CropGeometry, CropMargins};
use crate::error::{ConfigurationError, FinetuneResult};
use crate::finetune::{finetune, FinetuneConfig};
use crate::loss::LossKind;
use crate::observer::{JsonlObserver, Observers, PhaseReport, TracingObserver};
use crate::TrainBackend;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    NdArray,
    Wgpu,
}

#[derive(Parser, Debug, Clone)]
#[command(
    name = "finetune",
    about = "Fine-tune a frozen U-Net through a per-channel gamma/beta recalibration"
)]
pub struct FinetuneArgs {
    /// params.json of the pretrained run (patch size, loader, loss, model options).
    #[arg(long)]
    pub params: PathBuf,
    /// Pretrained U-Net checkpoint (BinFileRecorder record).
    #[arg(long)]
    pub checkpoint: PathBuf,
    /// Newline-delimited training patch list.
    #[arg(long)]
    pub train_list: PathBuf,
    /// Newline-delimited validation patch list.
    #[arg(long)]
    pub val_list: PathBuf,
    /// Root for relative patch identifiers (defaults to each list's directory).
    #[arg(long)]
    pub patch_root: Option<PathBuf>,
    /// Output directory for the fine-tuned checkpoint.
    #[arg(long, default_value = "checkpoints/finetuning")]
    pub output_dir: PathBuf,
    /// Loss override (dice, ce, jaccard, tversky); defaults to train_opts.loss.
    #[arg(long)]
    pub loss: Option<String>,
    /// Number of epochs.
    #[arg(long, default_value_t = 25)]
    pub epochs: usize,
    /// Pixels cropped from each side of the input.
    #[arg(long, default_value_t = 2)]
    pub input_margin: usize,
    /// Pixels cropped from each side of the label.
    #[arg(long, default_value_t = 94)]
    pub label_margin: usize,
    /// Initial learning rate.
    #[arg(long, default_value_t = 0.01)]
    pub lr: f64,
    /// SGD momentum.
    #[arg(long, default_value_t = 0.9)]
    pub momentum: f64,
    /// Epochs between learning-rate decays.
    #[arg(long, default_value_t = 7)]
    pub lr_step: usize,
    /// Learning-rate decay factor.
    #[arg(long, default_value_t = 0.1)]
    pub lr_gamma: f64,
    /// Optional shuffle seed for deterministic batching.
    #[arg(long)]
    pub seed: Option<u64>,
    /// Backend to use (ndarray or wgpu if enabled).
    #[arg(long, value_enum, default_value_t = BackendKind::NdArray)]
    pub backend: BackendKind,
    /// Append per-phase metrics as JSON lines to this file.
    #[arg(long)]
    pub metrics_out: Option<PathBuf>,
}

/// Typed settings for one run, resolved before any data is read.
#[derive(Debug, Clone)]
pub struct FinetunePlan {
    pub loss: LossKind,
    pub model_name: String,
    pub unet: UnetConfig,
    pub geometry: CropGeometry,
    pub loader: LoaderConfig,
    pub train: FinetuneConfig,
}

impl FinetunePlan {
    pub fn resolve(args: &FinetuneArgs, params: &FinetuneParams) -> Result<Self, ConfigurationError> {
        validate_backend_choice(args.backend)?;
        params.validate()?;

        let loss: LossKind = args
            .loss
            .as_deref()
            .unwrap_or(&params.train_opts.loss)
            .parse()?;

        let model_name = params.model_opts.model.trim().to_ascii_lowercase();
        if model_name != "unet" {
            return Err(ConfigurationError::UnknownArchitecture(
                params.model_opts.model.clone(),
            ));
        }

        for (name, value) in [("epochs", args.epochs), ("lr_step", args.lr_step)] {
            if value == 0 {
                return Err(ConfigurationError::NonPositive(name));
            }
        }
        if args.lr.is_nan() || args.lr <= 0.0 {
            return Err(ConfigurationError::NonPositive("lr"));
        }

        let unet = UnetConfig {
            in_channels: params.loader_opts.num_channels,
            num_classes: params.model_opts.num_classes,
            base_channels: params.model_opts.base_channels,
            depth: params.model_opts.depth,
            norm_groups: params.model_opts.norm_groups,
        };
        let crop = CropMargins {
            input: args.input_margin,
            label: args.label_margin,
        };
        let geometry = crop.validate_for(&unet, params.patch_size)?;

        let loader = LoaderConfig {
            batch_size: params.loader_opts.batch_size,
            shuffle: params.loader_opts.shuffle,
            num_workers: params.loader_opts.num_workers,
            seed: args.seed,
            geometry: PatchGeometry {
                channels: params.loader_opts.num_channels,
                patch_size: params.patch_size,
            },
        };
        let train = FinetuneConfig {
            num_epochs: args.epochs,
            crop,
            learning_rate: args.lr,
            momentum: args.momentum,
            lr_step: args.lr_step,
            lr_gamma: args.lr_gamma,
        };

        Ok(Self {
            loss,
            model_name,
            unet,
            geometry,
            loader,
            train,
        })
    }

    /// Output path (before the recorder's `.bin` extension).
    pub fn output_path(&self, output_dir: &std::path::Path) -> PathBuf {
        output_dir.join(format!("finetuned_{}_gn", self.model_name))
    }
}

#[derive(Debug, Clone)]
pub struct FinetuneReport {
    pub checkpoint: PathBuf,
    pub best_metric: f64,
    pub best_epoch: Option<usize>,
    pub history: Vec<PhaseReport>,
}

pub fn run_finetune(args: FinetuneArgs) -> anyhow::Result<()> {
    let device = <ADBackend as Backend>::Device::default();
    let report = run_finetune_with::<ADBackend>(&args, &device)?;
    tracing::info!(
        path = %report.checkpoint.display(),
        best_metric = report.best_metric,
        "saved fine-tuned checkpoint"
    );
    Ok(())
}

/// Whole job on backend `B`: params, loss, checkpoint, loaders, fine-tune, save.
pub fn run_finetune_with<B: AutodiffBackend>(
    args: &FinetuneArgs,
    device: &B::Device,
) -> FinetuneResult<FinetuneReport> {
    let params = FinetuneParams::from_path(&args.params).map_err(ConfigurationError::from)?;
    let plan = FinetunePlan::resolve(args, &params)?;
    tracing::info!(
        loss = %plan.loss,
        patch_size = plan.geometry.patch_size,
        input_size = plan.geometry.input_size,
        label_size = plan.geometry.label_size,
        epochs = plan.train.num_epochs,
        "resolved fine-tuning plan"
    );

    let base = load_pretrained::<B>(&args.checkpoint, &plan.unet, device)?;

    let patch_root = args.patch_root.as_deref();
    let mut train = PatchLoader::from_list(&args.train_list, patch_root, plan.loader.clone())?;
    let mut val = PatchLoader::from_list(&args.val_list, patch_root, plan.loader.clone())?;
    tracing::info!(train = train.len(), val = val.len(), "loaded patch lists");

    let mut observers = Observers::new().with(TracingObserver);
    if let Some(path) = &args.metrics_out {
        observers = observers.with(JsonlObserver::create(path)?);
    }

    let model = RecalibratedUnet::new(base, device);
    let outcome = finetune(
        model,
        plan.loss,
        &mut train,
        &mut val,
        &plan.train,
        &mut observers,
        device,
    )?;

    let checkpoint = save_parameters(&outcome.model, &plan.output_path(&args.output_dir))?;
    Ok(FinetuneReport {
        checkpoint,
        best_metric: outcome.best_metric,
        best_epoch: outcome.best_epoch,
        history: outcome.history,
    })
}

type ADBackend = Autodiff<TrainBackend>;

pub fn validate_backend_choice(kind: BackendKind) -> Result<(), ConfigurationError> {
    let built_wgpu = cfg!(feature = "backend-wgpu");
    match (kind, built_wgpu) {
        (BackendKind::Wgpu, false) => return Err(ConfigurationError::Backend),
        (BackendKind::NdArray, true) => {
            tracing::warn!("built with backend-wgpu; training will still use the WGPU backend despite --backend nd-array");
        }
        _ => {}
    }
    Ok(())
}
