//! TRAIN/VALIDATE controller for recalibration fine-tuning.

use burn::module::AutodiffModule;
use burn::optim::momentum::MomentumConfig;
use burn::optim::{GradientsParams, Optimizer, SgdConfig};
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::{ElementConversion, Int, Tensor};
use burn_dataset::{BatchSource, PatchBatch};
use models::{RecalibratedUnet, RecalibrationSnapshot};
use std::time::{Duration, Instant};

use crate::crop::CropMargins;
use crate::error::{ComputeError, FinetuneResult};
use crate::loss::LossKind;
use crate::metrics::batch_mean_iou;
use crate::observer::{Phase, PhaseReport, RunSummary, TrainingObserver};
use crate::schedule::StepDecay;

#[derive(Debug, Clone)]
pub struct FinetuneConfig {
    pub num_epochs: usize,
    pub crop: CropMargins,
    pub learning_rate: f64,
    pub momentum: f64,
    /// Schedule steps between decays.
    pub lr_step: usize,
    pub lr_gamma: f64,
}

impl Default for FinetuneConfig {
    fn default() -> Self {
        Self {
            num_epochs: 25,
            crop: CropMargins::default(),
            learning_rate: 0.01,
            momentum: 0.9,
            lr_step: 7,
            lr_gamma: 0.1,
        }
    }
}

/// Best validation metric so far and the recalibration that produced it.
#[derive(Debug, Clone)]
pub struct BestSnapshot {
    metric: f64,
    epoch: Option<usize>,
    snapshot: RecalibrationSnapshot,
}

impl BestSnapshot {
    /// Starts at metric 0.0 holding `initial`.
    pub fn new(initial: RecalibrationSnapshot) -> Self {
        Self {
            metric: 0.0,
            epoch: None,
            snapshot: initial,
        }
    }

    /// Replaces the snapshot only when `metric` is strictly greater.
    pub fn offer(
        &mut self,
        epoch: usize,
        metric: f64,
        snapshot: impl FnOnce() -> RecalibrationSnapshot,
    ) -> bool {
        if metric > self.metric {
            self.metric = metric;
            self.epoch = Some(epoch);
            self.snapshot = snapshot();
            true
        } else {
            false
        }
    }

    pub fn metric(&self) -> f64 {
        self.metric
    }

    pub fn epoch(&self) -> Option<usize> {
        self.epoch
    }

    pub fn snapshot(&self) -> &RecalibrationSnapshot {
        &self.snapshot
    }
}

pub struct FinetuneOutcome<B: Backend> {
    /// Model with the best recalibration restored.
    pub model: RecalibratedUnet<B>,
    pub best_metric: f64,
    pub best_epoch: Option<usize>,
    pub history: Vec<PhaseReport>,
    pub elapsed: Duration,
}

#[derive(Default)]
struct PhaseTotals {
    loss: f64,
    metric: f64,
    batches: usize,
}

impl PhaseTotals {
    fn finish(
        self,
        epoch: usize,
        num_epochs: usize,
        phase: Phase,
        lr: f64,
    ) -> Result<PhaseReport, ComputeError> {
        if self.batches == 0 {
            return Err(ComputeError::EmptyPhase {
                epoch,
                phase: phase.to_string(),
            });
        }
        let n = self.batches as f64;
        Ok(PhaseReport {
            epoch,
            num_epochs,
            phase,
            loss: self.loss / n,
            metric: self.metric / n,
            batches: self.batches,
            lr,
            improved: false,
        })
    }
}

/// Crops a batch and converts its labels to class ids `[N, H, W]`.
///
/// Every label value must be an integral id in `0..classes`.
fn prepare<B: Backend>(
    batch: PatchBatch<B>,
    crop: &CropMargins,
    classes: usize,
    epoch: usize,
    index: usize,
) -> Result<(Tensor<B, 4>, Tensor<B, 3, Int>), ComputeError> {
    let inputs = crop.crop_input(batch.inputs)?;
    let labels = crop.crop_label(batch.labels)?;
    let values = labels
        .clone()
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| ComputeError::Readback(format!("{e:?}")))?;
    if let Some(&value) = values
        .iter()
        .find(|v| v.fract() != 0.0 || **v < 0.0 || **v >= classes as f32)
    {
        return Err(ComputeError::InvalidLabel {
            epoch,
            batch: index,
            value,
            classes,
        });
    }
    Ok((inputs, labels.squeeze::<3>(1).int()))
}

fn check_alignment<B: Backend>(
    logits: &Tensor<B, 4>,
    labels: &Tensor<B, 3, Int>,
) -> Result<(), ComputeError> {
    let [n, _, h, w] = logits.dims();
    let [ln, lh, lw] = labels.dims();
    if (n, h, w) != (ln, lh, lw) {
        return Err(ComputeError::Shape(format!(
            "logits are {n}x{h}x{w} but labels are {ln}x{lh}x{lw}"
        )));
    }
    Ok(())
}

fn loss_value<B: Backend>(
    loss: &Tensor<B, 1>,
    epoch: usize,
    batch: usize,
) -> Result<f64, ComputeError> {
    let value = loss.clone().into_scalar().elem::<f64>();
    if !value.is_finite() {
        return Err(ComputeError::NonFinite {
            epoch,
            batch,
            value,
        });
    }
    Ok(value)
}

fn class_ids<B: Backend, const D: usize>(t: Tensor<B, D, Int>) -> Result<Vec<i64>, ComputeError> {
    t.into_data()
        .convert::<i64>()
        .to_vec::<i64>()
        .map_err(|e| ComputeError::Readback(format!("{e:?}")))
}

/// Runs `cfg.num_epochs` TRAIN/VALIDATE epochs, updating only the
/// recalibration, and returns the model with the best validation state restored.
pub fn finetune<B, T, V>(
    model: RecalibratedUnet<B>,
    loss_kind: LossKind,
    train: &mut T,
    val: &mut V,
    cfg: &FinetuneConfig,
    observer: &mut dyn TrainingObserver,
    device: &B::Device,
) -> FinetuneResult<FinetuneOutcome<B>>
where
    B: AutodiffBackend,
    T: BatchSource,
    V: BatchSource,
{
    let since = Instant::now();
    let mut model = model;
    let mut optim = SgdConfig::new()
        .with_momentum(Some(
            MomentumConfig::new()
                .with_momentum(cfg.momentum)
                .with_dampening(0.0)
                .with_nesterov(false),
        ))
        .init();
    let mut schedule = StepDecay::new(cfg.learning_rate, cfg.lr_step, cfg.lr_gamma);
    let mut best = BestSnapshot::new(model.recalibration().snapshot());
    let mut history = Vec::with_capacity(cfg.num_epochs * 2);
    let classes = model.base().num_classes();

    for epoch in 0..cfg.num_epochs {
        observer.epoch_started(epoch, cfg.num_epochs)?;

        // TRAIN
        let lr = schedule.step();
        let mut totals = PhaseTotals::default();
        train.reset();
        while let Some(batch) = train.next_batch::<B>(device)? {
            let (inputs, labels) = prepare(batch, &cfg.crop, classes, epoch, totals.batches)?;
            let logits = model.forward(inputs);
            check_alignment(&logits, &labels)?;
            let loss = loss_kind.forward(logits, labels);
            let value = loss_value(&loss, epoch, totals.batches)?;
            let grads = GradientsParams::from_grads(loss.backward(), model.recalibration());
            model = model.with_recalibration(|recal| optim.step(lr, recal, grads));
            tracing::debug!(epoch, batch = totals.batches, loss = value, "train step");
            totals.loss += value;
            totals.batches += 1;
        }
        let report = totals.finish(epoch, cfg.num_epochs, Phase::Train, lr)?;
        observer.phase_finished(&report)?;
        history.push(report);

        // VALIDATE
        let eval_model = model.valid();
        let mut totals = PhaseTotals::default();
        val.reset();
        while let Some(batch) = val.next_batch::<B::InnerBackend>(device)? {
            let (inputs, labels) = prepare(batch, &cfg.crop, classes, epoch, totals.batches)?;
            let logits = eval_model.forward(inputs);
            check_alignment(&logits, &labels)?;
            let [n, _, _, _] = logits.dims();
            let loss = loss_kind.forward(logits.clone(), labels.clone());
            let value = loss_value(&loss, epoch, totals.batches)?;
            let predicted = class_ids(logits.argmax(1))?;
            let truth = class_ids(labels)?;
            let metric = batch_mean_iou(&predicted, &truth, n)?;
            tracing::debug!(epoch, batch = totals.batches, loss = value, metric, "val step");
            totals.loss += value;
            totals.metric += metric;
            totals.batches += 1;
        }
        let mut report = totals.finish(epoch, cfg.num_epochs, Phase::Val, lr)?;
        report.improved = best.offer(epoch, report.metric, || model.recalibration().snapshot());
        observer.phase_finished(&report)?;
        history.push(report);
    }

    let restored = best.snapshot().clone();
    let model = model.with_recalibration(|recal| recal.restore(&restored, device));
    let elapsed = since.elapsed();
    observer.run_finished(&RunSummary {
        epochs: cfg.num_epochs,
        best_metric: best.metric(),
        best_epoch: best.epoch(),
        elapsed_secs: elapsed.as_secs_f64(),
    })?;

    Ok(FinetuneOutcome {
        model,
        best_metric: best.metric(),
        best_epoch: best.epoch(),
        history,
        elapsed,
    })
}
