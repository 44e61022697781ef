//! Progress reporting for the fine-tuning controller.

use serde::Serialize;
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{FinetuneResult, IoError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Train,
    Val,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Train => f.write_str("train"),
            Phase::Val => f.write_str("val"),
        }
    }
}

/// End-of-phase aggregates. `metric` is the mean IoU and stays 0 for TRAIN.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseReport {
    pub epoch: usize,
    pub num_epochs: usize,
    pub phase: Phase,
    pub loss: f64,
    pub metric: f64,
    pub batches: usize,
    pub lr: f64,
    pub improved: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub epochs: usize,
    pub best_metric: f64,
    pub best_epoch: Option<usize>,
    pub elapsed_secs: f64,
}

/// Sink for controller progress. Errors abort the run.
pub trait TrainingObserver {
    fn epoch_started(&mut self, _epoch: usize, _num_epochs: usize) -> FinetuneResult<()> {
        Ok(())
    }

    fn phase_finished(&mut self, _report: &PhaseReport) -> FinetuneResult<()> {
        Ok(())
    }

    fn run_finished(&mut self, _summary: &RunSummary) -> FinetuneResult<()> {
        Ok(())
    }
}

/// Human-readable progress through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl TrainingObserver for TracingObserver {
    fn epoch_started(&mut self, epoch: usize, num_epochs: usize) -> FinetuneResult<()> {
        tracing::info!("Epoch {}/{}", epoch, num_epochs.saturating_sub(1));
        Ok(())
    }

    fn phase_finished(&mut self, report: &PhaseReport) -> FinetuneResult<()> {
        tracing::info!(
            epoch = report.epoch,
            batches = report.batches,
            lr = report.lr,
            improved = report.improved,
            "{} Loss: {:.4} Acc: {:.4}",
            report.phase,
            report.loss,
            report.metric
        );
        Ok(())
    }

    fn run_finished(&mut self, summary: &RunSummary) -> FinetuneResult<()> {
        let secs = summary.elapsed_secs.max(0.0);
        tracing::info!(
            "Training complete in {:.0}m {:.0}s",
            (secs / 60.0).floor(),
            secs % 60.0
        );
        tracing::info!(best_epoch = ?summary.best_epoch, "Best val Acc: {:.4}", summary.best_metric);
        Ok(())
    }
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum JsonlRecord<'a> {
    Phase(&'a PhaseReport),
    Summary(&'a RunSummary),
}

/// Appends one JSON object per phase, then a summary line.
pub struct JsonlObserver {
    path: PathBuf,
    out: BufWriter<File>,
}

impl JsonlObserver {
    pub fn create(path: &Path) -> Result<Self, IoError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| IoError::CreateDir {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|source| IoError::Metrics {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            out: BufWriter::new(file),
        })
    }

    fn write(&mut self, record: &JsonlRecord<'_>) -> FinetuneResult<()> {
        let io_err = |source: std::io::Error| IoError::Metrics {
            path: self.path.clone(),
            source,
        };
        let line = serde_json::to_string(record).map_err(|e| io_err(e.into()))?;
        writeln!(self.out, "{line}").map_err(io_err)?;
        self.out.flush().map_err(io_err)?;
        Ok(())
    }
}

impl TrainingObserver for JsonlObserver {
    fn phase_finished(&mut self, report: &PhaseReport) -> FinetuneResult<()> {
        self.write(&JsonlRecord::Phase(report))
    }

    fn run_finished(&mut self, summary: &RunSummary) -> FinetuneResult<()> {
        self.write(&JsonlRecord::Summary(summary))
    }
}

/// Forwards every event to each observer in order.
#[derive(Default)]
pub struct Observers {
    inner: Vec<Box<dyn TrainingObserver>>,
}

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, observer: impl TrainingObserver + 'static) -> Self {
        self.inner.push(Box::new(observer));
        self
    }
}

impl TrainingObserver for Observers {
    fn epoch_started(&mut self, epoch: usize, num_epochs: usize) -> FinetuneResult<()> {
        self.inner
            .iter_mut()
            .try_for_each(|o| o.epoch_started(epoch, num_epochs))
    }

    fn phase_finished(&mut self, report: &PhaseReport) -> FinetuneResult<()> {
        self.inner.iter_mut().try_for_each(|o| o.phase_finished(report))
    }

    fn run_finished(&mut self, summary: &RunSummary) -> FinetuneResult<()> {
        self.inner.iter_mut().try_for_each(|o| o.run_finished(summary))
    }
}

/// Keeps every report in memory.
#[derive(Debug, Default, Clone)]
pub struct RecordingObserver {
    pub reports: Vec<PhaseReport>,
    pub summary: Option<RunSummary>,
}

impl TrainingObserver for RecordingObserver {
    fn phase_finished(&mut self, report: &PhaseReport) -> FinetuneResult<()> {
        self.reports.push(report.clone());
        Ok(())
    }

    fn run_finished(&mut self, summary: &RunSummary) -> FinetuneResult<()> {
        self.summary = Some(summary.clone());
        Ok(())
    }
}
