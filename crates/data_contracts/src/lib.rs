//! Shared data contracts for fine-tuning runs.

pub mod params;

pub use params::{FinetuneParams, LoaderOpts, ModelOpts, ParamsError, TrainOpts};
