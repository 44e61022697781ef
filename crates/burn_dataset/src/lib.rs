//! Patch datasets and Burn-compatible batching for fine-tuning.
//!
//! This crate provides:
//! - Newline-delimited patch lists per split
//! - The `SGP1` binary patch format (reader and writer)
//! - `BatchSource`, implemented by a file-backed loader and an in-memory source

pub mod batch;
pub mod list;
pub mod patch;
pub mod types;

pub use batch::{assemble_batch, BatchSource, InMemoryPatches, LoaderConfig, PatchBatch, PatchLoader};
pub use list::{load_patch_list, read_patch_list, resolve_patch_paths};
pub use patch::{decode_patch, encode_patch, read_patch, write_patch};
pub use types::*;
