//! End-to-end workflows: patch files on disk → split list → Burn batches.

use burn_dataset::{
    write_patch, BatchSource, BurnDatasetError, InMemoryPatches, LoaderConfig, PatchGeometry,
    PatchLoader, PatchSample,
};
use std::fs;
use std::path::{Path, PathBuf};

type TestBackend = burn_ndarray::NdArray<f32>;

fn synthetic_patch(id: usize, channels: usize, size: usize) -> PatchSample {
    let plane = size * size;
    PatchSample {
        id: format!("patch_{id:03}"),
        channels,
        height: size,
        width: size,
        image: (0..channels * plane).map(|v| (id * 1000 + v) as f32).collect(),
        label: (0..plane).map(|v| ((id + v) % 3) as f32).collect(),
    }
}

/// Writes `count` patches plus a list naming them; returns the list path.
fn create_split(root: &Path, name: &str, count: usize, size: usize) -> anyhow::Result<PathBuf> {
    let mut ids = Vec::new();
    for i in 0..count {
        let rel = format!("patches/{name}_{i:03}.sgp");
        write_patch(&root.join(&rel), &synthetic_patch(i, 2, size))?;
        ids.push(rel);
    }
    let list = root.join(format!("{name}.txt"));
    fs::write(&list, ids.join("\n") + "\n")?;
    Ok(list)
}

fn cfg(batch_size: usize, shuffle: bool, num_workers: usize) -> LoaderConfig {
    LoaderConfig {
        batch_size,
        shuffle,
        num_workers,
        seed: Some(7),
        geometry: PatchGeometry {
            channels: 2,
            patch_size: 6,
        },
    }
}

fn first_values(loader: &mut PatchLoader) -> anyhow::Result<Vec<f32>> {
    let device = Default::default();
    let mut firsts = Vec::new();
    loader.reset();
    while let Some(batch) = loader.next_batch::<TestBackend>(&device)? {
        let n = batch.inputs.dims()[0];
        let per_sample = 2 * 6 * 6;
        let data = batch.inputs.into_data().to_vec::<f32>().unwrap_or_default();
        for b in 0..n {
            firsts.push(data[b * per_sample]);
        }
    }
    Ok(firsts)
}

#[test]
fn list_to_batches_keeps_partial_tail() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let list = create_split(tmp.path(), "train", 5, 6)?;
    let mut loader = PatchLoader::from_list(&list, None, cfg(2, false, 0))?;
    assert_eq!(loader.len(), 5);

    let device = Default::default();
    let mut sizes = Vec::new();
    while let Some(batch) = loader.next_batch::<TestBackend>(&device)? {
        assert_eq!(&batch.inputs.dims()[1..], &[2, 6, 6]);
        assert_eq!(&batch.labels.dims()[1..], &[1, 6, 6]);
        sizes.push(batch.inputs.dims()[0]);
    }
    assert_eq!(sizes, vec![2, 2, 1]);

    // A second pass only starts after reset.
    assert!(loader.next_batch::<TestBackend>(&device)?.is_none());
    loader.reset();
    assert!(loader.next_batch::<TestBackend>(&device)?.is_some());
    Ok(())
}

#[test]
fn seeded_shuffle_is_deterministic_and_a_permutation() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let list = create_split(tmp.path(), "train", 6, 6)?;

    let mut a = PatchLoader::from_list(&list, None, cfg(4, true, 0))?;
    let mut b = PatchLoader::from_list(&list, None, cfg(4, true, 0))?;
    let order_a = first_values(&mut a)?;
    let order_b = first_values(&mut b)?;
    assert_eq!(order_a, order_b);

    let mut sorted = order_a.clone();
    sorted.sort_by(|x, y| x.partial_cmp(y).unwrap());
    let expected: Vec<f32> = (0..6).map(|i| (i * 1000) as f32).collect();
    assert_eq!(sorted, expected);
    Ok(())
}

#[test]
fn worker_pool_matches_sequential_loading() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let list = create_split(tmp.path(), "val", 7, 6)?;
    let mut sequential = PatchLoader::from_list(&list, None, cfg(3, false, 0))?;
    let mut pooled = PatchLoader::from_list(&list, None, cfg(3, false, 3))?;
    assert_eq!(first_values(&mut sequential)?, first_values(&mut pooled)?);
    Ok(())
}

#[test]
fn wrong_patch_size_is_reported() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let list = create_split(tmp.path(), "train", 2, 8)?;
    let mut loader = PatchLoader::from_list(&list, None, cfg(2, false, 0))?;
    let err = loader
        .next_batch::<TestBackend>(&Default::default())
        .unwrap_err();
    assert!(matches!(err, BurnDatasetError::ShapeMismatch { .. }));
    Ok(())
}

#[test]
fn missing_patch_file_is_io_error() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let list = tmp.path().join("train.txt");
    fs::write(&list, "does_not_exist.sgp\n")?;
    let mut loader = PatchLoader::from_list(&list, None, cfg(1, false, 0))?;
    let err = loader
        .next_batch::<TestBackend>(&Default::default())
        .unwrap_err();
    assert!(matches!(err, BurnDatasetError::Io { .. }));
    Ok(())
}

#[test]
fn in_memory_source_follows_the_same_contract() -> anyhow::Result<()> {
    let samples: Vec<_> = (0..3).map(|i| synthetic_patch(i, 2, 6)).collect();
    let geometry = PatchGeometry {
        channels: 2,
        patch_size: 6,
    };
    let mut source = InMemoryPatches::new(samples, 2, geometry)?;
    let device = Default::default();
    source.reset();
    let first = source.next_batch::<TestBackend>(&device)?.expect("first batch");
    let labels = first.labels.into_data().to_vec::<f32>().unwrap_or_default();
    assert_eq!(&labels[..3], &[0.0, 1.0, 2.0]);
    assert_eq!(
        source.next_batch::<TestBackend>(&device)?.map(|b| b.inputs.dims()[0]),
        Some(1)
    );
    assert!(source.next_batch::<TestBackend>(&device)?.is_none());
    Ok(())
}
