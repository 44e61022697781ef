//! Mean IoU over predicted and reference class maps.

use std::collections::BTreeMap;

use crate::error::ComputeError;

#[derive(Debug, Default, Clone, Copy)]
struct ClassCounts {
    predicted: usize,
    labelled: usize,
    overlap: usize,
}

/// Mean IoU of one sample.
///
/// Every class in either map is considered; classes missing from one side
/// score 0. The sum is divided by the number of classes present in `label`.
pub fn mean_iou(predicted: &[i64], label: &[i64]) -> Result<f64, ComputeError> {
    if predicted.len() != label.len() {
        return Err(ComputeError::Metric(format!(
            "prediction has {} pixels, label has {}",
            predicted.len(),
            label.len()
        )));
    }
    if label.is_empty() {
        return Err(ComputeError::Metric("empty class map".into()));
    }

    let mut counts: BTreeMap<i64, ClassCounts> = BTreeMap::new();
    for (&p, &g) in predicted.iter().zip(label) {
        counts.entry(p).or_default().predicted += 1;
        counts.entry(g).or_default().labelled += 1;
        if p == g {
            counts.entry(p).or_default().overlap += 1;
        }
    }

    let label_classes = counts.values().filter(|c| c.labelled > 0).count();
    let total: f64 = counts
        .values()
        .filter(|c| c.predicted > 0 && c.labelled > 0)
        .map(|c| c.overlap as f64 / (c.predicted + c.labelled - c.overlap) as f64)
        .sum();
    Ok(total / label_classes as f64)
}

/// Mean IoU of each sample in a flattened batch of `batch` equally sized maps.
pub fn per_sample_iou(
    predicted: &[i64],
    label: &[i64],
    batch: usize,
) -> Result<Vec<f64>, ComputeError> {
    if batch == 0 || label.len() % batch != 0 || predicted.len() != label.len() {
        return Err(ComputeError::Metric(format!(
            "cannot split {} predicted / {} label pixels into {batch} samples",
            predicted.len(),
            label.len()
        )));
    }
    let per = label.len() / batch;
    predicted
        .chunks(per)
        .zip(label.chunks(per))
        .map(|(p, g)| mean_iou(p, g))
        .collect()
}

/// Batch metric: the arithmetic mean of the per-sample mean IoU.
pub fn batch_mean_iou(predicted: &[i64], label: &[i64], batch: usize) -> Result<f64, ComputeError> {
    let values = per_sample_iou(predicted, label, batch)?;
    Ok(values.iter().sum::<f64>() / values.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_maps_score_one() {
        let map = [0, 1, 2, 2, 1, 0];
        assert_eq!(mean_iou(&map, &map).unwrap(), 1.0);
    }

    #[test]
    fn partial_overlap() {
        // classes 0 and 1 each overlap on 1 of 3 pixels.
        let pred = [0, 0, 1, 1];
        let label = [0, 1, 1, 0];
        assert!((mean_iou(&pred, &label).unwrap() - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn predicted_only_class_scores_zero_but_does_not_count() {
        // class 2 appears only in the prediction; class 0 IoU = 2/3.
        let pred = [0, 0, 2];
        let label = [0, 0, 0];
        assert!((mean_iou(&pred, &label).unwrap() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn label_only_class_counts_as_zero() {
        // class 1 never predicted: (1/2 + 0) / 2
        let pred = [0, 0];
        let label = [0, 1];
        assert!((mean_iou(&pred, &label).unwrap() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn mismatched_or_empty_maps_fail() {
        assert!(mean_iou(&[0, 1], &[0]).is_err());
        assert!(mean_iou(&[], &[]).is_err());
        assert!(batch_mean_iou(&[0, 1, 2], &[0, 1, 2], 2).is_err());
    }

    #[test]
    fn batch_metric_is_mean_of_samples() {
        let pred = [0, 0, 1, 1, /* second sample */ 0, 1, 1, 0];
        let label = [0, 1, 1, 0, /* second sample */ 0, 1, 1, 0];
        let values = per_sample_iou(&pred, &label, 2).unwrap();
        assert!((values[0] - 1.0 / 3.0).abs() < 1e-12);
        assert!((values[1] - 1.0).abs() < 1e-12);
        let batch = batch_mean_iou(&pred, &label, 2).unwrap();
        assert!((batch - (values[0] + values[1]) / 2.0).abs() < 1e-12);
    }
}
