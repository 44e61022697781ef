//! Segmentation losses selectable by name.

use burn::tensor::activation::{log_softmax, softmax};
use burn::tensor::backend::Backend;
use burn::tensor::{Int, Tensor};
use std::fmt;
use std::str::FromStr;

use crate::error::ConfigurationError;

/// Smoothing term of the overlap losses.
const SMOOTH: f64 = 1.0;
/// Tversky weights for false positives and false negatives.
const TVERSKY_ALPHA: f64 = 0.3;
const TVERSKY_BETA: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LossKind {
    Dice,
    CrossEntropy,
    Jaccard,
    Tversky,
}

impl LossKind {
    pub const OPTIONS: &'static [&'static str] = &["dice", "ce", "jaccard", "tversky"];

    pub fn name(self) -> &'static str {
        match self {
            LossKind::Dice => "dice",
            LossKind::CrossEntropy => "ce",
            LossKind::Jaccard => "jaccard",
            LossKind::Tversky => "tversky",
        }
    }

    /// Mean loss of `logits` `[N, C, H, W]` against class ids `[N, H, W]`.
    pub fn forward<B: Backend>(self, logits: Tensor<B, 4>, labels: Tensor<B, 3, Int>) -> Tensor<B, 1> {
        let [_, classes, _, _] = logits.dims();
        let target = one_hot(labels, classes);
        match self {
            LossKind::CrossEntropy => log_softmax(logits, 1).mul(target).sum_dim(1).mean().neg(),
            LossKind::Dice => overlap_loss(logits, target, |tp, fp, fn_| {
                let tp2 = tp.mul_scalar(2.0);
                (tp2.clone().add_scalar(SMOOTH)) / (tp2 + fp + fn_).add_scalar(SMOOTH)
            }),
            LossKind::Jaccard => overlap_loss(logits, target, |tp, fp, fn_| {
                tp.clone().add_scalar(SMOOTH) / (tp + fp + fn_).add_scalar(SMOOTH)
            }),
            LossKind::Tversky => overlap_loss(logits, target, |tp, fp, fn_| {
                tp.clone().add_scalar(SMOOTH)
                    / (tp + fp.mul_scalar(TVERSKY_ALPHA) + fn_.mul_scalar(TVERSKY_BETA))
                        .add_scalar(SMOOTH)
            }),
        }
    }
}

impl FromStr for LossKind {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dice" => Ok(LossKind::Dice),
            "ce" | "cross-entropy" | "cross_entropy" => Ok(LossKind::CrossEntropy),
            "jaccard" => Ok(LossKind::Jaccard),
            "tversky" => Ok(LossKind::Tversky),
            _ => Err(ConfigurationError::UnsupportedLoss {
                name: s.to_string(),
                options: Self::OPTIONS,
            }),
        }
    }
}

impl fmt::Display for LossKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `[N, H, W]` class ids to a `[N, C, H, W]` float indicator.
pub fn one_hot<B: Backend>(labels: Tensor<B, 3, Int>, classes: usize) -> Tensor<B, 4> {
    let labels = labels.unsqueeze_dim::<4>(1);
    let planes = (0..classes)
        .map(|class| labels.clone().equal_elem(class as i64).float())
        .collect();
    Tensor::cat(planes, 1)
}

/// Per-class soft counts over the batch, scored by `score` and averaged over classes.
fn overlap_loss<B, F>(logits: Tensor<B, 4>, target: Tensor<B, 4>, score: F) -> Tensor<B, 1>
where
    B: Backend,
    F: FnOnce(Tensor<B, 1>, Tensor<B, 1>, Tensor<B, 1>) -> Tensor<B, 1>,
{
    let [n, classes, h, w] = logits.dims();
    let per_class = |x: Tensor<B, 4>| -> Tensor<B, 1> {
        x.swap_dims(0, 1)
            .reshape([classes, n * h * w])
            .sum_dim(1)
            .reshape([classes])
    };
    let probs = softmax(logits, 1);
    let tp = per_class(probs.clone() * target.clone());
    let fp = per_class(probs) - tp.clone();
    let fn_ = per_class(target) - tp.clone();
    score(tp, fp, fn_).mean().neg().add_scalar(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray<f32>;

    fn scalar(t: Tensor<TestBackend, 1>) -> f32 {
        t.into_data().to_vec::<f32>().unwrap()[0]
    }

    /// Two classes on a 1x1x2x2 map, strongly predicting `pred`.
    fn confident_logits(pred: [i64; 4]) -> Tensor<TestBackend, 4> {
        let device = Default::default();
        let mut values = vec![0.0f32; 8];
        for (i, class) in pred.iter().enumerate() {
            values[*class as usize * 4 + i] = 20.0;
        }
        Tensor::<TestBackend, 1>::from_floats(values.as_slice(), &device).reshape([1, 2, 2, 2])
    }

    fn labels(ids: [i64; 4]) -> Tensor<TestBackend, 3, Int> {
        let device = Default::default();
        Tensor::<TestBackend, 1, Int>::from_ints(ids, &device).reshape([1, 2, 2])
    }

    #[test]
    fn parses_known_names() {
        assert_eq!("dice".parse::<LossKind>().unwrap(), LossKind::Dice);
        assert_eq!("CE".parse::<LossKind>().unwrap(), LossKind::CrossEntropy);
        assert_eq!("jaccard".parse::<LossKind>().unwrap(), LossKind::Jaccard);
        assert_eq!("tversky".parse::<LossKind>().unwrap(), LossKind::Tversky);
    }

    #[test]
    fn unknown_name_lists_options() {
        let err = "focal".parse::<LossKind>().unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("focal"));
        assert!(msg.contains("dice, ce, jaccard, tversky"));
    }

    #[test]
    fn one_hot_marks_each_class_plane() {
        let oh = one_hot(labels([0, 1, 1, 0]), 2);
        assert_eq!(oh.dims(), [1, 2, 2, 2]);
        let v = oh.into_data().to_vec::<f32>().unwrap();
        assert_eq!(v, vec![1.0, 0.0, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0]);
    }

    #[test]
    fn perfect_prediction_scores_near_zero() {
        let ids = [0, 1, 1, 0];
        for kind in [LossKind::Dice, LossKind::CrossEntropy, LossKind::Jaccard, LossKind::Tversky] {
            let loss = scalar(kind.forward(confident_logits(ids), labels(ids)));
            assert!(loss.abs() < 1e-3, "{kind}: {loss}");
        }
    }

    #[test]
    fn wrong_prediction_costs_more() {
        let truth = [0, 1, 1, 0];
        let wrong = [1, 0, 0, 1];
        for kind in [LossKind::Dice, LossKind::CrossEntropy, LossKind::Jaccard, LossKind::Tversky] {
            let good = scalar(kind.forward(confident_logits(truth), labels(truth)));
            let bad = scalar(kind.forward(confident_logits(wrong), labels(truth)));
            assert!(bad > good + 0.5, "{kind}: {bad} vs {good}");
        }
    }

    #[test]
    fn uniform_logits_give_log_c_cross_entropy() {
        let device = Default::default();
        let logits = Tensor::<TestBackend, 4>::zeros([1, 2, 2, 2], &device);
        let loss = scalar(LossKind::CrossEntropy.forward(logits, labels([0, 1, 1, 0])));
        assert!((loss - std::f32::consts::LN_2).abs() < 1e-5);
    }
}
