//! Second-order (Newton) gradient boosting over depth-1 trees ("boosted stumps").
//!
//! Each round fits one axis-aligned split on the logistic-loss gradient and
//! hessian; no deeper trees are grown.

use std::convert::Infallible;

use serde::{Deserialize, Serialize};

use crate::calibration::clamp_probability;
use crate::cancel::CancelFlag;
use crate::error::EngineError;
use crate::model::sigmoid;

const MIN_HESSIAN: f64 = 1e-6;
const CONVERGED_GRADIENT: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BoostingParams {
    pub trees: usize,
    pub learning_rate: f64,
    pub lambda: f64,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            trees: 80,
            learning_rate: 0.08,
            lambda: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stump {
    pub feature_index: usize,
    pub threshold: f64,
    pub left_value: f64,
    pub right_value: f64,
}

impl Stump {
    pub fn contribution(&self, features: &[f64]) -> f64 {
        let value = features.get(self.feature_index).copied().unwrap_or(0.0);
        if value <= self.threshold {
            self.left_value
        } else {
            self.right_value
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BoostingModel {
    pub bias: f64,
    pub shrinkage: f64,
    pub stumps: Vec<Stump>,
}

impl BoostingModel {
    pub fn raw_logit(&self, features: &[f64]) -> f64 {
        self.bias
            + self.shrinkage
                * self
                    .stumps
                    .iter()
                    .map(|s| s.contribution(features))
                    .sum::<f64>()
    }

    pub fn predict(&self, features: &[f64]) -> f64 {
        sigmoid(self.raw_logit(features))
    }
}

pub fn train_gbdt(matrix: &[Vec<f64>], labels: &[f64], params: &BoostingParams) -> BoostingModel {
    let Ok(model) = boost(matrix, labels, params, || Ok::<(), Infallible>(()));
    model
}

/// [`train_gbdt`] with a cancellation check before every boosting round.
pub fn train_gbdt_cancellable(
    matrix: &[Vec<f64>],
    labels: &[f64],
    params: &BoostingParams,
    cancel: &CancelFlag,
) -> Result<BoostingModel, EngineError> {
    boost(matrix, labels, params, || cancel.check("gradient boosting"))
}

fn base_logit(labels: &[f64]) -> f64 {
    let rate = clamp_probability(labels.iter().sum::<f64>() / labels.len().max(1) as f64);
    (rate / (1.0 - rate)).ln()
}

#[derive(Debug, Clone, Copy)]
struct Split {
    feature_index: usize,
    threshold: f64,
    left_value: f64,
    right_value: f64,
    gain: f64,
}

/// Runs the boosting rounds, calling `check` before each one.
fn boost<E>(
    matrix: &[Vec<f64>],
    labels: &[f64],
    params: &BoostingParams,
    mut check: impl FnMut() -> Result<(), E>,
) -> Result<BoostingModel, E> {
    let rows = matrix.len();
    let cols = matrix.first().map_or(0, Vec::len);
    let bias = base_logit(labels);
    let lambda = params.lambda;

    // Per-sample logits; owned here and never shared.
    let mut logits = vec![bias; rows];

    let sorted_by_feature: Vec<Vec<usize>> = (0..cols)
        .map(|col| {
            let mut order: Vec<usize> = (0..rows).collect();
            order.sort_by(|&a, &b| matrix[a][col].total_cmp(&matrix[b][col]));
            order
        })
        .collect();

    let mut stumps = Vec::new();
    let mut gradients = vec![0.0_f64; rows];
    let mut hessians = vec![0.0_f64; rows];

    for _ in 0..params.trees.max(1) {
        check()?;

        let mut total_gradient = 0.0_f64;
        let mut total_hessian = 0.0_f64;
        let mut gradient_magnitude = 0.0_f64;
        for i in 0..rows {
            let p = sigmoid(logits[i]);
            gradients[i] = labels[i] - p;
            hessians[i] = (p * (1.0 - p)).max(MIN_HESSIAN);
            total_gradient += gradients[i];
            total_hessian += hessians[i];
            gradient_magnitude += gradients[i].abs();
        }

        // The signed sum is ~0 from the first round (bias is the base-rate
        // log-odds), so convergence is judged on absolute residuals.
        if gradient_magnitude < CONVERGED_GRADIENT {
            break;
        }

        let mut best: Option<Split> = None;
        for (feature_index, order) in sorted_by_feature.iter().enumerate() {
            let mut left_gradient = 0.0_f64;
            let mut left_hessian = 0.0_f64;

            for pos in 0..rows.saturating_sub(1) {
                let row = order[pos];
                left_gradient += gradients[row];
                left_hessian += hessians[row];

                let current = matrix[row][feature_index];
                let next = matrix[order[pos + 1]][feature_index];
                if current == next {
                    continue;
                }

                let right_gradient = total_gradient - left_gradient;
                let right_hessian = total_hessian - left_hessian;
                if left_hessian <= MIN_HESSIAN || right_hessian <= MIN_HESSIAN {
                    continue;
                }

                let gain = left_gradient.powi(2) / (left_hessian + lambda)
                    + right_gradient.powi(2) / (right_hessian + lambda);
                if best.is_none_or(|b| gain > b.gain) {
                    best = Some(Split {
                        feature_index,
                        threshold: (current + next) / 2.0,
                        left_value: left_gradient / (left_hessian + lambda),
                        right_value: right_gradient / (right_hessian + lambda),
                        gain,
                    });
                }
            }
        }

        let Some(split) = best else {
            break;
        };
        let stump = Stump {
            feature_index: split.feature_index,
            threshold: split.threshold,
            left_value: split.left_value,
            right_value: split.right_value,
        };
        for (logit, row) in logits.iter_mut().zip(matrix) {
            *logit += params.learning_rate * stump.contribution(row);
        }
        stumps.push(stump);
    }

    Ok(BoostingModel {
        bias,
        shrinkage: params.learning_rate,
        stumps,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn step_data() -> (Vec<Vec<f64>>, Vec<f64>) {
        let matrix: Vec<Vec<f64>> = (0..30)
            .map(|i| vec![(i % 7) as f64, i as f64])
            .collect();
        let labels: Vec<f64> = (0..30).map(|i| if i >= 15 { 1.0 } else { 0.0 }).collect();
        (matrix, labels)
    }

    #[test]
    fn boosted_stumps_pick_the_informative_feature() {
        let (matrix, labels) = step_data();
        let model = train_gbdt(&matrix, &labels, &BoostingParams::default());
        assert!(!model.stumps.is_empty());
        assert_eq!(model.stumps[0].feature_index, 1);
        assert!((model.stumps[0].threshold - 14.5).abs() < 1e-9);
        assert!(model.stumps[0].left_value < 0.0 && model.stumps[0].right_value > 0.0);
        assert!(model.predict(&[0.0, 29.0]) > model.predict(&[0.0, 0.0]));
    }

    #[test]
    fn bias_is_base_rate_log_odds() {
        let (matrix, labels) = step_data();
        let model = train_gbdt(&matrix, &labels, &BoostingParams::default());
        assert!(model.bias.abs() < 1e-12);
        assert_eq!(model.shrinkage, 0.08);
    }

    #[test]
    fn constant_features_stop_without_stumps() {
        let matrix = vec![vec![1.0]; 6];
        let labels = vec![1.0, 0.0, 1.0, 0.0, 1.0, 1.0];
        let model = train_gbdt(&matrix, &labels, &BoostingParams::default());
        assert!(model.stumps.is_empty());
        let expected = (4.0_f64 / 2.0).ln();
        assert!((model.bias - expected).abs() < 1e-9);
    }

    #[test]
    fn perfectly_fit_labels_converge_early() {
        let matrix = vec![vec![0.0]; 5];
        let labels = vec![1.0; 5];
        // Base rate clamps just below 1, leaving residuals under the tolerance.
        let model = train_gbdt(&matrix, &labels, &BoostingParams::default());
        assert!(model.stumps.is_empty());
        assert!(model.predict(&[0.0]) > 0.999);
    }

    #[test]
    fn stump_rounds_are_bounded_by_tree_count() {
        let (matrix, labels) = step_data();
        let params = BoostingParams {
            trees: 5,
            ..BoostingParams::default()
        };
        let model = train_gbdt(&matrix, &labels, &params);
        assert!(model.stumps.len() <= 5);
    }

    #[test]
    fn idle_cancel_flag_matches_plain_training() {
        let (matrix, labels) = step_data();
        let params = BoostingParams::default();
        let plain = train_gbdt(&matrix, &labels, &params);
        let checked = train_gbdt_cancellable(&matrix, &labels, &params, &CancelFlag::new()).unwrap();
        assert_eq!(plain, checked);

        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = train_gbdt_cancellable(&matrix, &labels, &params, &cancel).unwrap_err();
        assert!(matches!(err, EngineError::Cancelled { stage: "gradient boosting" }));
    }
}
