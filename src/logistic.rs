//! L2-regularized logistic regression trained by batch gradient descent.

use std::convert::Infallible;

use serde::{Deserialize, Serialize};

use crate::cancel::CancelFlag;
use crate::error::EngineError;
use crate::model::sigmoid;

const GRADIENT_TOLERANCE: f64 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogisticParams {
    pub learning_rate: f64,
    pub iterations: usize,
    pub l2: f64,
}

impl Default for LogisticParams {
    fn default() -> Self {
        Self {
            learning_rate: 0.15,
            iterations: 600,
            l2: 0.01,
        }
    }
}

/// `weights[0]` is the bias; `weights[j + 1]` pairs with standardized column `j`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogisticModel {
    pub weights: Vec<f64>,
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
}

impl LogisticModel {
    pub fn predict(&self, features: &[f64]) -> f64 {
        let standardized = apply_standardization(features, &self.means, &self.stds);
        linear_predict(&self.weights, &standardized)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Standardized {
    pub normalized: Vec<Vec<f64>>,
    pub means: Vec<f64>,
    pub stds: Vec<f64>,
}

/// Column-wise z-scores using the sample standard deviation. Constant columns get std 1.
pub fn standardize_matrix(matrix: &[Vec<f64>]) -> Standardized {
    let rows = matrix.len();
    let cols = matrix.first().map_or(0, Vec::len);
    let mut means = vec![0.0_f64; cols];
    let mut stds = vec![1.0_f64; cols];

    if rows > 0 {
        for (col, mean) in means.iter_mut().enumerate() {
            *mean = matrix.iter().map(|row| row[col]).sum::<f64>() / rows as f64;
        }
        for (col, std) in stds.iter_mut().enumerate() {
            let squared: f64 = matrix
                .iter()
                .map(|row| (row[col] - means[col]).powi(2))
                .sum();
            let sd = (squared / (rows.saturating_sub(1).max(1)) as f64).sqrt();
            *std = if sd.is_finite() && sd > 0.0 { sd } else { 1.0 };
        }
    }

    let normalized = matrix
        .iter()
        .map(|row| apply_standardization(row, &means, &stds))
        .collect();
    Standardized {
        normalized,
        means,
        stds,
    }
}

pub fn apply_standardization(row: &[f64], means: &[f64], stds: &[f64]) -> Vec<f64> {
    row.iter()
        .zip(means.iter().zip(stds))
        .map(|(value, (mean, std))| (value - mean) / std)
        .collect()
}

fn linear_predict(weights: &[f64], row: &[f64]) -> f64 {
    let logit = weights[0]
        + weights[1..]
            .iter()
            .zip(row)
            .map(|(w, x)| w * x)
            .sum::<f64>();
    sigmoid(logit)
}

/// Standardizes `matrix`, then fits weights from zero. Deterministic for identical input.
pub fn train_logistic(matrix: &[Vec<f64>], labels: &[f64], params: &LogisticParams) -> LogisticModel {
    let standardized = standardize_matrix(matrix);
    let Ok(weights) =
        gradient_descent(&standardized.normalized, labels, params, || Ok::<(), Infallible>(()));
    LogisticModel {
        weights,
        means: standardized.means,
        stds: standardized.stds,
    }
}

/// [`train_logistic`] with a cancellation check before every iteration.
pub fn train_logistic_cancellable(
    matrix: &[Vec<f64>],
    labels: &[f64],
    params: &LogisticParams,
    cancel: &CancelFlag,
) -> Result<LogisticModel, EngineError> {
    let standardized = standardize_matrix(matrix);
    let weights = gradient_descent(&standardized.normalized, labels, params, || {
        cancel.check("logistic gradient descent")
    })?;
    Ok(LogisticModel {
        weights,
        means: standardized.means,
        stds: standardized.stds,
    })
}

fn gradient_descent<E>(
    matrix: &[Vec<f64>],
    labels: &[f64],
    params: &LogisticParams,
    mut check: impl FnMut() -> Result<(), E>,
) -> Result<Vec<f64>, E> {
    let rows = matrix.len();
    let cols = matrix.first().map_or(0, Vec::len);
    let mut weights = vec![0.0_f64; cols + 1];
    if rows == 0 {
        return Ok(weights);
    }
    let step = params.learning_rate / rows as f64;

    for _ in 0..params.iterations {
        check()?;

        let mut bias_gradient = 0.0_f64;
        let mut gradients = vec![0.0_f64; cols];
        for (row, label) in matrix.iter().zip(labels) {
            let error = linear_predict(&weights, row) - label;
            bias_gradient += error;
            for (g, x) in gradients.iter_mut().zip(row) {
                *g += error * x;
            }
        }

        weights[0] -= step * bias_gradient;
        for (j, g) in gradients.iter_mut().enumerate() {
            *g += params.l2 * weights[j + 1];
            weights[j + 1] -= step * *g;
        }

        let max_gradient = gradients
            .iter()
            .fold(bias_gradient.abs(), |acc, g| acc.max(g.abs()));
        if max_gradient < GRADIENT_TOLERANCE {
            break;
        }
    }

    Ok(weights)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_variance_column_gets_unit_std() {
        let matrix = vec![vec![1.0, 3.0], vec![2.0, 3.0], vec![3.0, 3.0]];
        let s = standardize_matrix(&matrix);
        assert_eq!(s.means, vec![2.0, 3.0]);
        assert_eq!(s.stds, vec![1.0, 1.0]);
        assert_eq!(s.normalized[0], vec![-1.0, 0.0]);
    }

    #[test]
    fn learns_direction_of_single_feature() {
        let matrix: Vec<Vec<f64>> = (0..20).map(|i| vec![i as f64]).collect();
        let labels: Vec<f64> = (0..20).map(|i| if i >= 10 { 1.0 } else { 0.0 }).collect();
        let model = train_logistic(&matrix, &labels, &LogisticParams::default());
        assert!(model.weights[1] > 0.0);
        assert!(model.predict(&[19.0]) > 0.8);
        assert!(model.predict(&[0.0]) < 0.2);
    }

    #[test]
    fn empty_matrix_yields_zero_bias() {
        let model = train_logistic(&[], &[], &LogisticParams::default());
        assert_eq!(model.weights, vec![0.0]);
        assert!((model.predict(&[]) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn cancelled_training_returns_error() {
        let cancel = CancelFlag::new();
        cancel.cancel();
        let matrix = vec![vec![0.0], vec![1.0]];
        let err = train_logistic_cancellable(&matrix, &[0.0, 1.0], &LogisticParams::default(), &cancel)
            .unwrap_err();
        assert!(matches!(err, EngineError::Cancelled { .. }));
    }

    #[test]
    fn idle_cancel_flag_matches_plain_training() {
        let matrix: Vec<Vec<f64>> = (0..12).map(|i| vec![i as f64, (i % 3) as f64]).collect();
        let labels: Vec<f64> = (0..12).map(|i| if i >= 6 { 1.0 } else { 0.0 }).collect();
        let params = LogisticParams::default();
        let plain = train_logistic(&matrix, &labels, &params);
        let checked = train_logistic_cancellable(&matrix, &labels, &params, &CancelFlag::new()).unwrap();
        assert_eq!(plain, checked);
        assert!(plain.weights[1] > 0.0);
    }
}
