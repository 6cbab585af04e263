use serde::{Deserialize, Serialize};

use crate::model::sigmoid;

pub const PROBABILITY_EPSILON: f64 = 1e-9;
pub const MIN_PLATT_SAMPLES: usize = 5;
pub const CALIBRATION_BINS: usize = 8;

const PLATT_MAX_ITERATIONS: usize = 50;
const PLATT_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CalibrationMethod {
    Platt,
    Isotonic,
    None,
}

impl CalibrationMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            CalibrationMethod::Platt => "platt",
            CalibrationMethod::Isotonic => "isotonic",
            CalibrationMethod::None => "none",
        }
    }

    /// `isotonic` and `none` are honored; anything else means Platt.
    pub fn parse_or_default(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()).as_deref() {
            Some("isotonic") => CalibrationMethod::Isotonic,
            Some("none") => CalibrationMethod::None,
            _ => CalibrationMethod::Platt,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IsotonicPoint {
    pub threshold: f64,
    pub value: f64,
}

/// Post-hoc map from raw model probability to calibrated probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", rename_all = "lowercase")]
pub enum CalibrationModel {
    None,
    Platt { slope: f64, intercept: f64 },
    /// Step function: the first point whose threshold is >= p gives the value.
    Isotonic { mapping: Vec<IsotonicPoint> },
}

impl CalibrationModel {
    pub fn method(&self) -> CalibrationMethod {
        match self {
            CalibrationModel::None => CalibrationMethod::None,
            CalibrationModel::Platt { .. } => CalibrationMethod::Platt,
            CalibrationModel::Isotonic { .. } => CalibrationMethod::Isotonic,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalibrationBin {
    pub bucket_start: f64,
    pub bucket_end: f64,
    pub count: usize,
    pub avg_pred: f64,
    pub actual_rate: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CurvePoint {
    pub predicted: f64,
    pub actual: f64,
}

pub fn clamp_probability(p: f64) -> f64 {
    if p.is_nan() {
        return 0.5;
    }
    p.clamp(PROBABILITY_EPSILON, 1.0 - PROBABILITY_EPSILON)
}

fn logit(p: f64) -> f64 {
    let p = clamp_probability(p);
    (p / (1.0 - p)).ln()
}

/// Fits the requested calibration on held-out predictions. Too little data yields `None`.
pub fn fit_calibration(
    method: CalibrationMethod,
    raw_probabilities: &[f64],
    labels: &[f64],
) -> CalibrationModel {
    let fitted = match method {
        CalibrationMethod::None => return CalibrationModel::None,
        CalibrationMethod::Platt => fit_platt(raw_probabilities, labels),
        CalibrationMethod::Isotonic => fit_isotonic(raw_probabilities, labels),
    };
    fitted.unwrap_or_else(|| {
        tracing::warn!(
            method = method.as_str(),
            samples = raw_probabilities.len(),
            "calibration skipped, too few backtest samples"
        );
        CalibrationModel::None
    })
}

/// Newton-Raphson on `sigmoid(slope * logit(p) + intercept)`.
pub fn fit_platt(raw_probabilities: &[f64], labels: &[f64]) -> Option<CalibrationModel> {
    if raw_probabilities.len() < MIN_PLATT_SAMPLES || raw_probabilities.len() != labels.len() {
        return None;
    }

    let logits: Vec<f64> = raw_probabilities.iter().map(|p| logit(*p)).collect();
    let mut slope = 1.0_f64;
    let mut intercept = 0.0_f64;

    for _ in 0..PLATT_MAX_ITERATIONS {
        let mut grad_slope = 0.0_f64;
        let mut grad_intercept = 0.0_f64;
        let mut h11 = 0.0_f64;
        let mut h12 = 0.0_f64;
        let mut h22 = 0.0_f64;

        for (x, y) in logits.iter().zip(labels) {
            let calibrated = sigmoid(slope * x + intercept);
            let error = calibrated - y;
            grad_slope += error * x;
            grad_intercept += error;

            let w = (calibrated * (1.0 - calibrated)).max(1e-6);
            h11 += w * x * x;
            h12 += w * x;
            h22 += w;
        }

        let det = h11 * h22 - h12 * h12;
        if det.abs() < 1e-6 {
            break;
        }

        let delta_slope = (grad_slope * h22 - grad_intercept * h12) / det;
        let delta_intercept = (grad_intercept * h11 - grad_slope * h12) / det;
        slope -= delta_slope;
        intercept -= delta_intercept;

        if delta_slope.abs() < PLATT_TOLERANCE && delta_intercept.abs() < PLATT_TOLERANCE {
            break;
        }
    }

    if !slope.is_finite() || !intercept.is_finite() {
        return None;
    }
    Some(CalibrationModel::Platt { slope, intercept })
}

/// Pool-adjacent-violators over `(probability, label)` pairs sorted by probability.
pub fn fit_isotonic(raw_probabilities: &[f64], labels: &[f64]) -> Option<CalibrationModel> {
    if raw_probabilities.is_empty() || raw_probabilities.len() != labels.len() {
        return None;
    }

    let mut pairs: Vec<(f64, f64)> = raw_probabilities
        .iter()
        .copied()
        .zip(labels.iter().copied())
        .collect();
    pairs.sort_by(|a, b| a.0.total_cmp(&b.0));

    struct Block {
        end: f64,
        weight: f64,
        sum: f64,
    }
    impl Block {
        fn mean(&self) -> f64 {
            self.sum / self.weight
        }
    }

    let mut blocks: Vec<Block> = Vec::with_capacity(pairs.len());
    for (prob, label) in pairs {
        blocks.push(Block {
            end: prob,
            weight: 1.0,
            sum: label,
        });
        // Merge backwards until the tail is non-decreasing again.
        while blocks.len() >= 2 {
            let n = blocks.len();
            if blocks[n - 2].mean() <= blocks[n - 1].mean() {
                break;
            }
            let Some(last) = blocks.pop() else {
                break;
            };
            if let Some(prev) = blocks.last_mut() {
                prev.end = last.end;
                prev.weight += last.weight;
                prev.sum += last.sum;
            }
        }
    }

    let mapping = blocks
        .iter()
        .map(|b| IsotonicPoint {
            threshold: b.end,
            value: b.mean(),
        })
        .collect();
    Some(CalibrationModel::Isotonic { mapping })
}

/// Maps a raw probability through `model`; the result is always inside `(ε, 1−ε)`.
pub fn apply_calibration(model: &CalibrationModel, probability: f64) -> f64 {
    let p = clamp_probability(probability);
    match model {
        CalibrationModel::None => p,
        CalibrationModel::Platt { slope, intercept } => {
            clamp_probability(sigmoid(slope * logit(p) + intercept))
        }
        CalibrationModel::Isotonic { mapping } => {
            let Some(last) = mapping.last() else {
                return p;
            };
            let value = mapping
                .iter()
                .find(|point| p <= point.threshold)
                .unwrap_or(last)
                .value;
            clamp_probability(value)
        }
    }
}

pub fn apply_calibration_all(model: &CalibrationModel, probabilities: &[f64]) -> Vec<f64> {
    probabilities
        .iter()
        .map(|p| apply_calibration(model, *p))
        .collect()
}

/// Reliability diagram over `bins` equal-width buckets of `[0, 1]`.
pub fn calibration_bins(probabilities: &[f64], labels: &[f64], bins: usize) -> Vec<CalibrationBin> {
    let bins = bins.max(2);
    let mut counts = vec![0usize; bins];
    let mut pred_sum = vec![0.0_f64; bins];
    let mut actual_sum = vec![0.0_f64; bins];

    for (p, y) in probabilities.iter().zip(labels) {
        let p = p.clamp(0.0, 1.0);
        let idx = ((p * bins as f64).floor() as usize).min(bins - 1);
        counts[idx] += 1;
        pred_sum[idx] += p;
        actual_sum[idx] += y;
    }

    (0..bins)
        .map(|i| {
            let count = counts[i];
            let (avg_pred, actual_rate) = if count > 0 {
                (pred_sum[i] / count as f64, actual_sum[i] / count as f64)
            } else {
                (0.0, 0.0)
            };
            CalibrationBin {
                bucket_start: i as f64 / bins as f64,
                bucket_end: (i + 1) as f64 / bins as f64,
                count,
                avg_pred,
                actual_rate,
            }
        })
        .collect()
}

/// Non-empty bins only, as predicted-vs-observed points.
pub fn calibration_curve(bins: &[CalibrationBin]) -> Vec<CurvePoint> {
    bins.iter()
        .filter(|b| b.count > 0)
        .map(|b| CurvePoint {
            predicted: b.avg_pred,
            actual: b.actual_rate,
        })
        .collect()
}
