use serde::{Deserialize, Serialize};

use crate::boosting::BoostingModel;
use crate::features::FEATURE_NAMES;
use crate::logistic::LogisticModel;

/// Overflow-safe logistic function.
pub fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let z = x.exp();
        z / (1.0 + z)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Algorithm {
    Logit,
    Gbdt,
}

impl Algorithm {
    pub fn as_str(self) -> &'static str {
        match self {
            Algorithm::Logit => "logit",
            Algorithm::Gbdt => "gbdt",
        }
    }

    /// Anything other than `gbdt` trains the logistic model.
    pub fn parse_or_default(raw: Option<&str>) -> Self {
        match raw.map(|s| s.trim().to_ascii_lowercase()) {
            Some(s) if s == "gbdt" => Algorithm::Gbdt,
            _ => Algorithm::Logit,
        }
    }
}

/// A trained estimator. Exactly one variant per training run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum SerializedModel {
    #[serde(rename = "logit")]
    Logistic(LogisticModel),
    #[serde(rename = "gbdt")]
    GradientBoosting(BoostingModel),
}

impl SerializedModel {
    pub fn algorithm(&self) -> Algorithm {
        match self {
            SerializedModel::Logistic(_) => Algorithm::Logit,
            SerializedModel::GradientBoosting(_) => Algorithm::Gbdt,
        }
    }

    /// Uncalibrated home-win probability for a row in canonical feature order.
    pub fn predict_probability(&self, features: &[f64]) -> f64 {
        match self {
            SerializedModel::Logistic(m) => m.predict(features),
            SerializedModel::GradientBoosting(m) => m.predict(features),
        }
    }

    pub fn predict_all(&self, matrix: &[Vec<f64>]) -> Vec<f64> {
        matrix.iter().map(|row| self.predict_probability(row)).collect()
    }

    /// Per-feature importance, normalized to sum to 1 and sorted descending.
    ///
    /// Logistic: `|weight / std|`. Boosting: share of stumps splitting on the feature.
    /// A model with no signal at all reports a uniform split.
    pub fn feature_importance(&self) -> Vec<FeatureImportance> {
        let mut magnitudes = vec![0.0_f64; FEATURE_NAMES.len()];
        match self {
            SerializedModel::Logistic(m) => {
                for (idx, slot) in magnitudes.iter_mut().enumerate() {
                    let weight = m.weights.get(idx + 1).copied().unwrap_or(0.0);
                    let scale = m.stds.get(idx).copied().filter(|s| *s != 0.0).unwrap_or(1.0);
                    *slot = (weight / scale).abs();
                }
            }
            SerializedModel::GradientBoosting(m) => {
                for stump in &m.stumps {
                    if let Some(slot) = magnitudes.get_mut(stump.feature_index) {
                        *slot += 1.0;
                    }
                }
            }
        }

        let total: f64 = magnitudes.iter().sum();
        let uniform = 1.0 / FEATURE_NAMES.len() as f64;
        let mut out: Vec<FeatureImportance> = FEATURE_NAMES
            .iter()
            .zip(&magnitudes)
            .map(|(name, magnitude)| FeatureImportance {
                feature: (*name).to_string(),
                importance: if total > 0.0 && total.is_finite() {
                    magnitude / total
                } else {
                    uniform
                },
            })
            .collect();
        out.sort_by(|a, b| b.importance.total_cmp(&a.importance));
        out
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    pub importance: f64,
}
