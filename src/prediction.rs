use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::calibration::{CalibrationMethod, CalibrationModel, apply_calibration};
use crate::dataset::TrainingRow;
use crate::features::{FixtureFeatures, compute_fixture_features};
use crate::fixtures::FixtureRecord;
use crate::model::{FeatureImportance, SerializedModel};
use crate::store::MatchStore;

pub const EXPLANATION_FEATURES: usize = 6;
const SCORE_SWING: f64 = 6.0;
const FALLBACK_DRAW_SHARE: f64 = 0.25;

/// Average final scores of the training split; the anchor for expected scores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ScoreBaseline {
    pub home: f64,
    pub away: f64,
}

impl Default for ScoreBaseline {
    fn default() -> Self {
        Self {
            home: 24.0,
            away: 22.0,
        }
    }
}

impl ScoreBaseline {
    pub fn from_rows(rows: &[TrainingRow]) -> Self {
        if rows.is_empty() {
            return Self::default();
        }
        let n = rows.len() as f64;
        Self {
            home: rows.iter().map(|r| f64::from(r.home_score)).sum::<f64>() / n,
            away: rows.iter().map(|r| f64::from(r.away_score)).sum::<f64>() / n,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutcomeProbabilities {
    pub home: f64,
    pub draw: f64,
    pub away: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExpectedScores {
    pub home: f64,
    pub away: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationFeature {
    pub feature: String,
    /// Importance share in percent.
    pub weight: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Explanation {
    pub top_features: Vec<ExplanationFeature>,
    pub calibration: CalibrationMethod,
}

impl Explanation {
    /// `importance` is expected sorted descending, as [`SerializedModel::feature_importance`] returns it.
    pub fn new(importance: &[FeatureImportance], calibration: &CalibrationModel) -> Self {
        Self {
            top_features: importance
                .iter()
                .take(EXPLANATION_FEATURES)
                .map(|f| ExplanationFeature {
                    feature: f.feature.clone(),
                    weight: f.importance * 100.0,
                })
                .collect(),
            calibration: calibration.method(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PredictionArtifact {
    pub fixture_id: String,
    pub kickoff_at: DateTime<Utc>,
    pub home_team_id: String,
    pub away_team_id: String,
    pub model_version: String,
    pub probabilities: OutcomeProbabilities,
    pub expected_scores: ExpectedScores,
    /// Calibrated minus market-implied home probability; absent without a home price.
    pub edge: Option<f64>,
    pub explanation: Explanation,
}

/// Everything needed to turn a feature vector into a published prediction.
#[derive(Debug, Clone, Copy)]
pub struct Predictor<'a> {
    pub model: &'a SerializedModel,
    pub calibration: &'a CalibrationModel,
    pub baseline: ScoreBaseline,
    pub model_version: &'a str,
}

impl Predictor<'_> {
    pub fn predict(&self, features: &FixtureFeatures, explanation: &Explanation) -> PredictionArtifact {
        let vector = &features.feature_vector;
        let raw = self.model.predict_probability(&vector.to_vec());
        let home = apply_calibration(self.calibration, raw);

        let draw_share = draw_share(vector.draw_implied_probability, vector.away_implied_probability);
        let draw = (1.0 - home) * draw_share;
        let away = 1.0 - home - draw;

        let swing = (home - 0.5) * SCORE_SWING;
        let expected_scores = ExpectedScores {
            home: (self.baseline.home + swing).max(0.0),
            away: (self.baseline.away - swing).max(0.0),
        };

        let edge = (features.implied_odds.has_home_price() && vector.home_implied_probability > 0.0)
            .then(|| home - vector.home_implied_probability);

        PredictionArtifact {
            fixture_id: features.fixture_id.clone(),
            kickoff_at: features.kickoff_at,
            home_team_id: features.home_team_id.clone(),
            away_team_id: features.away_team_id.clone(),
            model_version: self.model_version.to_string(),
            probabilities: OutcomeProbabilities { home, draw, away },
            expected_scores,
            edge,
            explanation: explanation.clone(),
        }
    }
}

/// Draw's share of the non-home mass, by relative market price.
pub fn draw_share(draw_implied: f64, away_implied: f64) -> f64 {
    let total = draw_implied + away_implied;
    if total > 0.0 && total.is_finite() {
        draw_implied / total
    } else {
        FALLBACK_DRAW_SHARE
    }
}

/// Rebuilds features for each upcoming fixture exactly as training did and predicts it.
pub fn predict_upcoming(
    store: &dyn MatchStore,
    predictor: &Predictor<'_>,
    importance: &[FeatureImportance],
    fixtures: &[FixtureRecord],
) -> Result<Vec<PredictionArtifact>> {
    let explanation = Explanation::new(importance, predictor.calibration);
    let mut out = Vec::with_capacity(fixtures.len());
    for fixture in fixtures {
        let features = compute_fixture_features(store, fixture)?;
        out.push(predictor.predict(&features, &explanation));
    }
    Ok(out)
}
