//! End-to-end training run: dataset, chronological holdout split, model fit,
//! calibration on the holdout, evaluation, and predictions for upcoming fixtures.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::boosting::train_gbdt_cancellable;
use crate::calibration::{
    CALIBRATION_BINS, CalibrationBin, CalibrationModel, CurvePoint, apply_calibration_all,
    calibration_bins, calibration_curve, fit_calibration,
};
use crate::cancel::CancelFlag;
use crate::config::TrainingConfig;
use crate::dataset::{build_training_dataset, feature_matrix, labels};
use crate::error::EngineError;
use crate::evaluation::{EvaluationMetrics, RoiPoint, evaluate, roi_series};
use crate::logistic::train_logistic_cancellable;
use crate::model::{Algorithm, FeatureImportance, SerializedModel};
use crate::prediction::{PredictionArtifact, Predictor, ScoreBaseline, predict_upcoming};
use crate::store::MatchStore;

/// Stamped on predictions when the caller has not assigned a version yet.
pub const DRAFT_VERSION: &str = "draft";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleSizes {
    pub training: usize,
    pub backtest: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSummary {
    pub model: CalibrationModel,
    pub bins: Vec<CalibrationBin>,
    pub curve: Vec<CurvePoint>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingMetrics {
    pub training: EvaluationMetrics,
    pub backtest: EvaluationMetrics,
    pub calibration: CalibrationSummary,
    pub roi_series: Vec<RoiPoint>,
    pub trained_at: DateTime<Utc>,
    pub sample_sizes: SampleSizes,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingResult {
    pub config: TrainingConfig,
    pub training_window_label: String,
    pub feature_importance: Vec<FeatureImportance>,
    pub model_parameters: SerializedModel,
    pub score_baseline: ScoreBaseline,
    pub metrics: TrainingMetrics,
    pub predictions: Vec<PredictionArtifact>,
}

impl TrainingResult {
    pub fn calibration(&self) -> &CalibrationModel {
        &self.metrics.calibration.model
    }

    pub fn version(&self) -> &str {
        self.config.version.as_deref().unwrap_or(DRAFT_VERSION)
    }

    pub fn to_json_pretty(&self) -> Result<Vec<u8>, EngineError> {
        Ok(serde_json::to_vec_pretty(self)?)
    }
}

/// `(training, backtest)` row counts for `n` rows. Backtest is never empty.
pub fn holdout_split(n: usize, ratio: f64) -> (usize, usize) {
    let holdout = ((n as f64 * ratio).floor() as usize).max(1);
    let mut split = n.saturating_sub(holdout);
    if split == 0 {
        split = n.saturating_sub(1);
    }
    (split, n - split)
}

pub fn train_model(
    store: &dyn MatchStore,
    config: &TrainingConfig,
    cancel: &CancelFlag,
    now: DateTime<Utc>,
) -> Result<TrainingResult, EngineError> {
    let model_name = config.model_name();
    let version = config.version.as_deref().unwrap_or(DRAFT_VERSION);
    info!(
        model = %model_name,
        version,
        algorithm = config.algorithm.as_str(),
        calibration = config.calibration.as_str(),
        window = %config.training_window.label(),
        "training started"
    );

    let dataset = build_training_dataset(store, &config.training_window, cancel)?;
    let (train_len, _) = holdout_split(dataset.len(), config.effective_holdout_ratio());
    let (train_rows, backtest_rows) = dataset.rows.split_at(train_len);

    let train_matrix = feature_matrix(train_rows);
    let train_labels = labels(train_rows);
    let model = match config.algorithm {
        Algorithm::Logit => SerializedModel::Logistic(train_logistic_cancellable(
            &train_matrix,
            &train_labels,
            &config.logistic,
            cancel,
        )?),
        Algorithm::Gbdt => SerializedModel::GradientBoosting(train_gbdt_cancellable(
            &train_matrix,
            &train_labels,
            &config.gradient_boosting,
            cancel,
        )?),
    };

    let backtest_labels = labels(backtest_rows);
    let raw_backtest = model.predict_all(&feature_matrix(backtest_rows));
    let calibration = fit_calibration(config.calibration, &raw_backtest, &backtest_labels);

    let calibrated_train = apply_calibration_all(&calibration, &model.predict_all(&train_matrix));
    let calibrated_backtest = apply_calibration_all(&calibration, &raw_backtest);

    let training_metrics = evaluate(train_rows, &calibrated_train, &config.betting);
    let backtest_metrics = evaluate(backtest_rows, &calibrated_backtest, &config.betting);
    let bins = calibration_bins(&calibrated_backtest, &backtest_labels, CALIBRATION_BINS);
    let curve = calibration_curve(&bins);
    let roi = roi_series(backtest_rows, &calibrated_backtest, &config.betting);

    let feature_importance = model.feature_importance();
    let baseline = ScoreBaseline::from_rows(train_rows);

    cancel.check("prediction")?;
    let upcoming = store.upcoming_fixtures(now)?;
    let predictor = Predictor {
        model: &model,
        calibration: &calibration,
        baseline,
        model_version: version,
    };
    let predictions = predict_upcoming(store, &predictor, &feature_importance, &upcoming)?;

    let sample_sizes = SampleSizes {
        training: train_rows.len(),
        backtest: backtest_rows.len(),
    };
    info!(
        model = %model_name,
        version,
        algorithm = config.algorithm.as_str(),
        training = sample_sizes.training,
        backtest = sample_sizes.backtest,
        backtest_accuracy = backtest_metrics.accuracy,
        backtest_roi = backtest_metrics.roi,
        predictions = predictions.len(),
        "training finished"
    );

    Ok(TrainingResult {
        config: config.clone(),
        training_window_label: config.training_window.label(),
        feature_importance,
        model_parameters: model,
        score_baseline: baseline,
        metrics: TrainingMetrics {
            training: training_metrics,
            backtest: backtest_metrics,
            calibration: CalibrationSummary {
                model: calibration,
                bins,
                curve,
            },
            roi_series: roi,
            trained_at: now,
            sample_sizes,
        },
        predictions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holdout_split_always_leaves_one_backtest_row() {
        assert_eq!(holdout_split(5, 0.2), (4, 1));
        assert_eq!(holdout_split(5, 0.01), (4, 1));
        assert_eq!(holdout_split(20, 0.25), (15, 5));
        assert_eq!(holdout_split(7, 0.99), (1, 6));
        for n in 5..60 {
            for ratio in [0.05, 0.2, 0.5, 0.75, 0.95] {
                let (train, backtest) = holdout_split(n, ratio);
                assert_eq!(train + backtest, n);
                assert!(backtest >= 1);
                assert!(train >= 1);
            }
        }
    }
}
