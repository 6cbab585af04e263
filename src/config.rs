use serde::{Deserialize, Serialize};

use crate::boosting::BoostingParams;
use crate::calibration::CalibrationMethod;
use crate::evaluation::BettingPolicy;
use crate::fixtures::{TrainingWindow, parse_kickoff};
use crate::logistic::LogisticParams;
use crate::model::Algorithm;

pub const DEFAULT_HOLDOUT_RATIO: f64 = 0.2;
/// The command-line job holds out a larger slice than library callers.
pub const CLI_HOLDOUT_RATIO: f64 = 0.25;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrainingConfig {
    pub model_name: Option<String>,
    /// Left empty, the registry assigns the next patch version.
    pub version: Option<String>,
    pub description: Option<String>,
    pub algorithm: Algorithm,
    pub calibration: CalibrationMethod,
    pub training_window: TrainingWindow,
    pub holdout_ratio: f64,
    pub logistic: LogisticParams,
    pub gradient_boosting: BoostingParams,
    pub betting: BettingPolicy,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            model_name: None,
            version: None,
            description: None,
            algorithm: Algorithm::Logit,
            calibration: CalibrationMethod::Platt,
            training_window: TrainingWindow::default(),
            holdout_ratio: DEFAULT_HOLDOUT_RATIO,
            logistic: LogisticParams::default(),
            gradient_boosting: BoostingParams::default(),
            betting: BettingPolicy::default(),
        }
    }
}

impl TrainingConfig {
    /// Reads `MODEL_*`, `HOLDOUT_RATIO` and `TRAIN_*` from the process environment.
    pub fn from_env(default_holdout: f64) -> Self {
        Self::from_lookup(|key| std::env::var(key).ok(), default_holdout)
    }

    pub fn from_lookup<F>(lookup: F, default_holdout: f64) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let algorithm = Algorithm::parse_or_default(non_empty("MODEL_ALGO").as_deref());
        let holdout_ratio = non_empty("HOLDOUT_RATIO")
            .and_then(|v| v.trim().parse::<f64>().ok())
            .filter(|r| valid_ratio(*r))
            .unwrap_or(default_holdout);

        Self {
            model_name: non_empty("MODEL_NAME"),
            version: None,
            description: non_empty("MODEL_DESCRIPTION"),
            algorithm,
            calibration: CalibrationMethod::parse_or_default(non_empty("MODEL_CALIBRATION").as_deref()),
            training_window: TrainingWindow {
                start: non_empty("TRAIN_START").and_then(|v| parse_kickoff(&v)),
                end: non_empty("TRAIN_END").and_then(|v| parse_kickoff(&v)),
            },
            holdout_ratio,
            ..Self::default()
        }
    }

    pub fn model_name(&self) -> String {
        self.model_name
            .clone()
            .unwrap_or_else(|| format!("weekly-{}", self.algorithm.as_str()))
    }

    /// The configured ratio if it lies strictly inside (0, 1), else the library default.
    pub fn effective_holdout_ratio(&self) -> f64 {
        if valid_ratio(self.holdout_ratio) {
            self.holdout_ratio
        } else {
            DEFAULT_HOLDOUT_RATIO
        }
    }
}

fn valid_ratio(r: f64) -> bool {
    r.is_finite() && r > 0.0 && r < 1.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn env_overrides_and_fallbacks() {
        let cfg = TrainingConfig::from_lookup(
            lookup(&[
                ("MODEL_ALGO", "gbdt"),
                ("MODEL_CALIBRATION", "bogus"),
                ("HOLDOUT_RATIO", "1.5"),
                ("TRAIN_START", "2024-01-01"),
            ]),
            CLI_HOLDOUT_RATIO,
        );
        assert_eq!(cfg.algorithm, Algorithm::Gbdt);
        assert_eq!(cfg.calibration, CalibrationMethod::Platt);
        assert_eq!(cfg.holdout_ratio, CLI_HOLDOUT_RATIO);
        assert!(cfg.training_window.start.is_some());
        assert!(cfg.training_window.end.is_none());
        assert_eq!(cfg.model_name(), "weekly-gbdt");
    }

    #[test]
    fn empty_env_gives_defaults() {
        let cfg = TrainingConfig::from_lookup(lookup(&[("MODEL_NAME", "  ")]), DEFAULT_HOLDOUT_RATIO);
        assert_eq!(cfg, TrainingConfig::default());
        assert_eq!(cfg.model_name(), "weekly-logit");
    }

    #[test]
    fn out_of_range_ratio_falls_back() {
        let cfg = TrainingConfig {
            holdout_ratio: 0.0,
            ..TrainingConfig::default()
        };
        assert_eq!(cfg.effective_holdout_ratio(), DEFAULT_HOLDOUT_RATIO);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: TrainingConfig = serde_json::from_str(
            r#"{"algorithm":"gbdt","gradientBoosting":{"trees":10},"betting":{"stake":2.0}}"#,
        )
        .unwrap();
        assert_eq!(cfg.gradient_boosting.trees, 10);
        assert_eq!(cfg.gradient_boosting.learning_rate, 0.08);
        assert_eq!(cfg.betting.edge_threshold, 0.02);
        assert_eq!(cfg.logistic.iterations, 600);
        assert_eq!(cfg.holdout_ratio, DEFAULT_HOLDOUT_RATIO);
    }
}
