use serde::{Deserialize, Serialize};

use crate::cancel::CancelFlag;
use crate::error::{EngineError, MIN_TRAINING_ROWS};
use crate::features::{FEATURE_NAMES, FixtureFeatures, compute_fixture_features};
use crate::fixtures::{Outcome, TrainingWindow};
use crate::store::MatchStore;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingRow {
    #[serde(flatten)]
    pub features: FixtureFeatures,
    pub outcome: Outcome,
    /// 1 for a home win, 0 otherwise.
    pub label: u8,
    pub home_score: i32,
    pub away_score: i32,
}

impl TrainingRow {
    pub fn label_f64(&self) -> f64 {
        f64::from(self.label)
    }

    pub fn home_won(&self) -> bool {
        self.outcome == Outcome::Home
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrainingDataset {
    pub rows: Vec<TrainingRow>,
    pub feature_order: Vec<String>,
}

impl TrainingDataset {
    pub fn new(rows: Vec<TrainingRow>) -> Self {
        Self {
            rows,
            feature_order: FEATURE_NAMES.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn matrix(&self) -> Vec<Vec<f64>> {
        feature_matrix(&self.rows)
    }

    pub fn labels(&self) -> Vec<f64> {
        labels(&self.rows)
    }
}

pub fn feature_matrix(rows: &[TrainingRow]) -> Vec<Vec<f64>> {
    rows.iter().map(|r| r.features.feature_vector.to_vec()).collect()
}

pub fn labels(rows: &[TrainingRow]) -> Vec<f64> {
    rows.iter().map(TrainingRow::label_f64).collect()
}

/// Builds labeled rows for every completed fixture in `window`, kickoff-ascending.
///
/// Each fixture's context is read strictly in order so recency weighting sees
/// exactly the history that existed before its kickoff.
pub fn build_training_dataset(
    store: &dyn MatchStore,
    window: &TrainingWindow,
    cancel: &CancelFlag,
) -> Result<TrainingDataset, EngineError> {
    let completed = store.completed_fixtures(window)?;
    let mut rows = Vec::with_capacity(completed.len());

    for fixture in &completed {
        cancel.check("dataset build")?;
        let (Some(home_score), Some(away_score)) = (fixture.home_score, fixture.away_score) else {
            continue;
        };
        let Some(outcome) = fixture.outcome() else {
            continue;
        };
        let features = compute_fixture_features(store, fixture)?;
        rows.push(TrainingRow {
            features,
            outcome,
            label: u8::from(outcome == Outcome::Home),
            home_score,
            away_score,
        });
    }

    if rows.len() < MIN_TRAINING_ROWS {
        return Err(EngineError::insufficient(rows.len()));
    }

    rows.sort_by(|a, b| a.features.kickoff_at.cmp(&b.features.kickoff_at));
    Ok(TrainingDataset::new(rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{FixtureRecord, FixtureStatus};
    use crate::store::MemoryStore;
    use chrono::{TimeZone, Utc};

    fn store_with(n: u32) -> MemoryStore {
        let mut store = MemoryStore::new();
        for day in 1..=n {
            store.upsert_fixture(FixtureRecord {
                id: format!("f{day:02}"),
                kickoff_at: Utc.with_ymd_and_hms(2024, 5, day, 15, 0, 0).unwrap(),
                home_team_id: if day % 2 == 0 { "A" } else { "B" }.to_string(),
                away_team_id: if day % 2 == 0 { "B" } else { "A" }.to_string(),
                status: FixtureStatus::Completed,
                home_score: Some((day % 3) as i32),
                away_score: Some(1),
            });
        }
        store
    }

    #[test]
    fn rejects_fewer_than_five_rows() {
        let store = store_with(4);
        let err = build_training_dataset(&store, &TrainingWindow::default(), &CancelFlag::new())
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::InsufficientData {
                available: 4,
                required: 5
            }
        ));
    }

    #[test]
    fn labels_home_wins_in_kickoff_order() {
        let store = store_with(6);
        let dataset =
            build_training_dataset(&store, &TrainingWindow::default(), &CancelFlag::new())
                .unwrap();
        assert_eq!(dataset.len(), 6);
        assert_eq!(dataset.feature_order.len(), 20);
        for pair in dataset.rows.windows(2) {
            assert!(pair[0].features.kickoff_at <= pair[1].features.kickoff_at);
        }
        // day % 3 == 2 beats the away side's single goal.
        let labels = dataset.labels();
        assert_eq!(labels, vec![0.0, 1.0, 0.0, 0.0, 1.0, 0.0]);
        assert_eq!(dataset.rows[2].outcome, Outcome::Away);
        assert_eq!(dataset.rows[0].outcome, Outcome::Draw);
    }

    #[test]
    fn cancellation_stops_the_build() {
        let store = store_with(6);
        let cancel = CancelFlag::new();
        cancel.cancel();
        let err = build_training_dataset(&store, &TrainingWindow::default(), &cancel).unwrap_err();
        assert!(matches!(err, EngineError::Cancelled { .. }));
    }
}
