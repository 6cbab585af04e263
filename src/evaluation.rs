use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::calibration::clamp_probability;
use crate::dataset::TrainingRow;
use crate::fixtures::kickoff_month;

/// Flat-stake home-win betting rule used when scoring a probability set.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BettingPolicy {
    /// A bet is placed only when `probability − implied` is strictly above this.
    pub edge_threshold: f64,
    pub stake: f64,
}

impl Default for BettingPolicy {
    fn default() -> Self {
        Self {
            edge_threshold: 0.02,
            stake: 1.0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EvaluationMetrics {
    /// Fraction in `[0, 1]`.
    pub accuracy: f64,
    pub brier_score: f64,
    pub log_loss: f64,
    /// Percent.
    pub roi: f64,
    #[serde(rename = "yield")]
    pub yield_: f64,
    /// Fraction of placed bets that won.
    pub hit_rate: f64,
    pub bets: usize,
    pub sample_size: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoiPoint {
    /// `YYYY-MM` of kickoff, UTC.
    pub period: String,
    pub roi: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
struct Ledger {
    staked: f64,
    returned: f64,
    bets: usize,
    wins: usize,
}

impl Ledger {
    fn roi(&self) -> f64 {
        if self.staked > 0.0 {
            (self.returned - self.staked) / self.staked * 100.0
        } else {
            0.0
        }
    }
}

/// Decimal home price when the row is bettable under `policy`.
fn placed_bet(row: &TrainingRow, probability: f64, policy: &BettingPolicy) -> Option<f64> {
    let odds = row.features.implied_odds;
    if !odds.has_home_price() {
        return None;
    }
    let implied = row.features.feature_vector.home_implied_probability;
    if implied <= 0.0 {
        return None;
    }
    if probability - implied <= policy.edge_threshold {
        return None;
    }
    odds.home
}

fn settle(ledger: &mut Ledger, row: &TrainingRow, price: f64, policy: &BettingPolicy) {
    ledger.bets += 1;
    ledger.staked += policy.stake;
    if row.home_won() {
        ledger.returned += policy.stake * price;
        ledger.wins += 1;
    }
}

/// Scores calibrated home-win `probabilities` against `rows`, index for index.
pub fn evaluate(rows: &[TrainingRow], probabilities: &[f64], policy: &BettingPolicy) -> EvaluationMetrics {
    let n = rows.len().min(probabilities.len());
    if n == 0 {
        return EvaluationMetrics::default();
    }

    let mut hits = 0usize;
    let mut brier = 0.0_f64;
    let mut log_loss = 0.0_f64;
    let mut ledger = Ledger::default();

    for (row, raw) in rows.iter().zip(probabilities) {
        let p = clamp_probability(*raw);
        let y = row.label_f64();
        if (p >= 0.5) == (row.label == 1) {
            hits += 1;
        }
        brier += (p - y).powi(2);
        log_loss -= y * p.ln() + (1.0 - y) * (1.0 - p).ln();

        if let Some(price) = placed_bet(row, *raw, policy) {
            settle(&mut ledger, row, price, policy);
        }
    }

    let denom = n as f64;
    EvaluationMetrics {
        accuracy: hits as f64 / denom,
        brier_score: brier / denom,
        log_loss: log_loss / denom,
        roi: ledger.roi(),
        yield_: if ledger.staked > 0.0 {
            ledger.returned / ledger.staked
        } else {
            0.0
        },
        hit_rate: if ledger.bets > 0 {
            ledger.wins as f64 / ledger.bets as f64
        } else {
            0.0
        },
        bets: ledger.bets,
        sample_size: n,
    }
}

/// Monthly ROI of the same simulated bets, chronological. Months without a bet are omitted.
pub fn roi_series(rows: &[TrainingRow], probabilities: &[f64], policy: &BettingPolicy) -> Vec<RoiPoint> {
    let mut months: BTreeMap<String, Ledger> = BTreeMap::new();
    for (row, p) in rows.iter().zip(probabilities) {
        let Some(price) = placed_bet(row, *p, policy) else {
            continue;
        };
        let ledger = months.entry(kickoff_month(row.features.kickoff_at)).or_default();
        settle(ledger, row, price, policy);
    }
    months
        .into_iter()
        .map(|(period, ledger)| RoiPoint {
            period,
            roi: ledger.roi(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::{FeatureVector, FixtureFeatures};
    use crate::fixtures::{MarketOdds, Outcome};
    use chrono::{TimeZone, Utc};

    fn row(month: u32, home_odds: Option<f64>, outcome: Outcome) -> TrainingRow {
        let implied = home_odds.map_or(0.0, |o| 1.0 / o);
        let vector: FeatureVector = serde_json::from_value(serde_json::json!({
            "homeFormRating": 50.0, "awayFormRating": 50.0, "formDiff": 0.0,
            "homeElo": 1500.0, "awayElo": 1500.0, "eloDiff": 0.0,
            "homeRestDays": 7.0, "awayRestDays": 7.0, "restDiff": 0.0,
            "homeFatigueIndex": 0.14, "awayFatigueIndex": 0.14, "fatigueDiff": 0.0,
            "homeImpliedProbability": implied, "drawImpliedProbability": 0.0,
            "awayImpliedProbability": 0.0, "impliedEdge": implied,
            "weatherSeverity": 0.0, "homeHeadToHeadWinRate": 0.5,
            "awayHeadToHeadWinRate": 0.5, "headToHeadDiff": 0.0
        }))
        .unwrap();
        TrainingRow {
            features: FixtureFeatures {
                fixture_id: format!("m{month}"),
                kickoff_at: Utc.with_ymd_and_hms(2024, month, 10, 15, 0, 0).unwrap(),
                home_team_id: "H".into(),
                away_team_id: "A".into(),
                feature_vector: vector,
                implied_odds: MarketOdds {
                    home: home_odds,
                    draw: None,
                    away: None,
                },
                weather: None,
            },
            outcome,
            label: u8::from(outcome == Outcome::Home),
            home_score: if outcome == Outcome::Home { 2 } else { 0 },
            away_score: 1,
        }
    }

    #[test]
    fn accuracy_brier_and_log_loss() {
        let rows = vec![row(1, None, Outcome::Home), row(1, None, Outcome::Away)];
        let metrics = evaluate(&rows, &[0.8, 0.6], &BettingPolicy::default());
        assert!((metrics.accuracy - 0.5).abs() < 1e-12);
        assert!((metrics.brier_score - (0.04 + 0.36) / 2.0).abs() < 1e-12);
        let expected_ll = -(0.8_f64.ln() + 0.4_f64.ln()) / 2.0;
        assert!((metrics.log_loss - expected_ll).abs() < 1e-12);
        assert_eq!(metrics.bets, 0);
        assert_eq!(metrics.roi, 0.0);
    }

    #[test]
    fn bets_only_when_edge_clears_threshold() {
        // Implied 0.5 at odds 2.0.
        let rows = vec![
            row(1, Some(2.0), Outcome::Home),
            row(1, Some(2.0), Outcome::Away),
            row(2, Some(2.0), Outcome::Home),
            row(2, None, Outcome::Home),
        ];
        let probs = [0.6, 0.6, 0.51, 0.9];
        let metrics = evaluate(&rows, &probs, &BettingPolicy::default());
        assert_eq!(metrics.bets, 2);
        assert!((metrics.roi - 0.0).abs() < 1e-12);
        assert!((metrics.yield_ - 1.0).abs() < 1e-12);
        assert!((metrics.hit_rate - 0.5).abs() < 1e-12);
    }

    #[test]
    fn monthly_series_is_chronological() {
        let rows = vec![
            row(3, Some(2.5), Outcome::Home),
            row(1, Some(2.0), Outcome::Away),
            row(3, Some(2.5), Outcome::Away),
        ];
        let series = roi_series(&rows, &[0.7, 0.7, 0.7], &BettingPolicy::default());
        assert_eq!(series.len(), 2);
        assert_eq!(series[0].period, "2024-01");
        assert!((series[0].roi + 100.0).abs() < 1e-12);
        assert_eq!(series[1].period, "2024-03");
        assert!((series[1].roi - 25.0).abs() < 1e-12);
    }

    #[test]
    fn injected_policy_changes_stake_and_threshold() {
        let rows = vec![row(1, Some(2.0), Outcome::Home)];
        let policy = BettingPolicy {
            edge_threshold: 0.2,
            stake: 5.0,
        };
        assert_eq!(evaluate(&rows, &[0.6], &policy).bets, 0);
        let metrics = evaluate(&rows, &[0.8], &policy);
        assert_eq!(metrics.bets, 1);
        assert!((metrics.roi - 100.0).abs() < 1e-12);
    }

    #[test]
    fn yield_field_serializes_without_underscore() {
        let json = serde_json::to_value(EvaluationMetrics::default()).unwrap();
        assert!(json.get("yield").is_some());
        assert!(json.get("brierScore").is_some());
    }
}
