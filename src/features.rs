//! Per-fixture feature engineering.
//!
//! Every function here is a pure numeric transform that degrades missing or
//! malformed inputs to a neutral value instead of failing. The only fallible
//! entry point is [`compute_fixture_features`], which reads its context from a
//! [`MatchStore`].

use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::fixtures::{FixtureRecord, MarketOdds, WeatherObservation};
use crate::store::MatchStore;

pub const FEATURE_COUNT: usize = 20;

/// Canonical feature order. Training matrices and inference rows both follow it.
pub const FEATURE_NAMES: [&str; FEATURE_COUNT] = [
    "homeFormRating",
    "awayFormRating",
    "formDiff",
    "homeElo",
    "awayElo",
    "eloDiff",
    "homeRestDays",
    "awayRestDays",
    "restDiff",
    "homeFatigueIndex",
    "awayFatigueIndex",
    "fatigueDiff",
    "homeImpliedProbability",
    "drawImpliedProbability",
    "awayImpliedProbability",
    "impliedEdge",
    "weatherSeverity",
    "homeHeadToHeadWinRate",
    "awayHeadToHeadWinRate",
    "headToHeadDiff",
];

static FEATURE_INDEX: Lazy<HashMap<&'static str, usize>> = Lazy::new(|| {
    FEATURE_NAMES
        .iter()
        .enumerate()
        .map(|(idx, name)| (*name, idx))
        .collect()
});

pub const RECENT_MATCH_LIMIT: usize = 6;
pub const HEAD_TO_HEAD_LIMIT: usize = 10;

const NEUTRAL_REST_DAYS: f64 = 10.0;
const ELO_BASELINE: f64 = 1500.0;

pub fn feature_index(name: &str) -> Option<usize> {
    FEATURE_INDEX.get(name).copied()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureVector {
    pub home_form_rating: f64,
    pub away_form_rating: f64,
    pub form_diff: f64,
    pub home_elo: f64,
    pub away_elo: f64,
    pub elo_diff: f64,
    pub home_rest_days: f64,
    pub away_rest_days: f64,
    pub rest_diff: f64,
    pub home_fatigue_index: f64,
    pub away_fatigue_index: f64,
    pub fatigue_diff: f64,
    pub home_implied_probability: f64,
    pub draw_implied_probability: f64,
    pub away_implied_probability: f64,
    pub implied_edge: f64,
    pub weather_severity: f64,
    pub home_head_to_head_win_rate: f64,
    pub away_head_to_head_win_rate: f64,
    pub head_to_head_diff: f64,
}

impl FeatureVector {
    /// Values in [`FEATURE_NAMES`] order, with any non-finite entry replaced by 0.
    pub fn to_array(&self) -> [f64; FEATURE_COUNT] {
        [
            self.home_form_rating,
            self.away_form_rating,
            self.form_diff,
            self.home_elo,
            self.away_elo,
            self.elo_diff,
            self.home_rest_days,
            self.away_rest_days,
            self.rest_diff,
            self.home_fatigue_index,
            self.away_fatigue_index,
            self.fatigue_diff,
            self.home_implied_probability,
            self.draw_implied_probability,
            self.away_implied_probability,
            self.implied_edge,
            self.weather_severity,
            self.home_head_to_head_win_rate,
            self.away_head_to_head_win_rate,
            self.head_to_head_diff,
        ]
        .map(finite_or_zero)
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.to_array().to_vec()
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        feature_index(name).map(|idx| self.to_array()[idx])
    }

    pub fn named_values(&self) -> Vec<(&'static str, f64)> {
        FEATURE_NAMES.iter().copied().zip(self.to_array()).collect()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FormSummary {
    pub rating: f64,
    pub win_rate: f64,
    pub average_for: f64,
    pub average_against: f64,
}

impl FormSummary {
    pub fn neutral() -> Self {
        Self {
            rating: 50.0,
            win_rate: 0.5,
            average_for: 0.0,
            average_against: 0.0,
        }
    }

    pub fn average_margin(&self) -> f64 {
        self.average_for - self.average_against
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadToHead {
    pub home_win_rate: f64,
    pub away_win_rate: f64,
    pub diff: f64,
}

impl HeadToHead {
    pub fn neutral() -> Self {
        Self {
            home_win_rate: 0.5,
            away_win_rate: 0.5,
            diff: 0.0,
        }
    }
}

/// Odds and weather attached to a fixture at feature-build time.
#[derive(Debug, Clone, Copy)]
pub struct FixtureContext<'a> {
    pub fixture: &'a FixtureRecord,
    pub odds: Option<&'a MarketOdds>,
    pub weather: Option<&'a WeatherObservation>,
}

/// A fixture's feature vector together with the raw context it was built from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureFeatures {
    pub fixture_id: String,
    pub kickoff_at: DateTime<Utc>,
    pub home_team_id: String,
    pub away_team_id: String,
    pub feature_vector: FeatureVector,
    pub implied_odds: MarketOdds,
    pub weather: Option<WeatherObservation>,
}

/// Result points for a single match: 1 win, 0.5 draw, 0 loss.
pub fn match_result(team_score: Option<i32>, opponent_score: Option<i32>) -> Option<f64> {
    let (Some(team), Some(opponent)) = (team_score, opponent_score) else {
        return None;
    };
    Some(if team > opponent {
        1.0
    } else if team == opponent {
        0.5
    } else {
        0.0
    })
}

/// Recency-weighted form over `matches`, which must be ordered most recent first.
pub fn form_rating(matches: &[FixtureRecord], team_id: &str) -> FormSummary {
    let mut weighted_result = 0.0_f64;
    let mut total_weight = 0.0_f64;
    let mut wins = 0usize;
    let mut draws = 0usize;
    let mut goals_for = 0.0_f64;
    let mut goals_against = 0.0_f64;
    let mut counted = 0usize;

    for (index, m) in matches.iter().enumerate() {
        let Some((team_score, opponent_score)) = m.scores_for(team_id) else {
            continue;
        };
        let Some(result) = match_result(Some(team_score), Some(opponent_score)) else {
            continue;
        };

        counted += 1;
        if result >= 1.0 {
            wins += 1;
        } else if result > 0.0 {
            draws += 1;
        }
        goals_for += team_score as f64;
        goals_against += opponent_score as f64;

        // Weight follows list position, so skipped rows still age the rest.
        let weight = (1.0 - index as f64 * 0.15).max(0.2);
        weighted_result += weight * result;
        total_weight += weight;
    }

    if counted == 0 || total_weight <= 0.0 {
        return FormSummary::neutral();
    }

    let n = counted as f64;
    FormSummary {
        rating: weighted_result / total_weight * 100.0,
        win_rate: (wins as f64 + draws as f64 * 0.5) / n,
        average_for: goals_for / n,
        average_against: goals_against / n,
    }
}

pub fn elo_proxy(win_rate: f64, average_margin: f64) -> f64 {
    ELO_BASELINE + (win_rate - 0.5) * 400.0 + average_margin * 12.0
}

/// Days since the most recent prior match; 10 when there is none.
pub fn rest_days(kickoff: DateTime<Utc>, recent: &[FixtureRecord]) -> f64 {
    let Some(last) = recent.first() else {
        return NEUTRAL_REST_DAYS;
    };
    let hours = (kickoff - last.kickoff_at).num_hours() as f64;
    (hours / 24.0).max(0.0)
}

pub fn fatigue_index(rest_days: f64) -> f64 {
    if !rest_days.is_finite() {
        return 0.5;
    }
    if rest_days >= 8.0 {
        return 0.0;
    }
    if rest_days <= 1.0 {
        return 1.0;
    }
    ((8.0 - rest_days) / 7.0).clamp(0.0, 1.0)
}

pub fn implied_probability(decimal_odds: Option<f64>) -> f64 {
    match decimal_odds {
        Some(odds) if odds.is_finite() && odds > 1.0 => 1.0 / odds,
        _ => 0.0,
    }
}

pub fn weather_severity(weather: Option<&WeatherObservation>) -> f64 {
    let Some(weather) = weather else {
        return 0.0;
    };
    let temperature = weather
        .temperature_c
        .filter(|v| v.is_finite())
        .map_or(0.0, |t| ((t - 15.0).abs() / 25.0).min(1.0));
    let humidity = weather
        .humidity
        .filter(|v| v.is_finite())
        .map_or(0.0, |h| ((h - 60.0).abs() / 50.0).min(1.0));
    let wind = weather
        .wind_speed_kph
        .filter(|v| v.is_finite())
        .map_or(0.0, |w| (w / 50.0).clamp(0.0, 1.0));
    (temperature + humidity + wind) / 3.0
}

/// Weighted head-to-head share for `fixture`'s two sides over `meetings`
/// (most recent first, at most [`HEAD_TO_HEAD_LIMIT`] are used).
pub fn head_to_head(fixture: &FixtureRecord, meetings: &[FixtureRecord]) -> HeadToHead {
    let mut home_score = 0.0_f64;
    let mut away_score = 0.0_f64;
    let mut samples = 0usize;

    for m in meetings.iter().take(HEAD_TO_HEAD_LIMIT) {
        let Some((home_side, away_side)) = m.scores_for(&fixture.home_team_id) else {
            continue;
        };
        let weight = (1.0 - samples as f64 * 0.1).max(0.3);
        if home_side > away_side {
            home_score += weight;
        } else if home_side < away_side {
            away_score += weight;
        } else {
            home_score += weight * 0.5;
            away_score += weight * 0.5;
        }
        samples += 1;
    }

    let total = home_score + away_score;
    if samples == 0 || total <= 0.0 {
        return HeadToHead::neutral();
    }

    let home_win_rate = home_score / total;
    let away_win_rate = away_score / total;
    HeadToHead {
        home_win_rate,
        away_win_rate,
        diff: home_win_rate - away_win_rate,
    }
}

pub fn build_feature_vector(
    ctx: &FixtureContext<'_>,
    recent_home: &[FixtureRecord],
    recent_away: &[FixtureRecord],
    head_to_head_matches: &[FixtureRecord],
) -> FeatureVector {
    let fixture = ctx.fixture;
    let home_form = form_rating(recent_home, &fixture.home_team_id);
    let away_form = form_rating(recent_away, &fixture.away_team_id);

    let home_rest = rest_days(fixture.kickoff_at, recent_home);
    let away_rest = rest_days(fixture.kickoff_at, recent_away);
    let home_fatigue = fatigue_index(home_rest);
    let away_fatigue = fatigue_index(away_rest);

    let home_elo = elo_proxy(home_form.win_rate, home_form.average_margin());
    let away_elo = elo_proxy(away_form.win_rate, away_form.average_margin());

    let odds = ctx.odds.copied().unwrap_or_default();
    let home_implied = implied_probability(odds.home);
    let draw_implied = implied_probability(odds.draw);
    let away_implied = implied_probability(odds.away);

    let h2h = head_to_head(fixture, head_to_head_matches);

    let vector = FeatureVector {
        home_form_rating: home_form.rating,
        away_form_rating: away_form.rating,
        form_diff: home_form.rating - away_form.rating,
        home_elo,
        away_elo,
        elo_diff: home_elo - away_elo,
        home_rest_days: home_rest,
        away_rest_days: away_rest,
        rest_diff: home_rest - away_rest,
        home_fatigue_index: home_fatigue,
        away_fatigue_index: away_fatigue,
        fatigue_diff: home_fatigue - away_fatigue,
        home_implied_probability: home_implied,
        draw_implied_probability: draw_implied,
        away_implied_probability: away_implied,
        implied_edge: home_implied - away_implied,
        weather_severity: weather_severity(ctx.weather),
        home_head_to_head_win_rate: h2h.home_win_rate,
        away_head_to_head_win_rate: h2h.away_win_rate,
        head_to_head_diff: h2h.diff,
    };
    sanitize(vector)
}

/// Loads the pre-kickoff context for `fixture` and builds its features.
///
/// Lookups run one after another: home form, away form, head-to-head, odds,
/// weather. Store errors propagate; missing odds or weather do not.
pub fn compute_fixture_features(
    store: &dyn MatchStore,
    fixture: &FixtureRecord,
) -> Result<FixtureFeatures> {
    let recent_home =
        store.recent_fixtures(&fixture.home_team_id, fixture.kickoff_at, RECENT_MATCH_LIMIT)?;
    let recent_away =
        store.recent_fixtures(&fixture.away_team_id, fixture.kickoff_at, RECENT_MATCH_LIMIT)?;
    let meetings = store.head_to_head(fixture, HEAD_TO_HEAD_LIMIT)?;
    let odds = store.latest_market_odds(&fixture.id)?;
    let weather = store.weather(&fixture.id)?;

    let ctx = FixtureContext {
        fixture,
        odds: odds.as_ref(),
        weather: weather.as_ref(),
    };
    let vector = build_feature_vector(&ctx, &recent_home, &recent_away, &meetings);

    tracing::debug!(
        fixture_id = %fixture.id,
        implied_edge = vector.implied_edge,
        weather_severity = vector.weather_severity,
        rest_diff = vector.rest_diff,
        "feature vector computed"
    );

    Ok(FixtureFeatures {
        fixture_id: fixture.id.clone(),
        kickoff_at: fixture.kickoff_at,
        home_team_id: fixture.home_team_id.clone(),
        away_team_id: fixture.away_team_id.clone(),
        feature_vector: vector,
        implied_odds: odds.unwrap_or_default(),
        weather,
    })
}

fn finite_or_zero(v: f64) -> f64 {
    if v.is_finite() { v } else { 0.0 }
}

fn sanitize(mut v: FeatureVector) -> FeatureVector {
    for field in [
        &mut v.home_form_rating,
        &mut v.away_form_rating,
        &mut v.form_diff,
        &mut v.home_elo,
        &mut v.away_elo,
        &mut v.elo_diff,
        &mut v.home_rest_days,
        &mut v.away_rest_days,
        &mut v.rest_diff,
        &mut v.home_fatigue_index,
        &mut v.away_fatigue_index,
        &mut v.fatigue_diff,
        &mut v.home_implied_probability,
        &mut v.draw_implied_probability,
        &mut v.away_implied_probability,
        &mut v.implied_edge,
        &mut v.weather_severity,
        &mut v.home_head_to_head_win_rate,
        &mut v.away_head_to_head_win_rate,
        &mut v.head_to_head_diff,
    ] {
        *field = finite_or_zero(*field);
    }
    v
}
