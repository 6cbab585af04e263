use std::collections::HashMap;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::fixtures::{FixtureRecord, FixtureStatus, MarketOdds, TrainingWindow, WeatherObservation};

/// Read access to fixtures, odds and weather.
///
/// Implementations own ordering: completed and upcoming fixtures come back
/// kickoff-ascending, per-team and head-to-head lookups most recent first.
pub trait MatchStore {
    /// Completed fixtures with both scores known, inside `window`.
    fn completed_fixtures(&self, window: &TrainingWindow) -> Result<Vec<FixtureRecord>>;

    /// Completed fixtures of `team_id` strictly before `before`.
    fn recent_fixtures(
        &self,
        team_id: &str,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<FixtureRecord>>;

    /// Completed meetings of the fixture's two teams (either orientation) before its kickoff.
    fn head_to_head(&self, fixture: &FixtureRecord, limit: usize) -> Result<Vec<FixtureRecord>>;

    fn latest_market_odds(&self, fixture_id: &str) -> Result<Option<MarketOdds>>;

    fn weather(&self, fixture_id: &str) -> Result<Option<WeatherObservation>>;

    /// Scheduled fixtures, plus anything kicking off at or after `now`.
    fn upcoming_fixtures(&self, now: DateTime<Utc>) -> Result<Vec<FixtureRecord>>;
}

/// Vec-backed store for tests, benches and offline runs.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    fixtures: Vec<FixtureRecord>,
    odds: HashMap<String, MarketOdds>,
    weather: HashMap<String, WeatherObservation>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces by fixture id.
    pub fn upsert_fixture(&mut self, fixture: FixtureRecord) {
        if let Some(existing) = self.fixtures.iter_mut().find(|f| f.id == fixture.id) {
            *existing = fixture;
        } else {
            self.fixtures.push(fixture);
        }
        self.fixtures
            .sort_by(|a, b| a.kickoff_at.cmp(&b.kickoff_at).then(a.id.cmp(&b.id)));
    }

    pub fn set_odds(&mut self, fixture_id: &str, odds: MarketOdds) {
        self.odds.insert(fixture_id.to_string(), odds);
    }

    pub fn set_weather(&mut self, fixture_id: &str, weather: WeatherObservation) {
        self.weather.insert(fixture_id.to_string(), weather);
    }

    pub fn fixtures(&self) -> &[FixtureRecord] {
        &self.fixtures
    }

    fn completed_before(&self, before: DateTime<Utc>) -> impl Iterator<Item = &FixtureRecord> {
        // Most recent first.
        self.fixtures
            .iter()
            .rev()
            .filter(move |f| f.kickoff_at < before && f.is_completed())
    }
}

impl MatchStore for MemoryStore {
    fn completed_fixtures(&self, window: &TrainingWindow) -> Result<Vec<FixtureRecord>> {
        Ok(self
            .fixtures
            .iter()
            .filter(|f| f.is_completed() && f.outcome().is_some())
            .filter(|f| window.contains(f.kickoff_at))
            .cloned()
            .collect())
    }

    fn recent_fixtures(
        &self,
        team_id: &str,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<FixtureRecord>> {
        Ok(self
            .completed_before(before)
            .filter(|f| f.involves(team_id))
            .take(limit)
            .cloned()
            .collect())
    }

    fn head_to_head(&self, fixture: &FixtureRecord, limit: usize) -> Result<Vec<FixtureRecord>> {
        Ok(self
            .completed_before(fixture.kickoff_at)
            .filter(|f| f.is_meeting_of(&fixture.home_team_id, &fixture.away_team_id))
            .take(limit)
            .cloned()
            .collect())
    }

    fn latest_market_odds(&self, fixture_id: &str) -> Result<Option<MarketOdds>> {
        Ok(self.odds.get(fixture_id).copied())
    }

    fn weather(&self, fixture_id: &str) -> Result<Option<WeatherObservation>> {
        Ok(self.weather.get(fixture_id).cloned())
    }

    fn upcoming_fixtures(&self, now: DateTime<Utc>) -> Result<Vec<FixtureRecord>> {
        Ok(self
            .fixtures
            .iter()
            .filter(|f| f.status == FixtureStatus::Scheduled || f.kickoff_at >= now)
            .cloned()
            .collect())
    }
}
