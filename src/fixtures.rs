use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixtureStatus {
    Scheduled,
    Completed,
    Postponed,
    Cancelled,
}

impl FixtureStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            FixtureStatus::Scheduled => "scheduled",
            FixtureStatus::Completed => "completed",
            FixtureStatus::Postponed => "postponed",
            FixtureStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "scheduled" => Some(FixtureStatus::Scheduled),
            "completed" => Some(FixtureStatus::Completed),
            "postponed" => Some(FixtureStatus::Postponed),
            "cancelled" | "canceled" => Some(FixtureStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Home,
    Draw,
    Away,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FixtureRecord {
    pub id: String,
    pub kickoff_at: DateTime<Utc>,
    pub home_team_id: String,
    pub away_team_id: String,
    pub status: FixtureStatus,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
}

impl FixtureRecord {
    /// Final result, only when both scores are known.
    pub fn outcome(&self) -> Option<Outcome> {
        let (Some(home), Some(away)) = (self.home_score, self.away_score) else {
            return None;
        };
        Some(classify_outcome(home, away))
    }

    pub fn is_completed(&self) -> bool {
        self.status == FixtureStatus::Completed
    }

    pub fn involves(&self, team_id: &str) -> bool {
        self.home_team_id == team_id || self.away_team_id == team_id
    }

    pub fn is_meeting_of(&self, team_a: &str, team_b: &str) -> bool {
        (self.home_team_id == team_a && self.away_team_id == team_b)
            || (self.home_team_id == team_b && self.away_team_id == team_a)
    }

    /// `(team score, opponent score)` from the given team's side.
    pub fn scores_for(&self, team_id: &str) -> Option<(i32, i32)> {
        let (Some(home), Some(away)) = (self.home_score, self.away_score) else {
            return None;
        };
        if self.home_team_id == team_id {
            Some((home, away))
        } else {
            Some((away, home))
        }
    }
}

/// UTC `YYYY-MM` bucket of a kickoff.
pub fn kickoff_month(kickoff: DateTime<Utc>) -> String {
    format!("{:04}-{:02}", kickoff.year(), kickoff.month())
}

/// Decimal prices for the 1X2 market. Any price may be missing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketOdds {
    pub home: Option<f64>,
    pub draw: Option<f64>,
    pub away: Option<f64>,
}

impl MarketOdds {
    pub fn has_home_price(&self) -> bool {
        self.home.is_some_and(|v| v.is_finite() && v > 1.0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WeatherObservation {
    pub temperature_c: Option<f64>,
    pub humidity: Option<f64>,
    pub wind_speed_kph: Option<f64>,
    pub condition: Option<String>,
}

/// Inclusive kickoff bounds. Both ends are optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingWindow {
    #[serde(default)]
    pub start: Option<DateTime<Utc>>,
    #[serde(default)]
    pub end: Option<DateTime<Utc>>,
}

impl TrainingWindow {
    pub fn contains(&self, kickoff: DateTime<Utc>) -> bool {
        if let Some(start) = self.start
            && kickoff < start
        {
            return false;
        }
        if let Some(end) = self.end
            && kickoff > end
        {
            return false;
        }
        true
    }

    pub fn label(&self) -> String {
        let start = self
            .start
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "full-history".to_string());
        let end = self
            .end
            .map(|d| d.format("%Y-%m-%d").to_string())
            .unwrap_or_else(|| "latest".to_string());
        format!("{start} → {end}")
    }
}

pub fn classify_outcome(home_score: i32, away_score: i32) -> Outcome {
    if home_score > away_score {
        Outcome::Home
    } else if home_score < away_score {
        Outcome::Away
    } else {
        Outcome::Draw
    }
}

/// Accepts RFC 3339 timestamps or bare `YYYY-MM-DD` dates (midnight UTC).
pub fn parse_kickoff(raw: &str) -> Option<DateTime<Utc>> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(dt.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").ok()?;
    Some(date.and_hms_opt(0, 0, 0)?.and_utc())
}
