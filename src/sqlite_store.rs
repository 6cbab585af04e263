use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};

use crate::fixtures::{
    FixtureRecord, FixtureStatus, MarketOdds, TrainingWindow, WeatherObservation, parse_kickoff,
};
use crate::store::MatchStore;

pub const MATCH_ODDS_MARKET: &str = "1X2";

const FIXTURE_COLUMNS: &str =
    "id, kickoff_at, home_team_id, away_team_id, status, home_score, away_score";

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn =
            Connection::open(path).with_context(|| format!("open sqlite db {}", path.display()))?;
        Self::from_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("open in-memory sqlite db")?;
        Self::from_connection(conn)
    }

    pub fn from_connection(conn: Connection) -> Result<Self> {
        init_schema(&conn)?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn connection_mut(&mut self) -> &mut Connection {
        &mut self.conn
    }

    pub fn upsert_fixture(&self, f: &FixtureRecord) -> Result<()> {
        upsert_fixture(&self.conn, f)
    }

    pub fn upsert_odds(
        &self,
        fixture_id: &str,
        bookmaker: &str,
        odds: &MarketOdds,
        updated_at: DateTime<Utc>,
    ) -> Result<()> {
        upsert_odds(&self.conn, fixture_id, bookmaker, odds, updated_at)
    }

    pub fn upsert_weather(&self, fixture_id: &str, weather: &WeatherObservation) -> Result<()> {
        upsert_weather(&self.conn, fixture_id, weather)
    }

    fn query_fixtures(
        &self,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<FixtureRecord>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .context("prepare fixture query")?;
        let rows = stmt
            .query_map(params, read_fixture_row)
            .context("query fixtures")?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.context("decode fixture row")?.into_record()?);
        }
        Ok(out)
    }
}

pub fn default_db_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("FIXTURE_DB_PATH")
        && !path.trim().is_empty()
    {
        return Some(PathBuf::from(path));
    }
    let base = std::env::var("XDG_DATA_HOME")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .map(PathBuf::from)
        .or_else(|| {
            std::env::var("HOME")
                .ok()
                .filter(|s| !s.trim().is_empty())
                .map(|home| PathBuf::from(home).join(".local").join("share"))
        })?;
    Some(base.join("fixture_forecast").join("fixtures.sqlite"))
}

pub fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        PRAGMA journal_mode = WAL;
        CREATE TABLE IF NOT EXISTS fixtures (
            id TEXT PRIMARY KEY,
            kickoff_at TEXT NOT NULL,
            home_team_id TEXT NOT NULL,
            away_team_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'scheduled',
            home_score INTEGER NULL,
            away_score INTEGER NULL,
            updated_at TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_fixtures_kickoff ON fixtures(kickoff_at);
        CREATE INDEX IF NOT EXISTS idx_fixtures_home ON fixtures(home_team_id);
        CREATE INDEX IF NOT EXISTS idx_fixtures_away ON fixtures(away_team_id);
        CREATE INDEX IF NOT EXISTS idx_fixtures_status ON fixtures(status);

        CREATE TABLE IF NOT EXISTS odds (
            fixture_id TEXT NOT NULL REFERENCES fixtures(id) ON DELETE CASCADE,
            bookmaker TEXT NOT NULL,
            market TEXT NOT NULL,
            home REAL NULL,
            draw REAL NULL,
            away REAL NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (fixture_id, bookmaker, market)
        );

        CREATE TABLE IF NOT EXISTS weather (
            fixture_id TEXT PRIMARY KEY REFERENCES fixtures(id) ON DELETE CASCADE,
            temperature_c REAL NULL,
            humidity REAL NULL,
            wind_speed_kph REAL NULL,
            condition TEXT NULL,
            recorded_at TEXT NOT NULL
        );
        "#,
    )
    .context("create sqlite schema")?;
    Ok(())
}

impl MatchStore for SqliteStore {
    fn completed_fixtures(&self, window: &TrainingWindow) -> Result<Vec<FixtureRecord>> {
        let sql = format!(
            "SELECT {FIXTURE_COLUMNS} FROM fixtures
             WHERE status = 'completed'
               AND home_score IS NOT NULL
               AND away_score IS NOT NULL
               AND (?1 IS NULL OR kickoff_at >= ?1)
               AND (?2 IS NULL OR kickoff_at <= ?2)
             ORDER BY kickoff_at ASC, id ASC"
        );
        self.query_fixtures(
            &sql,
            params![window.start.map(format_ts), window.end.map(format_ts)],
        )
        .context("load completed fixtures")
    }

    fn recent_fixtures(
        &self,
        team_id: &str,
        before: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<FixtureRecord>> {
        let sql = format!(
            "SELECT {FIXTURE_COLUMNS} FROM fixtures
             WHERE kickoff_at < ?1
               AND status = 'completed'
               AND (home_team_id = ?2 OR away_team_id = ?2)
             ORDER BY kickoff_at DESC, id DESC
             LIMIT ?3"
        );
        self.query_fixtures(&sql, params![format_ts(before), team_id, limit as i64])
            .with_context(|| format!("load recent fixtures for team {team_id}"))
    }

    fn head_to_head(&self, fixture: &FixtureRecord, limit: usize) -> Result<Vec<FixtureRecord>> {
        let sql = format!(
            "SELECT {FIXTURE_COLUMNS} FROM fixtures
             WHERE kickoff_at < ?1
               AND status = 'completed'
               AND ((home_team_id = ?2 AND away_team_id = ?3)
                 OR (home_team_id = ?3 AND away_team_id = ?2))
             ORDER BY kickoff_at DESC, id DESC
             LIMIT ?4"
        );
        self.query_fixtures(
            &sql,
            params![
                format_ts(fixture.kickoff_at),
                fixture.home_team_id,
                fixture.away_team_id,
                limit as i64
            ],
        )
        .with_context(|| format!("load head-to-head for fixture {}", fixture.id))
    }

    fn latest_market_odds(&self, fixture_id: &str) -> Result<Option<MarketOdds>> {
        self.conn
            .query_row(
                "SELECT home, draw, away FROM odds
                 WHERE fixture_id = ?1 AND market = ?2
                 ORDER BY updated_at DESC
                 LIMIT 1",
                params![fixture_id, MATCH_ODDS_MARKET],
                |row| {
                    Ok(MarketOdds {
                        home: row.get(0)?,
                        draw: row.get(1)?,
                        away: row.get(2)?,
                    })
                },
            )
            .optional()
            .with_context(|| format!("load latest odds for fixture {fixture_id}"))
    }

    fn weather(&self, fixture_id: &str) -> Result<Option<WeatherObservation>> {
        self.conn
            .query_row(
                "SELECT temperature_c, humidity, wind_speed_kph, condition FROM weather
                 WHERE fixture_id = ?1",
                params![fixture_id],
                |row| {
                    Ok(WeatherObservation {
                        temperature_c: row.get(0)?,
                        humidity: row.get(1)?,
                        wind_speed_kph: row.get(2)?,
                        condition: row.get(3)?,
                    })
                },
            )
            .optional()
            .with_context(|| format!("load weather for fixture {fixture_id}"))
    }

    fn upcoming_fixtures(&self, now: DateTime<Utc>) -> Result<Vec<FixtureRecord>> {
        let sql = format!(
            "SELECT {FIXTURE_COLUMNS} FROM fixtures
             WHERE status = 'scheduled' OR kickoff_at >= ?1
             ORDER BY kickoff_at ASC, id ASC"
        );
        self.query_fixtures(&sql, params![format_ts(now)])
            .context("load upcoming fixtures")
    }
}

/// Second-precision RFC 3339 in UTC, so text order is time order.
pub fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Secs, true)
}

struct RawFixtureRow {
    id: String,
    kickoff_at: String,
    home_team_id: String,
    away_team_id: String,
    status: String,
    home_score: Option<i32>,
    away_score: Option<i32>,
}

impl RawFixtureRow {
    fn into_record(self) -> Result<FixtureRecord> {
        let kickoff_at = parse_kickoff(&self.kickoff_at).with_context(|| {
            format!("malformed fixture row {}: kickoff_at {:?}", self.id, self.kickoff_at)
        })?;
        let status = FixtureStatus::parse(&self.status).with_context(|| {
            format!("malformed fixture row {}: status {:?}", self.id, self.status)
        })?;
        Ok(FixtureRecord {
            kickoff_at,
            status,
            id: self.id,
            home_team_id: self.home_team_id,
            away_team_id: self.away_team_id,
            home_score: self.home_score,
            away_score: self.away_score,
        })
    }
}

fn read_fixture_row(row: &Row<'_>) -> rusqlite::Result<RawFixtureRow> {
    Ok(RawFixtureRow {
        id: row.get(0)?,
        kickoff_at: row.get(1)?,
        home_team_id: row.get(2)?,
        away_team_id: row.get(3)?,
        status: row.get(4)?,
        home_score: row.get(5)?,
        away_score: row.get(6)?,
    })
}

pub fn upsert_fixture(conn: &Connection, f: &FixtureRecord) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO fixtures (
            id, kickoff_at, home_team_id, away_team_id, status,
            home_score, away_score, updated_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
        ON CONFLICT(id) DO UPDATE SET
            kickoff_at = excluded.kickoff_at,
            home_team_id = excluded.home_team_id,
            away_team_id = excluded.away_team_id,
            status = excluded.status,
            home_score = excluded.home_score,
            away_score = excluded.away_score,
            updated_at = excluded.updated_at
        "#,
        params![
            f.id,
            format_ts(f.kickoff_at),
            f.home_team_id,
            f.away_team_id,
            f.status.as_str(),
            f.home_score,
            f.away_score,
            format_ts(Utc::now()),
        ],
    )
    .with_context(|| format!("upsert fixture {}", f.id))?;
    Ok(())
}

pub fn upsert_odds(
    conn: &Connection,
    fixture_id: &str,
    bookmaker: &str,
    odds: &MarketOdds,
    updated_at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO odds (fixture_id, bookmaker, market, home, draw, away, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
        ON CONFLICT(fixture_id, bookmaker, market) DO UPDATE SET
            home = excluded.home,
            draw = excluded.draw,
            away = excluded.away,
            updated_at = excluded.updated_at
        "#,
        params![
            fixture_id,
            bookmaker,
            MATCH_ODDS_MARKET,
            odds.home,
            odds.draw,
            odds.away,
            format_ts(updated_at),
        ],
    )
    .with_context(|| format!("upsert odds for fixture {fixture_id}"))?;
    Ok(())
}

pub fn upsert_weather(conn: &Connection, fixture_id: &str, w: &WeatherObservation) -> Result<()> {
    conn.execute(
        r#"
        INSERT INTO weather (fixture_id, temperature_c, humidity, wind_speed_kph, condition, recorded_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6)
        ON CONFLICT(fixture_id) DO UPDATE SET
            temperature_c = excluded.temperature_c,
            humidity = excluded.humidity,
            wind_speed_kph = excluded.wind_speed_kph,
            condition = excluded.condition,
            recorded_at = excluded.recorded_at
        "#,
        params![
            fixture_id,
            w.temperature_c,
            w.humidity,
            w.wind_speed_kph,
            w.condition,
            format_ts(Utc::now()),
        ],
    )
    .with_context(|| format!("upsert weather for fixture {fixture_id}"))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn fixture(id: &str, day: u32, home: &str, away: &str, score: Option<(i32, i32)>) -> FixtureRecord {
        FixtureRecord {
            id: id.to_string(),
            kickoff_at: Utc.with_ymd_and_hms(2024, 4, day, 19, 30, 0).unwrap(),
            home_team_id: home.to_string(),
            away_team_id: away.to_string(),
            status: if score.is_some() {
                FixtureStatus::Completed
            } else {
                FixtureStatus::Scheduled
            },
            home_score: score.map(|s| s.0),
            away_score: score.map(|s| s.1),
        }
    }

    #[test]
    fn round_trips_fixture_queries() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert_fixture(&fixture("f2", 8, "B", "A", Some((1, 1)))).unwrap();
        store.upsert_fixture(&fixture("f1", 1, "A", "B", Some((2, 0)))).unwrap();
        store.upsert_fixture(&fixture("f3", 15, "A", "B", None)).unwrap();

        let completed = store.completed_fixtures(&TrainingWindow::default()).unwrap();
        assert_eq!(completed.len(), 2);
        assert_eq!(completed[0].id, "f1");
        assert_eq!(completed[0].kickoff_at, fixture("f1", 1, "A", "B", None).kickoff_at);

        let upcoming = fixture("f3", 15, "A", "B", None);
        let h2h = store.head_to_head(&upcoming, 10).unwrap();
        assert_eq!(h2h.iter().map(|f| f.id.as_str()).collect::<Vec<_>>(), vec!["f2", "f1"]);

        let recent = store.recent_fixtures("A", upcoming.kickoff_at, 1).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, "f2");

        let now = Utc.with_ymd_and_hms(2024, 4, 10, 0, 0, 0).unwrap();
        let scheduled = store.upcoming_fixtures(now).unwrap();
        assert_eq!(scheduled.len(), 1);
        assert_eq!(scheduled[0].id, "f3");
    }

    #[test]
    fn window_filters_by_kickoff() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert_fixture(&fixture("f1", 1, "A", "B", Some((2, 0)))).unwrap();
        store.upsert_fixture(&fixture("f2", 8, "B", "A", Some((1, 1)))).unwrap();
        let window = TrainingWindow {
            start: Some(Utc.with_ymd_and_hms(2024, 4, 2, 0, 0, 0).unwrap()),
            end: None,
        };
        let rows = store.completed_fixtures(&window).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, "f2");
    }

    #[test]
    fn latest_odds_wins_and_missing_context_is_none() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert_fixture(&fixture("f1", 1, "A", "B", None)).unwrap();
        let early = Utc.with_ymd_and_hms(2024, 3, 30, 0, 0, 0).unwrap();
        let late = Utc.with_ymd_and_hms(2024, 3, 31, 0, 0, 0).unwrap();
        let stale = MarketOdds { home: Some(2.5), draw: Some(3.2), away: Some(2.9) };
        let fresh = MarketOdds { home: Some(2.1), draw: None, away: Some(3.6) };
        store.upsert_odds("f1", "book-a", &stale, early).unwrap();
        store.upsert_odds("f1", "book-b", &fresh, late).unwrap();

        assert_eq!(store.latest_market_odds("f1").unwrap(), Some(fresh));
        assert_eq!(store.latest_market_odds("missing").unwrap(), None);
        assert_eq!(store.weather("f1").unwrap(), None);

        let w = WeatherObservation {
            temperature_c: Some(12.5),
            humidity: None,
            wind_speed_kph: Some(20.0),
            condition: Some("windy".to_string()),
        };
        store.upsert_weather("f1", &w).unwrap();
        assert_eq!(store.weather("f1").unwrap(), Some(w));
    }

    #[test]
    fn malformed_rows_surface_as_errors() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.upsert_fixture(&fixture("f1", 1, "A", "B", Some((2, 0)))).unwrap();
        store
            .connection()
            .execute("UPDATE fixtures SET status = 'abandoned' WHERE id = 'f1'", [])
            .unwrap();
        let err = store.upcoming_fixtures(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()).unwrap_err();
        assert!(format!("{err:#}").contains("malformed fixture row f1"), "{err:#}");
    }
}
