//! SQLite-backed model registry.
//!
//! One row per trained `(name, version)`. Rows start in `staging`; promoting a
//! version archives whichever version of the same name was in `production`.
//! Rolling back swaps production to an earlier version.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::calibration::CalibrationModel;
use crate::cancel::CancelFlag;
use crate::config::TrainingConfig;
use crate::error::EngineError;
use crate::fixtures::parse_kickoff;
use crate::model::SerializedModel;
use crate::prediction::ScoreBaseline;
use crate::sqlite_store::format_ts;
use crate::store::MatchStore;
use crate::training::{TrainingResult, train_model};

pub const FIRST_VERSION: &str = "1.0.0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelStatus {
    Staging,
    Production,
    Archived,
}

impl ModelStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ModelStatus::Staging => "staging",
            ModelStatus::Production => "production",
            ModelStatus::Archived => "archived",
        }
    }

    /// Unknown values read back as staging.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "production" => ModelStatus::Production,
            "archived" => ModelStatus::Archived,
            _ => ModelStatus::Staging,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelSummary {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub algorithm: String,
    pub training_window: String,
    pub status: ModelStatus,
    pub checksum: String,
    pub created_at: DateTime<Utc>,
    pub promoted_at: Option<DateTime<Utc>>,
    pub metrics: serde_json::Value,
}

/// What a stored version needs to score new fixtures.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelArtifacts {
    pub name: String,
    pub version: String,
    pub model: SerializedModel,
    pub calibration: CalibrationModel,
    pub baseline: ScoreBaseline,
}

pub fn init_registry_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS model_registry (
            name TEXT NOT NULL,
            version TEXT NOT NULL,
            description TEXT NULL,
            training_window TEXT NOT NULL,
            algorithm TEXT NOT NULL,
            hyperparameters_json TEXT NOT NULL,
            metrics_json TEXT NOT NULL,
            model_json TEXT NOT NULL,
            calibration_json TEXT NOT NULL,
            baseline_json TEXT NOT NULL,
            checksum TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'staging',
            created_at TEXT NOT NULL,
            promoted_at TEXT NULL,
            PRIMARY KEY (name, version)
        );
        CREATE INDEX IF NOT EXISTS idx_model_registry_status ON model_registry(name, status);
        "#,
    )
    .context("create model_registry schema")?;
    Ok(())
}

fn parse_semver(raw: &str) -> Option<(u64, u64, u64)> {
    let mut parts = raw.trim().split('.');
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    let patch = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some((major, minor, patch))
}

/// `1.0.0` for an unseen name, else the highest stored semver with its patch bumped.
pub fn next_version(conn: &Connection, name: &str) -> Result<String> {
    let mut stmt = conn
        .prepare("SELECT version FROM model_registry WHERE name = ?1")
        .context("prepare version query")?;
    let versions = stmt
        .query_map(params![name], |row| row.get::<_, String>(0))
        .context("query model versions")?;

    let mut highest: Option<(u64, u64, u64)> = None;
    for v in versions {
        if let Some(parsed) = parse_semver(&v.context("decode version")?)
            && highest.is_none_or(|h| parsed > h)
        {
            highest = Some(parsed);
        }
    }
    Ok(match highest {
        Some((major, minor, patch)) => format!("{major}.{minor}.{}", patch + 1),
        None => FIRST_VERSION.to_string(),
    })
}

pub fn artifact_checksum(model_json: &str, calibration_json: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(model_json.as_bytes());
    hasher.update(calibration_json.as_bytes());
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

fn hyperparameters(config: &TrainingConfig) -> serde_json::Value {
    serde_json::json!({
        "algorithm": config.algorithm,
        "calibration": config.calibration,
        "holdoutRatio": config.effective_holdout_ratio(),
        "logistic": config.logistic,
        "gradientBoosting": config.gradient_boosting,
        "betting": config.betting,
    })
}

fn metrics_payload(result: &TrainingResult) -> serde_json::Value {
    serde_json::json!({
        "training": result.metrics.training,
        "backtest": result.metrics.backtest,
        "calibration": {
            "method": result.calibration().method(),
            "bins": result.metrics.calibration.bins,
            "curve": result.metrics.calibration.curve,
        },
        "roiSeries": result.metrics.roi_series,
        "trainedAt": result.metrics.trained_at,
        "sampleSizes": result.metrics.sample_sizes,
        "featureImportance": result.feature_importance,
    })
}

/// Stores `result` as a staging row. A result without a version gets [`next_version`].
pub fn register(conn: &Connection, result: &TrainingResult, now: DateTime<Utc>) -> Result<ModelSummary> {
    let name = result.config.model_name();
    let version = match &result.config.version {
        Some(v) => v.clone(),
        None => next_version(conn, &name)?,
    };

    let model_json = serde_json::to_string(&result.model_parameters).context("encode model")?;
    let calibration_json =
        serde_json::to_string(result.calibration()).context("encode calibration")?;
    let baseline_json =
        serde_json::to_string(&result.score_baseline).context("encode score baseline")?;
    let checksum = artifact_checksum(&model_json, &calibration_json);
    let metrics = metrics_payload(result);

    conn.execute(
        r#"
        INSERT INTO model_registry (
            name, version, description, training_window, algorithm,
            hyperparameters_json, metrics_json, model_json, calibration_json,
            baseline_json, checksum, status, created_at
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
        "#,
        params![
            name,
            version,
            result.config.description,
            result.training_window_label,
            result.model_parameters.algorithm().as_str(),
            hyperparameters(&result.config).to_string(),
            metrics.to_string(),
            model_json,
            calibration_json,
            baseline_json,
            checksum,
            ModelStatus::Staging.as_str(),
            format_ts(now),
        ],
    )
    .with_context(|| format!("insert model {name}@{version}"))?;

    tracing::info!(model = %name, version = %version, checksum = %checksum, "model registered");

    Ok(ModelSummary {
        name,
        version,
        description: result.config.description.clone(),
        algorithm: result.model_parameters.algorithm().as_str().to_string(),
        training_window: result.training_window_label.clone(),
        status: ModelStatus::Staging,
        checksum,
        created_at: now,
        promoted_at: None,
        metrics,
    })
}

const SUMMARY_COLUMNS: &str = "name, version, description, training_window, algorithm, status, \
     checksum, created_at, metrics_json, promoted_at";

struct RawSummary {
    summary: ModelSummary,
    created_raw: String,
    metrics_raw: String,
    promoted_raw: Option<String>,
}

fn read_summary(row: &Row<'_>) -> rusqlite::Result<RawSummary> {
    Ok(RawSummary {
        created_raw: row.get(7)?,
        metrics_raw: row.get(8)?,
        promoted_raw: row.get(9)?,
        summary: ModelSummary {
            name: row.get(0)?,
            version: row.get(1)?,
            description: row.get(2)?,
            training_window: row.get(3)?,
            algorithm: row.get(4)?,
            status: ModelStatus::parse(&row.get::<_, String>(5)?),
            checksum: row.get(6)?,
            created_at: DateTime::<Utc>::UNIX_EPOCH,
            promoted_at: None,
            metrics: serde_json::Value::Null,
        },
    })
}

fn finish_summary(raw: RawSummary) -> Result<ModelSummary> {
    let RawSummary {
        mut summary,
        created_raw,
        metrics_raw,
        promoted_raw,
    } = raw;
    summary.created_at = parse_kickoff(&created_raw)
        .with_context(|| format!("bad created_at for {}@{}", summary.name, summary.version))?;
    summary.promoted_at = match promoted_raw {
        Some(raw) => Some(parse_kickoff(&raw).with_context(|| {
            format!("bad promoted_at for {}@{}", summary.name, summary.version)
        })?),
        None => None,
    };
    summary.metrics = serde_json::from_str(&metrics_raw)
        .with_context(|| format!("bad metrics for {}@{}", summary.name, summary.version))?;
    Ok(summary)
}

/// Newest first.
pub fn list_models(conn: &Connection) -> Result<Vec<ModelSummary>> {
    let mut stmt = conn
        .prepare(&format!(
            "SELECT {SUMMARY_COLUMNS} FROM model_registry ORDER BY created_at DESC, rowid DESC"
        ))
        .context("prepare model listing")?;
    let rows = stmt.query_map([], read_summary).context("list models")?;
    let mut out = Vec::new();
    for row in rows {
        out.push(finish_summary(row.context("decode model row")?)?);
    }
    Ok(out)
}

pub fn find_model(conn: &Connection, name: &str, version: &str) -> Result<Option<ModelSummary>> {
    let raw = conn
        .query_row(
            &format!("SELECT {SUMMARY_COLUMNS} FROM model_registry WHERE name = ?1 AND version = ?2"),
            params![name, version],
            read_summary,
        )
        .optional()
        .with_context(|| format!("load model {name}@{version}"))?;
    raw.map(finish_summary).transpose()
}

fn require_registered(conn: &Connection, name: &str, version: &str) -> Result<()> {
    let exists: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM model_registry WHERE name = ?1 AND version = ?2",
            params![name, version],
            |row| row.get(0),
        )
        .optional()
        .with_context(|| format!("look up model {name}@{version}"))?;
    if exists.is_none() {
        bail!("model {name}@{version} is not registered");
    }
    Ok(())
}

fn current_production(conn: &Connection, name: &str) -> Result<Option<String>> {
    conn.query_row(
        "SELECT version FROM model_registry
         WHERE name = ?1 AND status = ?2
         ORDER BY COALESCE(promoted_at, created_at) DESC, rowid DESC
         LIMIT 1",
        params![name, ModelStatus::Production.as_str()],
        |row| row.get(0),
    )
    .optional()
    .with_context(|| format!("look up production model for {name}"))
}

fn mark_production(conn: &Connection, name: &str, version: &str, now: DateTime<Utc>) -> Result<()> {
    conn.execute(
        "UPDATE model_registry SET status = ?1, promoted_at = ?2 WHERE name = ?3 AND version = ?4",
        params![ModelStatus::Production.as_str(), format_ts(now), name, version],
    )
    .with_context(|| format!("mark {name}@{version} as production"))?;
    Ok(())
}

/// Archives every production row of `name` except `keep`.
fn archive_production(conn: &Connection, name: &str, keep: Option<&str>) -> Result<usize> {
    conn.execute(
        "UPDATE model_registry SET status = ?1
         WHERE name = ?2 AND status = ?3 AND (?4 IS NULL OR version <> ?4)",
        params![
            ModelStatus::Archived.as_str(),
            name,
            ModelStatus::Production.as_str(),
            keep
        ],
    )
    .with_context(|| format!("archive production models for {name}"))
}

/// Makes `name@version` the production model, archiving the previous one.
pub fn promote(conn: &mut Connection, name: &str, version: &str, now: DateTime<Utc>) -> Result<ModelSummary> {
    let tx = conn.transaction().context("begin promote transaction")?;
    require_registered(&tx, name, version)?;
    let archived = archive_production(&tx, name, Some(version))?;
    mark_production(&tx, name, version, now)?;
    tx.commit().context("commit promote transaction")?;

    tracing::info!(model = %name, version = %version, archived, "model promoted");

    find_model(conn, name, version)?
        .with_context(|| format!("model {name}@{version} vanished after promotion"))
}

/// Moves production away from the current model.
///
/// When `version` is not the production model it is restored and the current
/// production model is archived. When it is, it gets archived and the most
/// recently promoted (or else created) other version takes over. Does nothing
/// when `name` has no production model. Returns the production model afterwards.
pub fn rollback(
    conn: &mut Connection,
    name: &str,
    version: &str,
    now: DateTime<Utc>,
) -> Result<Option<ModelSummary>> {
    let tx = conn.transaction().context("begin rollback transaction")?;
    require_registered(&tx, name, version)?;

    let Some(current) = current_production(&tx, name)? else {
        tracing::info!(model = %name, version = %version, "rollback skipped: no production model");
        return Ok(None);
    };

    let restored = if current != version {
        archive_production(&tx, name, None)?;
        mark_production(&tx, name, version, now)?;
        Some(version.to_string())
    } else {
        archive_production(&tx, name, None)?;
        let fallback: Option<String> = tx
            .query_row(
                "SELECT version FROM model_registry
                 WHERE name = ?1 AND version <> ?2
                 ORDER BY COALESCE(promoted_at, created_at) DESC, rowid DESC
                 LIMIT 1",
                params![name, version],
                |row| row.get(0),
            )
            .optional()
            .with_context(|| format!("look up rollback fallback for {name}"))?;
        if let Some(fallback) = &fallback {
            mark_production(&tx, name, fallback, now)?;
        }
        fallback
    };
    tx.commit().context("commit rollback transaction")?;

    tracing::info!(
        model = %name,
        from = %current,
        to = restored.as_deref().unwrap_or("none"),
        "model rolled back"
    );

    match restored {
        Some(v) => find_model(conn, name, &v),
        None => Ok(None),
    }
}

fn read_artifacts(row: &Row<'_>) -> rusqlite::Result<[String; 6]> {
    Ok([
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
    ])
}

fn decode_artifacts([name, version, model_json, calibration_json, baseline_json, checksum]: [String; 6]) -> Result<ModelArtifacts> {
    if artifact_checksum(&model_json, &calibration_json) != checksum {
        bail!("checksum mismatch for model {name}@{version}");
    }
    Ok(ModelArtifacts {
        model: serde_json::from_str(&model_json)
            .with_context(|| format!("decode model {name}@{version}"))?,
        calibration: serde_json::from_str(&calibration_json)
            .with_context(|| format!("decode calibration {name}@{version}"))?,
        baseline: serde_json::from_str(&baseline_json)
            .with_context(|| format!("decode score baseline {name}@{version}"))?,
        name,
        version,
    })
}

const ARTIFACT_COLUMNS: &str = "name, version, model_json, calibration_json, baseline_json, checksum";

pub fn load_artifacts(conn: &Connection, name: &str, version: &str) -> Result<Option<ModelArtifacts>> {
    let raw = conn
        .query_row(
            &format!("SELECT {ARTIFACT_COLUMNS} FROM model_registry WHERE name = ?1 AND version = ?2"),
            params![name, version],
            read_artifacts,
        )
        .optional()
        .with_context(|| format!("load artifacts for {name}@{version}"))?;
    raw.map(decode_artifacts).transpose()
}

pub fn production_artifacts(conn: &Connection, name: &str) -> Result<Option<ModelArtifacts>> {
    let raw = conn
        .query_row(
            &format!(
                "SELECT {ARTIFACT_COLUMNS} FROM model_registry
                 WHERE name = ?1 AND status = ?2
                 ORDER BY created_at DESC LIMIT 1"
            ),
            params![name, ModelStatus::Production.as_str()],
            read_artifacts,
        )
        .optional()
        .with_context(|| format!("load production artifacts for {name}"))?;
    raw.map(decode_artifacts).transpose()
}

/// Resolves the next version, trains, then registers the result as staging.
pub fn train_and_register(
    store: &dyn MatchStore,
    conn: &Connection,
    config: &TrainingConfig,
    cancel: &CancelFlag,
    now: DateTime<Utc>,
) -> Result<(TrainingResult, ModelSummary), EngineError> {
    let mut config = config.clone();
    if config.version.is_none() {
        config.version = Some(next_version(conn, &config.model_name())?);
    }
    let result = train_model(store, &config, cancel, now)?;
    let summary = register(conn, &result, now)?;
    Ok((result, summary))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn semver_parsing() {
        assert_eq!(parse_semver("1.2.3"), Some((1, 2, 3)));
        assert_eq!(parse_semver("1.2"), None);
        assert_eq!(parse_semver("1.2.3.4"), None);
        assert_eq!(parse_semver("draft"), None);
    }

    #[test]
    fn checksum_is_hex_sha256() {
        let sum = artifact_checksum("{}", "{\"method\":\"none\"}");
        assert_eq!(sum.len(), 64);
        assert!(sum.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(sum, artifact_checksum("{}", "{}"));
    }

    #[test]
    fn next_version_bumps_highest_patch() {
        let conn = Connection::open_in_memory().unwrap();
        init_registry_schema(&conn).unwrap();
        assert_eq!(next_version(&conn, "weekly-logit").unwrap(), "1.0.0");
        for v in ["1.0.0", "1.0.9", "1.0.10", "draft"] {
            conn.execute(
                "INSERT INTO model_registry (name, version, training_window, algorithm,
                    hyperparameters_json, metrics_json, model_json, calibration_json,
                    baseline_json, checksum, created_at)
                 VALUES ('weekly-logit', ?1, 'w', 'logit', '{}', '{}', '{}', '{}', '{}', 'x', '2024-01-01T00:00:00Z')",
                params![v],
            )
            .unwrap();
        }
        assert_eq!(next_version(&conn, "weekly-logit").unwrap(), "1.0.11");
        assert_eq!(next_version(&conn, "weekly-gbdt").unwrap(), "1.0.0");
    }

    #[test]
    fn unknown_status_reads_as_staging() {
        assert_eq!(ModelStatus::parse("retired"), ModelStatus::Staging);
        assert_eq!(ModelStatus::parse("production"), ModelStatus::Production);
    }
}
