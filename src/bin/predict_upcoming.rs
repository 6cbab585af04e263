use std::path::PathBuf;

use anyhow::Context;
use chrono::Utc;
use tracing_subscriber::EnvFilter;

use fixture_forecast::config::{DEFAULT_HOLDOUT_RATIO, TrainingConfig};
use fixture_forecast::fixtures::parse_kickoff;
use fixture_forecast::prediction::{Predictor, predict_upcoming};
use fixture_forecast::registry;
use fixture_forecast::sqlite_store::{SqliteStore, default_db_path};
use fixture_forecast::store::MatchStore;

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let db_path = parse_arg("--db")
        .map(PathBuf::from)
        .or_else(default_db_path)
        .context("no database path: pass --db or set FIXTURE_DB_PATH")?;
    let store = SqliteStore::open(&db_path)?;
    registry::init_registry_schema(store.connection())?;

    let name = parse_arg("--name")
        .unwrap_or_else(|| TrainingConfig::from_env(DEFAULT_HOLDOUT_RATIO).model_name());
    let artifacts = match parse_arg("--version") {
        Some(version) => registry::load_artifacts(store.connection(), &name, &version)?
            .with_context(|| format!("model {name}@{version} is not registered"))?,
        None => registry::production_artifacts(store.connection(), &name)?
            .with_context(|| format!("no production model named {name}"))?,
    };

    let now = parse_arg("--now")
        .and_then(|v| parse_kickoff(&v))
        .unwrap_or_else(Utc::now);
    let fixtures = store.upcoming_fixtures(now)?;
    let importance = artifacts.model.feature_importance();
    let predictor = Predictor {
        model: &artifacts.model,
        calibration: &artifacts.calibration,
        baseline: artifacts.baseline,
        model_version: &artifacts.version,
    };
    let predictions = predict_upcoming(&store, &predictor, &importance, &fixtures)?;

    tracing::info!(
        model = %artifacts.name,
        version = %artifacts.version,
        fixtures = predictions.len(),
        "predictions generated"
    );
    println!("{}", serde_json::to_string_pretty(&predictions)?);
    Ok(())
}

fn parse_arg(name: &str) -> Option<String> {
    let args = std::env::args().skip(1).collect::<Vec<_>>();
    for (idx, arg) in args.iter().enumerate() {
        if let Some(raw) = arg.strip_prefix(&format!("{name}="))
            && !raw.trim().is_empty()
        {
            return Some(raw.trim().to_string());
        }
        if arg == name
            && let Some(next) = args.get(idx + 1)
            && !next.trim().is_empty()
            && !next.starts_with("--")
        {
            return Some(next.trim().to_string());
        }
    }
    None
}
