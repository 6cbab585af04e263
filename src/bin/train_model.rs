use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use tracing_subscriber::EnvFilter;

use fixture_forecast::calibration::CalibrationMethod;
use fixture_forecast::cancel::CancelFlag;
use fixture_forecast::config::{CLI_HOLDOUT_RATIO, TrainingConfig};
use fixture_forecast::fixtures::parse_kickoff;
use fixture_forecast::model::Algorithm;
use fixture_forecast::registry;
use fixture_forecast::sqlite_store::{SqliteStore, default_db_path};
use fixture_forecast::synthetic::{SyntheticConfig, generate_league};

fn main() -> anyhow::Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    let _ = dotenvy::from_filename(".env");
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut config = TrainingConfig::from_env(CLI_HOLDOUT_RATIO);
    apply_arg_overrides(&mut config);

    let db_path = parse_path_arg("--db")
        .or_else(default_db_path)
        .context("no database path: pass --db or set FIXTURE_DB_PATH")?;
    let mut store = SqliteStore::open(&db_path)?;
    registry::init_registry_schema(store.connection())?;

    let mut now = Utc::now();
    if has_flag("--synthetic") {
        let synthetic = SyntheticConfig {
            seed: parse_arg("--seed")
                .and_then(|v| v.parse().ok())
                .unwrap_or(SyntheticConfig::default().seed),
            ..SyntheticConfig::default()
        };
        let league = generate_league(&synthetic);
        league.write_to_sqlite(&mut store, now)?;
        // Synthetic leagues live in the past; predict the round after the last result.
        now = synthetic.cutoff();
    }

    let cancel = CancelFlag::new();
    let (result, mut summary) =
        registry::train_and_register(&store, store.connection(), &config, &cancel, now)?;

    if has_flag("--promote") {
        summary = registry::promote(store.connection_mut(), &summary.name, &summary.version, now)?;
    }

    if let Some(out) = parse_path_arg("--out") {
        write_atomic(&out, &result.to_json_pretty()?)?;
        println!("Wrote training result to {}", out.display());
    }

    println!(
        "Model {}@{} ({}) trained - backtest ROI: {:.2}% accuracy: {:.1}% status: {}",
        summary.name,
        summary.version,
        summary.algorithm,
        result.metrics.backtest.roi,
        result.metrics.backtest.accuracy * 100.0,
        summary.status.as_str(),
    );
    Ok(())
}

fn apply_arg_overrides(config: &mut TrainingConfig) {
    if let Some(algo) = parse_arg("--algo") {
        config.algorithm = Algorithm::parse_or_default(Some(&algo));
    }
    if let Some(method) = parse_arg("--calibration") {
        config.calibration = CalibrationMethod::parse_or_default(Some(&method));
    }
    if let Some(ratio) = parse_arg("--holdout").and_then(|v| v.trim().parse::<f64>().ok())
        && ratio > 0.0
        && ratio < 1.0
    {
        config.holdout_ratio = ratio;
    }
    if let Some(name) = parse_arg("--name") {
        config.model_name = Some(name);
    }
    if let Some(version) = parse_arg("--version") {
        config.version = Some(version);
    }
    if let Some(description) = parse_arg("--description") {
        config.description = Some(description);
    }
    if let Some(start) = parse_arg("--start").and_then(|v| parse_kickoff(&v)) {
        config.training_window.start = Some(start);
    }
    if let Some(end) = parse_arg("--end").and_then(|v| parse_kickoff(&v)) {
        config.training_window.end = Some(end);
    }
}

fn write_atomic(path: &Path, data: &[u8]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        fs::create_dir_all(parent).with_context(|| format!("create {}", parent.display()))?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, data).with_context(|| format!("write {}", tmp.display()))?;
    fs::rename(&tmp, path).with_context(|| format!("rename to {}", path.display()))?;
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

fn parse_path_arg(name: &str) -> Option<PathBuf> {
    parse_arg(name).map(PathBuf::from)
}

fn has_flag(name: &str) -> bool {
    std::env::args().skip(1).any(|arg| arg == name)
}
