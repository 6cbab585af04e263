use criterion::{Criterion, criterion_group, criterion_main};
use std::hint::black_box;

use fixture_forecast::boosting::{BoostingParams, train_gbdt};
use fixture_forecast::calibration::fit_isotonic;
use fixture_forecast::cancel::CancelFlag;
use fixture_forecast::dataset::build_training_dataset;
use fixture_forecast::fixtures::TrainingWindow;
use fixture_forecast::logistic::{LogisticParams, train_logistic};
use fixture_forecast::synthetic::{SyntheticConfig, generate_league};

fn league_config() -> SyntheticConfig {
    SyntheticConfig {
        teams: 16,
        rounds: 20,
        ..SyntheticConfig::default()
    }
}

fn bench_dataset_build(c: &mut Criterion) {
    let store = generate_league(&league_config()).to_memory_store();
    let window = TrainingWindow::default();
    let cancel = CancelFlag::new();
    c.bench_function("dataset_build_160_fixtures", |b| {
        b.iter(|| {
            let dataset = build_training_dataset(black_box(&store), &window, &cancel).unwrap();
            black_box(dataset.len());
        })
    });
}

fn bench_trainers(c: &mut Criterion) {
    let store = generate_league(&league_config()).to_memory_store();
    let dataset =
        build_training_dataset(&store, &TrainingWindow::default(), &CancelFlag::new()).unwrap();
    let matrix = dataset.matrix();
    let labels = dataset.labels();

    c.bench_function("train_logistic_default", |b| {
        b.iter(|| {
            let model = train_logistic(black_box(&matrix), black_box(&labels), &LogisticParams::default());
            black_box(model.weights.len());
        })
    });

    c.bench_function("train_gbdt_default", |b| {
        b.iter(|| {
            let model = train_gbdt(black_box(&matrix), black_box(&labels), &BoostingParams::default());
            black_box(model.stumps.len());
        })
    });
}

fn bench_isotonic(c: &mut Criterion) {
    let probs: Vec<f64> = (0..2_000).map(|i| ((i * 7919) % 2_000) as f64 / 2_000.0).collect();
    let labels: Vec<f64> = probs
        .iter()
        .enumerate()
        .map(|(i, p)| if (*p + (i % 5) as f64 * 0.1) > 0.7 { 1.0 } else { 0.0 })
        .collect();
    c.bench_function("fit_isotonic_2000", |b| {
        b.iter(|| {
            let model = fit_isotonic(black_box(&probs), black_box(&labels));
            black_box(model);
        })
    });
}

criterion_group!(benches, bench_dataset_build, bench_trainers, bench_isotonic);
criterion_main!(benches);
