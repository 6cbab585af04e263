use fixture_forecast::features::{
    FEATURE_COUNT, FEATURE_NAMES, compute_fixture_features, fatigue_index, feature_index,
    implied_probability,
};
use fixture_forecast::synthetic::{SyntheticConfig, generate_league};

#[test]
fn every_fixture_gets_twenty_finite_features_in_order() {
    let league = generate_league(&SyntheticConfig {
        odds_coverage: 0.5,
        upcoming_rounds: 2,
        ..SyntheticConfig::default()
    });
    let store = league.to_memory_store();

    for fixture in store.fixtures() {
        let features = compute_fixture_features(&store, fixture).unwrap();
        let values = features.feature_vector.to_vec();
        assert_eq!(values.len(), FEATURE_COUNT);
        assert!(values.iter().all(|v| v.is_finite()), "{}: {values:?}", fixture.id);
        for (idx, (name, value)) in features.feature_vector.named_values().into_iter().enumerate() {
            assert_eq!(name, FEATURE_NAMES[idx]);
            assert_eq!(feature_index(name), Some(idx));
            assert_eq!(value.to_bits(), values[idx].to_bits());
        }
    }
}

#[test]
fn fatigue_index_reference_points() {
    assert_eq!(fatigue_index(10.0), 0.0);
    assert_eq!(fatigue_index(1.0), 1.0);
    assert!((fatigue_index(7.0) - 0.14).abs() <= 0.01);
}

#[test]
fn implied_probability_reference_points() {
    assert_eq!(implied_probability(Some(2.0)), 0.5);
    assert_eq!(implied_probability(None), 0.0);
}

#[test]
fn first_round_has_neutral_history() {
    let league = generate_league(&SyntheticConfig::default());
    let store = league.to_memory_store();
    let opener = &store.fixtures()[0];
    let v = compute_fixture_features(&store, opener).unwrap().feature_vector;
    assert_eq!(v.home_form_rating, 50.0);
    assert_eq!(v.away_form_rating, 50.0);
    assert_eq!(v.home_rest_days, 10.0);
    assert_eq!(v.home_fatigue_index, 0.0);
    assert_eq!(v.home_head_to_head_win_rate, 0.5);
    assert_eq!(v.head_to_head_diff, 0.0);
}
