use std::path::Path;

use ordinal_tsf::data::{mackey_glass, write_series, MackeyGlassParams};
use ordinal_tsf::search::{load_best_models, CandidateResult};
use ordinal_tsf::validation::Metric;
use ordinal_tsf::{run_search, ExperimentConfig};
use tempfile::tempdir;

/// A configuration small enough to train in well under a second.
fn tiny_config(output: &Path) -> ExperimentConfig {
    let mut config = ExperimentConfig::from_toml_str(
        r#"
        max_length = 240
        lookback = 4
        horizon = 3
        attractor_lag = 1
        attractor_dims = 2
        validation_horizon = 12
        test_horizon = 12
        ordinal_bins = 8
        val_mc_samples = 3
        test_mc_samples = 4
        seed = 7
        plots = false

        [search]
        lam = [1e-6]
        dropout_rate = [0.25]
        units = [4, 6]

        [train]
        epochs = 2
        batch_size = 32
        learning_rate = 0.01
        "#,
    )
    .unwrap();
    config.output_dir = output.to_path_buf();
    config
}

#[test]
fn test_search_on_generated_series() {
    let dir = tempdir().unwrap();
    let config = tiny_config(dir.path());

    let report = run_search(&config).unwrap();

    assert_eq!(report.validation.results.len(), 2);
    assert!(!report.validation.best.is_empty());
    for (metric, params) in &report.validation.best {
        let validated = report.validation.best_result(*metric).unwrap();
        let tested = &report.test[metric];
        assert_eq!(&tested.params, params);
        assert_eq!(tested.seed, validated.seed);
        assert_eq!(tested.history.train_loss, validated.history.train_loss);
        assert_eq!(tested.horizon, 12);
        assert_eq!(tested.mc_samples, 4);
    }

    let model_dir = dir.path().join("mg").join("mordred");
    for result in &report.validation.results {
        assert!(model_dir.join(&result.model_id).join("val_results.json").is_file());
    }

    assert_eq!(report.best_models_path, dir.path().join("best_models_mordred.json"));
    let best = load_best_models(&report.best_models_path).unwrap();
    assert_eq!(best["mg"], report.validation.best);
}

#[test]
fn test_search_on_csv_reuses_results_and_merges_best_models() {
    let dir = tempdir().unwrap();
    let csv = dir.path().join("mg.csv");
    let series = mackey_glass(240, &MackeyGlassParams::default(), 3).unwrap();
    write_series(&csv, "value", &series.channel(0)).unwrap();

    let mut first = tiny_config(dir.path());
    first.dataset = "csv".to_string();
    first.data_path = Some(csv.clone());
    first.column = Some("value".to_string());
    let report = run_search(&first).unwrap();
    assert!(report.validation.results.iter().all(|r| !r.reused));

    let mut second = first.clone();
    second.reuse_results = true;
    let again = run_search(&second).unwrap();
    assert!(again.validation.results.iter().all(|r| r.reused));
    let scores = |results: &[CandidateResult]| -> Vec<Option<f64>> {
        results.iter().map(|r| r.score(Metric::Mse)).collect()
    };
    assert_eq!(scores(&report.validation.results), scores(&again.validation.results));

    let mut retrained = second.clone();
    retrained.train.epochs = 3;
    let fresh = run_search(&retrained).unwrap();
    assert!(fresh.validation.results.iter().all(|r| !r.reused));
    assert!(fresh.validation.results.iter().all(|r| r.train.epochs == 3));

    let mut generated = tiny_config(dir.path());
    generated.dataset = "mg".to_string();
    run_search(&generated).unwrap();

    let best = load_best_models(dir.path().join("best_models_mordred.json")).unwrap();
    assert!(best.contains_key("csv"));
    assert!(best.contains_key("mg"));
}

#[test]
fn test_context_longer_than_start_is_rejected() {
    let dir = tempdir().unwrap();
    let mut config = tiny_config(dir.path());
    // start index is lookback + 2 * lag + 1; a large effective lag pushes the
    // evaluation start before the context the model needs
    config.effective_lag = 4;
    assert!(run_search(&config).is_err());
}
