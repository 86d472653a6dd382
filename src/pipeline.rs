//! End-to-end search: load, preprocess, grid-search on validation data,
//! re-evaluate the per-metric winners on test data and persist them.

use crate::config::ExperimentConfig;
use crate::data::{
    load_series, mackey_glass, write_series, Dataset, MackeyGlassParams, Quantiser, Selector,
    Split, Standardiser, TimeSeries, Transform, WhiteCorrupter,
};
use crate::error::{Result, TsfError};
use crate::ml::{EvalSpec, Mordred};
use crate::plots::PlotRequest;
use crate::search::{
    cartesian, load_best_models, save_best_models, BestModels, CandidateResult, ExperimentError,
    ExperimentSettings, ModelSelection, ParamSet, Session,
};
use crate::validation::{Metric, TestDefinition};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

/// Outcome of [`run_search`].
#[derive(Debug, Clone)]
pub struct SearchReport {
    pub validation: ModelSelection,
    /// Test-split result of the best model for each metric.
    pub test: BTreeMap<Metric, CandidateResult>,
    pub best_models_path: PathBuf,
}

/// Ground truth of one evaluation window.
struct EvaluationWindow {
    continuous: TimeSeries,
    ordinal: TimeSeries,
}

impl EvaluationWindow {
    fn new(dataset: &Dataset, split: Split, start: usize, horizon: usize) -> Result<Self> {
        let selector = Selector::new(start, horizon);
        let stand = dataset.step("standardiser").ok_or_else(|| missing_step("standardiser"))?;
        let quant = dataset.ordinal_decoder().ok_or_else(|| missing_step("quantiser"))?;
        Ok(Self {
            continuous: dataset.apply_partial_preprocessing(split, &[&selector, stand])?,
            ordinal: dataset.apply_partial_preprocessing(split, &[&selector, stand, quant])?,
        })
    }

    fn tests(&self) -> Result<Vec<TestDefinition>> {
        let mut tests = Vec::with_capacity(5);
        for metric in Metric::all() {
            let truth = if metric.requires_ordinal() {
                self.ordinal.clone()
            } else {
                self.continuous.clone()
            };
            tests.push(TestDefinition::new(metric, truth)?);
        }
        Ok(tests)
    }

    fn plots(&self, split: Split) -> Vec<PlotRequest> {
        let mut plots = vec![PlotRequest::Median2Std {
            ground_truth: self.continuous.clone(),
        }];
        if split == Split::Test {
            plots.push(PlotRequest::MedianDtwAlignment {
                ground_truth: self.continuous.clone(),
            });
        }
        plots.push(PlotRequest::CumNll {
            binned_ground_truth: self.ordinal.clone(),
        });
        plots.push(PlotRequest::Like {
            binned_ground_truth: None,
        });
        plots
    }
}

fn missing_step(name: &str) -> TsfError {
    TsfError::Experiment(ExperimentError::InvalidSetup(format!(
        "dataset has no {} step",
        name
    )))
}

fn load_input(config: &ExperimentConfig) -> Result<TimeSeries> {
    match &config.data_path {
        Some(path) => {
            let series = load_series(path, config.column.as_deref(), config.max_length)?;
            info!("Loaded {} points from {}", series.len(), path.display());
            Ok(series)
        }
        None => {
            info!(
                "No input file given; generating {} Mackey-Glass points",
                config.max_length
            );
            Ok(mackey_glass(config.max_length, &MackeyGlassParams::default(), config.seed)?)
        }
    }
}

fn preprocessing(config: &ExperimentConfig) -> Vec<Box<dyn Transform>> {
    let mut steps: Vec<Box<dyn Transform>> = vec![Box::new(Standardiser::new())];
    if let Some(sigma) = config.white_noise_sigma {
        steps.push(Box::new(WhiteCorrupter::new(sigma, config.seed)));
    }
    steps.push(Box::new(Quantiser::new(config.ordinal_bins, config.quantiser_delta)));
    steps
}

/// Runs the validation grid search and the test re-evaluation described by `config`.
pub fn run_search(config: &ExperimentConfig) -> Result<SearchReport> {
    config.validate()?;

    let series = load_input(config)?;
    let dataset = Dataset::new(
        series,
        config.frame_length(),
        config.p_val,
        config.p_test,
        preprocessing(config),
    )?;

    let session = Session::open(&config.output_dir, &config.dataset)?;
    let settings = ExperimentSettings {
        base_seed: config.seed,
        n_threads: config.threads,
        reuse_results: config.reuse_results,
        attractor_lag: config.attractor_lag,
        attractor_dims: config.attractor_dims,
    };
    let experiment = session
        .start_experiment::<Mordred>(&dataset)?
        .with_settings(settings.clone());

    let n_channels = dataset.optional_params().get("n_channels").copied().unwrap_or(1);
    let candidates = cartesian(&config.search_space(n_channels));
    let start = config.start_index();
    let eval_start = start - config.effective_lag;

    let val_window = EvaluationWindow::new(&dataset, Split::Val, start, config.validation_horizon)?;
    let val_plots = if config.plots { val_window.plots(Split::Val) } else { Vec::new() };
    let validation = experiment.choose_model(
        &val_window.tests()?,
        &candidates,
        eval_start,
        config.validation_horizon,
        &val_plots,
        &config.train,
        &EvalSpec {
            mc_samples: config.val_mc_samples,
        },
        Split::Val,
    )?;

    let test_window = EvaluationWindow::new(&dataset, Split::Test, start, config.test_horizon)?;
    let test_tests = test_window.tests()?;
    let test_plots = if config.plots { test_window.plots(Split::Test) } else { Vec::new() };

    let mut evaluated: BTreeMap<String, CandidateResult> = BTreeMap::new();
    let mut test = BTreeMap::new();
    for (metric, params) in &validation.best {
        info!("Test result for model with best {} performance", metric);
        let result = match evaluated.get(&params.model_id()) {
            Some(result) => result.clone(),
            None => {
                // the validation seed reproduces the validated weights
                let seed = validation
                    .best_result(*metric)
                    .map(|r| r.seed)
                    .unwrap_or(config.seed);
                info!("Refitting {} with seed {} for the test split", params, seed);
                let retest = session
                    .start_experiment::<Mordred>(&dataset)?
                    .with_settings(ExperimentSettings {
                        base_seed: seed,
                        ..settings.clone()
                    });
                let selection = retest.choose_model(
                    &test_tests,
                    std::slice::from_ref(params),
                    eval_start,
                    config.test_horizon,
                    &test_plots,
                    &config.train,
                    &EvalSpec {
                        mc_samples: config.test_mc_samples,
                    },
                    Split::Test,
                )?;
                let result = selection.results.into_iter().next().ok_or_else(|| {
                    ExperimentError::NoCandidates(format!("{} produced no test result", params))
                })?;
                evaluated.insert(params.model_id(), result.clone());
                result
            }
        };
        test.insert(*metric, result);
    }

    let best_models_path = config.best_models_path();
    let mut best_models = if best_models_path.is_file() {
        load_best_models(&best_models_path)?
    } else {
        BestModels::new()
    };
    best_models.insert(config.dataset.clone(), validation.best.clone());
    save_best_models(&best_models_path, &best_models)?;

    Ok(SearchReport {
        validation,
        test,
        best_models_path,
    })
}

/// Writes `n` Mackey-Glass samples to a single-column CSV.
pub fn generate_mackey_glass(
    path: &Path,
    n: usize,
    params: &MackeyGlassParams,
    seed: u64,
) -> Result<()> {
    let series = mackey_glass(n, params, seed)?;
    write_series(path, "value", &series.channel(0))?;
    info!("Wrote {} Mackey-Glass points to {}", n, path.display());
    Ok(())
}

/// Parameter sets of a report's best models, for display.
pub fn describe_best(best: &BTreeMap<Metric, ParamSet>) -> Vec<String> {
    best.iter()
        .map(|(metric, params)| format!("{}: {}", metric, params))
        .collect()
}
