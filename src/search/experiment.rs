use super::grid::ParamSet;
use super::{ExperimentError, ExperimentResult};
use crate::data::{Dataset, Split, TimeSeries, Transform};
use crate::ml::{EvalSpec, ForecastStrategy, TrainSpec, TrainingHistory};
use crate::plots::PlotRequest;
use crate::validation::{ForecastEvaluation, Metric, TestDefinition};
use chrono::{DateTime, Utc};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Dataset name -> metric -> winning parameters.
pub type BestModels = BTreeMap<String, BTreeMap<Metric, ParamSet>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentSettings {
    /// Candidate `i` is seeded with `base_seed + i`.
    pub base_seed: u64,
    /// Worker threads; 0 uses the global rayon pool.
    pub n_threads: usize,
    /// Load existing `<mode>_results.json` files instead of retraining.
    pub reuse_results: bool,
    pub attractor_lag: usize,
    pub attractor_dims: usize,
}

impl Default for ExperimentSettings {
    fn default() -> Self {
        Self {
            base_seed: 0,
            n_threads: 0,
            reuse_results: false,
            attractor_lag: 10,
            attractor_dims: 3,
        }
    }
}

/// Scores of one fitted candidate, persisted next to its plots.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateResult {
    pub model_id: String,
    pub params: ParamSet,
    pub mode: Split,
    pub seed: u64,
    pub start_index: usize,
    pub horizon: usize,
    pub mc_samples: usize,
    pub train: TrainSpec,
    /// `Dataset::digest` of the data the candidate was trained and scored on.
    pub data_digest: String,
    /// Finite scores only; a metric that failed to evaluate is absent.
    pub scores: BTreeMap<Metric, f64>,
    pub history: TrainingHistory,
    pub timestamp: DateTime<Utc>,
    #[serde(skip)]
    pub reused: bool,
}

impl CandidateResult {
    pub fn score(&self, metric: Metric) -> Option<f64> {
        self.scores.get(&metric).copied()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ModelSelection {
    pub best: BTreeMap<Metric, ParamSet>,
    /// Every evaluated candidate, in candidate order.
    pub results: Vec<CandidateResult>,
}

impl ModelSelection {
    pub fn best_result(&self, metric: Metric) -> Option<&CandidateResult> {
        let params = self.best.get(&metric)?;
        self.results.iter().find(|r| &r.params == params)
    }
}

/// Everything a candidate evaluation shares with its siblings.
struct CandidateJob<'a> {
    tests: &'a [TestDefinition],
    plots: &'a [PlotRequest],
    fit: &'a TrainSpec,
    eval: &'a EvalSpec,
    mode: Split,
    start_index: usize,
    horizon: usize,
    frames: &'a [TimeSeries],
    context: &'a TimeSeries,
    decoder: &'a dyn Transform,
    data_digest: String,
}

impl CandidateJob<'_> {
    /// Whether a stored result was produced by this job with `seed`.
    fn matches(&self, stored: &CandidateResult, seed: u64) -> bool {
        stored.seed == seed
            && stored.start_index == self.start_index
            && stored.horizon == self.horizon
            && stored.mc_samples == self.eval.mc_samples
            && &stored.train == self.fit
            && stored.data_digest == self.data_digest
    }
}

/// Grid search of one strategy over one dataset.
pub struct Experiment<'d, S> {
    dataset: &'d Dataset,
    path: PathBuf,
    settings: ExperimentSettings,
    _strategy: PhantomData<fn() -> S>,
}

impl<'d, S: ForecastStrategy> Experiment<'d, S> {
    pub(crate) fn new(dataset: &'d Dataset, path: PathBuf, settings: ExperimentSettings) -> Self {
        Self {
            dataset,
            path,
            settings,
            _strategy: PhantomData,
        }
    }

    pub fn with_settings(mut self, settings: ExperimentSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> &ExperimentSettings {
        &self.settings
    }

    /// Fits every candidate on the training frames, forecasts `horizon` steps
    /// of the `mode` split from `start_index`, scores the forecast with every
    /// test and picks the lowest-scoring candidate per metric.
    #[allow(clippy::too_many_arguments)]
    pub fn choose_model(
        &self,
        tests: &[TestDefinition],
        candidates: &[ParamSet],
        start_index: usize,
        horizon: usize,
        plots: &[PlotRequest],
        fit: &TrainSpec,
        eval: &EvalSpec,
        mode: Split,
    ) -> ExperimentResult<ModelSelection> {
        if mode == Split::Train {
            return Err(ExperimentError::InvalidSetup(
                "models are selected on the val or test split".to_string(),
            ));
        }
        if candidates.is_empty() {
            return Err(ExperimentError::NoCandidates(
                "the candidate list is empty".to_string(),
            ));
        }
        if tests.is_empty() {
            return Err(ExperimentError::InvalidSetup(
                "no tests to score candidates with".to_string(),
            ));
        }
        if let Some(test) = tests.iter().find(|t| t.horizon() != horizon) {
            return Err(ExperimentError::InvalidSetup(format!(
                "{} ground truth has {} steps, expected horizon {}",
                test.metric(),
                test.horizon(),
                horizon
            )));
        }
        if eval.mc_samples == 0 {
            return Err(ExperimentError::InvalidSetup("mc_samples must be positive".to_string()));
        }
        fit.validate()?;

        let split_len = self.dataset.raw(mode).len();
        if start_index + horizon > split_len {
            return Err(ExperimentError::InvalidSetup(format!(
                "window {}..{} does not fit the {} split of length {}",
                start_index,
                start_index + horizon,
                mode,
                split_len
            )));
        }
        let series = self.dataset.processed(mode);
        if start_index > series.len() {
            return Err(ExperimentError::InvalidSetup(format!(
                "start index {} beyond the processed {} split of length {}",
                start_index,
                mode,
                series.len()
            )));
        }
        for params in candidates {
            if let Ok(model) = S::from_params(params, 0) {
                if model.context_length() > start_index {
                    return Err(ExperimentError::InvalidSetup(format!(
                        "candidate {} needs {} rows of context, start index is {}",
                        params,
                        model.context_length(),
                        start_index
                    )));
                }
            }
        }

        let decoder = self.dataset.ordinal_decoder().ok_or_else(|| {
            ExperimentError::InvalidSetup("dataset has no ordinal preprocessing step".to_string())
        })?;
        let frames = self.dataset.frames(Split::Train)?;
        if frames.is_empty() {
            return Err(ExperimentError::InvalidSetup(
                "training split is shorter than one frame".to_string(),
            ));
        }
        let context = series.slice(0, start_index)?;

        info!(
            "Evaluating {} {} candidates on the {} split ({} frames, horizon {}, {} draws)",
            candidates.len(),
            S::NAME,
            mode,
            frames.len(),
            horizon,
            eval.mc_samples
        );

        let job = CandidateJob {
            tests,
            plots,
            fit,
            eval,
            mode,
            start_index,
            horizon,
            frames: &frames,
            context: &context,
            decoder,
            data_digest: self.dataset.digest(),
        };

        let run = || {
            candidates
                .par_iter()
                .enumerate()
                .map(|(index, params)| self.evaluate_candidate(&job, index, params))
                .collect::<Vec<_>>()
        };
        let outcomes = if self.settings.n_threads > 0 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.settings.n_threads)
                .build()
                .map_err(|e| {
                    ExperimentError::InvalidSetup(format!("failed to create thread pool: {}", e))
                })?;
            pool.install(run)
        } else {
            run()
        };

        let mut results = Vec::with_capacity(candidates.len());
        for (params, outcome) in candidates.iter().zip(outcomes) {
            match outcome {
                Ok(result) => results.push(result),
                Err(e @ ExperimentError::InvalidSetup(_)) => return Err(e),
                Err(e) => warn!("Skipping candidate {}: {}", params, e),
            }
        }
        if results.is_empty() {
            return Err(ExperimentError::NoCandidates(format!(
                "all {} candidates failed",
                candidates.len()
            )));
        }

        let metrics: Vec<Metric> = tests.iter().map(|t| t.metric()).collect();
        let best = select_best(&metrics, &results);
        for (metric, params) in &best {
            info!("Best {} on the {} split: {}", metric, mode, params);
        }

        Ok(ModelSelection { best, results })
    }

    fn evaluate_candidate(
        &self,
        job: &CandidateJob<'_>,
        index: usize,
        params: &ParamSet,
    ) -> ExperimentResult<CandidateResult> {
        let model_id = params.model_id();
        let dir = self.path.join(&model_id);
        let results_path = dir.join(format!("{}_results.json", job.mode));
        let seed = self.settings.base_seed.wrapping_add(index as u64);

        if self.settings.reuse_results && results_path.is_file() {
            match read_json::<CandidateResult>(&results_path) {
                Ok(mut cached) if job.matches(&cached, seed) => {
                    info!("Reusing stored {} results for {}", job.mode, model_id);
                    cached.reused = true;
                    return Ok(cached);
                }
                Ok(_) => info!("Stored results for {} were made with other settings", model_id),
                Err(e) => warn!("Could not read {}: {}", results_path.display(), e),
            }
        }

        let mut model = S::from_params(params, seed)?;
        let history = model.fit(job.frames, job.fit)?;
        let forecast = model.predict(job.context, job.horizon, job.eval.mc_samples, seed)?;
        let evaluation = ForecastEvaluation::new(
            forecast,
            job.decoder,
            self.settings.attractor_lag,
            self.settings.attractor_dims,
        )?;

        let mut scores = BTreeMap::new();
        for test in job.tests {
            match test.evaluate(&evaluation) {
                Ok(score) if score.is_finite() => {
                    scores.insert(test.metric(), score);
                }
                Ok(score) => warn!("{} of {} is {}; ignored", test.metric(), model_id, score),
                Err(e) => warn!("{} failed for {}: {}", test.metric(), model_id, e),
            }
        }

        fs::create_dir_all(&dir)?;
        let result = CandidateResult {
            model_id,
            params: params.clone(),
            mode: job.mode,
            seed,
            start_index: job.start_index,
            horizon: job.horizon,
            mc_samples: job.eval.mc_samples,
            train: job.fit.clone(),
            data_digest: job.data_digest.clone(),
            scores,
            history,
            timestamp: Utc::now(),
            reused: false,
        };
        write_json(&results_path, &result)?;

        for plot in job.plots {
            if let Err(e) = plot.render(&evaluation, &dir, job.mode.as_str()) {
                warn!("{} failed for {}: {}", plot.name(), result.model_id, e);
            }
        }

        info!(
            "{} on the {} split: {}",
            params,
            job.mode,
            format_scores(&result.scores)
        );
        Ok(result)
    }
}

fn format_scores(scores: &BTreeMap<Metric, f64>) -> String {
    scores
        .iter()
        .map(|(metric, score)| format!("{}={:.4}", metric, score))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Per metric, the candidate with the strictly smallest score; earlier
/// candidates win ties and NaN never wins.
pub fn select_best(metrics: &[Metric], results: &[CandidateResult]) -> BTreeMap<Metric, ParamSet> {
    let mut best = BTreeMap::new();
    for &metric in metrics {
        let mut winner: Option<(f64, &ParamSet)> = None;
        for result in results {
            let score = match result.score(metric) {
                Some(score) if !score.is_nan() => score,
                _ => continue,
            };
            if winner.map_or(true, |(current, _)| score < current) {
                winner = Some((score, &result.params));
            }
        }
        if let Some((_, params)) = winner {
            best.insert(metric, params.clone());
        }
    }
    best
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> ExperimentResult<()> {
    let writer = BufWriter::new(File::create(path)?);
    serde_json::to_writer_pretty(writer, value)?;
    Ok(())
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> ExperimentResult<T> {
    let reader = BufReader::new(File::open(path)?);
    Ok(serde_json::from_reader(reader)?)
}

pub fn save_best_models(path: impl AsRef<Path>, best: &BestModels) -> ExperimentResult<()> {
    let path = path.as_ref();
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    write_json(path, best)?;
    info!("Saved best models to {}", path.display());
    Ok(())
}

pub fn load_best_models(path: impl AsRef<Path>) -> ExperimentResult<BestModels> {
    read_json(path.as_ref())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Quantiser, Standardiser};
    use crate::ml::{Forecast, MLError, MLResult};
    use crate::search::Session;
    use nalgebra as na;
    use tempfile::tempdir;

    /// Repeats the last observed bin; fails to fit when `fail` is set.
    struct Persistence {
        lookback: usize,
        fail: bool,
    }

    impl ForecastStrategy for Persistence {
        const NAME: &'static str = "persistence";

        fn from_params(params: &ParamSet, _seed: u64) -> MLResult<Self> {
            let lookback = params
                .get("lookback")
                .and_then(|v| v.as_usize())
                .ok_or_else(|| MLError::ConfigurationError("lookback".to_string()))?;
            let fail = params.get("fail").map(|v| v.as_f64() > 0.0).unwrap_or(false);
            Ok(Self { lookback, fail })
        }

        fn fit(&mut self, _frames: &[TimeSeries], _spec: &TrainSpec) -> MLResult<TrainingHistory> {
            if self.fail {
                return Err(MLError::TrainingFailed("asked to fail".to_string()));
            }
            Ok(TrainingHistory::default())
        }

        fn predict(
            &self,
            context: &TimeSeries,
            horizon: usize,
            mc_samples: usize,
            _seed: u64,
        ) -> MLResult<Forecast> {
            let n_bins = context.n_bins().unwrap_or(2);
            let last = context.bin(context.len() - 1, 0);
            let mut pdf: na::DMatrix<f64> = na::DMatrix::zeros(horizon, n_bins);
            pdf.column_mut(last).fill(1.0);
            Ok(Forecast {
                n_bins,
                pdf: vec![pdf],
                draws: vec![na::DMatrix::from_element(mc_samples, horizon, last as f64)],
            })
        }

        fn context_length(&self) -> usize {
            self.lookback + 1
        }
    }

    fn dataset() -> Dataset {
        let series = TimeSeries::univariate((0..400).map(|t| (t as f64 * 0.1).sin()).collect());
        Dataset::new(
            series,
            12,
            0.2,
            0.2,
            vec![Box::new(Standardiser::new()), Box::new(Quantiser::new(10, 1e-3))],
        )
        .unwrap()
    }

    fn tests(dataset: &Dataset, start: usize, horizon: usize) -> Vec<TestDefinition> {
        let selector = crate::data::Selector::new(start, horizon);
        let stand = dataset.step("standardiser").unwrap();
        let quant = dataset.step("quantiser").unwrap();
        let continuous = dataset
            .apply_partial_preprocessing(Split::Val, &[&selector, stand])
            .unwrap();
        let ordinal = dataset
            .apply_partial_preprocessing(Split::Val, &[&selector, stand, quant])
            .unwrap();
        vec![
            TestDefinition::new(Metric::Mse, continuous.clone()).unwrap(),
            TestDefinition::new(Metric::Nll, ordinal).unwrap(),
            TestDefinition::new(Metric::MedianDtwDistance, continuous).unwrap(),
        ]
    }

    fn result(params: ParamSet, scores: &[(Metric, f64)]) -> CandidateResult {
        CandidateResult {
            model_id: params.model_id(),
            params,
            mode: Split::Val,
            seed: 0,
            start_index: 0,
            horizon: 1,
            mc_samples: 1,
            train: TrainSpec::default(),
            data_digest: String::new(),
            scores: scores.iter().copied().collect(),
            history: TrainingHistory::default(),
            timestamp: Utc::now(),
            reused: false,
        }
    }

    #[test]
    fn test_select_best_is_strict_and_skips_nan() {
        let a = ParamSet::new().with("units", 1usize);
        let b = ParamSet::new().with("units", 2usize);
        let c = ParamSet::new().with("units", 3usize);
        let results = vec![
            result(a.clone(), &[(Metric::Mse, 1.0), (Metric::Nll, f64::NAN)]),
            result(b.clone(), &[(Metric::Mse, 1.0), (Metric::Nll, 2.0)]),
            result(c.clone(), &[(Metric::Mse, 0.5)]),
        ];
        let best = select_best(&[Metric::Mse, Metric::Nll, Metric::CumNll], &results);
        assert_eq!(best[&Metric::Mse], c);
        assert_eq!(best[&Metric::Nll], b);
        assert!(!best.contains_key(&Metric::CumNll));

        let tied = vec![result(a.clone(), &[(Metric::Mse, 1.0)]), result(b, &[(Metric::Mse, 1.0)])];
        assert_eq!(select_best(&[Metric::Mse], &tied)[&Metric::Mse], a);
    }

    #[test]
    fn test_choose_model_skips_failures_and_writes_results() {
        let root = tempdir().unwrap();
        let dataset = dataset();
        let session = Session::open(root.path(), "sine").unwrap();
        let experiment = session.start_experiment::<Persistence>(&dataset).unwrap();

        let candidates = vec![
            ParamSet::new().with("lookback", 5usize),
            ParamSet::new().with("lookback", 5usize).with("fail", 1usize),
            ParamSet::new().with("lookback", 8usize),
        ];
        let tests = tests(&dataset, 10, 20);
        let plots = vec![PlotRequest::Like {
            binned_ground_truth: None,
        }];
        let selection = experiment
            .choose_model(
                &tests,
                &candidates,
                10,
                20,
                &plots,
                &TrainSpec::default(),
                &EvalSpec { mc_samples: 4 },
                Split::Val,
            )
            .unwrap();

        assert_eq!(selection.results.len(), 2);
        assert_eq!(selection.best.len(), 3);
        let dir = experiment.path().join(candidates[0].model_id());
        assert!(dir.join("val_results.json").is_file());
        assert!(dir.join("val_plot_like.svg").is_file());
        let failed_dir = experiment.path().join(candidates[1].model_id());
        assert!(!failed_dir.join("val_results.json").exists());

        let stored: CandidateResult = read_json(&dir.join("val_results.json")).unwrap();
        assert_eq!(stored.params, candidates[0]);
        assert_eq!(stored.scores.len(), 3);
    }

    #[test]
    fn test_reuse_results_skips_training() {
        let root = tempdir().unwrap();
        let dataset = dataset();
        let session = Session::open(root.path(), "sine").unwrap();
        let settings = ExperimentSettings {
            reuse_results: true,
            n_threads: 2,
            ..ExperimentSettings::default()
        };
        let experiment = session
            .start_experiment::<Persistence>(&dataset)
            .unwrap()
            .with_settings(settings);
        let candidates = vec![ParamSet::new().with("lookback", 5usize)];
        let tests = tests(&dataset, 10, 20);
        let run = || {
            experiment.choose_model(
                &tests,
                &candidates,
                10,
                20,
                &[],
                &TrainSpec::default(),
                &EvalSpec { mc_samples: 3 },
                Split::Val,
            )
        };

        let first = run().unwrap();
        assert!(!first.results[0].reused);
        let second = run().unwrap();
        assert!(second.results[0].reused);
        assert_eq!(first.results[0].scores, second.results[0].scores);
    }

    #[test]
    fn test_stale_results_are_not_reused() {
        let root = tempdir().unwrap();
        let dataset = dataset();
        let session = Session::open(root.path(), "sine").unwrap();
        let candidates = vec![ParamSet::new().with("lookback", 5usize)];
        let tests = tests(&dataset, 10, 20);
        let run = |data: &Dataset, fit: &TrainSpec, base_seed: u64| {
            session
                .start_experiment::<Persistence>(data)
                .unwrap()
                .with_settings(ExperimentSettings {
                    reuse_results: true,
                    base_seed,
                    ..ExperimentSettings::default()
                })
                .choose_model(
                    &tests,
                    &candidates,
                    10,
                    20,
                    &[],
                    fit,
                    &EvalSpec { mc_samples: 3 },
                    Split::Val,
                )
                .unwrap()
                .results
                .remove(0)
        };

        let spec = TrainSpec::default();
        let first = run(&dataset, &spec, 0);
        assert!(!first.reused);
        assert_eq!(first.train, spec);
        assert_eq!(first.data_digest, dataset.digest());
        assert!(run(&dataset, &spec, 0).reused);

        let longer = TrainSpec {
            epochs: spec.epochs + 3,
            ..spec.clone()
        };
        let retrained = run(&dataset, &longer, 0);
        assert!(!retrained.reused);
        assert_eq!(retrained.train.epochs, spec.epochs + 3);

        assert!(!run(&dataset, &longer, 5).reused);

        let other_series =
            TimeSeries::univariate((0..400).map(|t| (t as f64 * 0.13).cos()).collect());
        let other = Dataset::new(
            other_series,
            12,
            0.2,
            0.2,
            vec![Box::new(Standardiser::new()), Box::new(Quantiser::new(10, 1e-3))],
        )
        .unwrap();
        assert!(!run(&other, &longer, 5).reused);
        assert!(run(&other, &longer, 5).reused);
    }

    #[test]
    fn test_invalid_windows_are_rejected() {
        let root = tempdir().unwrap();
        let dataset = dataset();
        let session = Session::open(root.path(), "sine").unwrap();
        let experiment = session.start_experiment::<Persistence>(&dataset).unwrap();
        let tests = tests(&dataset, 10, 20);
        let choose = |candidates: &[ParamSet], start: usize, mode: Split| {
            experiment.choose_model(
                &tests,
                candidates,
                start,
                20,
                &[],
                &TrainSpec::default(),
                &EvalSpec::default(),
                mode,
            )
        };

        let long_context = vec![ParamSet::new().with("lookback", 30usize)];
        assert!(matches!(
            choose(&long_context, 10, Split::Val),
            Err(ExperimentError::InvalidSetup(_))
        ));

        let ok = vec![ParamSet::new().with("lookback", 5usize)];
        assert!(matches!(choose(&ok, 70, Split::Val), Err(ExperimentError::InvalidSetup(_))));
        assert!(matches!(choose(&ok, 10, Split::Train), Err(ExperimentError::InvalidSetup(_))));
        assert!(matches!(choose(&[], 10, Split::Val), Err(ExperimentError::NoCandidates(_))));

        let failing = vec![ParamSet::new().with("lookback", 5usize).with("fail", 1usize)];
        assert!(matches!(
            choose(&failing, 10, Split::Val),
            Err(ExperimentError::NoCandidates(_))
        ));
    }

    #[test]
    fn test_stored_scores_round_trip_exactly() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("val_results.json");
        let scores = [
            (Metric::Mse, 0.9141319741892141),
            (Metric::Nll, 2.718281828459045),
            (Metric::CumNll, 1e-300 / 3.0),
        ];
        let stored = result(ParamSet::new().with("lam", 1e-7), &scores);
        write_json(&path, &stored).unwrap();

        let loaded: CandidateResult = read_json(&path).unwrap();
        assert_eq!(loaded.scores, stored.scores);
        assert_eq!(loaded.params, stored.params);
    }

    #[test]
    fn test_best_models_persist_as_json() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("best_models_mordred.json");
        let mut per_metric = BTreeMap::new();
        per_metric.insert(Metric::CumNll, ParamSet::new().with("units", 64usize).with("lam", 1e-7));
        let mut best = BestModels::new();
        best.insert("mg".to_string(), per_metric);

        save_best_models(&path, &best).unwrap();
        let json = fs::read_to_string(&path).unwrap();
        assert!(json.contains("\"cum_nll\""));
        assert_eq!(load_best_models(&path).unwrap(), best);
    }
}
