//! Experiment configuration loaded from TOML and environment overrides

use crate::error::ConfigError;
use crate::ml::{mordred::DECODER_SEED_LENGTH, TrainSpec};
use crate::search::SearchSpace;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Candidate values of the Mordred hyperparameters the grid varies.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub lam: Vec<f64>,
    pub dropout_rate: Vec<f64>,
    pub units: Vec<usize>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            lam: vec![1e-6, 1e-7, 1e-8],
            dropout_rate: vec![0.25, 0.5],
            units: vec![64, 128, 256, 320],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExperimentConfig {
    /// Session name, also the key of the persisted best-model mapping.
    pub dataset: String,
    /// CSV input; a Mackey-Glass series is generated when absent.
    pub data_path: Option<PathBuf>,
    pub column: Option<String>,
    pub output_dir: PathBuf,
    pub max_length: usize,

    pub lookback: usize,
    pub horizon: usize,
    pub attractor_lag: usize,
    pub attractor_dims: usize,
    pub effective_lag: usize,
    pub validation_horizon: usize,
    pub test_horizon: usize,

    pub p_val: f64,
    pub p_test: f64,
    pub ordinal_bins: usize,
    pub quantiser_delta: f64,
    /// Training-split white noise; off when unset.
    pub white_noise_sigma: Option<f64>,

    pub search: SearchConfig,
    pub train: TrainSpec,
    pub val_mc_samples: usize,
    pub test_mc_samples: usize,

    pub seed: u64,
    /// Worker threads for the grid; 0 lets rayon decide.
    pub threads: usize,
    pub reuse_results: bool,
    pub plots: bool,
    pub best_models_file: String,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            dataset: "mg".to_string(),
            data_path: None,
            column: None,
            output_dir: PathBuf::from("results"),
            max_length: 30_000,
            lookback: 100,
            horizon: 100,
            attractor_lag: 10,
            attractor_dims: 3,
            effective_lag: 0,
            validation_horizon: 500,
            test_horizon: 1000,
            p_val: 0.15,
            p_test: 0.15,
            ordinal_bins: 85,
            quantiser_delta: 1e-3,
            white_noise_sigma: None,
            search: SearchConfig::default(),
            train: TrainSpec::default(),
            val_mc_samples: 50,
            test_mc_samples: 100,
            seed: 0,
            threads: 0,
            reuse_results: false,
            plots: true,
            best_models_file: "best_models_mordred.json".to_string(),
        }
    }
}

impl ExperimentConfig {
    pub fn from_toml<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Applies `ORDINAL_TSF_DATA`, `ORDINAL_TSF_OUTPUT`, `ORDINAL_TSF_THREADS`
    /// and `ORDINAL_TSF_SEED` from the process environment.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        let vars: BTreeMap<String, String> = env::vars()
            .filter(|(key, _)| key.starts_with("ORDINAL_TSF_"))
            .collect();
        self.with_overrides(&vars)
    }

    pub fn with_overrides(mut self, vars: &BTreeMap<String, String>) -> Result<Self, ConfigError> {
        if let Some(data) = vars.get("ORDINAL_TSF_DATA") {
            self.data_path = Some(PathBuf::from(data));
        }
        if let Some(output) = vars.get("ORDINAL_TSF_OUTPUT") {
            self.output_dir = PathBuf::from(output);
        }
        if let Some(threads) = vars.get("ORDINAL_TSF_THREADS") {
            self.threads = threads.parse().map_err(|_| {
                ConfigError::InvalidValue(format!("ORDINAL_TSF_THREADS={} is not a count", threads))
            })?;
        }
        if let Some(seed) = vars.get("ORDINAL_TSF_SEED") {
            self.seed = seed.parse().map_err(|_| {
                ConfigError::InvalidValue(format!("ORDINAL_TSF_SEED={} is not an integer", seed))
            })?;
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dataset.is_empty() || self.dataset.contains(['/', '\\']) {
            return Err(ConfigError::InvalidValue(format!(
                "dataset name '{}' must be a plain directory name",
                self.dataset
            )));
        }
        if self.lookback == 0 || self.horizon == 0 {
            return Err(ConfigError::InvalidValue(
                "lookback and horizon must be positive".to_string(),
            ));
        }
        if self.validation_horizon == 0 || self.test_horizon == 0 {
            return Err(ConfigError::InvalidValue(
                "prediction horizons must be positive".to_string(),
            ));
        }
        if self.effective_lag > self.start_index() {
            return Err(ConfigError::InvalidValue(format!(
                "effective_lag {} exceeds the start index {}",
                self.effective_lag,
                self.start_index()
            )));
        }
        if self.ordinal_bins < 2 {
            return Err(ConfigError::InvalidValue("ordinal_bins must be at least 2".to_string()));
        }
        if self.val_mc_samples == 0 || self.test_mc_samples == 0 {
            return Err(ConfigError::InvalidValue("mc sample counts must be positive".to_string()));
        }
        if self.search.lam.is_empty()
            || self.search.dropout_rate.is_empty()
            || self.search.units.is_empty()
        {
            return Err(ConfigError::InvalidValue(
                "every search dimension needs at least one value".to_string(),
            ));
        }
        self.train
            .validate()
            .map_err(|e| ConfigError::InvalidValue(e.to_string()))
    }

    pub fn frame_length(&self) -> usize {
        self.lookback + self.horizon + DECODER_SEED_LENGTH
    }

    /// First forecast step of the val and test windows. Leaves room for the
    /// lookback, two attractor lags and the decoder seed.
    pub fn start_index(&self) -> usize {
        self.lookback + 2 * self.attractor_lag + DECODER_SEED_LENGTH
    }

    /// The Mordred grid with the preprocessing-dictated dimensions filled in.
    pub fn search_space(&self, n_channels: usize) -> SearchSpace {
        SearchSpace::new()
            .with("lam", self.search.lam.clone())
            .with("dropout_rate", self.search.dropout_rate.clone())
            .with("units", self.search.units.clone())
            .with("lookback", vec![self.lookback])
            .with("horizon", vec![self.horizon])
            .with("ordinal_bins", vec![self.ordinal_bins])
            .with("n_channels", vec![n_channels])
    }

    pub fn best_models_path(&self) -> PathBuf {
        self.output_dir.join(&self.best_models_file)
    }
}
