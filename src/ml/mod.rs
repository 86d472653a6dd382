//! Forecasting models
//!
//! The Mordred ordinal sequence-to-sequence model, the recurrent and
//! optimisation building blocks it is made of, and the strategy trait the
//! hyperparameter search is generic over.

pub mod lstm;
pub mod mordred;
pub mod optim;
pub mod strategy;

pub use lstm::{LstmLayer, LstmState};
pub use mordred::{Mordred, MordredParams};
pub use optim::Adam;
pub use strategy::ForecastStrategy;

use crate::data::{DataError, TimeSeries};
use nalgebra as na;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Result type for ML operations
pub type MLResult<T> = Result<T, MLError>;

#[derive(Debug, thiserror::Error)]
pub enum MLError {
    #[error("Model training failed: {0}")]
    TrainingFailed(String),

    #[error("Model prediction failed: {0}")]
    PredictionFailed(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Data error: {0}")]
    Data(#[from] DataError),
}

/// Fitting settings shared by every candidate of a search.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainSpec {
    pub epochs: usize,
    pub batch_size: usize,
    /// Trailing fraction of the training frames held out for validation loss.
    pub validation_split: f64,
    pub learning_rate: f64,
    /// Stop after this many epochs without validation improvement.
    pub patience: Option<usize>,
    pub clip_norm: f64,
}

impl Default for TrainSpec {
    fn default() -> Self {
        Self {
            epochs: 50,
            batch_size: 256,
            validation_split: 0.15,
            learning_rate: 1e-3,
            patience: None,
            clip_norm: 5.0,
        }
    }
}

impl TrainSpec {
    pub fn validate(&self) -> MLResult<()> {
        if self.epochs == 0 || self.batch_size == 0 {
            return Err(MLError::ConfigurationError(
                "epochs and batch_size must be positive".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.validation_split) {
            return Err(MLError::ConfigurationError(format!(
                "validation_split must be in [0, 1), got {}",
                self.validation_split
            )));
        }
        if !(self.learning_rate > 0.0) {
            return Err(MLError::ConfigurationError(
                "learning_rate must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct EvalSpec {
    pub mc_samples: usize,
}

impl Default for EvalSpec {
    fn default() -> Self {
        Self { mc_samples: 50 }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub train_loss: Vec<f64>,
    pub val_loss: Vec<f64>,
    pub best_epoch: Option<usize>,
    pub stopped_early: bool,
    pub training_time: Duration,
}

impl TrainingHistory {
    pub fn epochs_run(&self) -> usize {
        self.train_loss.len()
    }

    pub fn final_train_loss(&self) -> Option<f64> {
        self.train_loss.last().copied()
    }
}

/// Monte Carlo forecast over ordinal bins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Forecast {
    pub n_bins: usize,
    /// Per channel, `horizon x n_bins` predictive distribution averaged over draws.
    pub pdf: Vec<na::DMatrix<f64>>,
    /// Per channel, `mc_samples x horizon` sampled bin indices.
    pub draws: Vec<na::DMatrix<f64>>,
}

impl Forecast {
    pub fn horizon(&self) -> usize {
        self.pdf.first().map(|p| p.nrows()).unwrap_or(0)
    }

    pub fn mc_samples(&self) -> usize {
        self.draws.first().map(|d| d.nrows()).unwrap_or(0)
    }

    pub fn n_channels(&self) -> usize {
        self.pdf.len()
    }

    /// Draw `index` as an ordinal series (`horizon x channels`).
    pub fn draw(&self, index: usize) -> TimeSeries {
        let values = na::DMatrix::from_fn(self.horizon(), self.n_channels(), |t, c| {
            self.draws[c][(index, t)]
        });
        TimeSeries::ordinal(values, self.n_bins)
    }
}
