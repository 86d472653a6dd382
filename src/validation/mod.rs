//! Forecast scoring
//!
//! Distance and likelihood metrics between Monte Carlo forecasts and ground
//! truth, and the test definitions an experiment evaluates candidates with.

pub mod metrics;
pub mod testing;

pub use metrics::{
    attractor_distance, cumulative_nll, delay_embedding, dtw_distance, dtw_path,
    mean_trajectory, median_trajectory, mse, nll, std_trajectory, Metric,
};
pub use testing::{ForecastEvaluation, TestDefinition};

use crate::data::DataError;
use thiserror::Error;

pub type ValidationResult<T> = Result<T, ValidationError>;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Unknown metric: {0}")]
    UnknownMetric(String),
    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),
    #[error("Data error: {0}")]
    Data(#[from] DataError),
}
