//! Hyperparameter search
//!
//! Grids of candidate parameter sets, the session directory layout results
//! are written into, and the experiment that fits, scores and selects
//! candidates per metric.

pub mod experiment;
pub mod grid;
pub mod session;

pub use experiment::{
    load_best_models, save_best_models, BestModels, CandidateResult, Experiment,
    ExperimentSettings, ModelSelection,
};
pub use grid::{cartesian, ParamSet, ParamValue, SearchSpace};
pub use session::Session;

use crate::data::DataError;
use crate::ml::MLError;
use crate::plots::PlotError;
use crate::validation::ValidationError;
use std::io;
use thiserror::Error;

pub type ExperimentResult<T> = Result<T, ExperimentError>;

#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error("Invalid experiment setup: {0}")]
    InvalidSetup(String),

    #[error("No candidate could be evaluated: {0}")]
    NoCandidates(String),

    #[error("Data error: {0}")]
    Data(#[from] DataError),

    #[error("Model error: {0}")]
    Model(#[from] MLError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Plot error: {0}")]
    Plot(#[from] PlotError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}
