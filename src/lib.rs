//! Ordinal time-series forecasting
//!
//! Real-valued series are standardised and quantised into ordinal bins, an
//! encoder/decoder LSTM ("Mordred") learns a categorical distribution over
//! the next bin, and Monte Carlo forecasts are scored with likelihood and
//! distance metrics. A grid search picks the best hyperparameters per metric
//! on validation data and re-evaluates them on held-out test data.

pub mod config;
pub mod data;
pub mod error;
pub mod ml;
pub mod pipeline;
pub mod plots;
pub mod search;
pub mod utils;
pub mod validation;

pub use config::ExperimentConfig;
pub use error::{Result, TsfError};
pub use pipeline::{run_search, SearchReport};
