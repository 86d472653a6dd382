//! Time-series data handling
//!
//! Loading raw sequences, the preprocessing transforms that turn them into
//! ordinal (binned) sequences, and the windowed train/validation/test dataset
//! the forecasting models are fitted on.

pub mod dataset;
pub mod loader;
pub mod series;
pub mod synthetic;
pub mod transforms;

pub use dataset::{Dataset, Split};
pub use loader::{load_series, write_series};
pub use series::{SeriesKind, TimeSeries};
pub use synthetic::{mackey_glass, MackeyGlassParams};
pub use transforms::{
    AttractorStacker, Quantiser, Selector, Standardiser, Transform, WhiteCorrupter,
};

pub type DataResult<T> = Result<T, DataError>;

#[derive(Debug, thiserror::Error)]
pub enum DataError {
    #[error("Invalid data format: {0}")]
    InvalidFormat(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),

    #[error("Missing column: {0}")]
    MissingColumn(String),

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Transform '{0}' used before it was fitted")]
    NotFitted(&'static str),

    #[error("Transform '{0}' cannot be inverted")]
    NotInvertible(&'static str),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
