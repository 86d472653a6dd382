use super::{Forecast, MLResult, TrainSpec, TrainingHistory};
use crate::data::TimeSeries;
use crate::search::ParamSet;

/// A forecasting model family the experiment can grid-search over.
pub trait ForecastStrategy: Send + Sized {
    /// Directory name used for this family's experiments.
    const NAME: &'static str;

    fn from_params(params: &ParamSet, seed: u64) -> MLResult<Self>;

    /// Fits on ordinal training frames.
    fn fit(&mut self, frames: &[TimeSeries], spec: &TrainSpec) -> MLResult<TrainingHistory>;

    /// Samples `horizon` steps following the last `context_length()` rows of `context`.
    fn predict(
        &self,
        context: &TimeSeries,
        horizon: usize,
        mc_samples: usize,
        seed: u64,
    ) -> MLResult<Forecast>;

    /// Rows of history a prediction consumes.
    fn context_length(&self) -> usize;
}
