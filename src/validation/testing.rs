use super::metrics::{
    attractor_distance, cumulative_nll, dtw_distance, mean_trajectory, median_trajectory, mse,
    nll, std_trajectory, Metric,
};
use super::{ValidationError, ValidationResult};
use crate::data::{TimeSeries, Transform};
use crate::ml::Forecast;
use nalgebra as na;

/// A forecast together with its draws decoded back to continuous values.
#[derive(Debug, Clone)]
pub struct ForecastEvaluation {
    pub forecast: Forecast,
    /// `mc_samples x horizon` decoded draws of the first channel.
    pub continuous_draws: na::DMatrix<f64>,
    pub attractor_lag: usize,
    pub attractor_dims: usize,
}

impl ForecastEvaluation {
    /// Decodes every draw through `decoder`'s inverse, usually the fitted quantiser.
    pub fn new(
        forecast: Forecast,
        decoder: &dyn Transform,
        attractor_lag: usize,
        attractor_dims: usize,
    ) -> ValidationResult<Self> {
        let (mc, horizon) = (forecast.mc_samples(), forecast.horizon());
        if mc == 0 || horizon == 0 {
            return Err(ValidationError::ValidationError(
                "forecast has no draws".to_string(),
            ));
        }

        let mut continuous_draws: na::DMatrix<f64> = na::DMatrix::zeros(mc, horizon);
        for draw in 0..mc {
            let decoded = decoder.inverse(&forecast.draw(draw))?;
            continuous_draws
                .row_mut(draw)
                .copy_from(&decoded.values.column(0).transpose());
        }

        Ok(Self {
            forecast,
            continuous_draws,
            attractor_lag,
            attractor_dims,
        })
    }

    pub fn horizon(&self) -> usize {
        self.continuous_draws.ncols()
    }

    pub fn median(&self) -> Vec<f64> {
        median_trajectory(&self.continuous_draws)
    }

    pub fn mean(&self) -> Vec<f64> {
        mean_trajectory(&self.continuous_draws)
    }

    pub fn std(&self) -> Vec<f64> {
        std_trajectory(&self.continuous_draws)
    }
}

/// A metric paired with the ground truth it is scored against.
#[derive(Debug, Clone)]
pub struct TestDefinition {
    metric: Metric,
    ground_truth: TimeSeries,
}

impl TestDefinition {
    pub fn new(metric: Metric, ground_truth: TimeSeries) -> ValidationResult<Self> {
        if ground_truth.is_empty() {
            return Err(ValidationError::ValidationError(format!(
                "empty ground truth for {}",
                metric
            )));
        }
        if metric.requires_ordinal() != ground_truth.is_ordinal() {
            let expected = if metric.requires_ordinal() { "ordinal" } else { "continuous" };
            return Err(ValidationError::ValidationError(format!(
                "{} needs {} ground truth",
                metric, expected
            )));
        }
        Ok(Self {
            metric,
            ground_truth,
        })
    }

    pub fn metric(&self) -> Metric {
        self.metric
    }

    pub fn horizon(&self) -> usize {
        self.ground_truth.len()
    }

    /// Lower is better for every metric.
    pub fn evaluate(&self, evaluation: &ForecastEvaluation) -> ValidationResult<f64> {
        if evaluation.horizon() != self.horizon() {
            return Err(ValidationError::ShapeMismatch(format!(
                "{}: forecast horizon {} but ground truth has {} steps",
                self.metric,
                evaluation.horizon(),
                self.horizon()
            )));
        }

        match self.metric {
            Metric::Mse => mse(&evaluation.mean(), &self.ground_truth.channel(0)),
            Metric::Nll => {
                let mut total = 0.0;
                for c in 0..self.likelihood_channels(evaluation)? {
                    total += nll(&evaluation.forecast.pdf[c], &self.ground_truth.bins(c))?;
                }
                Ok(total)
            }
            Metric::CumNll => {
                let mut total = 0.0;
                for c in 0..self.likelihood_channels(evaluation)? {
                    let curve =
                        cumulative_nll(&evaluation.forecast.pdf[c], &self.ground_truth.bins(c))?;
                    total += curve.last().copied().unwrap_or(0.0);
                }
                Ok(total)
            }
            Metric::MedianDtwDistance => {
                dtw_distance(&evaluation.median(), &self.ground_truth.channel(0))
            }
            Metric::MedianAttractorDistance => attractor_distance(
                &evaluation.median(),
                &self.ground_truth.channel(0),
                evaluation.attractor_lag,
                evaluation.attractor_dims,
            ),
        }
    }

    fn likelihood_channels(&self, evaluation: &ForecastEvaluation) -> ValidationResult<usize> {
        let channels = self.ground_truth.n_channels();
        if channels > evaluation.forecast.n_channels() {
            return Err(ValidationError::ShapeMismatch(format!(
                "ground truth has {} channels, forecast {}",
                channels,
                evaluation.forecast.n_channels()
            )));
        }
        if self.ground_truth.n_bins() != Some(evaluation.forecast.n_bins) {
            return Err(ValidationError::ShapeMismatch(format!(
                "ground truth binned into {:?} bins, forecast into {}",
                self.ground_truth.n_bins(),
                evaluation.forecast.n_bins
            )));
        }
        Ok(channels)
    }
}
