//! Preprocessing transforms
//!
//! Every transform is fitted on the training split only and then applied
//! unchanged to every split, so validation and test data never leak into the
//! fitted statistics.

use super::{DataError, DataResult, SeriesKind, TimeSeries};
use nalgebra as na;
use rand::prelude::*;
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

pub trait Transform: Send + Sync + Debug {
    fn name(&self) -> &'static str;

    fn fit(&mut self, _train: &TimeSeries) -> DataResult<()> {
        Ok(())
    }

    fn apply(&self, series: &TimeSeries) -> DataResult<TimeSeries>;

    fn inverse(&self, _series: &TimeSeries) -> DataResult<TimeSeries> {
        Err(DataError::NotInvertible(self.name()))
    }

    /// Transforms that only make sense as training-time augmentation.
    fn training_only(&self) -> bool {
        false
    }

    /// Turns continuous values into bin indices.
    fn produces_ordinal(&self) -> bool {
        false
    }

    /// Model hyperparameters this transform dictates, e.g. `ordinal_bins`.
    fn optional_params(&self) -> Vec<(&'static str, usize)> {
        Vec::new()
    }
}

fn require_continuous(name: &'static str, series: &TimeSeries) -> DataResult<()> {
    if series.is_ordinal() {
        return Err(DataError::InvalidFormat(format!(
            "{} expects a continuous series",
            name
        )));
    }
    Ok(())
}

fn require_channels(name: &'static str, series: &TimeSeries, expected: usize) -> DataResult<()> {
    if series.n_channels() != expected {
        return Err(DataError::ShapeMismatch(format!(
            "{} was fitted on {} channels, got {}",
            name,
            expected,
            series.n_channels()
        )));
    }
    Ok(())
}

/// Zero-mean, unit-variance scaling per channel.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Standardiser {
    means: Vec<f64>,
    stds: Vec<f64>,
}

impl Standardiser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn means(&self) -> &[f64] {
        &self.means
    }

    pub fn stds(&self) -> &[f64] {
        &self.stds
    }

    fn ensure_fitted(&self) -> DataResult<()> {
        if self.means.is_empty() {
            return Err(DataError::NotFitted(self.name()));
        }
        Ok(())
    }
}

impl Transform for Standardiser {
    fn name(&self) -> &'static str {
        "standardiser"
    }

    fn fit(&mut self, train: &TimeSeries) -> DataResult<()> {
        require_continuous(self.name(), train)?;
        if train.len() < 2 {
            return Err(DataError::InsufficientData(
                "standardiser needs at least 2 training points".to_string(),
            ));
        }

        let n = train.len() as f64;
        let mut means = Vec::with_capacity(train.n_channels());
        let mut stds = Vec::with_capacity(train.n_channels());
        for column in train.values.column_iter() {
            let mean = column.sum() / n;
            let variance = column.iter().map(|&x| (x - mean).powi(2)).sum::<f64>() / n;
            let std = variance.sqrt();
            if std <= f64::EPSILON {
                return Err(DataError::InvalidValue(
                    "cannot standardise a constant training series".to_string(),
                ));
            }
            means.push(mean);
            stds.push(std);
        }

        self.means = means;
        self.stds = stds;
        Ok(())
    }

    fn apply(&self, series: &TimeSeries) -> DataResult<TimeSeries> {
        self.ensure_fitted()?;
        require_continuous(self.name(), series)?;
        require_channels(self.name(), series, self.means.len())?;

        let values = na::DMatrix::from_fn(series.len(), series.n_channels(), |t, c| {
            (series.values[(t, c)] - self.means[c]) / self.stds[c]
        });
        Ok(TimeSeries::continuous(values))
    }

    fn inverse(&self, series: &TimeSeries) -> DataResult<TimeSeries> {
        self.ensure_fitted()?;
        require_continuous(self.name(), series)?;
        require_channels(self.name(), series, self.means.len())?;

        let values = na::DMatrix::from_fn(series.len(), series.n_channels(), |t, c| {
            series.values[(t, c)] * self.stds[c] + self.means[c]
        });
        Ok(TimeSeries::continuous(values))
    }
}

/// Equal-width binning of each channel into `n_bins` ordinal classes.
///
/// The fitted range is the training range widened by `delta` on both sides.
/// Values outside it fall into the edge bins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quantiser {
    pub n_bins: usize,
    pub delta: f64,
    ranges: Vec<(f64, f64)>,
}

impl Default for Quantiser {
    fn default() -> Self {
        Self::new(85, 1e-3)
    }
}

impl Quantiser {
    pub fn new(n_bins: usize, delta: f64) -> Self {
        Self {
            n_bins,
            delta,
            ranges: Vec::new(),
        }
    }

    fn ensure_fitted(&self) -> DataResult<()> {
        if self.ranges.is_empty() {
            return Err(DataError::NotFitted(self.name()));
        }
        Ok(())
    }

    pub fn bin_width(&self, channel: usize) -> f64 {
        let (lo, hi) = self.ranges[channel];
        (hi - lo) / self.n_bins as f64
    }

    pub fn bin_of(&self, value: f64, channel: usize) -> usize {
        let (lo, _) = self.ranges[channel];
        let raw = ((value - lo) / self.bin_width(channel)).floor();
        raw.clamp(0.0, (self.n_bins - 1) as f64) as usize
    }

    pub fn bin_center(&self, bin: usize, channel: usize) -> f64 {
        let (lo, _) = self.ranges[channel];
        lo + (bin as f64 + 0.5) * self.bin_width(channel)
    }
}

impl Transform for Quantiser {
    fn name(&self) -> &'static str {
        "quantiser"
    }

    fn fit(&mut self, train: &TimeSeries) -> DataResult<()> {
        require_continuous(self.name(), train)?;
        if self.n_bins < 2 {
            return Err(DataError::InvalidValue(format!(
                "quantiser needs at least 2 bins, got {}",
                self.n_bins
            )));
        }
        if train.is_empty() {
            return Err(DataError::InsufficientData(
                "quantiser fitted on an empty series".to_string(),
            ));
        }

        self.ranges = train
            .values
            .column_iter()
            .map(|column| (column.min() - self.delta, column.max() + self.delta))
            .collect();
        if self.ranges.iter().any(|(lo, hi)| hi <= lo) {
            self.ranges.clear();
            return Err(DataError::InvalidValue(
                "quantiser range collapsed; use a positive delta".to_string(),
            ));
        }
        Ok(())
    }

    fn apply(&self, series: &TimeSeries) -> DataResult<TimeSeries> {
        self.ensure_fitted()?;
        require_continuous(self.name(), series)?;
        require_channels(self.name(), series, self.ranges.len())?;

        let values = na::DMatrix::from_fn(series.len(), series.n_channels(), |t, c| {
            self.bin_of(series.values[(t, c)], c) as f64
        });
        Ok(TimeSeries::ordinal(values, self.n_bins))
    }

    fn inverse(&self, series: &TimeSeries) -> DataResult<TimeSeries> {
        self.ensure_fitted()?;
        if series.kind != (SeriesKind::Ordinal { n_bins: self.n_bins }) {
            return Err(DataError::InvalidFormat(format!(
                "quantiser inverse expects {} ordinal bins",
                self.n_bins
            )));
        }
        require_channels(self.name(), series, self.ranges.len())?;

        let values = na::DMatrix::from_fn(series.len(), series.n_channels(), |t, c| {
            self.bin_center(series.bin(t, c), c)
        });
        Ok(TimeSeries::continuous(values))
    }

    fn produces_ordinal(&self) -> bool {
        true
    }

    fn optional_params(&self) -> Vec<(&'static str, usize)> {
        vec![("ordinal_bins", self.n_bins)]
    }
}

/// Additive Gaussian white noise, used as training-set augmentation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhiteCorrupter {
    pub sigma: f64,
    pub seed: u64,
}

impl Default for WhiteCorrupter {
    fn default() -> Self {
        Self {
            sigma: 1e-3,
            seed: 0,
        }
    }
}

impl WhiteCorrupter {
    pub fn new(sigma: f64, seed: u64) -> Self {
        Self { sigma, seed }
    }
}

impl Transform for WhiteCorrupter {
    fn name(&self) -> &'static str {
        "white_corrupter"
    }

    fn apply(&self, series: &TimeSeries) -> DataResult<TimeSeries> {
        require_continuous(self.name(), series)?;
        let noise = Normal::new(0.0, self.sigma)
            .map_err(|e| DataError::InvalidValue(format!("noise sigma: {}", e)))?;
        let mut rng = StdRng::seed_from_u64(self.seed);
        let values = series.values.map(|x| x + noise.sample(&mut rng));
        Ok(TimeSeries::continuous(values))
    }

    fn training_only(&self) -> bool {
        true
    }
}

/// Delay embedding of a univariate series: channel `k` holds `x(t - k * lag)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttractorStacker {
    pub lag: usize,
    pub dims: usize,
}

impl AttractorStacker {
    pub fn new(lag: usize, dims: usize) -> Self {
        Self { lag, dims }
    }

    /// Rows lost at the start of every stacked series.
    pub fn warmup(&self) -> usize {
        (self.dims - 1) * self.lag
    }
}

impl Transform for AttractorStacker {
    fn name(&self) -> &'static str {
        "attractor_stacker"
    }

    fn fit(&mut self, train: &TimeSeries) -> DataResult<()> {
        if self.lag == 0 || self.dims < 2 {
            return Err(DataError::InvalidValue(
                "attractor stacking needs lag >= 1 and dims >= 2".to_string(),
            ));
        }
        require_channels(self.name(), train, 1)
    }

    fn apply(&self, series: &TimeSeries) -> DataResult<TimeSeries> {
        require_channels(self.name(), series, 1)?;
        let warmup = self.warmup();
        if series.len() <= warmup {
            return Err(DataError::InsufficientData(format!(
                "attractor stacking needs more than {} points",
                warmup
            )));
        }

        let rows = series.len() - warmup;
        let values = na::DMatrix::from_fn(rows, self.dims, |r, k| {
            series.values[(r + warmup - k * self.lag, 0)]
        });
        Ok(TimeSeries {
            values,
            kind: series.kind,
        })
    }

    fn inverse(&self, series: &TimeSeries) -> DataResult<TimeSeries> {
        require_channels(self.name(), series, self.dims)?;
        Ok(TimeSeries {
            values: series.values.columns(0, 1).into_owned(),
            kind: series.kind,
        })
    }

    fn optional_params(&self) -> Vec<(&'static str, usize)> {
        vec![("n_channels", self.dims)]
    }
}

/// Picks the window `[start, start + horizon)`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Selector {
    pub start: usize,
    pub horizon: usize,
}

impl Selector {
    pub fn new(start: usize, horizon: usize) -> Self {
        Self { start, horizon }
    }
}

impl Transform for Selector {
    fn name(&self) -> &'static str {
        "selector"
    }

    fn apply(&self, series: &TimeSeries) -> DataResult<TimeSeries> {
        let end = self.start + self.horizon;
        if end > series.len() {
            return Err(DataError::InsufficientData(format!(
                "selector window {}..{} exceeds series length {}",
                self.start,
                end,
                series.len()
            )));
        }
        series.slice(self.start, end)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn ramp(n: usize) -> TimeSeries {
        TimeSeries::univariate((0..n).map(|v| v as f64).collect())
    }

    #[test]
    fn test_standardiser_round_trip() {
        let train = ramp(11);
        let mut stand = Standardiser::new();
        stand.fit(&train).unwrap();
        assert_relative_eq!(stand.means()[0], 5.0);

        let scaled = stand.apply(&train).unwrap();
        let mean = scaled.values.column(0).sum() / 11.0;
        assert_relative_eq!(mean, 0.0, epsilon = 1e-12);

        let restored = stand.inverse(&scaled).unwrap();
        assert_relative_eq!(restored.values, train.values, epsilon = 1e-9);
    }

    #[test]
    fn test_standardiser_requires_fit_and_variance() {
        let stand = Standardiser::new();
        assert!(matches!(stand.apply(&ramp(3)), Err(DataError::NotFitted(_))));

        let mut stand = Standardiser::new();
        let flat = TimeSeries::univariate(vec![2.0; 10]);
        assert!(stand.fit(&flat).is_err());
    }

    #[test]
    fn test_quantiser_bins_and_centres() {
        let train = ramp(101);
        let mut quant = Quantiser::new(10, 1e-9);
        quant.fit(&train).unwrap();

        let binned = quant.apply(&train).unwrap();
        assert_eq!(binned.n_bins(), Some(10));
        assert_eq!(binned.bin(0, 0), 0);
        assert_eq!(binned.bin(100, 0), 9);
        assert_eq!(binned.bin(55, 0), 5);

        let outside = TimeSeries::univariate(vec![-50.0, 500.0]);
        let clamped = quant.apply(&outside).unwrap();
        assert_eq!(clamped.bins(0), vec![0, 9]);

        let centres = quant.inverse(&binned).unwrap();
        for t in 0..train.len() {
            assert!((centres.values[(t, 0)] - train.values[(t, 0)]).abs() <= quant.bin_width(0));
        }
    }

    #[test]
    fn test_quantiser_rejects_ordinal_input() {
        let mut quant = Quantiser::default();
        quant.fit(&ramp(20)).unwrap();
        let binned = quant.apply(&ramp(20)).unwrap();
        assert!(quant.apply(&binned).is_err());
        assert_eq!(quant.optional_params(), vec![("ordinal_bins", 85)]);
    }

    #[test]
    fn test_white_corrupter_is_seeded() {
        let series = ramp(50);
        let noise = WhiteCorrupter::new(0.1, 3);
        let a = noise.apply(&series).unwrap();
        let b = noise.apply(&series).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, series);
        assert!(noise.training_only());
    }

    #[test]
    fn test_attractor_stacker_layout() {
        let mut stacker = AttractorStacker::new(2, 3);
        let series = ramp(10);
        stacker.fit(&series).unwrap();
        let stacked = stacker.apply(&series).unwrap();
        assert_eq!(stacked.len(), 6);
        assert_eq!(stacked.n_channels(), 3);
        // row 0 corresponds to t = 4
        assert_eq!(stacked.values[(0, 0)], 4.0);
        assert_eq!(stacked.values[(0, 1)], 2.0);
        assert_eq!(stacked.values[(0, 2)], 0.0);
        assert_eq!(
            stacker.inverse(&stacked).unwrap().channel(0),
            vec![4.0, 5.0, 6.0, 7.0, 8.0, 9.0]
        );
    }

    #[test]
    fn test_selector_window() {
        let selector = Selector::new(3, 4);
        let window = selector.apply(&ramp(10)).unwrap();
        assert_eq!(window.channel(0), vec![3.0, 4.0, 5.0, 6.0]);
        assert!(Selector::new(8, 4).apply(&ramp(10)).is_err());
    }
}
