use super::{DataError, DataResult, TimeSeries, Transform};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Split {
    Train,
    Val,
    Test,
}

impl Split {
    pub fn as_str(&self) -> &'static str {
        match self {
            Split::Train => "train",
            Split::Val => "val",
            Split::Test => "test",
        }
    }
}

impl fmt::Display for Split {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A series split contiguously into train / validation / test parts, with a
/// preprocessing pipeline fitted on the training part.
#[derive(Debug)]
pub struct Dataset {
    frame_length: usize,
    raw: BTreeMap<Split, TimeSeries>,
    processed: BTreeMap<Split, TimeSeries>,
    steps: Vec<Box<dyn Transform>>,
}

impl Dataset {
    pub fn new(
        series: TimeSeries,
        frame_length: usize,
        p_val: f64,
        p_test: f64,
        mut steps: Vec<Box<dyn Transform>>,
    ) -> DataResult<Self> {
        if !(0.0..1.0).contains(&p_val) || !(0.0..1.0).contains(&p_test) || p_val + p_test >= 1.0 {
            return Err(DataError::InvalidValue(format!(
                "split fractions p_val={} p_test={} must be in [0, 1) and sum below 1",
                p_val, p_test
            )));
        }
        if frame_length == 0 {
            return Err(DataError::InvalidValue("frame length must be positive".to_string()));
        }

        let n = series.len();
        let n_val = (n as f64 * p_val).floor() as usize;
        let n_test = (n as f64 * p_test).floor() as usize;
        let n_train = n - n_val - n_test;

        let mut raw = BTreeMap::new();
        raw.insert(Split::Train, series.slice(0, n_train)?);
        raw.insert(Split::Val, series.slice(n_train, n_train + n_val)?);
        raw.insert(Split::Test, series.slice(n_train + n_val, n)?);

        // Fit each step on the output of the previous ones, applying training-only
        // steps so later statistics see the augmented data.
        let mut train = raw[&Split::Train].clone();
        for step in steps.iter_mut() {
            step.fit(&train)?;
            train = step.apply(&train)?;
            debug!("Fitted preprocessing step {}", step.name());
        }

        let mut processed = BTreeMap::new();
        for (split, series) in raw.iter() {
            let mut current = series.clone();
            if current.is_empty() {
                processed.insert(*split, current);
                continue;
            }
            for step in steps.iter() {
                if step.training_only() && *split != Split::Train {
                    continue;
                }
                current = step.apply(&current)?;
            }
            processed.insert(*split, current);
        }

        let train_len = processed[&Split::Train].len();
        if train_len < frame_length {
            return Err(DataError::InsufficientData(format!(
                "training split has {} points, frames need {}",
                train_len, frame_length
            )));
        }

        info!(
            "Dataset split into {} train / {} val / {} test points, frame length {}",
            n_train, n_val, n_test, frame_length
        );

        Ok(Self {
            frame_length,
            raw,
            processed,
            steps,
        })
    }

    pub fn frame_length(&self) -> usize {
        self.frame_length
    }

    pub fn raw(&self, split: Split) -> &TimeSeries {
        &self.raw[&split]
    }

    pub fn processed(&self, split: Split) -> &TimeSeries {
        &self.processed[&split]
    }

    /// Every window of `frame_length` consecutive processed rows.
    pub fn frames(&self, split: Split) -> DataResult<Vec<TimeSeries>> {
        let series = self.processed(split);
        if series.len() < self.frame_length {
            return Ok(Vec::new());
        }
        (0..=series.len() - self.frame_length)
            .map(|start| series.slice(start, start + self.frame_length))
            .collect()
    }

    pub fn step(&self, name: &str) -> Option<&dyn Transform> {
        self.steps
            .iter()
            .find(|step| step.name() == name)
            .map(|step| step.as_ref())
    }

    /// The step that maps continuous values to bins; its inverse decodes model samples.
    pub fn ordinal_decoder(&self) -> Option<&dyn Transform> {
        self.steps
            .iter()
            .rev()
            .find(|step| step.produces_ordinal())
            .map(|step| step.as_ref())
    }

    /// Hyperparameters implied by the preprocessing, e.g. `ordinal_bins`, `n_channels`.
    pub fn optional_params(&self) -> BTreeMap<String, usize> {
        self.steps
            .iter()
            .flat_map(|step| step.optional_params())
            .map(|(name, value)| (name.to_string(), value))
            .collect()
    }

    /// SHA-256 over the frame length and every raw and processed split, as hex.
    /// Two datasets with the same digest train and score models identically.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update((self.frame_length as u64).to_le_bytes());
        for series in self.raw.values().chain(self.processed.values()) {
            hasher.update((series.len() as u64).to_le_bytes());
            hasher.update((series.n_channels() as u64).to_le_bytes());
            hasher.update((series.n_bins().unwrap_or(0) as u64).to_le_bytes());
            for value in series.values.iter() {
                hasher.update(value.to_bits().to_le_bytes());
            }
        }
        format!("{:x}", hasher.finalize())
    }

    /// Applies an explicit list of fitted transforms to the raw split.
    pub fn apply_partial_preprocessing(
        &self,
        split: Split,
        steps: &[&dyn Transform],
    ) -> DataResult<TimeSeries> {
        let mut current = self.raw(split).clone();
        for step in steps {
            current = step.apply(&current)?;
        }
        Ok(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{Quantiser, Selector, Standardiser, WhiteCorrupter};

    fn sine(n: usize) -> TimeSeries {
        TimeSeries::univariate((0..n).map(|t| (t as f64 * 0.3).sin()).collect())
    }

    fn pipeline() -> Vec<Box<dyn Transform>> {
        vec![Box::new(Standardiser::new()), Box::new(Quantiser::new(16, 1e-3))]
    }

    #[test]
    fn test_contiguous_split() {
        let dataset = Dataset::new(sine(100), 10, 0.15, 0.15, pipeline()).unwrap();
        assert_eq!(dataset.raw(Split::Train).len(), 70);
        assert_eq!(dataset.raw(Split::Val).len(), 15);
        assert_eq!(dataset.raw(Split::Test).len(), 15);
        assert_eq!(dataset.raw(Split::Val).values[(0, 0)], sine(100).values[(70, 0)]);
        assert!(dataset.processed(Split::Test).is_ordinal());
    }

    #[test]
    fn test_frames_and_optional_params() {
        let dataset = Dataset::new(sine(100), 10, 0.15, 0.15, pipeline()).unwrap();
        let frames = dataset.frames(Split::Train).unwrap();
        assert_eq!(frames.len(), 61);
        assert!(frames.iter().all(|f| f.len() == 10));
        assert_eq!(dataset.optional_params().get("ordinal_bins"), Some(&16));
        assert!(dataset.ordinal_decoder().is_some());
        assert!(dataset.frames(Split::Val).unwrap().len() == 6);
    }

    #[test]
    fn test_partial_preprocessing_matches_full_pipeline() {
        let dataset = Dataset::new(sine(200), 20, 0.2, 0.2, pipeline()).unwrap();
        let selector = Selector::new(5, 10);
        let stand = dataset.step("standardiser").unwrap();
        let quant = dataset.step("quantiser").unwrap();

        let ordinal = dataset
            .apply_partial_preprocessing(Split::Val, &[&selector, stand, quant])
            .unwrap();
        let expected = dataset.processed(Split::Val).slice(5, 15).unwrap();
        assert_eq!(ordinal, expected);

        let continuous = dataset
            .apply_partial_preprocessing(Split::Val, &[&selector, stand])
            .unwrap();
        assert!(!continuous.is_ordinal());
        assert_eq!(continuous.len(), 10);
    }

    #[test]
    fn test_noise_only_touches_training_split() {
        let steps: Vec<Box<dyn Transform>> = vec![
            Box::new(Standardiser::new()),
            Box::new(WhiteCorrupter::new(0.5, 1)),
        ];
        let dataset = Dataset::new(sine(100), 10, 0.2, 0.2, steps).unwrap();
        let stand = dataset.step("standardiser").unwrap();
        let clean_val = dataset.apply_partial_preprocessing(Split::Val, &[stand]).unwrap();
        assert_eq!(&clean_val, dataset.processed(Split::Val));

        let clean_train = dataset.apply_partial_preprocessing(Split::Train, &[stand]).unwrap();
        assert_ne!(&clean_train, dataset.processed(Split::Train));
    }

    #[test]
    fn test_digest_tracks_data_and_preprocessing() {
        let base = Dataset::new(sine(100), 10, 0.15, 0.15, pipeline()).unwrap();
        let same = Dataset::new(sine(100), 10, 0.15, 0.15, pipeline()).unwrap();
        assert_eq!(base.digest(), same.digest());
        assert_eq!(base.digest().len(), 64);

        let longer = Dataset::new(sine(101), 10, 0.15, 0.15, pipeline()).unwrap();
        assert_ne!(base.digest(), longer.digest());

        let coarser = vec![
            Box::new(Standardiser::new()) as Box<dyn Transform>,
            Box::new(Quantiser::new(8, 1e-3)),
        ];
        let coarser = Dataset::new(sine(100), 10, 0.15, 0.15, coarser).unwrap();
        assert_ne!(base.digest(), coarser.digest());
    }

    #[test]
    fn test_invalid_fractions_and_short_series() {
        assert!(Dataset::new(sine(100), 10, 0.6, 0.5, pipeline()).is_err());
        assert!(Dataset::new(sine(20), 30, 0.1, 0.1, pipeline()).is_err());
    }
}
