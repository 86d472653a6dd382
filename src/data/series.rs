use super::{DataError, DataResult};
use nalgebra as na;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SeriesKind {
    Continuous,
    /// Values are integral bin indices in `0..n_bins`.
    Ordinal { n_bins: usize },
}

/// A (possibly multi-channel) sequence, one row per time step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSeries {
    pub values: na::DMatrix<f64>,
    pub kind: SeriesKind,
}

impl TimeSeries {
    pub fn continuous(values: na::DMatrix<f64>) -> Self {
        Self {
            values,
            kind: SeriesKind::Continuous,
        }
    }

    pub fn ordinal(values: na::DMatrix<f64>, n_bins: usize) -> Self {
        Self {
            values,
            kind: SeriesKind::Ordinal { n_bins },
        }
    }

    pub fn univariate(values: Vec<f64>) -> Self {
        let n = values.len();
        Self::continuous(na::DMatrix::from_vec(n, 1, values))
    }

    pub fn len(&self) -> usize {
        self.values.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.values.nrows() == 0
    }

    pub fn n_channels(&self) -> usize {
        self.values.ncols()
    }

    pub fn is_ordinal(&self) -> bool {
        matches!(self.kind, SeriesKind::Ordinal { .. })
    }

    pub fn n_bins(&self) -> Option<usize> {
        match self.kind {
            SeriesKind::Ordinal { n_bins } => Some(n_bins),
            SeriesKind::Continuous => None,
        }
    }

    /// Rows `[start, end)` as a new series of the same kind.
    pub fn slice(&self, start: usize, end: usize) -> DataResult<TimeSeries> {
        if start > end || end > self.len() {
            return Err(DataError::InsufficientData(format!(
                "cannot slice rows {}..{} from a series of length {}",
                start,
                end,
                self.len()
            )));
        }
        Ok(Self {
            values: self.values.rows(start, end - start).into_owned(),
            kind: self.kind,
        })
    }

    pub fn channel(&self, channel: usize) -> Vec<f64> {
        self.values.column(channel).iter().copied().collect()
    }

    /// Bin index at row `t`, channel `c` of an ordinal series.
    pub fn bin(&self, t: usize, c: usize) -> usize {
        self.values[(t, c)].round().max(0.0) as usize
    }

    pub fn bins(&self, channel: usize) -> Vec<usize> {
        (0..self.len()).map(|t| self.bin(t, channel)).collect()
    }
}
