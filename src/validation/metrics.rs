use super::{ValidationError, ValidationResult};
use crate::utils::statistics;
use nalgebra as na;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Probabilities are floored here before taking logs.
pub const PROB_FLOOR: f64 = 1e-12;

/// Scores a candidate is selected on. Every metric is minimised.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Metric {
    Mse,
    Nll,
    CumNll,
    MedianDtwDistance,
    MedianAttractorDistance,
}

impl Metric {
    pub fn all() -> [Metric; 5] {
        [
            Metric::Mse,
            Metric::Nll,
            Metric::CumNll,
            Metric::MedianDtwDistance,
            Metric::MedianAttractorDistance,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Mse => "mse",
            Metric::Nll => "nll",
            Metric::CumNll => "cum_nll",
            Metric::MedianDtwDistance => "median_dtw_distance",
            Metric::MedianAttractorDistance => "median_attractor_distance",
        }
    }

    /// Likelihood metrics score the predictive pdf against binned truth.
    pub fn requires_ordinal(&self) -> bool {
        matches!(self, Metric::Nll | Metric::CumNll)
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Metric::all()
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| ValidationError::UnknownMetric(s.to_string()))
    }
}

fn check_lengths(a: usize, b: usize, what: &str) -> ValidationResult<()> {
    if a == 0 || b == 0 {
        return Err(ValidationError::ValidationError(format!("{} of an empty series", what)));
    }
    if a != b {
        return Err(ValidationError::ShapeMismatch(format!(
            "{}: prediction has {} steps, ground truth {}",
            what, a, b
        )));
    }
    Ok(())
}

pub fn mse(prediction: &[f64], truth: &[f64]) -> ValidationResult<f64> {
    check_lengths(prediction.len(), truth.len(), "mse")?;
    let total: f64 = prediction
        .iter()
        .zip(truth)
        .map(|(p, t)| (p - t).powi(2))
        .sum();
    Ok(total / truth.len() as f64)
}

/// Per-step negative log-likelihood of the true bins under `pdf` (`horizon x bins`).
fn step_nll(pdf: &na::DMatrix<f64>, bins: &[usize]) -> ValidationResult<Vec<f64>> {
    check_lengths(pdf.nrows(), bins.len(), "nll")?;
    bins.iter()
        .enumerate()
        .map(|(t, &bin)| {
            if bin >= pdf.ncols() {
                return Err(ValidationError::ShapeMismatch(format!(
                    "bin {} at step {} outside the {} predicted bins",
                    bin,
                    t,
                    pdf.ncols()
                )));
            }
            Ok(-pdf[(t, bin)].max(PROB_FLOOR).ln())
        })
        .collect()
}

/// Mean negative log-likelihood per step.
pub fn nll(pdf: &na::DMatrix<f64>, bins: &[usize]) -> ValidationResult<f64> {
    let steps = step_nll(pdf, bins)?;
    Ok(statistics::mean(&steps))
}

/// Running sum of the per-step negative log-likelihood.
pub fn cumulative_nll(pdf: &na::DMatrix<f64>, bins: &[usize]) -> ValidationResult<Vec<f64>> {
    let steps = step_nll(pdf, bins)?;
    Ok(steps
        .iter()
        .scan(0.0, |total, v| {
            *total += v;
            Some(*total)
        })
        .collect())
}

/// Dynamic time warping distance with absolute-difference cost and no window.
pub fn dtw_distance(a: &[f64], b: &[f64]) -> ValidationResult<f64> {
    if a.is_empty() || b.is_empty() {
        return Err(ValidationError::ValidationError("dtw of an empty series".to_string()));
    }

    let mut previous = vec![f64::INFINITY; b.len() + 1];
    let mut current = vec![f64::INFINITY; b.len() + 1];
    previous[0] = 0.0;

    for &x in a {
        current[0] = f64::INFINITY;
        for (j, &y) in b.iter().enumerate() {
            let best = previous[j].min(previous[j + 1]).min(current[j]);
            current[j + 1] = (x - y).abs() + best;
        }
        std::mem::swap(&mut previous, &mut current);
    }
    Ok(previous[b.len()])
}

/// DTW distance and the optimal alignment as `(index in a, index in b)` pairs.
pub fn dtw_path(a: &[f64], b: &[f64]) -> ValidationResult<(f64, Vec<(usize, usize)>)> {
    if a.is_empty() || b.is_empty() {
        return Err(ValidationError::ValidationError("dtw of an empty series".to_string()));
    }

    let (n, m) = (a.len(), b.len());
    let mut cost = na::DMatrix::from_element(n + 1, m + 1, f64::INFINITY);
    cost[(0, 0)] = 0.0;
    for i in 1..=n {
        for j in 1..=m {
            let best = cost[(i - 1, j - 1)].min(cost[(i - 1, j)]).min(cost[(i, j - 1)]);
            cost[(i, j)] = (a[i - 1] - b[j - 1]).abs() + best;
        }
    }

    let mut path = vec![(n - 1, m - 1)];
    let (mut i, mut j) = (n, m);
    while i > 1 || j > 1 {
        if i == 1 {
            j -= 1;
        } else if j == 1 {
            i -= 1;
        } else {
            let diagonal = cost[(i - 1, j - 1)];
            let up = cost[(i - 1, j)];
            let left = cost[(i, j - 1)];
            if diagonal <= up && diagonal <= left {
                i -= 1;
                j -= 1;
            } else if up <= left {
                i -= 1;
            } else {
                j -= 1;
            }
        }
        path.push((i - 1, j - 1));
    }
    path.reverse();

    Ok((cost[(n, m)], path))
}

/// Delay embedding: row `k` is `(x[s+k], x[s+k-lag], ..., x[s+k-(dims-1)*lag])`
/// with `s = (dims-1)*lag`.
pub fn delay_embedding(x: &[f64], lag: usize, dims: usize) -> ValidationResult<na::DMatrix<f64>> {
    if lag == 0 || dims == 0 {
        return Err(ValidationError::ValidationError(
            "delay embedding needs positive lag and dims".to_string(),
        ));
    }
    let warmup = (dims - 1) * lag;
    if x.len() <= warmup {
        return Err(ValidationError::ValidationError(format!(
            "series of length {} too short for a {}-dimensional embedding with lag {}",
            x.len(),
            dims,
            lag
        )));
    }
    Ok(na::DMatrix::from_fn(x.len() - warmup, dims, |k, d| {
        x[warmup + k - d * lag]
    }))
}

fn mean_nearest_distance(from: &na::DMatrix<f64>, to: &na::DMatrix<f64>) -> f64 {
    let total: f64 = from
        .row_iter()
        .map(|p| {
            to.row_iter()
                .map(|q| (&p - &q).norm())
                .fold(f64::INFINITY, f64::min)
        })
        .sum();
    total / from.nrows() as f64
}

/// Symmetric mean nearest-neighbour distance between the delay embeddings
/// of `a` and `b`.
pub fn attractor_distance(a: &[f64], b: &[f64], lag: usize, dims: usize) -> ValidationResult<f64> {
    let ea = delay_embedding(a, lag, dims)?;
    let eb = delay_embedding(b, lag, dims)?;
    Ok(0.5 * (mean_nearest_distance(&ea, &eb) + mean_nearest_distance(&eb, &ea)))
}

/// Pointwise median over draws (`mc_samples x horizon`).
pub fn median_trajectory(draws: &na::DMatrix<f64>) -> Vec<f64> {
    draws
        .column_iter()
        .map(|col| statistics::median(&col.iter().copied().collect::<Vec<_>>()))
        .collect()
}

pub fn mean_trajectory(draws: &na::DMatrix<f64>) -> Vec<f64> {
    draws.column_iter().map(|col| col.mean()).collect()
}

/// Pointwise sample standard deviation over draws.
pub fn std_trajectory(draws: &na::DMatrix<f64>) -> Vec<f64> {
    draws
        .column_iter()
        .map(|col| statistics::std_dev(&col.iter().copied().collect::<Vec<_>>()))
        .collect()
}
