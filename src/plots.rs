//! Diagnostic SVG plots of Monte Carlo forecasts

use crate::data::TimeSeries;
use crate::validation::{cumulative_nll, dtw_path, ForecastEvaluation, ValidationError};
use plotters::prelude::*;
use std::error::Error;
use std::ops::Range;
use std::path::{Path, PathBuf};

const SIZE: (u32, u32) = (1200, 600);
const MAX_ALIGNMENT_LINKS: usize = 200;

#[derive(Debug, thiserror::Error)]
pub enum PlotError {
    #[error("Drawing failed: {0}")]
    Drawing(String),
    #[error("Nothing to plot: {0}")]
    Empty(String),
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

pub type PlotResult<T> = Result<T, PlotError>;

fn drawing(e: Box<dyn Error>) -> PlotError {
    PlotError::Drawing(e.to_string())
}

/// A plot to render for every evaluated candidate.
#[derive(Debug, Clone)]
pub enum PlotRequest {
    Median2Std { ground_truth: TimeSeries },
    CumNll { binned_ground_truth: TimeSeries },
    Like { binned_ground_truth: Option<TimeSeries> },
    MedianDtwAlignment { ground_truth: TimeSeries },
}

impl PlotRequest {
    pub fn name(&self) -> &'static str {
        match self {
            PlotRequest::Median2Std { .. } => "plot_median_2std",
            PlotRequest::CumNll { .. } => "plot_cum_nll",
            PlotRequest::Like { .. } => "plot_like",
            PlotRequest::MedianDtwAlignment { .. } => "plot_median_dtw_alignment",
        }
    }

    /// Writes `<dir>/<prefix>_<name>.svg` and returns its path.
    pub fn render(
        &self,
        evaluation: &ForecastEvaluation,
        dir: &Path,
        prefix: &str,
    ) -> PlotResult<PathBuf> {
        let path = dir.join(format!("{}_{}.svg", prefix, self.name()));
        match self {
            PlotRequest::Median2Std { ground_truth } => {
                plot_median_2std(&path, evaluation, ground_truth)?
            }
            PlotRequest::CumNll { binned_ground_truth } => {
                plot_cum_nll(&path, evaluation, binned_ground_truth)?
            }
            PlotRequest::Like { binned_ground_truth } => {
                plot_like(&path, evaluation, binned_ground_truth.as_ref())?
            }
            PlotRequest::MedianDtwAlignment { ground_truth } => {
                plot_median_dtw_alignment(&path, evaluation, ground_truth)?
            }
        }
        Ok(path)
    }
}

fn padded_range(values: impl Iterator<Item = f64>) -> Range<f64> {
    let (lo, hi) = values
        .filter(|v| v.is_finite())
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| (lo.min(v), hi.max(v)));
    if !lo.is_finite() || !hi.is_finite() || (hi - lo).abs() < 1e-9 {
        let centre = if lo.is_finite() { lo } else { 0.0 };
        return (centre - 1.0)..(centre + 1.0);
    }
    let pad = 0.05 * (hi - lo);
    (lo - pad)..(hi + pad)
}

fn check_horizon(evaluation: &ForecastEvaluation, truth: Option<&TimeSeries>) -> PlotResult<usize> {
    let horizon = evaluation.horizon();
    if horizon == 0 {
        return Err(PlotError::Empty("forecast has no steps".to_string()));
    }
    if let Some(truth) = truth {
        if truth.len() != horizon {
            return Err(PlotError::Empty(format!(
                "ground truth has {} steps, forecast {}",
                truth.len(),
                horizon
            )));
        }
    }
    Ok(horizon)
}

fn points(values: &[f64]) -> Vec<(f64, f64)> {
    values.iter().enumerate().map(|(t, &v)| (t as f64, v)).collect()
}

/// Median forecast with a two standard deviation band against the ground truth.
pub fn plot_median_2std(
    path: &Path,
    evaluation: &ForecastEvaluation,
    ground_truth: &TimeSeries,
) -> PlotResult<()> {
    check_horizon(evaluation, Some(ground_truth))?;
    let median = evaluation.median();
    let std = evaluation.std();
    let upper: Vec<f64> = median.iter().zip(&std).map(|(m, s)| m + 2.0 * s).collect();
    let lower: Vec<f64> = median.iter().zip(&std).map(|(m, s)| m - 2.0 * s).collect();
    draw_median_2std(path, &median, &upper, &lower, &ground_truth.channel(0)).map_err(drawing)
}

fn draw_median_2std(
    path: &Path,
    median: &[f64],
    upper: &[f64],
    lower: &[f64],
    truth: &[f64],
) -> Result<(), Box<dyn Error>> {
    let y_range = padded_range(upper.iter().chain(lower).chain(truth).copied());

    let root = SVGBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Median forecast \u{b1} 2 std", ("sans-serif", 22))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0f64..median.len() as f64, y_range)?;

    chart
        .configure_mesh()
        .x_desc("step")
        .y_desc("value")
        .draw()?;

    let mut band = points(upper);
    band.extend(points(lower).into_iter().rev());
    chart
        .draw_series(std::iter::once(Polygon::new(band, BLUE.mix(0.2))))?
        .label("\u{b1}2 std")
        .legend(|(x, y)| Rectangle::new([(x, y - 5), (x + 20, y + 5)], BLUE.mix(0.2).filled()));
    chart
        .draw_series(LineSeries::new(points(median), &BLUE))?
        .label("median")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));
    chart
        .draw_series(LineSeries::new(points(truth), &BLACK))?
        .label("ground truth")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLACK));

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}

/// Cumulative negative log-likelihood of the binned ground truth.
pub fn plot_cum_nll(
    path: &Path,
    evaluation: &ForecastEvaluation,
    binned_ground_truth: &TimeSeries,
) -> PlotResult<()> {
    check_horizon(evaluation, Some(binned_ground_truth))?;
    let curve = cumulative_nll(&evaluation.forecast.pdf[0], &binned_ground_truth.bins(0))?;
    draw_cum_nll(path, &curve).map_err(drawing)
}

fn draw_cum_nll(path: &Path, curve: &[f64]) -> Result<(), Box<dyn Error>> {
    let y_range = padded_range(curve.iter().copied().chain(std::iter::once(0.0)));

    let root = SVGBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Cumulative NLL", ("sans-serif", 22))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0f64..curve.len() as f64, y_range)?;

    chart
        .configure_mesh()
        .x_desc("step")
        .y_desc("cumulative NLL")
        .draw()?;
    chart.draw_series(LineSeries::new(points(curve), &RED))?;
    root.present()?;
    Ok(())
}

/// Heat map of the predictive pdf, with the true bins overlaid when given.
pub fn plot_like(
    path: &Path,
    evaluation: &ForecastEvaluation,
    binned_ground_truth: Option<&TimeSeries>,
) -> PlotResult<()> {
    check_horizon(evaluation, binned_ground_truth)?;
    let pdf = &evaluation.forecast.pdf[0];
    let truth = binned_ground_truth.map(|t| t.bins(0));
    draw_like(path, pdf, truth.as_deref()).map_err(drawing)
}

fn draw_like(
    path: &Path,
    pdf: &nalgebra::DMatrix<f64>,
    truth: Option<&[usize]>,
) -> Result<(), Box<dyn Error>> {
    let (horizon, bins) = pdf.shape();
    let peak = pdf.max().max(1e-12);

    let root = SVGBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("Predictive distribution", ("sans-serif", 22))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0f64..horizon as f64, 0f64..bins as f64)?;

    chart
        .configure_mesh()
        .disable_mesh()
        .x_desc("step")
        .y_desc("bin")
        .draw()?;

    let cells = (0..horizon).flat_map(|t| (0..bins).map(move |k| (t, k)));
    chart.draw_series(
        cells
            .filter(|&(t, k)| pdf[(t, k)] / peak > 1e-3)
            .map(|(t, k)| {
                let (x, y) = (t as f64, k as f64);
                Rectangle::new([(x, y), (x + 1.0, y + 1.0)], BLUE.mix(pdf[(t, k)] / peak).filled())
            }),
    )?;

    if let Some(truth) = truth {
        chart.draw_series(LineSeries::new(
            truth.iter().enumerate().map(|(t, &b)| (t as f64 + 0.5, b as f64 + 0.5)),
            &RED,
        ))?;
    }
    root.present()?;
    Ok(())
}

/// Median forecast and ground truth joined by their DTW alignment.
pub fn plot_median_dtw_alignment(
    path: &Path,
    evaluation: &ForecastEvaluation,
    ground_truth: &TimeSeries,
) -> PlotResult<()> {
    check_horizon(evaluation, Some(ground_truth))?;
    let median = evaluation.median();
    let truth = ground_truth.channel(0);
    let (_, alignment) = dtw_path(&median, &truth)?;
    draw_dtw_alignment(path, &median, &truth, &alignment).map_err(drawing)
}

fn draw_dtw_alignment(
    path: &Path,
    median: &[f64],
    truth: &[f64],
    alignment: &[(usize, usize)],
) -> Result<(), Box<dyn Error>> {
    let y_range = padded_range(median.iter().chain(truth).copied());

    let root = SVGBackend::new(path, SIZE).into_drawing_area();
    root.fill(&WHITE)?;
    let mut chart = ChartBuilder::on(&root)
        .caption("DTW alignment of the median forecast", ("sans-serif", 22))
        .margin(10)
        .x_label_area_size(40)
        .y_label_area_size(60)
        .build_cartesian_2d(0f64..median.len().max(truth.len()) as f64, y_range)?;

    chart
        .configure_mesh()
        .x_desc("step")
        .y_desc("value")
        .draw()?;

    let stride = (alignment.len() / MAX_ALIGNMENT_LINKS).max(1);
    for &(i, j) in alignment.iter().step_by(stride) {
        chart.draw_series(std::iter::once(PathElement::new(
            vec![(i as f64, median[i]), (j as f64, truth[j])],
            BLACK.mix(0.2),
        )))?;
    }

    chart
        .draw_series(LineSeries::new(points(median), &BLUE))?
        .label("median")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLUE));
    chart
        .draw_series(LineSeries::new(points(truth), &BLACK))?
        .label("ground truth")
        .legend(|(x, y)| PathElement::new(vec![(x, y), (x + 20, y)], BLACK));

    chart
        .configure_series_labels()
        .background_style(WHITE.mix(0.8))
        .border_style(BLACK)
        .draw()?;
    root.present()?;
    Ok(())
}
