//! Mordred: ordinal sequence-to-sequence forecaster
//!
//! An encoder LSTM reads `lookback` one-hot encoded bins. Its final state
//! initialises a decoder LSTM that is fed the decoder seed (the last observed
//! bin) and then, during training, the previous true bin. A dense layer maps
//! each decoder output to one softmax over `ordinal_bins` per channel.
//!
//! Forecasts are Monte Carlo: every draw samples its own bin at each step and
//! feeds it back, with dropout left active so draws also vary over weights.

use super::lstm::{xavier_init, LstmLayer, LstmState};
use super::optim::{clip_global_norm, Adam};
use super::strategy::ForecastStrategy;
use super::{Forecast, MLError, MLResult, TrainSpec, TrainingHistory};
use crate::data::TimeSeries;
use crate::search::ParamSet;
use nalgebra as na;
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info};

pub const DECODER_SEED_LENGTH: usize = 1;
const PROB_FLOOR: f64 = 1e-12;

const KNOWN_PARAMS: [&str; 7] = [
    "units",
    "lookback",
    "horizon",
    "ordinal_bins",
    "n_channels",
    "dropout_rate",
    "lam",
];

/// Indices into the parameter list of the matrices that receive L2 decay.
const REGULARISED: [usize; 5] = [0, 1, 3, 4, 6];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MordredParams {
    pub units: usize,
    pub lookback: usize,
    pub horizon: usize,
    pub ordinal_bins: usize,
    pub n_channels: usize,
    pub dropout_rate: f64,
    /// L2 penalty on weight matrices.
    pub lam: f64,
}

impl MordredParams {
    /// `units`, `lookback`, `horizon` and `ordinal_bins` are required;
    /// `n_channels` defaults to 1, `dropout_rate` and `lam` to 0.
    pub fn from_param_set(params: &ParamSet) -> MLResult<Self> {
        if let Some(unknown) = params.names().find(|name| !KNOWN_PARAMS.contains(name)) {
            return Err(MLError::ConfigurationError(format!(
                "unknown Mordred hyperparameter '{}'",
                unknown
            )));
        }

        let count = |name: &str| -> MLResult<usize> {
            let value = params.get(name).ok_or_else(|| {
                MLError::ConfigurationError(format!("missing Mordred hyperparameter '{}'", name))
            })?;
            value.as_usize().ok_or_else(|| {
                MLError::ConfigurationError(format!(
                    "'{}' must be a non-negative integer, got {}",
                    name, value
                ))
            })
        };

        let n_channels = match params.get("n_channels") {
            Some(value) => value.as_usize().ok_or_else(|| {
                MLError::ConfigurationError(format!(
                    "'n_channels' must be an integer, got {}",
                    value
                ))
            })?,
            None => 1,
        };

        let parsed = Self {
            units: count("units")?,
            lookback: count("lookback")?,
            horizon: count("horizon")?,
            ordinal_bins: count("ordinal_bins")?,
            n_channels,
            dropout_rate: params.get("dropout_rate").map(|v| v.as_f64()).unwrap_or(0.0),
            lam: params.get("lam").map(|v| v.as_f64()).unwrap_or(0.0),
        };
        parsed.validate()?;
        Ok(parsed)
    }

    pub fn validate(&self) -> MLResult<()> {
        if self.units == 0 || self.lookback == 0 || self.horizon == 0 || self.n_channels == 0 {
            return Err(MLError::ConfigurationError(
                "units, lookback, horizon and n_channels must be positive".to_string(),
            ));
        }
        if self.ordinal_bins < 2 {
            return Err(MLError::ConfigurationError(
                "ordinal_bins must be at least 2".to_string(),
            ));
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return Err(MLError::ConfigurationError(format!(
                "dropout_rate must be in [0, 1), got {}",
                self.dropout_rate
            )));
        }
        if !(self.lam >= 0.0) {
            return Err(MLError::ConfigurationError(format!(
                "lam must be non-negative, got {}",
                self.lam
            )));
        }
        Ok(())
    }

    pub fn input_size(&self) -> usize {
        self.n_channels * self.ordinal_bins
    }

    pub fn frame_length(&self) -> usize {
        self.lookback + self.horizon + DECODER_SEED_LENGTH
    }
}

#[derive(Debug, Clone)]
struct Weights {
    encoder: LstmLayer,
    decoder: LstmLayer,
    w_out: na::DMatrix<f64>,
    b_out: na::DMatrix<f64>,
}

impl Weights {
    fn params(&self) -> Vec<&na::DMatrix<f64>> {
        vec![
            &self.encoder.w_ih,
            &self.encoder.w_hh,
            &self.encoder.bias,
            &self.decoder.w_ih,
            &self.decoder.w_hh,
            &self.decoder.bias,
            &self.w_out,
            &self.b_out,
        ]
    }

    fn params_mut(&mut self) -> Vec<&mut na::DMatrix<f64>> {
        vec![
            &mut self.encoder.w_ih,
            &mut self.encoder.w_hh,
            &mut self.encoder.bias,
            &mut self.decoder.w_ih,
            &mut self.decoder.w_hh,
            &mut self.decoder.bias,
            &mut self.w_out,
            &mut self.b_out,
        ]
    }
}

#[derive(Debug, Clone)]
pub struct Mordred {
    params: MordredParams,
    weights: Weights,
    seed: u64,
    fitted: bool,
}

impl Mordred {
    pub fn new(params: MordredParams, seed: u64) -> MLResult<Self> {
        params.validate()?;
        let mut rng = StdRng::seed_from_u64(seed);
        let input = params.input_size();
        let weights = Weights {
            encoder: LstmLayer::new(input, params.units, &mut rng),
            decoder: LstmLayer::new(input, params.units, &mut rng),
            w_out: xavier_init(params.units, input, &mut rng),
            b_out: na::DMatrix::zeros(1, input),
        };
        Ok(Self {
            params,
            weights,
            seed,
            fitted: false,
        })
    }

    fn check_series(&self, series: &TimeSeries, min_len: usize, what: &str) -> MLResult<()> {
        if series.n_bins() != Some(self.params.ordinal_bins) {
            return Err(MLError::ConfigurationError(format!(
                "{} must be ordinal with {} bins, got {:?}",
                what, self.params.ordinal_bins, series.kind
            )));
        }
        if series.n_channels() != self.params.n_channels {
            return Err(MLError::ConfigurationError(format!(
                "{} has {} channels, model expects {}",
                what,
                series.n_channels(),
                self.params.n_channels
            )));
        }
        if series.len() < min_len {
            return Err(MLError::InsufficientData(format!(
                "{} has {} rows, need at least {}",
                what,
                series.len(),
                min_len
            )));
        }
        Ok(())
    }

    /// One-hot rows for time step `t` of every series in `batch`.
    fn one_hot(&self, batch: &[&TimeSeries], t: usize) -> na::DMatrix<f64> {
        let bins = self.params.ordinal_bins;
        let mut x = na::DMatrix::zeros(batch.len(), self.params.input_size());
        for (row, series) in batch.iter().enumerate() {
            for c in 0..self.params.n_channels {
                let bin = series.bin(t, c).min(bins - 1);
                x[(row, c * bins + bin)] = 1.0;
            }
        }
        x
    }

    fn dropout_mask(&self, rng: &mut StdRng, rows: usize) -> Option<na::DMatrix<f64>> {
        let rate = self.params.dropout_rate;
        if rate <= 0.0 {
            return None;
        }
        let keep = 1.0 / (1.0 - rate);
        Some(na::DMatrix::from_fn(rows, self.params.units, |_, _| {
            if rng.gen::<f64>() < rate {
                0.0
            } else {
                keep
            }
        }))
    }

    /// Dense layer plus per-channel softmax. Returns the (masked) hidden input
    /// and the probabilities.
    fn head(
        &self,
        h: &na::DMatrix<f64>,
        mask: Option<&na::DMatrix<f64>>,
    ) -> (na::DMatrix<f64>, na::DMatrix<f64>) {
        let hidden = match mask {
            Some(m) => h.component_mul(m),
            None => h.clone(),
        };
        let mut logits = &hidden * &self.weights.w_out;
        for col in 0..logits.ncols() {
            logits.column_mut(col).add_scalar_mut(self.weights.b_out[(0, col)]);
        }

        let bins = self.params.ordinal_bins;
        for row in 0..logits.nrows() {
            for c in 0..self.params.n_channels {
                let offset = c * bins;
                let max = (offset..offset + bins)
                    .map(|k| logits[(row, k)])
                    .fold(f64::NEG_INFINITY, f64::max);
                let mut total = 0.0;
                for k in offset..offset + bins {
                    let e = (logits[(row, k)] - max).exp();
                    logits[(row, k)] = e;
                    total += e;
                }
                for k in offset..offset + bins {
                    logits[(row, k)] /= total;
                }
            }
        }
        (hidden, logits)
    }

    fn l2_penalty(&self) -> f64 {
        if self.params.lam <= 0.0 {
            return 0.0;
        }
        let params = self.weights.params();
        self.params.lam * REGULARISED.iter().map(|&i| params[i].norm_squared()).sum::<f64>()
    }

    /// Teacher-forced cross-entropy of a batch without dropout.
    fn batch_loss(&self, batch: &[&TimeSeries]) -> f64 {
        let p = &self.params;
        let mut state = LstmState::zeros(batch.len(), p.units);
        for t in 0..p.lookback {
            let step = self.weights.encoder.step(&self.one_hot(batch, t), &state);
            state = LstmState { h: step.h, c: step.c };
        }

        let mut loss = 0.0;
        for t in 0..p.horizon {
            let step = self.weights.decoder.step(&self.one_hot(batch, p.lookback + t), &state);
            let (_, probs) = self.head(&step.h, None);
            loss += self.cross_entropy(batch, &probs, p.lookback + t + 1);
            state = LstmState { h: step.h, c: step.c };
        }
        loss / (batch.len() * p.horizon) as f64
    }

    fn cross_entropy(
        &self,
        batch: &[&TimeSeries],
        probs: &na::DMatrix<f64>,
        target_row: usize,
    ) -> f64 {
        let bins = self.params.ordinal_bins;
        let mut loss = 0.0;
        for (row, series) in batch.iter().enumerate() {
            for c in 0..self.params.n_channels {
                let target = series.bin(target_row, c).min(bins - 1);
                loss -= probs[(row, c * bins + target)].max(PROB_FLOOR).ln();
            }
        }
        loss
    }

    /// Loss and gradients of one mini-batch, in `Weights::params` order.
    fn backprop(&self, batch: &[&TimeSeries], rng: &mut StdRng) -> (f64, Vec<na::DMatrix<f64>>) {
        let p = &self.params;
        let w = &self.weights;
        let b = batch.len();
        let bins = p.ordinal_bins;

        let enc_inputs: Vec<_> = (0..p.lookback).map(|t| self.one_hot(batch, t)).collect();
        let dec_inputs: Vec<_> = (0..p.horizon)
            .map(|t| self.one_hot(batch, p.lookback + t))
            .collect();

        let enc = w.encoder.forward(&enc_inputs, LstmState::zeros(b, p.units));
        let dec = w.decoder.forward(&dec_inputs, enc.final_state());

        let scale = 1.0 / (b * p.horizon) as f64;
        let mut d_w_out: na::DMatrix<f64> = na::DMatrix::zeros(p.units, p.input_size());
        let mut d_b_out: na::DMatrix<f64> = na::DMatrix::zeros(1, p.input_size());
        let mut d_hidden = Vec::with_capacity(p.horizon);
        let mut loss = 0.0;

        for (t, step) in dec.steps.iter().enumerate() {
            let mask = self.dropout_mask(rng, b);
            let (hidden, mut d_logits) = self.head(&step.h, mask.as_ref());
            loss += self.cross_entropy(batch, &d_logits, p.lookback + t + 1);

            for (row, series) in batch.iter().enumerate() {
                for c in 0..p.n_channels {
                    let target = series.bin(p.lookback + t + 1, c).min(bins - 1);
                    d_logits[(row, c * bins + target)] -= 1.0;
                }
            }
            d_logits *= scale;

            d_w_out += hidden.tr_mul(&d_logits);
            for col in 0..d_logits.ncols() {
                d_b_out[(0, col)] += d_logits.column(col).sum();
            }

            let mut d_h = &d_logits * w.w_out.transpose();
            if let Some(m) = &mask {
                d_h.component_mul_assign(m);
            }
            d_hidden.push(d_h);
        }

        let (dec_grads, d_initial) =
            w.decoder
                .backward(&dec, Some(d_hidden.as_slice()), LstmState::zeros(b, p.units));
        let (enc_grads, _) = w.encoder.backward(&enc, None, d_initial);

        let mut grads = vec![
            enc_grads.w_ih,
            enc_grads.w_hh,
            enc_grads.bias,
            dec_grads.w_ih,
            dec_grads.w_hh,
            dec_grads.bias,
            d_w_out,
            d_b_out,
        ];

        if p.lam > 0.0 {
            let params = w.params();
            for &i in REGULARISED.iter() {
                grads[i] += params[i] * (2.0 * p.lam);
            }
        }

        (loss * scale + self.l2_penalty(), grads)
    }

    fn validation_loss(&self, frames: &[TimeSeries], batch_size: usize) -> f64 {
        let mut total = 0.0;
        for chunk in frames.chunks(batch_size) {
            let batch: Vec<&TimeSeries> = chunk.iter().collect();
            total += self.batch_loss(&batch) * batch.len() as f64;
        }
        total / frames.len() as f64 + self.l2_penalty()
    }

    pub fn fit(&mut self, frames: &[TimeSeries], spec: &TrainSpec) -> MLResult<TrainingHistory> {
        spec.validate()?;
        if frames.is_empty() {
            return Err(MLError::InsufficientData("no training frames".to_string()));
        }
        let frame_length = self.params.frame_length();
        for frame in frames {
            self.check_series(frame, frame_length, "training frame")?;
        }

        let n_val = (frames.len() as f64 * spec.validation_split).floor() as usize;
        let n_train = frames.len() - n_val;
        if n_train == 0 {
            return Err(MLError::InsufficientData(
                "validation_split leaves no training frames".to_string(),
            ));
        }
        let (train, val) = frames.split_at(n_train);

        let mut rng = StdRng::seed_from_u64(self.seed.wrapping_add(1));
        let mut optimizer = Adam::new(spec.learning_rate);
        let mut order: Vec<usize> = (0..n_train).collect();

        let mut history = TrainingHistory::default();
        let mut best_val = f64::INFINITY;
        let mut best_weights: Option<Weights> = None;
        let mut since_best = 0;
        let started = Instant::now();

        for epoch in 0..spec.epochs {
            order.shuffle(&mut rng);
            let mut epoch_loss = 0.0;

            for chunk in order.chunks(spec.batch_size) {
                let batch: Vec<&TimeSeries> = chunk.iter().map(|&i| &train[i]).collect();
                let (loss, mut grads) = self.backprop(&batch, &mut rng);
                if !loss.is_finite() {
                    return Err(MLError::TrainingFailed(format!(
                        "non-finite loss in epoch {}",
                        epoch
                    )));
                }
                clip_global_norm(&mut grads, spec.clip_norm);
                optimizer.step(self.weights.params_mut(), &grads);
                epoch_loss += loss * batch.len() as f64;
            }

            let train_loss = epoch_loss / n_train as f64;
            history.train_loss.push(train_loss);

            if val.is_empty() {
                debug!("Epoch {}: train loss = {:.6}", epoch, train_loss);
                continue;
            }

            let val_loss = self.validation_loss(val, spec.batch_size);
            history.val_loss.push(val_loss);
            debug!(
                "Epoch {}: train loss = {:.6}, val loss = {:.6}",
                epoch, train_loss, val_loss
            );

            if val_loss < best_val {
                best_val = val_loss;
                history.best_epoch = Some(epoch);
                since_best = 0;
                if spec.patience.is_some() {
                    best_weights = Some(self.weights.clone());
                }
            } else if let Some(patience) = spec.patience {
                since_best += 1;
                if since_best >= patience {
                    history.stopped_early = true;
                    break;
                }
            }
        }

        if let Some(best) = best_weights {
            self.weights = best;
        }
        history.training_time = started.elapsed();
        self.fitted = true;

        info!(
            "Trained Mordred (units={}, dropout={}, lam={:e}) for {} epochs in {:.1}s",
            self.params.units,
            self.params.dropout_rate,
            self.params.lam,
            history.epochs_run(),
            history.training_time.as_secs_f64()
        );
        Ok(history)
    }

    pub fn predict(
        &self,
        context: &TimeSeries,
        horizon: usize,
        mc_samples: usize,
        seed: u64,
    ) -> MLResult<Forecast> {
        if !self.fitted {
            return Err(MLError::PredictionFailed("model has not been fitted".to_string()));
        }
        if horizon == 0 || mc_samples == 0 {
            return Err(MLError::PredictionFailed(
                "horizon and mc_samples must be positive".to_string(),
            ));
        }
        let p = &self.params;
        let context_length = p.lookback + DECODER_SEED_LENGTH;
        self.check_series(context, context_length, "prediction context")?;

        let window = context.slice(context.len() - context_length, context.len())?;
        let mut rng = StdRng::seed_from_u64(seed);

        let mut state = LstmState::zeros(1, p.units);
        for t in 0..p.lookback {
            let step = self.weights.encoder.step(&self.one_hot(&[&window], t), &state);
            state = LstmState { h: step.h, c: step.c };
        }
        let mut state = state.broadcast_row(0, mc_samples);

        let seed_rows = vec![&window; mc_samples];
        let mut input = self.one_hot(&seed_rows, p.lookback);

        let bins = p.ordinal_bins;
        let mut pdf: Vec<na::DMatrix<f64>> = vec![na::DMatrix::zeros(horizon, bins); p.n_channels];
        let mut draws: Vec<na::DMatrix<f64>> =
            vec![na::DMatrix::zeros(mc_samples, horizon); p.n_channels];

        for t in 0..horizon {
            let step = self.weights.decoder.step(&input, &state);
            let mask = self.dropout_mask(&mut rng, mc_samples);
            let (_, probs) = self.head(&step.h, mask.as_ref());

            let mut next: na::DMatrix<f64> = na::DMatrix::zeros(mc_samples, p.input_size());
            for c in 0..p.n_channels {
                let offset = c * bins;
                for k in 0..bins {
                    pdf[c][(t, k)] = probs.column(offset + k).sum() / mc_samples as f64;
                }
                for row in 0..mc_samples {
                    let bin = sample_bin(&probs, row, offset, bins, rng.gen::<f64>());
                    draws[c][(row, t)] = bin as f64;
                    next[(row, offset + bin)] = 1.0;
                }
            }

            state = LstmState { h: step.h, c: step.c };
            input = next;
        }

        Ok(Forecast {
            n_bins: bins,
            pdf,
            draws,
        })
    }
}

/// Inverse-CDF sample from the softmax block starting at `offset`.
fn sample_bin(probs: &na::DMatrix<f64>, row: usize, offset: usize, bins: usize, u: f64) -> usize {
    let mut cumulative = 0.0;
    for k in 0..bins {
        cumulative += probs[(row, offset + k)];
        if u < cumulative {
            return k;
        }
    }
    bins - 1
}

impl ForecastStrategy for Mordred {
    const NAME: &'static str = "mordred";

    fn from_params(params: &ParamSet, seed: u64) -> MLResult<Self> {
        Mordred::new(MordredParams::from_param_set(params)?, seed)
    }

    fn fit(&mut self, frames: &[TimeSeries], spec: &TrainSpec) -> MLResult<TrainingHistory> {
        Mordred::fit(self, frames, spec)
    }

    fn predict(
        &self,
        context: &TimeSeries,
        horizon: usize,
        mc_samples: usize,
        seed: u64,
    ) -> MLResult<Forecast> {
        Mordred::predict(self, context, horizon, mc_samples, seed)
    }

    fn context_length(&self) -> usize {
        self.params.lookback + DECODER_SEED_LENGTH
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn cyclic(len: usize, bins: usize) -> TimeSeries {
        let values = na::DMatrix::from_fn(len, 1, |t, _| (t % bins) as f64);
        TimeSeries::ordinal(values, bins)
    }

    fn frames(series: &TimeSeries, frame_length: usize) -> Vec<TimeSeries> {
        (0..=series.len() - frame_length)
            .map(|s| series.slice(s, s + frame_length).unwrap())
            .collect()
    }

    fn small_params(dropout_rate: f64, lam: f64) -> MordredParams {
        MordredParams {
            units: 6,
            lookback: 4,
            horizon: 3,
            ordinal_bins: 4,
            n_channels: 1,
            dropout_rate,
            lam,
        }
    }

    #[test]
    fn test_params_from_param_set() {
        let params = ParamSet::new()
            .with("units", 16usize)
            .with("lookback", 10usize)
            .with("horizon", 5usize)
            .with("ordinal_bins", 20usize)
            .with("dropout_rate", 0.25)
            .with("lam", 1e-6);
        let parsed = MordredParams::from_param_set(&params).unwrap();
        assert_eq!(parsed.n_channels, 1);
        assert_eq!(parsed.frame_length(), 16);
        assert_eq!(parsed.input_size(), 20);

        let unknown = params.clone().with("learning_rate", 0.1);
        assert!(MordredParams::from_param_set(&unknown).is_err());

        let missing = ParamSet::new().with("units", 16usize);
        assert!(MordredParams::from_param_set(&missing).is_err());

        let bad_dropout = params.with("dropout_rate", 1.5);
        assert!(MordredParams::from_param_set(&bad_dropout).is_err());
    }

    #[test]
    fn test_backprop_matches_finite_differences() {
        let mut model = Mordred::new(small_params(0.0, 1e-3), 11).unwrap();
        let series = cyclic(20, 4);
        let all = frames(&series, model.params.frame_length());
        let batch: Vec<&TimeSeries> = all.iter().take(3).collect();

        let mut rng = StdRng::seed_from_u64(0);
        let (loss, grads) = model.backprop(&batch, &mut rng);
        let direct = model.batch_loss(&batch) + model.l2_penalty();
        assert!((loss - direct).abs() < 1e-10);

        let eps = 1e-6;
        let checks: [(usize, usize, usize); 5] =
            [(0, 1, 3), (1, 2, 10), (4, 0, 5), (6, 3, 2), (7, 0, 1)];
        for &(index, r, c) in checks.iter() {
            let original = model.weights.params()[index][(r, c)];
            model.weights.params_mut()[index][(r, c)] = original + eps;
            let up = model.batch_loss(&batch) + model.l2_penalty();
            model.weights.params_mut()[index][(r, c)] = original - eps;
            let down = model.batch_loss(&batch) + model.l2_penalty();
            model.weights.params_mut()[index][(r, c)] = original;

            let numeric = (up - down) / (2.0 * eps);
            assert!(
                (numeric - grads[index][(r, c)]).abs() < 1e-6,
                "param {} [{},{}]: numeric {} vs analytic {}",
                index,
                r,
                c,
                numeric,
                grads[index][(r, c)]
            );
        }
    }

    #[test]
    fn test_learns_cyclic_sequence() {
        let params = MordredParams {
            units: 12,
            ..small_params(0.0, 0.0)
        };
        let mut model = Mordred::new(params, 3).unwrap();
        let series = cyclic(64, 4);
        let train = frames(&series, model.params.frame_length());
        let spec = TrainSpec {
            epochs: 80,
            batch_size: 8,
            validation_split: 0.0,
            learning_rate: 0.02,
            ..TrainSpec::default()
        };
        let history = model.fit(&train, &spec).unwrap();
        assert_eq!(history.epochs_run(), 80);
        assert!(history.final_train_loss().unwrap() < history.train_loss[0]);

        let context = series.slice(0, 10).unwrap();
        let forecast = model.predict(&context, 6, 20, 5).unwrap();
        for t in 0..6 {
            let expected = (10 + t) % 4;
            assert!(
                forecast.pdf[0][(t, expected)] > 0.5,
                "step {}: p(expected) = {}",
                t,
                forecast.pdf[0][(t, expected)]
            );
        }
    }

    #[test]
    fn test_patience_stops_and_restores_best_weights() {
        let mut model = Mordred::new(small_params(0.0, 0.0), 4).unwrap();
        let frame_length = model.params.frame_length();

        // train on an ascending cycle, validate on a descending one: the
        // better the fit, the worse the validation loss
        let mut all = frames(&cyclic(47, 4), frame_length);
        let descending = TimeSeries::ordinal(
            na::DMatrix::from_fn(17, 1, |t, _| (3 - t % 4) as f64),
            4,
        );
        let val = frames(&descending, frame_length);
        assert_eq!((all.len(), val.len()), (40, 10));
        all.extend(val.iter().cloned());

        let spec = TrainSpec {
            epochs: 40,
            batch_size: 8,
            validation_split: 0.2,
            learning_rate: 0.05,
            patience: Some(2),
            ..TrainSpec::default()
        };
        let history = model.fit(&all, &spec).unwrap();

        assert!(history.stopped_early);
        assert!(history.epochs_run() < spec.epochs);
        assert_eq!(history.val_loss.len(), history.epochs_run());
        let best = history.best_epoch.unwrap();
        assert!(best + 2 < history.epochs_run());
        let last = *history.val_loss.last().unwrap();
        assert!(last > history.val_loss[best]);

        let restored = model.validation_loss(&val, spec.batch_size);
        assert_relative_eq!(restored, history.val_loss[best], epsilon = 1e-12);
    }

    #[test]
    fn test_predict_shapes_and_determinism() {
        let mut model = Mordred::new(small_params(0.3, 0.0), 2).unwrap();
        let series = cyclic(30, 4);
        let train = frames(&series, model.params.frame_length());
        let spec = TrainSpec {
            epochs: 2,
            batch_size: 4,
            ..TrainSpec::default()
        };
        model.fit(&train, &spec).unwrap();

        // horizon beyond the training horizon
        let forecast = model.predict(&series, 9, 7, 42).unwrap();
        assert_eq!(forecast.horizon(), 9);
        assert_eq!(forecast.mc_samples(), 7);
        for t in 0..9 {
            let total: f64 = forecast.pdf[0].row(t).sum();
            assert!((total - 1.0).abs() < 1e-9);
        }
        assert!(forecast.draws[0].iter().all(|&b| b >= 0.0 && b < 4.0));

        let again = model.predict(&series, 9, 7, 42).unwrap();
        assert_eq!(forecast.draws, again.draws);
        assert_eq!(forecast.draw(3).len(), 9);
    }

    #[test]
    fn test_rejects_mismatched_inputs() {
        let model = Mordred::new(small_params(0.0, 0.0), 0).unwrap();
        assert!(model.predict(&cyclic(10, 4), 3, 2, 0).is_err());

        let mut model = Mordred::new(small_params(0.0, 0.0), 0).unwrap();
        let wrong_bins = cyclic(30, 5);
        let train = frames(&wrong_bins, model.params.frame_length());
        assert!(model.fit(&train, &TrainSpec::default()).is_err());

        let short = cyclic(5, 4);
        assert!(model.fit(&[short], &TrainSpec::default()).is_err());
    }
}
