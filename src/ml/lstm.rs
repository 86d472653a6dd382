//! Batched LSTM layer with backpropagation through time.
//!
//! Inputs are `batch x input_size` matrices, one per time step. Gate
//! pre-activations are laid out as `[input, forget, candidate, output]`
//! blocks of `hidden_size` columns.

use nalgebra as na;
use rand::prelude::*;

pub(crate) fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[derive(Debug, Clone)]
pub struct LstmLayer {
    pub w_ih: na::DMatrix<f64>,
    pub w_hh: na::DMatrix<f64>,
    pub bias: na::DMatrix<f64>,
    hidden_size: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LstmState {
    pub h: na::DMatrix<f64>,
    pub c: na::DMatrix<f64>,
}

impl LstmState {
    pub fn zeros(batch: usize, hidden_size: usize) -> Self {
        Self {
            h: na::DMatrix::zeros(batch, hidden_size),
            c: na::DMatrix::zeros(batch, hidden_size),
        }
    }

    /// Copies row `row` into every row of a `batch`-sized state.
    pub fn broadcast_row(&self, row: usize, batch: usize) -> Self {
        let h = self.h.row(row);
        let c = self.c.row(row);
        Self {
            h: na::DMatrix::from_fn(batch, h.ncols(), |_, j| h[j]),
            c: na::DMatrix::from_fn(batch, c.ncols(), |_, j| c[j]),
        }
    }
}

/// Activations of one time step, kept for the backward pass.
#[derive(Debug, Clone)]
pub struct LstmStep {
    pub x: na::DMatrix<f64>,
    pub i: na::DMatrix<f64>,
    pub f: na::DMatrix<f64>,
    pub g: na::DMatrix<f64>,
    pub o: na::DMatrix<f64>,
    pub c: na::DMatrix<f64>,
    pub h: na::DMatrix<f64>,
}

#[derive(Debug, Clone)]
pub struct LstmTrace {
    pub initial: LstmState,
    pub steps: Vec<LstmStep>,
}

impl LstmTrace {
    pub fn final_state(&self) -> LstmState {
        match self.steps.last() {
            Some(step) => LstmState {
                h: step.h.clone(),
                c: step.c.clone(),
            },
            None => self.initial.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct LstmGrads {
    pub w_ih: na::DMatrix<f64>,
    pub w_hh: na::DMatrix<f64>,
    pub bias: na::DMatrix<f64>,
}

impl LstmLayer {
    /// Glorot-uniform weights; forget-gate bias starts at 1.
    pub fn new<R: Rng>(input_size: usize, hidden_size: usize, rng: &mut R) -> Self {
        let w_ih = xavier_init(input_size, 4 * hidden_size, rng);
        let w_hh = xavier_init(hidden_size, 4 * hidden_size, rng);
        let mut bias: na::DMatrix<f64> = na::DMatrix::zeros(1, 4 * hidden_size);
        bias.columns_mut(hidden_size, hidden_size).fill(1.0);
        Self {
            w_ih,
            w_hh,
            bias,
            hidden_size,
        }
    }

    pub fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    pub fn step(&self, x: &na::DMatrix<f64>, state: &LstmState) -> LstmStep {
        let hs = self.hidden_size;
        let mut z = x * &self.w_ih + &state.h * &self.w_hh;
        for col in 0..z.ncols() {
            z.column_mut(col).add_scalar_mut(self.bias[(0, col)]);
        }

        let i = z.columns(0, hs).map(sigmoid);
        let f = z.columns(hs, hs).map(sigmoid);
        let g = z.columns(2 * hs, hs).map(f64::tanh);
        let o = z.columns(3 * hs, hs).map(sigmoid);

        let c = f.component_mul(&state.c) + i.component_mul(&g);
        let h = o.component_mul(&c.map(f64::tanh));

        LstmStep {
            x: x.clone(),
            i,
            f,
            g,
            o,
            c,
            h,
        }
    }

    pub fn forward(&self, inputs: &[na::DMatrix<f64>], initial: LstmState) -> LstmTrace {
        let mut steps: Vec<LstmStep> = Vec::with_capacity(inputs.len());
        for x in inputs {
            let step = match steps.last() {
                Some(prev) => self.step(
                    x,
                    &LstmState {
                        h: prev.h.clone(),
                        c: prev.c.clone(),
                    },
                ),
                None => self.step(x, &initial),
            };
            steps.push(step);
        }
        LstmTrace { initial, steps }
    }

    /// Backpropagation through time.
    ///
    /// `d_outputs[t]` is the loss gradient w.r.t. the hidden output of step `t`
    /// (`None` when only the final state feeds the loss); `d_final` is the
    /// gradient w.r.t. the final state. Returns the parameter gradients and
    /// the gradient w.r.t. the initial state.
    pub fn backward(
        &self,
        trace: &LstmTrace,
        d_outputs: Option<&[na::DMatrix<f64>]>,
        d_final: LstmState,
    ) -> (LstmGrads, LstmState) {
        let hs = self.hidden_size;
        let mut grads = LstmGrads {
            w_ih: na::DMatrix::zeros(self.w_ih.nrows(), self.w_ih.ncols()),
            w_hh: na::DMatrix::zeros(self.w_hh.nrows(), self.w_hh.ncols()),
            bias: na::DMatrix::zeros(1, self.bias.ncols()),
        };

        let mut d_h_next = d_final.h;
        let mut d_c_next = d_final.c;

        for t in (0..trace.steps.len()).rev() {
            let step = &trace.steps[t];
            let (h_prev, c_prev) = if t == 0 {
                (&trace.initial.h, &trace.initial.c)
            } else {
                (&trace.steps[t - 1].h, &trace.steps[t - 1].c)
            };

            let d_h = match d_outputs {
                Some(d) => &d[t] + &d_h_next,
                None => d_h_next.clone(),
            };

            let tanh_c = step.c.map(f64::tanh);
            let d_o = d_h.component_mul(&tanh_c);
            let d_c = &d_c_next
                + d_h
                    .component_mul(&step.o)
                    .component_mul(&tanh_c.map(|v| 1.0 - v * v));

            let d_i = d_c.component_mul(&step.g);
            let d_g = d_c.component_mul(&step.i);
            let d_f = d_c.component_mul(c_prev);
            d_c_next = d_c.component_mul(&step.f);

            let mut dz: na::DMatrix<f64> = na::DMatrix::zeros(d_h.nrows(), 4 * hs);
            dz.columns_mut(0, hs)
                .copy_from(&d_i.zip_map(&step.i, |d, s| d * s * (1.0 - s)));
            dz.columns_mut(hs, hs)
                .copy_from(&d_f.zip_map(&step.f, |d, s| d * s * (1.0 - s)));
            dz.columns_mut(2 * hs, hs)
                .copy_from(&d_g.zip_map(&step.g, |d, s| d * (1.0 - s * s)));
            dz.columns_mut(3 * hs, hs)
                .copy_from(&d_o.zip_map(&step.o, |d, s| d * s * (1.0 - s)));

            grads.w_ih += step.x.tr_mul(&dz);
            grads.w_hh += h_prev.tr_mul(&dz);
            for col in 0..dz.ncols() {
                grads.bias[(0, col)] += dz.column(col).sum();
            }

            d_h_next = &dz * self.w_hh.transpose();
        }

        (
            grads,
            LstmState {
                h: d_h_next,
                c: d_c_next,
            },
        )
    }
}

pub(crate) fn xavier_init<R: Rng>(rows: usize, cols: usize, rng: &mut R) -> na::DMatrix<f64> {
    let limit = (6.0 / (rows + cols) as f64).sqrt();
    na::DMatrix::from_fn(rows, cols, |_, _| rng.gen_range(-limit..limit))
}
