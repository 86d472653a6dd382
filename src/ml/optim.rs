use nalgebra as na;

/// Adam with bias-corrected moments, one moment pair per parameter matrix.
#[derive(Debug, Clone)]
pub struct Adam {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    t: u64,
    moments: Vec<(na::DMatrix<f64>, na::DMatrix<f64>)>,
}

impl Adam {
    pub fn new(learning_rate: f64) -> Self {
        Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            epsilon: 1e-8,
            t: 0,
            moments: Vec::new(),
        }
    }

    /// Applies one update. `params` and `grads` must line up and keep the
    /// same shapes between calls.
    pub fn step(&mut self, params: Vec<&mut na::DMatrix<f64>>, grads: &[na::DMatrix<f64>]) {
        if self.moments.is_empty() {
            self.moments = grads
                .iter()
                .map(|g| {
                    (
                        na::DMatrix::zeros(g.nrows(), g.ncols()),
                        na::DMatrix::zeros(g.nrows(), g.ncols()),
                    )
                })
                .collect();
        }

        self.t += 1;
        let bias1 = 1.0 - self.beta1.powi(self.t as i32);
        let bias2 = 1.0 - self.beta2.powi(self.t as i32);
        let step_size = self.learning_rate * bias2.sqrt() / bias1;

        let (beta1, beta2, eps) = (self.beta1, self.beta2, self.epsilon);

        for ((param, grad), (m, v)) in params.into_iter().zip(grads).zip(self.moments.iter_mut()) {
            m.zip_apply(grad, |m, g| *m = beta1 * *m + (1.0 - beta1) * g);
            v.zip_apply(grad, |v, g| *v = beta2 * *v + (1.0 - beta2) * g * g);
            param.zip_zip_apply(&*m, &*v, |p, m, v| *p -= step_size * m / (v.sqrt() + eps));
        }
    }
}

/// Rescales `grads` in place so their joint L2 norm is at most `max_norm`.
/// Returns the norm before clipping.
pub fn clip_global_norm(grads: &mut [na::DMatrix<f64>], max_norm: f64) -> f64 {
    let norm = grads.iter().map(|g| g.norm_squared()).sum::<f64>().sqrt();
    if max_norm > 0.0 && norm > max_norm {
        let scale = max_norm / norm;
        for g in grads.iter_mut() {
            *g *= scale;
        }
    }
    norm
}
