//! Spectral normalization of a weight matrix by power iteration.
//!
//! The weight is viewed as a `[rows, cols]` matrix (`[C_out, C_in·k·k]` for
//! convolutions). The left singular vector estimate `u` and the last `σ` are
//! buffers: they persist across steps and checkpoints but are never touched
//! by an optimizer.

use rand::rngs::StdRng;
use serde::{Serialize, Deserialize};

use crate::layers::module::Mode;
use crate::math::ops::{matvec, matvec_t, normalize};
use crate::math::tensor::Tensor;

const EPS: f64 = 1e-12;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpectralNorm {
    rows: usize,
    cols: usize,
    u: Tensor,
    sigma: Tensor,
    /// Right singular vector from the latest training-mode pass.
    #[serde(skip)]
    v: Vec<f64>,
}

impl SpectralNorm {
    /// Starts from a random unit `u` and runs one power-iteration step on
    /// `weight` so that `σ` is meaningful before the first training step.
    pub fn new(weight: &[f64], rows: usize, cols: usize, rng: &mut StdRng) -> SpectralNorm {
        let mut u = Tensor::randn(&[rows], 1.0, rng);
        normalize(&mut u.data, EPS);
        let mut sn = SpectralNorm { rows, cols, u, sigma: Tensor::full(&[1], 1.0), v: Vec::new() };
        sn.power_iteration(weight);
        sn
    }

    pub fn sigma(&self) -> f64 {
        self.sigma.data[0]
    }

    pub fn u(&self) -> &[f64] {
        &self.u.data
    }

    /// `v = normalize(Wᵀu)`, `u = normalize(W v)`, `σ = uᵀ W v`.
    fn power_iteration(&mut self, weight: &[f64]) {
        let mut v = matvec_t(weight, &self.u.data, self.rows, self.cols);
        normalize(&mut v, EPS);
        let wv = matvec(weight, &v, self.rows, self.cols);
        let mut u = wv.clone();
        normalize(&mut u, EPS);
        self.sigma.data[0] = u.iter().zip(wv.iter()).map(|(a, b)| a * b).sum::<f64>().max(EPS);
        self.u.data = u;
        self.v = v;
    }

    /// Returns `W / σ`. In training mode one power-iteration step refines
    /// `u` and `σ` first; in evaluation mode the stored `σ` is reused.
    pub fn normalized_weight(&mut self, weight: &[f64], mode: Mode) -> Vec<f64> {
        assert_eq!(weight.len(), self.rows * self.cols, "weight does not match spectral norm shape");
        if mode == Mode::Train {
            self.power_iteration(weight);
        }
        let sigma = self.sigma();
        weight.iter().map(|w| w / sigma).collect()
    }

    /// Maps the gradient w.r.t. `W/σ` onto the raw weight:
    /// `(G − ⟨G, W/σ⟩ u vᵀ) / σ`, with `u` and `v` held constant.
    pub fn backward(&self, normalized: &[f64], grad: &[f64]) -> Vec<f64> {
        assert!(!self.v.is_empty(), "spectral norm backward needs a training-mode forward");
        let sigma = self.sigma();
        let inner: f64 = normalized.iter().zip(grad.iter()).map(|(w, g)| w * g).sum();
        let mut out = Vec::with_capacity(grad.len());
        for i in 0..self.rows {
            let ui = self.u.data[i];
            for j in 0..self.cols {
                out.push((grad[i * self.cols + j] - inner * ui * self.v[j]) / sigma);
            }
        }
        out
    }

    pub fn buffers(&self) -> Vec<&Tensor> {
        vec![&self.u, &self.sigma]
    }

    pub fn buffers_mut(&mut self) -> Vec<&mut Tensor> {
        vec![&mut self.u, &mut self.sigma]
    }
}
