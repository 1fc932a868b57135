//! Batch normalization for NCHW feature maps.
//!
//! Statistics are per channel over the batch and spatial dimensions,
//! independent of class. [`ConditionalBatchNorm2d`] takes its per-sample
//! gain and bias from a conditioning vector that carries the class
//! embedding.

use rand::rngs::StdRng;
use serde::{Serialize, Deserialize};

use crate::layers::linear::Linear;
use crate::layers::module::{Mode, Module, Param};
use crate::math::init::InitScheme;
use crate::math::tensor::Tensor;

const MOMENTUM: f64 = 0.1;

/// The affine-free part: `x̂ = (x − μ) / √(σ² + ε)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchStatistics {
    pub channels: usize,
    pub eps: f64,
    pub running_mean: Tensor,
    pub running_var: Tensor,
    #[serde(skip)]
    cache: Option<NormCache>,
}

#[derive(Debug, Clone)]
struct NormCache {
    x_hat: Tensor,
    inv_std: Vec<f64>,
}

impl BatchStatistics {
    pub fn new(channels: usize, eps: f64) -> BatchStatistics {
        BatchStatistics {
            channels,
            eps,
            running_mean: Tensor::zeros(&[channels]),
            running_var: Tensor::full(&[channels], 1.0),
            cache: None,
        }
    }

    pub fn normalize(&mut self, x: &Tensor, mode: Mode) -> Tensor {
        let (n, c, h, w) = x.dims4();
        assert_eq!(c, self.channels, "batch norm expects {} channels, got {}", self.channels, c);
        let hw = h * w;
        let count = (n * hw) as f64;

        let (mean, var) = match mode {
            Mode::Train => {
                let mut mean = vec![0.0; c];
                let mut var = vec![0.0; c];
                for i in 0..n {
                    for ch in 0..c {
                        let base = (i * c + ch) * hw;
                        mean[ch] += x.data[base..base + hw].iter().sum::<f64>();
                    }
                }
                for m in mean.iter_mut() {
                    *m /= count;
                }
                for i in 0..n {
                    for ch in 0..c {
                        let base = (i * c + ch) * hw;
                        var[ch] += x.data[base..base + hw].iter().map(|v| (v - mean[ch]).powi(2)).sum::<f64>();
                    }
                }
                for v in var.iter_mut() {
                    *v /= count;
                }
                let unbias = if count > 1.0 { count / (count - 1.0) } else { 1.0 };
                for ch in 0..c {
                    self.running_mean.data[ch] = (1.0 - MOMENTUM) * self.running_mean.data[ch] + MOMENTUM * mean[ch];
                    self.running_var.data[ch] = (1.0 - MOMENTUM) * self.running_var.data[ch] + MOMENTUM * var[ch] * unbias;
                }
                (mean, var)
            }
            Mode::Eval => (self.running_mean.data.clone(), self.running_var.data.clone()),
        };

        let inv_std: Vec<f64> = var.iter().map(|v| 1.0 / (v + self.eps).sqrt()).collect();
        let mut x_hat = x.clone();
        for (idx, v) in x_hat.data.iter_mut().enumerate() {
            let ch = (idx / hw) % c;
            *v = (*v - mean[ch]) * inv_std[ch];
        }

        if mode == Mode::Train {
            self.cache = Some(NormCache { x_hat: x_hat.clone(), inv_std });
        } else {
            self.cache = None;
        }
        x_hat
    }

    pub fn x_hat(&self) -> &Tensor {
        &self.cache.as_ref().expect("batch norm used without a training-mode forward").x_hat
    }

    /// `∂L/∂x` from `∂L/∂x̂`, differentiating through the batch statistics.
    pub fn backward(&self, grad_x_hat: &Tensor) -> Tensor {
        let cache = self.cache.as_ref().expect("BatchStatistics::backward called without a training-mode forward");
        let (n, c, h, w) = grad_x_hat.dims4();
        let hw = h * w;
        let count = (n * hw) as f64;
        let mut dx = grad_x_hat.clone();

        for ch in 0..c {
            let mut sum_g = 0.0;
            let mut sum_gx = 0.0;
            for i in 0..n {
                let base = (i * c + ch) * hw;
                for p in 0..hw {
                    sum_g += grad_x_hat.data[base + p];
                    sum_gx += grad_x_hat.data[base + p] * cache.x_hat.data[base + p];
                }
            }
            let (mean_g, mean_gx) = (sum_g / count, sum_gx / count);
            for i in 0..n {
                let base = (i * c + ch) * hw;
                for p in 0..hw {
                    dx.data[base + p] = cache.inv_std[ch]
                        * (grad_x_hat.data[base + p] - mean_g - cache.x_hat.data[base + p] * mean_gx);
                }
            }
        }
        dx
    }

    pub fn buffers(&self) -> Vec<&Tensor> {
        vec![&self.running_mean, &self.running_var]
    }

    pub fn buffers_mut(&mut self) -> Vec<&mut Tensor> {
        vec![&mut self.running_mean, &mut self.running_var]
    }
}

// ---------------------------------------------------------------------------
// Plain batch norm with learned per-channel affine
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchNorm2d {
    pub stats: BatchStatistics,
    pub gain: Param,
    pub bias: Param,
}

impl BatchNorm2d {
    pub fn new(channels: usize, eps: f64) -> BatchNorm2d {
        BatchNorm2d {
            stats: BatchStatistics::new(channels, eps),
            gain: Param::new(Tensor::full(&[channels], 1.0)),
            bias: Param::new(Tensor::zeros(&[channels])),
        }
    }

    pub fn forward(&mut self, x: &Tensor, mode: Mode) -> Tensor {
        let (_, c, h, w) = x.dims4();
        let hw = h * w;
        let mut y = self.stats.normalize(x, mode);
        for (idx, v) in y.data.iter_mut().enumerate() {
            let ch = (idx / hw) % c;
            *v = *v * self.gain.value.data[ch] + self.bias.value.data[ch];
        }
        y
    }

    pub fn backward(&mut self, grad: &Tensor) -> Tensor {
        let (n, c, h, w) = grad.dims4();
        let hw = h * w;
        let x_hat = self.stats.x_hat();
        let mut g_gain = vec![0.0; c];
        let mut g_bias = vec![0.0; c];
        let mut g_x_hat = grad.clone();
        for i in 0..n {
            for ch in 0..c {
                let base = (i * c + ch) * hw;
                for p in 0..hw {
                    let g = grad.data[base + p];
                    g_gain[ch] += g * x_hat.data[base + p];
                    g_bias[ch] += g;
                    g_x_hat.data[base + p] = g * self.gain.value.data[ch];
                }
            }
        }
        self.gain.accumulate(&g_gain);
        self.bias.accumulate(&g_bias);
        self.stats.backward(&g_x_hat)
    }
}

impl Module for BatchNorm2d {
    fn params(&self) -> Vec<&Param> {
        vec![&self.gain, &self.bias]
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        vec![&mut self.gain, &mut self.bias]
    }

    fn buffers(&self) -> Vec<&Tensor> {
        self.stats.buffers()
    }

    fn buffers_mut(&mut self) -> Vec<&mut Tensor> {
        self.stats.buffers_mut()
    }
}

// ---------------------------------------------------------------------------
// Class-conditional batch norm
// ---------------------------------------------------------------------------

/// `y = x̂ · (1 + gain(c)) + bias(c)` where `gain` and `bias` are linear
/// maps of the per-sample conditioning vector `c`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConditionalBatchNorm2d {
    pub stats: BatchStatistics,
    pub gain: Linear,
    pub bias: Linear,
    #[serde(skip)]
    scale: Option<Tensor>,
}

impl ConditionalBatchNorm2d {
    pub fn new(
        channels: usize,
        cond_dim: usize,
        eps: f64,
        spectral_norm: bool,
        init: InitScheme,
        rng: &mut StdRng,
    ) -> ConditionalBatchNorm2d {
        ConditionalBatchNorm2d {
            stats: BatchStatistics::new(channels, eps),
            gain: Linear::new(cond_dim, channels, false, spectral_norm, init, rng),
            bias: Linear::new(cond_dim, channels, false, spectral_norm, init, rng),
            scale: None,
        }
    }

    pub fn forward(&mut self, x: &Tensor, cond: &Tensor, mode: Mode) -> Tensor {
        let (n, c, h, w) = x.dims4();
        assert_eq!(cond.shape[0], n, "conditioning batch does not match input batch");
        let hw = h * w;
        let scale = self.gain.forward(cond, mode).map(|g| 1.0 + g);
        let shift = self.bias.forward(cond, mode);
        let mut y = self.stats.normalize(x, mode);
        for (idx, v) in y.data.iter_mut().enumerate() {
            let nc = idx / hw;
            *v = *v * scale.data[nc] + shift.data[nc];
        }
        debug_assert_eq!(scale.numel(), n * c);
        self.scale = (mode == Mode::Train).then_some(scale);
        y
    }

    /// Returns `(∂L/∂x, ∂L/∂cond)`.
    pub fn backward(&mut self, grad: &Tensor) -> (Tensor, Tensor) {
        let (n, c, h, w) = grad.dims4();
        let hw = h * w;
        let scale = self.scale.as_ref().expect("ConditionalBatchNorm2d::backward called without a training-mode forward");
        let x_hat = self.stats.x_hat();

        let mut g_scale = vec![0.0; n * c];
        let mut g_shift = vec![0.0; n * c];
        let mut g_x_hat = grad.clone();
        for nc in 0..n * c {
            let base = nc * hw;
            for p in 0..hw {
                let g = grad.data[base + p];
                g_scale[nc] += g * x_hat.data[base + p];
                g_shift[nc] += g;
                g_x_hat.data[base + p] = g * scale.data[nc];
            }
        }
        let dx = self.stats.backward(&g_x_hat);
        let mut dcond = self.gain.backward(&Tensor::from_data(&[n, c], g_scale));
        dcond.add_assign(&self.bias.backward(&Tensor::from_data(&[n, c], g_shift)));
        (dx, dcond)
    }
}

impl Module for ConditionalBatchNorm2d {
    fn params(&self) -> Vec<&Param> {
        let mut p = self.gain.params();
        p.extend(self.bias.params());
        p
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        let mut p = self.gain.params_mut();
        p.extend(self.bias.params_mut());
        p
    }

    fn buffers(&self) -> Vec<&Tensor> {
        let mut b = self.stats.buffers();
        b.extend(self.gain.buffers());
        b.extend(self.bias.buffers());
        b
    }

    fn buffers_mut(&mut self) -> Vec<&mut Tensor> {
        let mut b = self.stats.buffers_mut();
        b.extend(self.gain.buffers_mut());
        b.extend(self.bias.buffers_mut());
        b
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::gradcheck::{check_input_gradient, check_param_gradient};
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;

    #[test]
    fn test_train_output_is_normalized_per_channel() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut bn = BatchNorm2d::new(2, 1e-5);
        let x = Tensor::randn(&[4, 2, 3, 3], 3.0, &mut rng).map(|v| v + 5.0);
        let y = bn.forward(&x, Mode::Train);
        for ch in 0..2 {
            let vals: Vec<f64> = (0..4).flat_map(|i| y.data[(i * 2 + ch) * 9..(i * 2 + ch + 1) * 9].to_vec()).collect();
            let mean = vals.iter().sum::<f64>() / vals.len() as f64;
            let var = vals.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / vals.len() as f64;
            assert_abs_diff_eq!(mean, 0.0, epsilon = 1e-10);
            assert_abs_diff_eq!(var, 1.0, epsilon = 1e-4);
        }
        assert!(bn.stats.running_mean.data.iter().all(|m| *m > 0.0));
    }

    #[test]
    fn test_eval_is_per_sample() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut bn = BatchNorm2d::new(3, 1e-5);
        let x = Tensor::randn(&[2, 3, 2, 2], 1.0, &mut rng);
        let (first, _) = x.split_batch(1);
        let both = bn.forward(&x, Mode::Eval);
        let alone = bn.forward(&first, Mode::Eval);
        assert_eq!(both.split_batch(1).0, alone);
    }

    #[test]
    fn test_batch_norm_gradients() {
        let mut rng = StdRng::seed_from_u64(2);
        let mut bn = BatchNorm2d::new(2, 1e-5);
        bn.gain.value.data = vec![1.5, -0.5];
        let x = Tensor::randn(&[3, 2, 2, 2], 1.0, &mut rng);
        check_input_gradient(&bn, &x, |l, x, m| l.forward(x, m), |l, g| l.backward(g), Mode::Train, &mut rng);
        for param in 0..2 {
            check_param_gradient(&bn, &x, param, |l, x, m| l.forward(x, m), |l, g| l.backward(g), Mode::Train, &mut rng);
        }
    }

    #[test]
    fn test_conditional_gradients() {
        let mut rng = StdRng::seed_from_u64(3);
        let cbn = ConditionalBatchNorm2d::new(2, 3, 1e-5, false, InitScheme::Xavier, &mut rng);
        let x = Tensor::randn(&[3, 2, 2, 2], 1.0, &mut rng);
        let cond = Tensor::randn(&[3, 3], 1.0, &mut rng);

        let fwd = |l: &mut ConditionalBatchNorm2d, x: &Tensor, m: Mode| l.forward(x, &cond, m);
        check_input_gradient(&cbn, &x, fwd, |l, g| l.backward(g).0, Mode::Train, &mut rng);
        check_param_gradient(&cbn, &x, 0, fwd, |l, g| l.backward(g).0, Mode::Train, &mut rng);

        // gradient with respect to the conditioning vector
        let fwd_cond = |l: &mut ConditionalBatchNorm2d, c: &Tensor, m: Mode| l.forward(&x, c, m);
        check_input_gradient(&cbn, &cond, fwd_cond, |l, g| l.backward(g).1, Mode::Train, &mut rng);
    }

    #[test]
    fn test_class_conditioning_changes_output() {
        let mut rng = StdRng::seed_from_u64(4);
        let mut cbn = ConditionalBatchNorm2d::new(1, 2, 1e-5, false, InitScheme::Xavier, &mut rng);
        let x = Tensor::randn(&[2, 1, 2, 2], 1.0, &mut rng);
        let a = cbn.forward(&x, &Tensor::from_data(&[2, 2], vec![1.0, 0.0, 1.0, 0.0]), Mode::Train);
        let b = cbn.forward(&x, &Tensor::from_data(&[2, 2], vec![0.0, 1.0, 0.0, 1.0]), Mode::Train);
        assert_ne!(a, b);
    }
}
