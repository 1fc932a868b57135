use rand::rngs::StdRng;
use rayon::prelude::*;
use serde::{Serialize, Deserialize};

use crate::layers::module::{Mode, Module, Param};
use crate::layers::spectral_norm::SpectralNorm;
use crate::math::init::InitScheme;
use crate::math::ops::{col2im, im2col, matmul, matmul_at_b, matmul_a_bt};
use crate::math::tensor::Tensor;

/// Stride-1 2-D convolution with "same" padding (`kernel` must be odd).
///
/// Samples of a batch are processed in parallel; per-sample weight
/// gradients are summed in sample order so results do not depend on
/// thread scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conv2d {
    pub in_channels: usize,
    pub out_channels: usize,
    pub kernel: usize,
    /// `[out, in, k, k]`
    pub weight: Param,
    pub bias: Option<Param>,
    spectral: Option<SpectralNorm>,
    #[serde(skip)]
    cache: Option<ConvCache>,
}

#[derive(Debug, Clone)]
struct ConvCache {
    input: Tensor,
    weight: Vec<f64>,
}

impl Conv2d {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        kernel: usize,
        bias: bool,
        spectral_norm: bool,
        init: InitScheme,
        rng: &mut StdRng,
    ) -> Conv2d {
        assert!(kernel % 2 == 1, "convolution kernel must be odd, got {}", kernel);
        let fan_in = in_channels * kernel * kernel;
        let w = init.sample(out_channels, fan_in, rng);
        let spectral = spectral_norm.then(|| SpectralNorm::new(&w, out_channels, fan_in, rng));
        Conv2d {
            in_channels,
            out_channels,
            kernel,
            weight: Param::new(Tensor::from_data(&[out_channels, in_channels, kernel, kernel], w)),
            bias: bias.then(|| Param::new(Tensor::zeros(&[out_channels]))),
            spectral,
            cache: None,
        }
    }

    fn fan_in(&self) -> usize {
        self.in_channels * self.kernel * self.kernel
    }

    pub fn spectral_norm(&self) -> Option<&SpectralNorm> {
        self.spectral.as_ref()
    }

    pub fn forward(&mut self, x: &Tensor, mode: Mode) -> Tensor {
        let (n, c, h, w) = x.dims4();
        assert_eq!(c, self.in_channels, "convolution expects {} input channels, got {}", self.in_channels, c);
        let weight = match self.spectral.as_mut() {
            Some(sn) => sn.normalized_weight(&self.weight.value.data, mode),
            None => self.weight.value.data.clone(),
        };

        let (cout, k, fan_in, hw) = (self.out_channels, self.kernel, self.fan_in(), h * w);
        let zero_bias = vec![0.0; cout];
        let bias = self.bias.as_ref().map(|b| &b.value.data[..]).unwrap_or(&zero_bias[..]);

        let mut out = Tensor::zeros(&[n, cout, h, w]);
        out.data
            .par_chunks_mut(cout * hw)
            .zip(x.data.par_chunks(c * hw))
            .for_each(|(dst, src)| {
                let col = im2col(src, c, h, w, k);
                let y = matmul(&weight, &col, cout, fan_in, hw);
                for o in 0..cout {
                    for p in 0..hw {
                        dst[o * hw + p] = y[o * hw + p] + bias[o];
                    }
                }
            });

        self.cache = match mode {
            Mode::Train => Some(ConvCache { input: x.clone(), weight }),
            Mode::Eval => None,
        };
        out
    }

    /// Accumulates parameter gradients and returns `∂L/∂x`.
    pub fn backward(&mut self, grad: &Tensor) -> Tensor {
        let cache = self.cache.as_ref().expect("Conv2d::backward called without a training-mode forward");
        let (n, c, h, w) = cache.input.dims4();
        let (cout, k, fan_in, hw) = (self.out_channels, self.kernel, self.fan_in(), h * w);
        assert_eq!(grad.shape, vec![n, cout, h, w], "convolution gradient has wrong shape");
        let want_weight_grad = self.weight.requires_grad();
        let weight = &cache.weight;

        let per_sample: Vec<(Vec<f64>, Vec<f64>)> = grad
            .data
            .par_chunks(cout * hw)
            .zip(cache.input.data.par_chunks(c * hw))
            .map(|(g, src)| {
                let col = im2col(src, c, h, w, k);
                let gw = if want_weight_grad {
                    matmul_a_bt(g, &col, cout, hw, fan_in)
                } else {
                    Vec::new()
                };
                let dcol = matmul_at_b(weight, g, cout, fan_in, hw);
                (gw, col2im(&dcol, c, h, w, k))
            })
            .collect();

        let mut dx = Vec::with_capacity(n * c * hw);
        let mut gw_total = vec![0.0; cout * fan_in];
        for (gw, dx_n) in per_sample {
            if want_weight_grad {
                for (acc, v) in gw_total.iter_mut().zip(gw.iter()) {
                    *acc += v;
                }
            }
            dx.extend_from_slice(&dx_n);
        }

        if want_weight_grad {
            let gw_total = match &self.spectral {
                Some(sn) => sn.backward(weight, &gw_total),
                None => gw_total,
            };
            self.weight.accumulate(&gw_total);
        }
        if let Some(b) = self.bias.as_mut() {
            let mut gb = vec![0.0; cout];
            for sample in grad.data.chunks(cout * hw) {
                for (o, acc) in gb.iter_mut().enumerate() {
                    *acc += sample[o * hw..(o + 1) * hw].iter().sum::<f64>();
                }
            }
            b.accumulate(&gb);
        }

        Tensor::from_data(&[n, c, h, w], dx)
    }
}

impl Module for Conv2d {
    fn params(&self) -> Vec<&Param> {
        let mut p = vec![&self.weight];
        p.extend(self.bias.as_ref());
        p
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        let mut p = vec![&mut self.weight];
        p.extend(self.bias.as_mut());
        p
    }

    fn buffers(&self) -> Vec<&Tensor> {
        self.spectral.as_ref().map(|sn| sn.buffers()).unwrap_or_default()
    }

    fn buffers_mut(&mut self) -> Vec<&mut Tensor> {
        self.spectral.as_mut().map(|sn| sn.buffers_mut()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::gradcheck::{check_input_gradient, check_param_gradient};
    use rand::SeedableRng;

    #[test]
    fn test_identity_kernel_copies_input() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut conv = Conv2d::new(1, 1, 3, false, false, InitScheme::Xavier, &mut rng);
        conv.weight.value.data = vec![0.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0, 0.0];
        let x = Tensor::randn(&[2, 1, 4, 4], 1.0, &mut rng);
        assert_eq!(conv.forward(&x, Mode::Eval), x);
    }

    #[test]
    fn test_input_gradient_3x3_spectral() {
        let mut rng = StdRng::seed_from_u64(1);
        let conv = Conv2d::new(2, 3, 3, true, true, InitScheme::Orthogonal, &mut rng);
        let x = Tensor::randn(&[2, 2, 4, 4], 1.0, &mut rng);
        check_input_gradient(&conv, &x, |l, x, m| l.forward(x, m), |l, g| l.backward(g), Mode::Eval, &mut rng);
    }

    #[test]
    fn test_parameter_gradients_3x3() {
        let mut rng = StdRng::seed_from_u64(2);
        let conv = Conv2d::new(2, 2, 3, true, false, InitScheme::Xavier, &mut rng);
        let x = Tensor::randn(&[2, 2, 3, 3], 1.0, &mut rng);
        for param in 0..2 {
            check_param_gradient(&conv, &x, param, |l, x, m| l.forward(x, m), |l, g| l.backward(g), Mode::Eval, &mut rng);
        }
    }

    #[test]
    fn test_frozen_conv_still_propagates_input_gradient() {
        let mut rng = StdRng::seed_from_u64(3);
        let mut conv = Conv2d::new(1, 2, 1, true, false, InitScheme::Xavier, &mut rng);
        conv.set_requires_grad(false);
        let x = Tensor::randn(&[1, 1, 2, 2], 1.0, &mut rng);
        conv.forward(&x, Mode::Train);
        let dx = conv.backward(&Tensor::full(&[1, 2, 2, 2], 1.0));
        assert!(dx.data.iter().any(|v| *v != 0.0));
        assert!(conv.weight.grad().data.iter().all(|v| *v == 0.0));
    }
}
