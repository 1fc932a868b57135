use rand::rngs::StdRng;
use serde::{Serialize, Deserialize};

use crate::layers::module::{Mode, Module, Param};
use crate::layers::spectral_norm::SpectralNorm;
use crate::math::init::InitScheme;
use crate::math::ops::{matmul, matmul_at_b, matmul_a_bt};
use crate::math::tensor::Tensor;

/// Fully connected layer `y = x Wᵀ + b`, optionally spectrally normalized.
///
/// Input `[N, in]`, output `[N, out]`, weight `[out, in]`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Linear {
    pub in_features: usize,
    pub out_features: usize,
    pub weight: Param,
    pub bias: Option<Param>,
    spectral: Option<SpectralNorm>,
    #[serde(skip)]
    cache: Option<LinearCache>,
}

#[derive(Debug, Clone)]
struct LinearCache {
    input: Tensor,
    weight: Vec<f64>,
}

impl Linear {
    pub fn new(
        in_features: usize,
        out_features: usize,
        bias: bool,
        spectral_norm: bool,
        init: InitScheme,
        rng: &mut StdRng,
    ) -> Linear {
        let w = init.sample(out_features, in_features, rng);
        let spectral = spectral_norm.then(|| SpectralNorm::new(&w, out_features, in_features, rng));
        Linear {
            in_features,
            out_features,
            weight: Param::new(Tensor::from_data(&[out_features, in_features], w)),
            bias: bias.then(|| Param::new(Tensor::zeros(&[out_features]))),
            spectral,
            cache: None,
        }
    }

    pub fn spectral_norm(&self) -> Option<&SpectralNorm> {
        self.spectral.as_ref()
    }

    fn effective_weight(&mut self, mode: Mode) -> Vec<f64> {
        match self.spectral.as_mut() {
            Some(sn) => sn.normalized_weight(&self.weight.value.data, mode),
            None => self.weight.value.data.clone(),
        }
    }

    pub fn forward(&mut self, x: &Tensor, mode: Mode) -> Tensor {
        let (n, features) = x.dims2();
        assert_eq!(features, self.in_features, "linear layer expects {} inputs", self.in_features);
        let w = self.effective_weight(mode);

        // x [n, in] · Wᵀ [in, out]
        let mut y = matmul_a_bt(&x.data, &w, n, self.in_features, self.out_features);
        if let Some(b) = &self.bias {
            for row in y.chunks_mut(self.out_features) {
                for (v, bias) in row.iter_mut().zip(b.value.data.iter()) {
                    *v += bias;
                }
            }
        }

        self.cache = match mode {
            Mode::Train => Some(LinearCache { input: x.clone(), weight: w }),
            Mode::Eval => None,
        };
        Tensor::from_data(&[n, self.out_features], y)
    }

    /// Accumulates parameter gradients and returns `∂L/∂x`.
    pub fn backward(&mut self, grad: &Tensor) -> Tensor {
        let cache = self.cache.as_ref().expect("Linear::backward called without a training-mode forward");
        let (n, out) = grad.dims2();
        assert_eq!(out, self.out_features);

        if self.weight.requires_grad() {
            // gyᵀ [out, n] · x [n, in]
            let gw = matmul_at_b(&grad.data, &cache.input.data, n, self.out_features, self.in_features);
            let gw = match &self.spectral {
                Some(sn) => sn.backward(&cache.weight, &gw),
                None => gw,
            };
            self.weight.accumulate(&gw);
        }
        if let Some(b) = self.bias.as_mut() {
            let mut gb = vec![0.0; out];
            for row in grad.data.chunks(out) {
                for (acc, g) in gb.iter_mut().zip(row.iter()) {
                    *acc += g;
                }
            }
            b.accumulate(&gb);
        }

        let dx = matmul(&grad.data, &cache.weight, n, self.out_features, self.in_features);
        Tensor::from_data(&[n, self.in_features], dx)
    }
}

impl Module for Linear {
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
    fn test_forward_known_values() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut layer = Linear::new(2, 1, true, false, InitScheme::Xavier, &mut rng);
        layer.weight.value.data = vec![2.0, -1.0];
        layer.bias.as_mut().unwrap().value.data = vec![0.5];
        let y = layer.forward(&Tensor::from_data(&[2, 2], vec![1.0, 1.0, 3.0, 2.0]), Mode::Eval);
        assert_eq!(y.data, vec![1.5, 4.5]);
    }

    #[test]
    fn test_input_gradient_with_spectral_norm() {
        let mut rng = StdRng::seed_from_u64(1);
        let layer = Linear::new(5, 3, true, true, InitScheme::Orthogonal, &mut rng);
        let x = Tensor::randn(&[4, 5], 1.0, &mut rng);
        check_input_gradient(&layer, &x, |l, x, mode| l.forward(x, mode), |l, g| l.backward(g), Mode::Eval, &mut rng);
    }

    #[test]
    fn test_parameter_gradients() {
        let mut rng = StdRng::seed_from_u64(4);
        let layer = Linear::new(3, 2, true, false, InitScheme::Xavier, &mut rng);
        let x = Tensor::randn(&[4, 3], 1.0, &mut rng);
        for param in 0..2 {
            check_param_gradient(&layer, &x, param, |l, x, mode| l.forward(x, mode), |l, g| l.backward(g), Mode::Eval, &mut rng);
        }
    }
}
