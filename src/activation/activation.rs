use serde::{Serialize, Deserialize};

use crate::math::tensor::Tensor;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ActivationFunction {
    #[default]
    #[serde(rename = "relu")]
    ReLU,
    #[serde(rename = "leaky_relu")]
    LeakyReLU { alpha: f64 },
    Tanh,
    Identity,
}

impl ActivationFunction {
    /// NaN inputs come out as NaN.
    pub fn function(&self, x: f64) -> f64 {
        match self {
            ActivationFunction::ReLU => if x < 0.0 { 0.0 } else { x },
            ActivationFunction::LeakyReLU { alpha } => if x < 0.0 { alpha * x } else { x },
            ActivationFunction::Tanh => x.tanh(),
            ActivationFunction::Identity => x,
        }
    }

    /// Element-wise derivative, evaluated at the pre-activation `x`.
    pub fn derivative(&self, x: f64) -> f64 {
        match self {
            ActivationFunction::ReLU => if x > 0.0 { 1.0 } else { 0.0 },
            ActivationFunction::LeakyReLU { alpha } => if x > 0.0 { 1.0 } else { *alpha },
            ActivationFunction::Tanh => {
                let t = x.tanh();
                1.0 - t * t
            }
            ActivationFunction::Identity => 1.0,
        }
    }

    pub fn forward(&self, pre: &Tensor) -> Tensor {
        pre.map(|x| self.function(x))
    }

    /// `grad ⊙ f'(pre)`
    pub fn backward(&self, pre: &Tensor, grad: &Tensor) -> Tensor {
        grad.zip_map(pre, |g, x| g * self.derivative(x))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_derivatives_match_finite_differences() {
        let acts = [
            ActivationFunction::ReLU,
            ActivationFunction::LeakyReLU { alpha: 0.2 },
            ActivationFunction::Tanh,
            ActivationFunction::Identity,
        ];
        for act in acts {
            for &x in &[-1.3, -0.4, 0.25, 2.0] {
                let h = 1e-6;
                let numeric = (act.function(x + h) - act.function(x - h)) / (2.0 * h);
                assert_abs_diff_eq!(act.derivative(x), numeric, epsilon = 1e-6);
            }
        }
    }

    #[test]
    fn test_backward_masks_relu() {
        let pre = Tensor::from_data(&[4], vec![-1.0, 0.0, 0.5, 3.0]);
        let grad = Tensor::full(&[4], 2.0);
        let g = ActivationFunction::ReLU.backward(&pre, &grad);
        assert_eq!(g.data, vec![0.0, 0.0, 2.0, 2.0]);
    }

    #[test]
    fn test_nan_passes_through() {
        assert!(ActivationFunction::ReLU.function(f64::NAN).is_nan());
        assert!(ActivationFunction::LeakyReLU { alpha: 0.2 }.function(f64::NAN).is_nan());
        assert_eq!(ActivationFunction::ReLU.function(-0.5), 0.0);
    }
}
