use serde::{Serialize, Deserialize};

use crate::layers::module::Module;
use crate::math::tensor::Tensor;

/// Adam with bias correction. BigGAN trains with `β1 = 0`, `β2 = 0.999`.
///
/// Moment buffers are created on the first step and then paired with the
/// module's parameters by position.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Adam {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub eps: f64,
    pub step_count: u64,
    m: Vec<Tensor>,
    v: Vec<Tensor>,
}

impl Adam {
    pub fn new(learning_rate: f64, beta1: f64, beta2: f64, eps: f64) -> Adam {
        Adam { learning_rate, beta1, beta2, eps, step_count: 0, m: Vec::new(), v: Vec::new() }
    }

    /// Applies one update from the gradients currently accumulated in `module`.
    pub fn step<M: Module + ?Sized>(&mut self, module: &mut M) {
        let mut params = module.params_mut();
        if self.m.is_empty() {
            self.m = params.iter().map(|p| Tensor::zeros(&p.value.shape)).collect();
            self.v = self.m.clone();
        }
        assert_eq!(self.m.len(), params.len(), "optimizer state belongs to a different module");

        self.step_count += 1;
        let t = self.step_count as i32;
        let bc1 = 1.0 - self.beta1.powi(t);
        let bc2 = 1.0 - self.beta2.powi(t);
        let (b1, b2, lr, eps) = (self.beta1, self.beta2, self.learning_rate, self.eps);

        for ((p, m), v) in params.iter_mut().zip(self.m.iter_mut()).zip(self.v.iter_mut()) {
            let grad = p.grad().data.clone();
            if grad.len() != p.value.numel() {
                // never received a gradient since it was loaded
                continue;
            }
            for (i, g) in grad.iter().enumerate() {
                m.data[i] = b1 * m.data[i] + (1.0 - b1) * g;
                v.data[i] = b2 * v.data[i] + (1.0 - b2) * g * g;
                let m_hat = m.data[i] / bc1;
                let v_hat = v.data[i] / bc2;
                p.value.data[i] -= lr * m_hat / (v_hat.sqrt() + eps);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::module::Param;
    use approx::assert_abs_diff_eq;

    struct Scalar(Param);

    impl Module for Scalar {
        fn params(&self) -> Vec<&Param> {
            vec![&self.0]
        }
        fn params_mut(&mut self) -> Vec<&mut Param> {
            vec![&mut self.0]
        }
    }

    #[test]
    fn test_first_step_moves_by_learning_rate() {
        let mut s = Scalar(Param::new(Tensor::full(&[2], 1.0)));
        s.0.accumulate(&[3.0, -0.5]);
        let mut adam = Adam::new(0.1, 0.0, 0.999, 1e-12);
        adam.step(&mut s);
        // bias-corrected first step is ±lr regardless of gradient scale
        assert_abs_diff_eq!(s.0.value.data[0], 0.9, epsilon = 1e-9);
        assert_abs_diff_eq!(s.0.value.data[1], 1.1, epsilon = 1e-9);
    }

    #[test]
    fn test_minimizes_quadratic() {
        let mut s = Scalar(Param::new(Tensor::full(&[1], 5.0)));
        let mut adam = Adam::new(0.05, 0.9, 0.999, 1e-8);
        for _ in 0..2000 {
            s.zero_grad();
            let x = s.0.value.data[0];
            s.0.accumulate(&[2.0 * (x - 2.0)]);
            adam.step(&mut s);
        }
        assert_abs_diff_eq!(s.0.value.data[0], 2.0, epsilon = 1e-2);
    }
}
