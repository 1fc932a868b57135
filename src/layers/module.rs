use serde::{Serialize, Deserialize};

use crate::math::tensor::Tensor;

/// Whether a forward pass is part of training.
///
/// `Train` caches activations for the backward pass, advances spectral-norm
/// power iteration and uses batch statistics. `Eval` does none of that.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

/// A trainable tensor with its gradient accumulator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Param {
    pub value: Tensor,
    #[serde(skip)]
    grad: Tensor,
    #[serde(skip, default = "default_requires_grad")]
    requires_grad: bool,
}

fn default_requires_grad() -> bool {
    true
}

impl Param {
    pub fn new(value: Tensor) -> Param {
        let grad = Tensor::zeros(&value.shape);
        Param { value, grad, requires_grad: true }
    }

    pub fn grad(&self) -> &Tensor {
        &self.grad
    }

    pub fn requires_grad(&self) -> bool {
        self.requires_grad
    }

    pub fn set_requires_grad(&mut self, flag: bool) {
        self.requires_grad = flag;
    }

    pub fn zero_grad(&mut self) {
        if self.grad.shape != self.value.shape {
            self.grad = Tensor::zeros(&self.value.shape);
        } else {
            self.grad.fill(0.0);
        }
    }

    /// Adds `g` into the accumulator. No-op while the parameter is frozen.
    pub fn accumulate(&mut self, g: &[f64]) {
        if !self.requires_grad {
            return;
        }
        assert_eq!(g.len(), self.value.numel(), "gradient size does not match parameter");
        if self.grad.shape != self.value.shape {
            self.grad = Tensor::zeros(&self.value.shape);
        }
        for (acc, v) in self.grad.data.iter_mut().zip(g.iter()) {
            *acc += v;
        }
    }

    pub fn scale_grad(&mut self, factor: f64) {
        self.grad.scale_assign(factor);
    }

    pub fn grad_is_finite(&self) -> bool {
        self.grad.is_finite()
    }
}

/// Anything that owns parameters and auxiliary buffers.
///
/// The order of `params`/`params_mut` and of `buffers`/`buffers_mut` is
/// fixed by construction; optimizers and the EMA tracker rely on it to pair
/// tensors across two structurally identical networks.
pub trait Module {
    fn params(&self) -> Vec<&Param>;
    fn params_mut(&mut self) -> Vec<&mut Param>;

    /// Non-trainable state: spectral-norm vectors, running statistics.
    fn buffers(&self) -> Vec<&Tensor> {
        Vec::new()
    }

    fn buffers_mut(&mut self) -> Vec<&mut Tensor> {
        Vec::new()
    }

    fn zero_grad(&mut self) {
        for p in self.params_mut() {
            p.zero_grad();
        }
    }

    fn set_requires_grad(&mut self, flag: bool) {
        for p in self.params_mut() {
            p.set_requires_grad(flag);
        }
    }

    fn scale_grads(&mut self, factor: f64) {
        for p in self.params_mut() {
            p.scale_grad(factor);
        }
    }

    fn grads_are_finite(&self) -> bool {
        self.params().iter().all(|p| p.grad_is_finite())
    }

    fn num_parameters(&self) -> usize {
        self.params().iter().map(|p| p.value.numel()).sum()
    }
}
