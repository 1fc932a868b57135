use serde::{Serialize, Deserialize};

use crate::layers::module::Module;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sgd {
    pub learning_rate: f64,
}

impl Sgd {
    pub fn new(learning_rate: f64) -> Sgd {
        Sgd { learning_rate }
    }

    /// Applies one SGD update from the gradients accumulated in `module`.
    pub fn step<M: Module + ?Sized>(&self, module: &mut M) {
        for p in module.params_mut() {
            if p.grad().numel() != p.value.numel() {
                continue;
            }
            let grad = p.grad().data.clone();
            for (w, g) in p.value.data.iter_mut().zip(grad.iter()) {
                *w -= self.learning_rate * g;
            }
        }
    }
}
