use serde::{Serialize, Deserialize};

use crate::error::{GanError, Result};
use crate::layers::module::Module;
use crate::optim::adam::Adam;
use crate::optim::sgd::Sgd;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizerKind {
    #[default]
    Adam,
    Sgd,
}

fn default_beta2() -> f64 {
    0.999
}

fn default_eps() -> f64 {
    1e-8
}

/// Optimizer settings for one network.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptimizerConfig {
    #[serde(default)]
    pub kind: OptimizerKind,
    pub learning_rate: f64,
    #[serde(default)]
    pub beta1: f64,
    #[serde(default = "default_beta2")]
    pub beta2: f64,
    #[serde(default = "default_eps")]
    pub eps: f64,
}

impl OptimizerConfig {
    /// BigGAN's Adam settings with the given learning rate.
    pub fn adam(learning_rate: f64) -> OptimizerConfig {
        OptimizerConfig { kind: OptimizerKind::Adam, learning_rate, beta1: 0.0, beta2: 0.999, eps: 1e-8 }
    }

    pub fn validate(&self, which: &str) -> Result<()> {
        let ok = self.learning_rate > 0.0
            && self.learning_rate.is_finite()
            && (0.0..1.0).contains(&self.beta1)
            && (0.0..1.0).contains(&self.beta2)
            && self.eps > 0.0;
        if ok {
            Ok(())
        } else {
            Err(GanError::Config(format!("invalid {} optimizer settings: {:?}", which, self)))
        }
    }

    pub fn build(&self) -> Optimizer {
        match self.kind {
            OptimizerKind::Adam => Optimizer::Adam(Adam::new(self.learning_rate, self.beta1, self.beta2, self.eps)),
            OptimizerKind::Sgd => Optimizer::Sgd(Sgd::new(self.learning_rate)),
        }
    }
}

/// A configured optimizer together with its state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Optimizer {
    Adam(Adam),
    Sgd(Sgd),
}

impl Optimizer {
    pub fn step<M: Module + ?Sized>(&mut self, module: &mut M) {
        match self {
            Optimizer::Adam(adam) => adam.step(module),
            Optimizer::Sgd(sgd) => sgd.step(module),
        }
    }
}
