use serde::{Serialize, Deserialize};

use crate::error::{GanError, Result};
use crate::layers::module::Module;

/// How the EMA decay evolves with the training step.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EmaSchedule {
    /// The configured decay from the first step on.
    #[default]
    Constant,
    /// Copy the live weights until `start_step`, then use the configured decay.
    DelayedStart { start_step: u64 },
    /// `min(decay, (1 + t) / (10 + t))`.
    Ramp,
}

fn default_decay() -> f64 {
    0.9999
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EmaConfig {
    #[serde(default = "default_decay")]
    pub decay: f64,
    #[serde(default)]
    pub schedule: EmaSchedule,
}

impl Default for EmaConfig {
    fn default() -> Self {
        EmaConfig { decay: default_decay(), schedule: EmaSchedule::Constant }
    }
}

impl EmaConfig {
    pub fn validate(&self) -> Result<()> {
        if (0.0..=1.0).contains(&self.decay) {
            Ok(())
        } else {
            Err(GanError::Config(format!("ema decay must lie in [0, 1], got {}", self.decay)))
        }
    }

    /// Decay applied after the generator update of `step` (0-based).
    pub fn decay_at(&self, step: u64) -> f64 {
        match self.schedule {
            EmaSchedule::Constant => self.decay,
            EmaSchedule::DelayedStart { start_step } if step < start_step => 0.0,
            EmaSchedule::DelayedStart { .. } => self.decay,
            EmaSchedule::Ramp => {
                let t = step as f64;
                self.decay.min((1.0 + t) / (10.0 + t))
            }
        }
    }
}

/// `shadow ← decay · shadow + (1 − decay) · live` over every parameter and
/// buffer. Both modules must share one architecture.
pub fn ema_update<M: Module + ?Sized>(live: &M, shadow: &mut M, decay: f64) {
    let live_params = live.params();
    let mut shadow_params = shadow.params_mut();
    assert_eq!(live_params.len(), shadow_params.len(), "EMA shadow does not match the live network");
    for (s, l) in shadow_params.iter_mut().zip(live_params) {
        for (sv, lv) in s.value.data.iter_mut().zip(l.value.data.iter()) {
            *sv = decay * *sv + (1.0 - decay) * lv;
        }
    }
    let live_buffers = live.buffers();
    for (s, l) in shadow.buffers_mut().into_iter().zip(live_buffers) {
        for (sv, lv) in s.data.iter_mut().zip(l.data.iter()) {
            *sv = decay * *sv + (1.0 - decay) * lv;
        }
    }
}

/// Owns the smoothed copy of a network. Never trained by gradients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmaTracker<N> {
    pub shadow: N,
    pub config: EmaConfig,
}

impl<N: Module + Clone> EmaTracker<N> {
    pub fn new(live: &N, config: EmaConfig) -> EmaTracker<N> {
        let mut shadow = live.clone();
        shadow.set_requires_grad(false);
        EmaTracker { shadow, config }
    }

    /// Updates the shadow after the generator step `step` and returns the
    /// decay that was used.
    pub fn update(&mut self, live: &N, step: u64) -> f64 {
        let decay = self.config.decay_at(step);
        ema_update(live, &mut self.shadow, decay);
        decay
    }
}
