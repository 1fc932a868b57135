use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::sync::{Arc, atomic::AtomicBool};

use serde::{Serialize, Deserialize};

use crate::error::{GanError, Result};
use crate::loss::loss_type::LossType;
use crate::network::spec::ArchitectureSpec;
use crate::optim::ema::EmaConfig;
use crate::optim::optimizer::OptimizerConfig;
use crate::train::step_stats::StepStats;

fn one() -> usize {
    1
}

fn default_d_steps() -> usize {
    2
}

fn default_checkpoint_interval() -> u64 {
    1000
}

fn default_g_optimizer() -> OptimizerConfig {
    OptimizerConfig::adam(1e-4)
}

fn default_d_optimizer() -> OptimizerConfig {
    OptimizerConfig::adam(4e-4)
}

fn default_samples_per_class() -> usize {
    4
}

/// What the periodic sample grid shows.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SampleConfig {
    /// Images per class row.
    #[serde(default = "default_samples_per_class")]
    pub samples_per_class: usize,
    /// Resample latent entries beyond this magnitude (truncation trick).
    #[serde(default)]
    pub truncation: Option<f64>,
    /// Show only the first `max_classes` classes.
    #[serde(default)]
    pub max_classes: Option<usize>,
}

impl Default for SampleConfig {
    fn default() -> Self {
        SampleConfig { samples_per_class: default_samples_per_class(), truncation: None, max_classes: None }
    }
}

/// Configuration for an adversarial training run.
///
/// Everything except the two runtime hooks is read from YAML.
///
/// - `progress_tx`: optional channel sender; one `StepStats` is sent per
///                   completed step. If the receiver is dropped the loop
///                   stops at the next step boundary.
/// - `stop_flag`:   optional atomic flag; when set from another thread the
///                   loop checkpoints and stops at the next step boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainConfig {
    pub architecture: ArchitectureSpec,
    pub batch_size: usize,
    /// Micro-batches whose gradients are averaged into one optimizer update.
    #[serde(default = "one")]
    pub accumulation_steps: usize,
    /// Discriminator updates per generator update.
    #[serde(default = "default_d_steps")]
    pub d_steps: usize,
    #[serde(default)]
    pub loss_type: LossType,
    #[serde(default = "default_g_optimizer")]
    pub g_optimizer: OptimizerConfig,
    #[serde(default = "default_d_optimizer")]
    pub d_optimizer: OptimizerConfig,
    #[serde(default)]
    pub ema: EmaConfig,
    pub total_steps: u64,
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: u64,
    /// Where checkpoints go; without one the run keeps no checkpoints.
    #[serde(default)]
    pub checkpoint_dir: Option<PathBuf>,
    #[serde(default)]
    pub samples: SampleConfig,
    #[serde(default)]
    pub seed: u64,
    #[serde(skip)]
    pub progress_tx: Option<mpsc::Sender<StepStats>>,
    #[serde(skip)]
    pub stop_flag: Option<Arc<AtomicBool>>,
}

impl TrainConfig {
    /// Creates a `TrainConfig` with BigGAN defaults, no checkpoint
    /// directory, no progress channel and no stop flag.
    pub fn new(architecture: ArchitectureSpec, batch_size: usize, total_steps: u64) -> Self {
        TrainConfig {
            architecture,
            batch_size,
            accumulation_steps: 1,
            d_steps: default_d_steps(),
            loss_type: LossType::Hinge,
            g_optimizer: default_g_optimizer(),
            d_optimizer: default_d_optimizer(),
            ema: EmaConfig::default(),
            total_steps,
            checkpoint_interval: default_checkpoint_interval(),
            checkpoint_dir: None,
            samples: SampleConfig::default(),
            seed: 0,
            progress_tx: None,
            stop_flag: None,
        }
    }

    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_yaml_str(&fs::read_to_string(path)?)
    }

    pub fn save_yaml<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        fs::write(path, serde_yaml::to_string(self)?)?;
        Ok(())
    }

    /// Checks the whole configuration once, before any model is built.
    pub fn validate(&self) -> Result<()> {
        self.architecture.validate()?;
        if self.batch_size == 0 || self.accumulation_steps == 0 || self.d_steps == 0 {
            return Err(GanError::Config(
                "batch_size, accumulation_steps and d_steps must all be at least 1".into(),
            ));
        }
        if self.checkpoint_interval == 0 {
            return Err(GanError::Config("checkpoint_interval must be at least 1".into()));
        }
        if self.samples.samples_per_class == 0 || self.samples.max_classes == Some(0) {
            return Err(GanError::Config("sample grid must show at least one image".into()));
        }
        if let Some(t) = self.samples.truncation {
            if t.is_nan() || t <= 0.0 {
                return Err(GanError::Config(format!("truncation must be positive, got {}", t)));
            }
        }
        self.g_optimizer.validate("generator")?;
        self.d_optimizer.validate("discriminator")?;
        self.ema.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optim::ema::EmaSchedule;

    const YAML: &str = "
architecture:
  resolution: 32
  num_classes: 10
  latent_dim: 128
  shared_dim: 128
  generator_base_channels: 64
  generator_blocks:
    - { type: up, out_channels: 64 }
    - { type: up, out_channels: 64 }
    - { type: attention }
    - { type: up, out_channels: 64 }
  discriminator_blocks:
    - { type: down, out_channels: 64 }
    - { type: down, out_channels: 64 }
    - { type: down, out_channels: 64, downsample: false }
batch_size: 16
total_steps: 100
ema:
  decay: 0.999
  schedule: { type: delayed_start, start_step: 20 }
";

    #[test]
    fn test_yaml_fills_defaults() {
        let cfg = TrainConfig::from_yaml_str(YAML).unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.d_steps, 2);
        assert_eq!(cfg.accumulation_steps, 1);
        assert_eq!(cfg.loss_type, LossType::Hinge);
        assert_eq!(cfg.d_optimizer, OptimizerConfig::adam(4e-4));
        assert_eq!(cfg.ema.schedule, EmaSchedule::DelayedStart { start_step: 20 });
        assert!(cfg.architecture.hierarchical);
        assert_eq!(cfg.architecture.image_channels, 3);
    }

    #[test]
    fn test_yaml_round_trip() {
        let cfg = TrainConfig::from_yaml_str(YAML).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.yaml");
        cfg.save_yaml(&path).unwrap();
        let back = TrainConfig::load_yaml(&path).unwrap();
        assert_eq!(back.architecture, cfg.architecture);
        assert_eq!(back.ema, cfg.ema);
        assert_eq!(back.total_steps, 100);
    }

    #[test]
    fn test_invalid_values_are_config_errors() {
        let mut cfg = TrainConfig::from_yaml_str(YAML).unwrap();
        cfg.accumulation_steps = 0;
        assert!(matches!(cfg.validate(), Err(GanError::Config(_))));

        let mut cfg = TrainConfig::from_yaml_str(YAML).unwrap();
        cfg.ema.decay = 1.5;
        assert!(matches!(cfg.validate(), Err(GanError::Config(_))));
    }

    #[test]
    fn test_malformed_yaml_is_reported() {
        assert!(matches!(TrainConfig::from_yaml_str("batch_size: [1"), Err(GanError::Yaml(_))));
    }
}
