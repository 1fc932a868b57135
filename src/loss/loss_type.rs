use serde::{Serialize, Deserialize};

use crate::loss::hinge::HingeLoss;
use crate::loss::non_saturating::NonSaturatingLoss;

/// Selects the adversarial objective used by the trainer.
///
/// - `Hinge`:         BigGAN's hinge loss (default).
/// - `NonSaturating`: logistic loss with the `−log D(G(z))` generator objective.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossType {
    #[default]
    Hinge,
    NonSaturating,
}

impl LossType {
    pub fn discriminator_loss(self, real: &[f64], fake: &[f64]) -> f64 {
        match self {
            LossType::Hinge         => HingeLoss::discriminator_loss(real, fake),
            LossType::NonSaturating => NonSaturatingLoss::discriminator_loss(real, fake),
        }
    }

    pub fn discriminator_derivative(self, real: &[f64], fake: &[f64]) -> (Vec<f64>, Vec<f64>) {
        match self {
            LossType::Hinge         => HingeLoss::discriminator_derivative(real, fake),
            LossType::NonSaturating => NonSaturatingLoss::discriminator_derivative(real, fake),
        }
    }

    pub fn generator_loss(self, fake: &[f64]) -> f64 {
        match self {
            LossType::Hinge         => HingeLoss::generator_loss(fake),
            LossType::NonSaturating => NonSaturatingLoss::generator_loss(fake),
        }
    }

    pub fn generator_derivative(self, fake: &[f64]) -> Vec<f64> {
        match self {
            LossType::Hinge         => HingeLoss::generator_derivative(fake),
            LossType::NonSaturating => NonSaturatingLoss::generator_derivative(fake),
        }
    }
}
