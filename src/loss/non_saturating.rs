/// Logistic GAN loss with the non-saturating generator objective.
///
/// `L_D = mean(softplus(−D(real))) + mean(softplus(D(fake)))`,
/// `L_G = mean(softplus(−D(fake)))`.
pub struct NonSaturatingLoss;

fn softplus(x: f64) -> f64 {
    x.max(0.0) + (-x.abs()).exp().ln_1p()
}

fn sigmoid(x: f64) -> f64 {
    if x >= 0.0 {
        1.0 / (1.0 + (-x).exp())
    } else {
        let e = x.exp();
        e / (1.0 + e)
    }
}

impl NonSaturatingLoss {
    pub fn discriminator_loss(real: &[f64], fake: &[f64]) -> f64 {
        real.iter().map(|s| softplus(-s)).sum::<f64>() / real.len() as f64
            + fake.iter().map(|s| softplus(*s)).sum::<f64>() / fake.len() as f64
    }

    pub fn discriminator_derivative(real: &[f64], fake: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let (nr, nf) = (real.len() as f64, fake.len() as f64);
        (
            real.iter().map(|s| -sigmoid(-s) / nr).collect(),
            fake.iter().map(|s| sigmoid(*s) / nf).collect(),
        )
    }

    pub fn generator_loss(fake: &[f64]) -> f64 {
        fake.iter().map(|s| softplus(-s)).sum::<f64>() / fake.len() as f64
    }

    pub fn generator_derivative(fake: &[f64]) -> Vec<f64> {
        let n = fake.len() as f64;
        fake.iter().map(|s| -sigmoid(-s) / n).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_large_scores_stay_finite() {
        assert!(NonSaturatingLoss::discriminator_loss(&[-800.0], &[800.0]).is_finite());
        assert_abs_diff_eq!(NonSaturatingLoss::generator_loss(&[800.0]), 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_nan_scores_give_nan_loss() {
        assert!(NonSaturatingLoss::discriminator_loss(&[f64::NAN], &[0.0]).is_nan());
        assert!(NonSaturatingLoss::discriminator_loss(&[0.0], &[f64::NAN]).is_nan());
        assert!(NonSaturatingLoss::generator_loss(&[f64::NAN]).is_nan());
    }

    #[test]
    fn test_generator_derivative_matches_finite_difference() {
        let fake = [0.3, -1.2, 2.5];
        let d = NonSaturatingLoss::generator_derivative(&fake);
        let h = 1e-6;
        for i in 0..fake.len() {
            let mut plus = fake;
            plus[i] += h;
            let mut minus = fake;
            minus[i] -= h;
            let numeric = (NonSaturatingLoss::generator_loss(&plus) - NonSaturatingLoss::generator_loss(&minus)) / (2.0 * h);
            assert_abs_diff_eq!(numeric, d[i], epsilon = 1e-8);
        }
    }
}
