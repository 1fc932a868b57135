/// Hinge adversarial loss.
///
/// `L_D = mean(max(0, 1 − D(real))) + mean(max(0, 1 + D(fake)))`,
/// `L_G = −mean(D(fake))`.
pub struct HingeLoss;

impl HingeLoss {
    pub fn discriminator_loss(real: &[f64], fake: &[f64]) -> f64 {
        // written as comparisons so a NaN score yields a NaN loss
        let real_term = real.iter().map(|&s| if s >= 1.0 { 0.0 } else { 1.0 - s }).sum::<f64>() / real.len() as f64;
        let fake_term = fake.iter().map(|&s| if s <= -1.0 { 0.0 } else { 1.0 + s }).sum::<f64>() / fake.len() as f64;
        real_term + fake_term
    }

    /// Per-score gradients `(∂L_D/∂real, ∂L_D/∂fake)`. Zero where the hinge
    /// is inactive.
    pub fn discriminator_derivative(real: &[f64], fake: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let (nr, nf) = (real.len() as f64, fake.len() as f64);
        (
            real.iter().map(|s| if *s < 1.0 { -1.0 / nr } else { 0.0 }).collect(),
            fake.iter().map(|s| if *s > -1.0 { 1.0 / nf } else { 0.0 }).collect(),
        )
    }

    pub fn generator_loss(fake: &[f64]) -> f64 {
        -fake.iter().sum::<f64>() / fake.len() as f64
    }

    pub fn generator_derivative(fake: &[f64]) -> Vec<f64> {
        vec![-1.0 / fake.len() as f64; fake.len()]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use proptest::prelude::*;

    #[test]
    fn test_known_values() {
        // real 0.5 → 0.5, real 2.0 → 0; fake −0.5 → 0.5, fake −3 → 0
        assert_abs_diff_eq!(HingeLoss::discriminator_loss(&[0.5, 2.0], &[-0.5, -3.0]), 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(HingeLoss::generator_loss(&[1.0, 3.0]), -2.0, epsilon = 1e-12);
    }

    #[test]
    fn test_saturated_scores_have_no_gradient() {
        let (dr, df) = HingeLoss::discriminator_derivative(&[1.5, 0.0], &[-2.0, 0.0]);
        assert_eq!(dr, vec![0.0, -0.5]);
        assert_eq!(df, vec![0.0, 0.5]);
    }

    #[test]
    fn test_nan_scores_give_nan_loss() {
        assert!(HingeLoss::discriminator_loss(&[f64::NAN], &[f64::NAN]).is_nan());
        assert!(HingeLoss::discriminator_loss(&[0.0], &[f64::NAN]).is_nan());
        assert!(HingeLoss::discriminator_loss(&[f64::NAN], &[-2.0]).is_nan());
        assert!(HingeLoss::generator_loss(&[f64::NAN, 1.0]).is_nan());
    }

    proptest! {
        #[test]
        fn prop_discriminator_loss_is_non_negative(
            real in prop::collection::vec(-10.0f64..10.0, 1..16),
            fake in prop::collection::vec(-10.0f64..10.0, 1..16),
        ) {
            prop_assert!(HingeLoss::discriminator_loss(&real, &fake) >= 0.0);
        }

        #[test]
        fn prop_derivative_matches_finite_difference(
            real in prop::collection::vec(-3.0f64..3.0, 1..8),
            fake in prop::collection::vec(-3.0f64..3.0, 1..8),
        ) {
            let h = 1e-7;
            let (dr, _) = HingeLoss::discriminator_derivative(&real, &fake);
            for i in 0..real.len() {
                // skip probes that straddle the hinge
                if (real[i] - 1.0).abs() < 1e-5 {
                    continue;
                }
                let mut plus = real.clone();
                plus[i] += h;
                let mut minus = real.clone();
                minus[i] -= h;
                let numeric = (HingeLoss::discriminator_loss(&plus, &fake) - HingeLoss::discriminator_loss(&minus, &fake)) / (2.0 * h);
                prop_assert!((numeric - dr[i]).abs() < 1e-6);
            }
        }
    }
}
