use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::math::tensor::sample_standard_normal;

/// Weight initialization scheme for convolution, linear and embedding
/// weights. Weights are viewed as `[fan_out, fan_in]` matrices, where
/// `fan_in` includes the kernel area for convolutions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InitScheme {
    /// Rows (or columns, whichever is shorter) orthonormal.
    #[default]
    Orthogonal,
    /// N(0, 0.02²).
    Normal02,
    /// Xavier (Glorot) normal: N(0, 2 / (fan_in + fan_out)).
    Xavier,
}

impl InitScheme {
    pub fn sample<R: Rng + ?Sized>(&self, fan_out: usize, fan_in: usize, rng: &mut R) -> Vec<f64> {
        match self {
            InitScheme::Orthogonal => orthogonal(fan_out, fan_in, rng),
            InitScheme::Normal02 => gaussian(fan_out * fan_in, 0.02, rng),
            InitScheme::Xavier => {
                let std_dev = (2.0 / (fan_in + fan_out) as f64).sqrt();
                gaussian(fan_out * fan_in, std_dev, rng)
            }
        }
    }
}

fn gaussian<R: Rng + ?Sized>(len: usize, std_dev: f64, rng: &mut R) -> Vec<f64> {
    (0..len).map(|_| sample_standard_normal(rng) * std_dev).collect()
}

/// Orthogonal initialization via Gram-Schmidt on a Gaussian matrix.
///
/// When `rows <= cols` the rows come out orthonormal, otherwise the columns.
fn orthogonal<R: Rng + ?Sized>(rows: usize, cols: usize, rng: &mut R) -> Vec<f64> {
    let (short, long) = if rows <= cols { (rows, cols) } else { (cols, rows) };
    let mut basis = gaussian(short * long, 1.0, rng);

    for i in 0..short {
        for j in 0..i {
            let proj: f64 = (0..long).map(|t| basis[i * long + t] * basis[j * long + t]).sum();
            for t in 0..long {
                basis[i * long + t] -= proj * basis[j * long + t];
            }
        }
        let norm = (0..long).map(|t| basis[i * long + t].powi(2)).sum::<f64>().sqrt();
        for t in 0..long {
            basis[i * long + t] /= norm.max(1e-12);
        }
    }

    if rows <= cols {
        basis
    } else {
        // basis is [cols, rows]; transpose into [rows, cols]
        let mut out = vec![0.0; rows * cols];
        for c in 0..cols {
            for r in 0..rows {
                out[r * cols + c] = basis[c * rows + r];
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn gram(w: &[f64], rows: usize, cols: usize) -> Vec<f64> {
        let mut g = vec![0.0; rows * rows];
        for i in 0..rows {
            for j in 0..rows {
                g[i * rows + j] = (0..cols).map(|t| w[i * cols + t] * w[j * cols + t]).sum();
            }
        }
        g
    }

    #[test]
    fn test_orthogonal_wide_has_orthonormal_rows() {
        let mut rng = StdRng::seed_from_u64(0);
        let w = InitScheme::Orthogonal.sample(4, 9, &mut rng);
        let g = gram(&w, 4, 9);
        for i in 0..4 {
            for j in 0..4 {
                let expected = if i == j { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(g[i * 4 + j], expected, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_orthogonal_tall_has_orthonormal_columns() {
        let mut rng = StdRng::seed_from_u64(1);
        let (rows, cols) = (6, 3);
        let w = InitScheme::Orthogonal.sample(rows, cols, &mut rng);
        for a in 0..cols {
            for b in 0..cols {
                let dot: f64 = (0..rows).map(|r| w[r * cols + a] * w[r * cols + b]).sum();
                let expected = if a == b { 1.0 } else { 0.0 };
                assert_abs_diff_eq!(dot, expected, epsilon = 1e-9);
            }
        }
    }

    #[test]
    fn test_normal02_scale() {
        let mut rng = StdRng::seed_from_u64(2);
        let w = InitScheme::Normal02.sample(100, 100, &mut rng);
        let var = w.iter().map(|x| x * x).sum::<f64>() / w.len() as f64;
        assert!((var.sqrt() - 0.02).abs() < 0.002);
    }
}
