use rand::Rng;
use serde::{Serialize, Deserialize};
use std::f64::consts::PI;
use std::ops::{Add, Sub};

/// Dense row-major tensor of `f64` values.
///
/// Image batches use NCHW layout (`[batch, channels, height, width]`),
/// vectors per sample use `[batch, features]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tensor {
    pub shape: Vec<usize>,
    pub data: Vec<f64>,
}

impl Tensor {
    pub fn zeros(shape: &[usize]) -> Tensor {
        Tensor::full(shape, 0.0)
    }

    pub fn full(shape: &[usize], value: f64) -> Tensor {
        Tensor {
            shape: shape.to_vec(),
            data: vec![value; shape.iter().product()],
        }
    }

    pub fn from_data(shape: &[usize], data: Vec<f64>) -> Tensor {
        let numel: usize = shape.iter().product();
        if numel != data.len() {
            panic!("Tensor shape {:?} needs {} values, got {}", shape, numel, data.len())
        }
        Tensor { shape: shape.to_vec(), data }
    }

    /// Samples every entry from N(0, std²).
    pub fn randn<R: Rng + ?Sized>(shape: &[usize], std: f64, rng: &mut R) -> Tensor {
        let numel: usize = shape.iter().product();
        let data = (0..numel).map(|_| sample_standard_normal(rng) * std).collect();
        Tensor { shape: shape.to_vec(), data }
    }

    /// Samples from N(0, 1) and redraws every entry whose magnitude exceeds
    /// `threshold` (the truncation trick).
    pub fn truncated_randn<R: Rng + ?Sized>(shape: &[usize], threshold: f64, rng: &mut R) -> Tensor {
        assert!(threshold > 0.0, "truncation threshold must be positive");
        let numel: usize = shape.iter().product();
        let data = (0..numel)
            .map(|_| loop {
                let x = sample_standard_normal(rng);
                if x.abs() <= threshold {
                    break x;
                }
            })
            .collect();
        Tensor { shape: shape.to_vec(), data }
    }

    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// `(n, c, h, w)` of a 4-D tensor.
    pub fn dims4(&self) -> (usize, usize, usize, usize) {
        assert_eq!(self.shape.len(), 4, "expected NCHW tensor, got shape {:?}", self.shape);
        (self.shape[0], self.shape[1], self.shape[2], self.shape[3])
    }

    /// `(rows, cols)` of a 2-D tensor.
    pub fn dims2(&self) -> (usize, usize) {
        assert_eq!(self.shape.len(), 2, "expected 2-D tensor, got shape {:?}", self.shape);
        (self.shape[0], self.shape[1])
    }

    /// Number of values belonging to one sample (everything after dim 0).
    pub fn sample_len(&self) -> usize {
        self.shape[1..].iter().product()
    }

    pub fn sample(&self, i: usize) -> &[f64] {
        let len = self.sample_len();
        &self.data[i * len..(i + 1) * len]
    }

    pub fn reshape(mut self, shape: &[usize]) -> Tensor {
        assert_eq!(
            shape.iter().product::<usize>(),
            self.data.len(),
            "cannot reshape {:?} into {:?}",
            self.shape,
            shape
        );
        self.shape = shape.to_vec();
        self
    }

    pub fn map<F>(&self, functor: F) -> Tensor
    where
        F: Fn(f64) -> f64,
    {
        Tensor {
            shape: self.shape.clone(),
            data: self.data.iter().map(|&x| functor(x)).collect(),
        }
    }

    pub fn zip_map<F>(&self, other: &Tensor, functor: F) -> Tensor
    where
        F: Fn(f64, f64) -> f64,
    {
        assert_eq!(self.shape, other.shape, "Tensors are of incorrect sizes");
        Tensor {
            shape: self.shape.clone(),
            data: self.data.iter().zip(other.data.iter()).map(|(&a, &b)| functor(a, b)).collect(),
        }
    }

    pub fn add_assign(&mut self, other: &Tensor) {
        assert_eq!(self.shape, other.shape, "Tensors are of incorrect sizes");
        for (a, b) in self.data.iter_mut().zip(other.data.iter()) {
            *a += b;
        }
    }

    pub fn scale_assign(&mut self, factor: f64) {
        for x in self.data.iter_mut() {
            *x *= factor;
        }
    }

    pub fn fill(&mut self, value: f64) {
        for x in self.data.iter_mut() {
            *x = value;
        }
    }

    pub fn sum(&self) -> f64 {
        self.data.iter().sum()
    }

    pub fn mean(&self) -> f64 {
        if self.data.is_empty() {
            return 0.0;
        }
        self.sum() / self.data.len() as f64
    }

    pub fn dot(&self, other: &Tensor) -> f64 {
        assert_eq!(self.data.len(), other.data.len(), "Tensors are of incorrect sizes");
        self.data.iter().zip(other.data.iter()).map(|(a, b)| a * b).sum()
    }

    pub fn norm(&self) -> f64 {
        self.dot(self).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.data.iter().all(|x| x.is_finite())
    }

    /// Stacks two tensors along the batch dimension.
    pub fn concat_batch(a: &Tensor, b: &Tensor) -> Tensor {
        assert_eq!(a.shape[1..], b.shape[1..], "batch concat needs equal sample shapes");
        let mut shape = a.shape.clone();
        shape[0] += b.shape[0];
        let mut data = Vec::with_capacity(a.data.len() + b.data.len());
        data.extend_from_slice(&a.data);
        data.extend_from_slice(&b.data);
        Tensor { shape, data }
    }

    /// Splits off the first `n` samples: `(first n, rest)`.
    pub fn split_batch(&self, n: usize) -> (Tensor, Tensor) {
        assert!(n <= self.shape[0], "cannot split {} samples from batch of {}", n, self.shape[0]);
        let cut = n * self.sample_len();
        let mut head_shape = self.shape.clone();
        head_shape[0] = n;
        let mut tail_shape = self.shape.clone();
        tail_shape[0] -= n;
        (
            Tensor { shape: head_shape, data: self.data[..cut].to_vec() },
            Tensor { shape: tail_shape, data: self.data[cut..].to_vec() },
        )
    }

    /// Concatenates two `[N, *]` matrices along the feature axis.
    pub fn concat_cols(a: &Tensor, b: &Tensor) -> Tensor {
        let (n, p) = a.dims2();
        let (m, q) = b.dims2();
        assert_eq!(n, m, "column concat needs equal row counts");
        let mut data = Vec::with_capacity(n * (p + q));
        for i in 0..n {
            data.extend_from_slice(&a.data[i * p..(i + 1) * p]);
            data.extend_from_slice(&b.data[i * q..(i + 1) * q]);
        }
        Tensor { shape: vec![n, p + q], data }
    }

    /// Columns `start..start + len` of a `[N, *]` matrix.
    pub fn slice_cols(&self, start: usize, len: usize) -> Tensor {
        let (n, p) = self.dims2();
        assert!(start + len <= p, "column slice out of bounds");
        let mut data = Vec::with_capacity(n * len);
        for i in 0..n {
            data.extend_from_slice(&self.data[i * p + start..i * p + start + len]);
        }
        Tensor { shape: vec![n, len], data }
    }
}

impl Default for Tensor {
    fn default() -> Self {
        Tensor { shape: vec![0], data: vec![] }
    }
}

impl Add for Tensor {
    type Output = Tensor;

    fn add(mut self, rhs: Self) -> Self::Output {
        self.add_assign(&rhs);
        self
    }
}

impl Sub for Tensor {
    type Output = Tensor;

    fn sub(self, rhs: Self) -> Self::Output {
        self.zip_map(&rhs, |a, b| a - b)
    }
}

/// Samples a single value from N(0, 1) using the Box-Muller transform.
pub fn sample_standard_normal<R: Rng + ?Sized>(rng: &mut R) -> f64 {
    // Both uniforms in (0, 1] to avoid log(0).
    let u1: f64 = 1.0 - rng.gen::<f64>();
    let u2: f64 = 1.0 - rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * PI * u2).cos()
}
