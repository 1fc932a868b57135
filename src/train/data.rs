use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Serialize, Deserialize};

use crate::error::{GanError, Result};
use crate::math::tensor::Tensor;

/// Real images in `[-1, 1]` (NCHW) with their class labels.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub images: Tensor,
    pub labels: Vec<usize>,
}

/// Supplies training batches.
///
/// `next_batch` returns `GanError::DataExhaustion` when no full batch is
/// left in the current epoch; the trainer then calls `restart` and asks
/// again. Sources must never pad a short batch.
pub trait BatchSource {
    fn next_batch(&mut self, rng: &mut StdRng) -> Result<Batch>;
    fn restart(&mut self);
    fn num_classes(&self) -> usize;
}

/// `[0, 255]` bytes in NHWC order → `[-1, 1]` floats in NCHW order.
pub fn preprocess(pixels: &[u8], n: usize, height: usize, width: usize, channels: usize) -> Tensor {
    assert_eq!(pixels.len(), n * height * width * channels, "pixel buffer does not match NHWC shape");
    let hw = height * width;
    let mut out = Tensor::zeros(&[n, channels, height, width]);
    for i in 0..n {
        for p in 0..hw {
            for c in 0..channels {
                let src = pixels[(i * hw + p) * channels + c];
                out.data[(i * channels + c) * hw + p] = f64::from(src) / 127.5 - 1.0;
            }
        }
    }
    out
}

/// Inverse of [`preprocess`]: NCHW floats → NHWC bytes, clipped to `[0, 255]`.
pub fn postprocess(images: &Tensor) -> Vec<u8> {
    let (n, channels, height, width) = images.dims4();
    let hw = height * width;
    let mut out = vec![0u8; images.numel()];
    for i in 0..n {
        for c in 0..channels {
            for p in 0..hw {
                let v = images.data[(i * channels + c) * hw + p] * 127.5 + 127.5;
                out[(i * hw + p) * channels + c] = v.clamp(0.0, 255.0).round() as u8;
            }
        }
    }
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SamplingMode {
    /// Indices drawn uniformly with replacement; never exhausts.
    #[default]
    RandomSample,
    /// Shuffled passes without replacement; a trailing partial batch is
    /// dropped and reported as exhaustion.
    Epochs,
}

/// A labeled image set held in memory as NHWC bytes.
#[derive(Debug, Clone)]
pub struct InMemoryDataset {
    pixels: Vec<u8>,
    labels: Vec<usize>,
    height: usize,
    width: usize,
    channels: usize,
    batch_size: usize,
    mode: SamplingMode,
    num_classes: usize,
    order: Vec<usize>,
    cursor: usize,
    needs_shuffle: bool,
}

impl InMemoryDataset {
    pub fn new(
        pixels: Vec<u8>,
        labels: Vec<usize>,
        (height, width, channels): (usize, usize, usize),
        batch_size: usize,
        mode: SamplingMode,
    ) -> Result<InMemoryDataset> {
        let n = labels.len();
        if n == 0 || batch_size == 0 {
            return Err(GanError::Config("dataset and batch size must be non-empty".into()));
        }
        if pixels.len() != n * height * width * channels {
            return Err(GanError::ShapeMismatch(format!(
                "{} bytes cannot hold {} images of {}x{}x{}",
                pixels.len(),
                n,
                height,
                width,
                channels
            )));
        }
        // class count follows the largest label present
        let num_classes = labels.iter().copied().max().map_or(0, |m| m + 1);
        Ok(InMemoryDataset {
            pixels,
            labels,
            height,
            width,
            channels,
            batch_size,
            mode,
            num_classes,
            order: (0..n).collect(),
            cursor: 0,
            needs_shuffle: true,
        })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    fn gather(&self, indices: &[usize]) -> Batch {
        let image_len = self.height * self.width * self.channels;
        let mut pixels = Vec::with_capacity(indices.len() * image_len);
        for &i in indices {
            pixels.extend_from_slice(&self.pixels[i * image_len..(i + 1) * image_len]);
        }
        Batch {
            images: preprocess(&pixels, indices.len(), self.height, self.width, self.channels),
            labels: indices.iter().map(|&i| self.labels[i]).collect(),
        }
    }
}

impl BatchSource for InMemoryDataset {
    fn next_batch(&mut self, rng: &mut StdRng) -> Result<Batch> {
        match self.mode {
            SamplingMode::RandomSample => {
                let n = self.len();
                let indices: Vec<usize> = (0..self.batch_size).map(|_| rng.gen_range(0..n)).collect();
                Ok(self.gather(&indices))
            }
            SamplingMode::Epochs => {
                if self.needs_shuffle {
                    self.order.shuffle(rng);
                    self.needs_shuffle = false;
                }
                let end = self.cursor + self.batch_size;
                if end > self.order.len() {
                    return Err(GanError::DataExhaustion(format!(
                        "{} of {} images left, batch needs {}",
                        self.order.len() - self.cursor,
                        self.order.len(),
                        self.batch_size
                    )));
                }
                let indices = self.order[self.cursor..end].to_vec();
                self.cursor = end;
                Ok(self.gather(&indices))
            }
        }
    }

    fn restart(&mut self) {
        self.cursor = 0;
        self.needs_shuffle = true;
    }

    fn num_classes(&self) -> usize {
        self.num_classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    fn dataset(n: usize, batch_size: usize, mode: SamplingMode) -> InMemoryDataset {
        let pixels = (0..n * 2 * 2 * 3).map(|i| (i % 256) as u8).collect();
        let labels = (0..n).map(|i| i % 2).collect();
        InMemoryDataset::new(pixels, labels, (2, 2, 3), batch_size, mode).unwrap()
    }

    #[test]
    fn test_pre_and_postprocess_are_inverse() {
        let pixels: Vec<u8> = vec![0, 64, 128, 255, 1, 2];
        let t = preprocess(&pixels, 1, 1, 2, 3);
        assert_eq!(t.data[0], -1.0);
        assert_eq!(t.data[1], 1.0);
        assert_eq!(postprocess(&t), pixels);
    }

    #[test]
    fn test_postprocess_clips() {
        let t = Tensor::from_data(&[1, 1, 1, 2], vec![-3.0, 3.0]);
        assert_eq!(postprocess(&t), vec![0, 255]);
    }

    #[test]
    fn test_epochs_exhaust_and_restart() {
        let mut rng = StdRng::seed_from_u64(0);
        let mut ds = dataset(5, 2, SamplingMode::Epochs);
        let a = ds.next_batch(&mut rng).unwrap();
        let b = ds.next_batch(&mut rng).unwrap();
        assert_eq!(a.images.shape, vec![2, 3, 2, 2]);
        assert_eq!(a.labels.len() + b.labels.len(), 4);
        let err = ds.next_batch(&mut rng).unwrap_err();
        assert!(err.is_recoverable());
        ds.restart();
        assert!(ds.next_batch(&mut rng).is_ok());
    }

    #[test]
    fn test_random_sampling_never_exhausts() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut ds = dataset(3, 4, SamplingMode::RandomSample);
        for _ in 0..10 {
            let batch = ds.next_batch(&mut rng).unwrap();
            assert_eq!(batch.labels.len(), 4);
        }
        assert_eq!(ds.num_classes(), 2);
    }

    #[test]
    fn test_rejects_mismatched_pixels() {
        let err = InMemoryDataset::new(vec![0; 10], vec![0, 1], (2, 2, 3), 1, SamplingMode::Epochs).unwrap_err();
        assert!(matches!(err, GanError::ShapeMismatch(_)));
    }
}
