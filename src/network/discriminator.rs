use rand::rngs::StdRng;
use serde::{Serialize, Deserialize};

use crate::error::{GanError, Result};
use crate::layers::attention::SelfAttention;
use crate::layers::embedding::Embedding;
use crate::layers::linear::Linear;
use crate::layers::module::{Mode, Module, Param};
use crate::layers::residual::{BlockConfig, DownBlock};
use crate::math::ops::{global_sum_pool, global_sum_pool_backward};
use crate::math::tensor::Tensor;
use crate::network::network::Network;
use crate::network::spec::{ArchitectureSpec, BlockSpec};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscriminatorStage {
    Down(DownBlock),
    Attention(SelfAttention),
}

/// Projection discriminator: `score = linear(φ(x)) + ⟨embed(y), φ(x)⟩`,
/// where `φ` is the residual trunk followed by activation and global sum
/// pooling. Every weight is spectrally normalized and there is no batch
/// normalization, so a sample's score never depends on its batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Discriminator {
    pub spec: ArchitectureSpec,
    pub stages: Vec<DiscriminatorStage>,
    pub linear: Linear,
    pub embed: Embedding,
    #[serde(skip)]
    cache: Option<HeadCache>,
}

#[derive(Debug, Clone)]
struct HeadCache {
    trunk: Tensor,
    features: Tensor,
    class_embedding: Tensor,
}

impl Discriminator {
    pub fn new(spec: &ArchitectureSpec, rng: &mut StdRng) -> Result<Discriminator> {
        spec.validate()?;
        let cfg = BlockConfig { spectral_norm: true, init: spec.init, activation: spec.activation, bn_eps: spec.bn_eps };

        let mut channels = spec.image_channels;
        let mut stages = Vec::with_capacity(spec.discriminator_blocks.len());
        for block in &spec.discriminator_blocks {
            match *block {
                BlockSpec::Down { out_channels, downsample } => {
                    let preactivation = !stages.is_empty();
                    stages.push(DiscriminatorStage::Down(DownBlock::new(
                        channels,
                        out_channels,
                        preactivation,
                        downsample,
                        cfg,
                        rng,
                    )));
                    channels = out_channels;
                }
                BlockSpec::Attention => {
                    stages.push(DiscriminatorStage::Attention(SelfAttention::new(channels, true, spec.init, rng)));
                }
                BlockSpec::Up { .. } => unreachable!("validated: discriminator has no up blocks"),
            }
        }

        Ok(Discriminator {
            spec: spec.clone(),
            stages,
            linear: Linear::new(channels, 1, true, true, spec.init, rng),
            embed: Embedding::new(spec.num_classes, channels, true, spec.init, rng),
            cache: None,
        })
    }

    fn check_inputs(&self, images: &Tensor, labels: &[usize]) -> Result<usize> {
        let r = self.spec.resolution;
        let expected = [images.shape.first().copied().unwrap_or(0), self.spec.image_channels, r, r];
        if images.shape != expected {
            return Err(GanError::ShapeMismatch(format!("images have shape {:?}, expected {:?}", images.shape, expected)));
        }
        let n = images.shape[0];
        if n == 0 || labels.len() != n {
            return Err(GanError::ShapeMismatch(format!("{} images but {} labels", n, labels.len())));
        }
        self.embed.check_labels(labels)?;
        Ok(n)
    }

    /// One score per image.
    pub fn discriminate(&mut self, images: &Tensor, labels: &[usize], mode: Mode) -> Result<Vec<f64>> {
        let n = self.check_inputs(images, labels)?;
        let mut h = images.clone();
        for stage in self.stages.iter_mut() {
            h = match stage {
                DiscriminatorStage::Down(block) => block.forward(&h, mode),
                DiscriminatorStage::Attention(attn) => attn.forward(&h, mode),
            };
        }

        let features = global_sum_pool(&self.spec.activation.forward(&h));
        let (_, c) = features.dims2();
        let class_embedding = self.embed.forward(labels, mode)?;
        let unconditional = self.linear.forward(&features, mode);
        let scores = (0..n)
            .map(|i| {
                let f = &features.data[i * c..(i + 1) * c];
                let e = &class_embedding.data[i * c..(i + 1) * c];
                unconditional.data[i] + f.iter().zip(e.iter()).map(|(a, b)| a * b).sum::<f64>()
            })
            .collect();

        self.cache = match mode {
            Mode::Train => Some(HeadCache { trunk: h, features, class_embedding }),
            Mode::Eval => None,
        };
        Ok(scores)
    }

    /// Backpropagates `∂L/∂score` through the last training-mode
    /// `discriminate` and returns `∂L/∂images`. Frozen parameters keep their
    /// accumulators untouched.
    pub fn backward(&mut self, grad_scores: &[f64]) -> Tensor {
        let cache = self.cache.take().expect("Discriminator::backward called without a training-mode discriminate");
        let (n, c) = cache.features.dims2();
        assert_eq!(grad_scores.len(), n, "one score gradient per sample");

        let mut d_features = self.linear.backward(&Tensor::from_data(&[n, 1], grad_scores.to_vec()));
        let mut d_embedding = Tensor::zeros(&[n, c]);
        for (i, &g) in grad_scores.iter().enumerate() {
            for j in 0..c {
                d_features.data[i * c + j] += g * cache.class_embedding.data[i * c + j];
                d_embedding.data[i * c + j] = g * cache.features.data[i * c + j];
            }
        }
        self.embed.backward(&d_embedding);

        let (_, _, h, w) = cache.trunk.dims4();
        let mut g = self.spec.activation.backward(&cache.trunk, &global_sum_pool_backward(&d_features, h, w));
        for stage in self.stages.iter_mut().rev() {
            g = match stage {
                DiscriminatorStage::Down(block) => block.backward(&g),
                DiscriminatorStage::Attention(attn) => attn.backward(&g),
            };
        }
        g
    }
}

impl Module for Discriminator {
    fn params(&self) -> Vec<&Param> {
        let mut p = Vec::new();
        for stage in &self.stages {
            match stage {
                DiscriminatorStage::Down(b) => p.extend(b.params()),
                DiscriminatorStage::Attention(a) => p.extend(a.params()),
            }
        }
        p.extend(self.linear.params());
        p.extend(self.embed.params());
        p
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        let mut p = Vec::new();
        for stage in self.stages.iter_mut() {
            match stage {
                DiscriminatorStage::Down(b) => p.extend(b.params_mut()),
                DiscriminatorStage::Attention(a) => p.extend(a.params_mut()),
            }
        }
        p.extend(self.linear.params_mut());
        p.extend(self.embed.params_mut());
        p
    }

    fn buffers(&self) -> Vec<&Tensor> {
        let mut b = Vec::new();
        for stage in &self.stages {
            match stage {
                DiscriminatorStage::Down(d) => b.extend(d.buffers()),
                DiscriminatorStage::Attention(a) => b.extend(a.buffers()),
            }
        }
        b.extend(self.linear.buffers());
        b.extend(self.embed.buffers());
        b
    }

    fn buffers_mut(&mut self) -> Vec<&mut Tensor> {
        let mut b = Vec::new();
        for stage in self.stages.iter_mut() {
            match stage {
                DiscriminatorStage::Down(d) => b.extend(d.buffers_mut()),
                DiscriminatorStage::Attention(a) => b.extend(a.buffers_mut()),
            }
        }
        b.extend(self.linear.buffers_mut());
        b.extend(self.embed.buffers_mut());
        b
    }
}

impl Network for Discriminator {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::spec::tiny_spec;
    use rand::SeedableRng;

    #[test]
    fn test_scores_are_batch_independent() {
        let spec = tiny_spec();
        let mut rng = StdRng::seed_from_u64(0);
        let mut d = Discriminator::new(&spec, &mut rng).unwrap();
        let images = Tensor::randn(&[3, 3, 8, 8], 0.5, &mut rng);
        let labels = [1, 0, 1];
        // a training pass first so the spectral norms have moved
        d.discriminate(&images, &labels, Mode::Train).unwrap();

        let together = d.discriminate(&images, &labels, Mode::Eval).unwrap();
        for i in 0..3 {
            let one = Tensor::from_data(&[1, 3, 8, 8], images.sample(i).to_vec());
            let alone = d.discriminate(&one, &labels[i..i + 1], Mode::Eval).unwrap();
            assert_eq!(alone[0], together[i]);
        }
    }

    #[test]
    fn test_label_changes_score() {
        let spec = tiny_spec();
        let mut rng = StdRng::seed_from_u64(1);
        let mut d = Discriminator::new(&spec, &mut rng).unwrap();
        let images = Tensor::randn(&[1, 3, 8, 8], 0.5, &mut rng);
        let a = d.discriminate(&images, &[0], Mode::Eval).unwrap();
        let b = d.discriminate(&images, &[1], Mode::Eval).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_rejects_wrong_resolution_and_labels() {
        let spec = tiny_spec();
        let mut rng = StdRng::seed_from_u64(2);
        let mut d = Discriminator::new(&spec, &mut rng).unwrap();
        let small = Tensor::randn(&[2, 3, 4, 4], 1.0, &mut rng);
        assert!(matches!(d.discriminate(&small, &[0, 1], Mode::Eval), Err(GanError::ShapeMismatch(_))));
        let images = Tensor::randn(&[2, 3, 8, 8], 1.0, &mut rng);
        assert!(matches!(d.discriminate(&images, &[0, 2], Mode::Eval), Err(GanError::ShapeMismatch(_))));
        assert!(d.discriminate(&images, &[0, 1], Mode::Eval).is_ok());
    }

    #[test]
    fn test_frozen_discriminator_passes_gradient_without_accumulating() {
        let spec = tiny_spec();
        let mut rng = StdRng::seed_from_u64(3);
        let mut d = Discriminator::new(&spec, &mut rng).unwrap();
        d.zero_grad();
        d.set_requires_grad(false);
        let images = Tensor::randn(&[2, 3, 8, 8], 0.5, &mut rng);
        d.discriminate(&images, &[0, 1], Mode::Train).unwrap();
        let dx = d.backward(&[1.0, -1.0]);
        assert_eq!(dx.shape, images.shape);
        assert!(dx.data.iter().any(|v| *v != 0.0));
        assert!(d.params().iter().all(|p| p.grad().data.iter().all(|v| *v == 0.0)));
    }
}
