use rand::rngs::StdRng;
use serde::{Serialize, Deserialize};

use crate::activation::ActivationFunction;
use crate::error::{GanError, Result};
use crate::layers::attention::SelfAttention;
use crate::layers::batch_norm::BatchNorm2d;
use crate::layers::conv::Conv2d;
use crate::layers::embedding::Embedding;
use crate::layers::linear::Linear;
use crate::layers::module::{Mode, Module, Param};
use crate::layers::residual::{BlockConfig, UpBlock};
use crate::math::tensor::Tensor;
use crate::network::network::Network;
use crate::network::spec::{ArchitectureSpec, BlockSpec};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneratorStage {
    Up(UpBlock),
    Attention(SelfAttention),
}

/// Class-conditional image generator.
///
/// `latent [N, latent_dim]` and `labels [N]` → images `[N, C, R, R]` in
/// `[-1, 1]`. With a hierarchical latent, chunk 0 feeds the initial linear
/// layer and chunk `i + 1` joins the shared class embedding to condition up
/// block `i`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generator {
    pub spec: ArchitectureSpec,
    pub shared: Embedding,
    pub linear: Linear,
    pub stages: Vec<GeneratorStage>,
    pub output_bn: BatchNorm2d,
    pub output_conv: Conv2d,
    #[serde(skip)]
    cache: Option<OutputCache>,
}

#[derive(Debug, Clone)]
struct OutputCache {
    normalized: Tensor,
    logits: Tensor,
}

impl Generator {
    pub fn new(spec: &ArchitectureSpec, rng: &mut StdRng) -> Result<Generator> {
        spec.validate()?;
        let sn = spec.g_spectral_norm;
        let cfg = BlockConfig { spectral_norm: sn, init: spec.init, activation: spec.activation, bn_eps: spec.bn_eps };
        let chunks = spec.latent_chunks();
        let cond_dims = spec.block_cond_dims();
        let bw = spec.bottom_width;

        let shared = Embedding::new(spec.num_classes, spec.shared_dim, false, spec.init, rng);
        let linear = Linear::new(chunks[0], spec.generator_base_channels * bw * bw, true, sn, spec.init, rng);

        let mut channels = spec.generator_base_channels;
        let mut up_index = 0;
        let mut stages = Vec::with_capacity(spec.generator_blocks.len());
        for block in &spec.generator_blocks {
            match *block {
                BlockSpec::Up { out_channels } => {
                    stages.push(GeneratorStage::Up(UpBlock::new(channels, out_channels, cond_dims[up_index], cfg, rng)));
                    channels = out_channels;
                    up_index += 1;
                }
                BlockSpec::Attention => {
                    stages.push(GeneratorStage::Attention(SelfAttention::new(channels, sn, spec.init, rng)));
                }
                BlockSpec::Down { .. } => unreachable!("validated: generator has no down blocks"),
            }
        }

        Ok(Generator {
            spec: spec.clone(),
            shared,
            linear,
            stages,
            output_bn: BatchNorm2d::new(channels, spec.bn_eps),
            output_conv: Conv2d::new(channels, spec.image_channels, 3, true, sn, spec.init, rng),
            cache: None,
        })
    }

    fn check_inputs(&self, latents: &Tensor, labels: &[usize]) -> Result<usize> {
        if latents.shape.len() != 2 || latents.shape[1] != self.spec.latent_dim {
            return Err(GanError::ShapeMismatch(format!(
                "latents have shape {:?}, expected [N, {}]",
                latents.shape, self.spec.latent_dim
            )));
        }
        let n = latents.shape[0];
        if n == 0 || labels.len() != n {
            return Err(GanError::ShapeMismatch(format!("{} latents but {} labels", n, labels.len())));
        }
        self.shared.check_labels(labels)?;
        Ok(n)
    }

    /// Runs the generator. `Mode::Eval` uses running batch-norm statistics
    /// and frozen spectral norms, so each output depends only on its own
    /// latent and label.
    pub fn generate(&mut self, latents: &Tensor, labels: &[usize], mode: Mode) -> Result<Tensor> {
        let n = self.check_inputs(latents, labels)?;
        let shared = self.shared.forward(labels, mode)?;

        let chunks = self.spec.latent_chunks();
        let (z0, conds) = if self.spec.hierarchical {
            let mut offset = chunks[0];
            let conds: Vec<Tensor> = chunks[1..]
                .iter()
                .map(|&len| {
                    let chunk = latents.slice_cols(offset, len);
                    offset += len;
                    Tensor::concat_cols(&chunk, &shared)
                })
                .collect();
            (latents.slice_cols(0, chunks[0]), conds)
        } else {
            (latents.clone(), vec![shared; self.spec.num_up_blocks()])
        };

        let bw = self.spec.bottom_width;
        let mut h = self
            .linear
            .forward(&z0, mode)
            .reshape(&[n, self.spec.generator_base_channels, bw, bw]);
        let mut conds = conds.iter();
        for stage in self.stages.iter_mut() {
            h = match stage {
                GeneratorStage::Up(block) => {
                    let cond = conds.next().expect("one conditioning vector per up block");
                    block.forward(&h, cond, mode)
                }
                GeneratorStage::Attention(attn) => attn.forward(&h, mode),
            };
        }

        let normalized = self.output_bn.forward(&h, mode);
        let logits = self.output_conv.forward(&self.spec.activation.forward(&normalized), mode);
        let images = ActivationFunction::Tanh.forward(&logits);
        self.cache = (mode == Mode::Train).then_some(OutputCache { normalized, logits });
        Ok(images)
    }

    /// Backpropagates `∂L/∂images` through the last training-mode
    /// `generate`, accumulating parameter gradients. Latent gradients are
    /// discarded.
    pub fn backward(&mut self, grad: &Tensor) {
        let cache = self.cache.take().expect("Generator::backward called without a training-mode generate");
        let g = ActivationFunction::Tanh.backward(&cache.logits, grad);
        let g = self.output_conv.backward(&g);
        let g = self.spec.activation.backward(&cache.normalized, &g);
        let mut g = self.output_bn.backward(&g);

        let n = g.shape[0];
        let shared_dim = self.spec.shared_dim;
        let mut d_shared = Tensor::zeros(&[n, shared_dim]);
        for stage in self.stages.iter_mut().rev() {
            g = match stage {
                GeneratorStage::Up(block) => {
                    let (dx, dcond) = block.backward(&g);
                    let (_, width) = dcond.dims2();
                    d_shared.add_assign(&dcond.slice_cols(width - shared_dim, shared_dim));
                    dx
                }
                GeneratorStage::Attention(attn) => attn.backward(&g),
            };
        }

        let flat = g.numel() / n;
        self.linear.backward(&g.reshape(&[n, flat]));
        self.shared.backward(&d_shared);
    }
}

impl Module for Generator {
    fn params(&self) -> Vec<&Param> {
        let mut p = self.shared.params();
        p.extend(self.linear.params());
        for stage in &self.stages {
            match stage {
                GeneratorStage::Up(b) => p.extend(b.params()),
                GeneratorStage::Attention(a) => p.extend(a.params()),
            }
        }
        p.extend(self.output_bn.params());
        p.extend(self.output_conv.params());
        p
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        let mut p = self.shared.params_mut();
        p.extend(self.linear.params_mut());
        for stage in self.stages.iter_mut() {
            match stage {
                GeneratorStage::Up(b) => p.extend(b.params_mut()),
                GeneratorStage::Attention(a) => p.extend(a.params_mut()),
            }
        }
        p.extend(self.output_bn.params_mut());
        p.extend(self.output_conv.params_mut());
        p
    }

    fn buffers(&self) -> Vec<&Tensor> {
        let mut b = self.shared.buffers();
        b.extend(self.linear.buffers());
        for stage in &self.stages {
            match stage {
                GeneratorStage::Up(u) => b.extend(u.buffers()),
                GeneratorStage::Attention(a) => b.extend(a.buffers()),
            }
        }
        b.extend(self.output_bn.buffers());
        b.extend(self.output_conv.buffers());
        b
    }

    fn buffers_mut(&mut self) -> Vec<&mut Tensor> {
        let mut b = self.shared.buffers_mut();
        b.extend(self.linear.buffers_mut());
        for stage in self.stages.iter_mut() {
            match stage {
                GeneratorStage::Up(u) => b.extend(u.buffers_mut()),
                GeneratorStage::Attention(a) => b.extend(a.buffers_mut()),
            }
        }
        b.extend(self.output_bn.buffers_mut());
        b.extend(self.output_conv.buffers_mut());
        b
    }
}

impl Network for Generator {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::spec::tiny_spec;
    use rand::SeedableRng;

    #[test]
    fn test_output_shape_and_range() {
        let spec = tiny_spec();
        let mut rng = StdRng::seed_from_u64(0);
        let mut g = Generator::new(&spec, &mut rng).unwrap();
        let z = Tensor::randn(&[3, spec.latent_dim], 1.0, &mut rng);
        let images = g.generate(&z, &[0, 1, 1], Mode::Train).unwrap();
        assert_eq!(images.shape, vec![3, 3, spec.resolution, spec.resolution]);
        assert!(images.data.iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn test_eval_is_deterministic() {
        let spec = tiny_spec();
        let mut rng = StdRng::seed_from_u64(1);
        let mut g = Generator::new(&spec, &mut rng).unwrap();
        let z = Tensor::randn(&[2, spec.latent_dim], 1.0, &mut rng);
        let a = g.generate(&z, &[1, 0], Mode::Eval).unwrap();
        let b = g.generate(&z, &[1, 0], Mode::Eval).unwrap();
        assert_eq!(a, b);

        // and independent of the rest of the batch
        let (first, _) = z.split_batch(1);
        let alone = g.generate(&first, &[1], Mode::Eval).unwrap();
        assert_eq!(a.split_batch(1).0, alone);
    }

    #[test]
    fn test_shape_errors() {
        let spec = tiny_spec();
        let mut rng = StdRng::seed_from_u64(2);
        let mut g = Generator::new(&spec, &mut rng).unwrap();
        let z = Tensor::randn(&[2, spec.latent_dim + 1], 1.0, &mut rng);
        assert!(matches!(g.generate(&z, &[0, 1], Mode::Eval), Err(GanError::ShapeMismatch(_))));
        let z = Tensor::randn(&[2, spec.latent_dim], 1.0, &mut rng);
        assert!(matches!(g.generate(&z, &[0], Mode::Eval), Err(GanError::ShapeMismatch(_))));
        assert!(matches!(g.generate(&z, &[0, spec.num_classes], Mode::Eval), Err(GanError::ShapeMismatch(_))));
    }

    #[test]
    fn test_backward_reaches_every_parameter() {
        let spec = tiny_spec();
        let mut rng = StdRng::seed_from_u64(3);
        let mut g = Generator::new(&spec, &mut rng).unwrap();
        g.zero_grad();
        let z = Tensor::randn(&[4, spec.latent_dim], 1.0, &mut rng);
        let images = g.generate(&z, &[0, 1, 0, 1], Mode::Train).unwrap();
        g.backward(&Tensor::randn(&images.shape, 1.0, &mut rng));
        assert!(g.grads_are_finite());
        // attention gain starts at zero, but its own gradient does not
        let touched = g.params().iter().filter(|p| p.grad().data.iter().any(|v| *v != 0.0)).count();
        assert!(touched >= g.params().len() - 4, "{} of {} params received gradient", touched, g.params().len());
    }

    #[test]
    fn test_json_round_trip_preserves_outputs() {
        let spec = tiny_spec();
        let mut rng = StdRng::seed_from_u64(4);
        let mut g = Generator::new(&spec, &mut rng).unwrap();
        let z = Tensor::randn(&[2, spec.latent_dim], 1.0, &mut rng);
        g.generate(&z, &[0, 1], Mode::Train).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("g.json");
        g.save_json(&path).unwrap();
        let mut back = Generator::load_json(&path).unwrap();
        assert_eq!(g.generate(&z, &[0, 1], Mode::Eval).unwrap(), back.generate(&z, &[0, 1], Mode::Eval).unwrap());
    }
}
