use serde::{Serialize, Deserialize};

use crate::activation::ActivationFunction;
use crate::error::{GanError, Result};
use crate::math::init::InitScheme;

/// One stage of a generator or discriminator, in input → output order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BlockSpec {
    /// Generator residual block that doubles the resolution.
    Up { out_channels: usize },
    /// Discriminator residual block; halves the resolution when `downsample`.
    Down {
        out_channels: usize,
        #[serde(default = "default_true")]
        downsample: bool,
    },
    /// Self-attention at the current resolution; keeps the channel count.
    Attention,
}

fn default_true() -> bool {
    true
}

fn default_image_channels() -> usize {
    3
}

fn default_bottom_width() -> usize {
    4
}

fn default_bn_eps() -> f64 {
    1e-5
}

/// Declarative description of both networks, built once into a fixed
/// structure by `Generator::new` / `Discriminator::new`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArchitectureSpec {
    /// Square image side length.
    pub resolution: usize,
    #[serde(default = "default_image_channels")]
    pub image_channels: usize,
    pub num_classes: usize,
    pub latent_dim: usize,
    /// Width of the shared class embedding fed to every generator block.
    pub shared_dim: usize,
    /// Split the latent across generator blocks instead of feeding it
    /// only to the initial linear layer.
    #[serde(default = "default_true")]
    pub hierarchical: bool,
    #[serde(default = "default_bottom_width")]
    pub bottom_width: usize,
    /// Channels of the `bottom_width × bottom_width` map produced by the
    /// generator's initial linear layer.
    pub generator_base_channels: usize,
    pub generator_blocks: Vec<BlockSpec>,
    pub discriminator_blocks: Vec<BlockSpec>,
    #[serde(default = "default_true")]
    pub g_spectral_norm: bool,
    #[serde(default)]
    pub init: InitScheme,
    #[serde(default = "default_bn_eps")]
    pub bn_eps: f64,
    #[serde(default)]
    pub activation: ActivationFunction,
}

impl ArchitectureSpec {
    /// Standard BigGAN layout for 32, 64, 128 or 256 pixel images with
    /// channel multiplier `ch`.
    pub fn biggan(resolution: usize, num_classes: usize, ch: usize) -> Result<ArchitectureSpec> {
        // (generator widths, attention resolution, discriminator widths, latent dim)
        let (g_mult, g_attn, d_mult, latent_dim): (&[usize], usize, &[usize], usize) = match resolution {
            32 => (&[4, 4, 4, 4], 0, &[4, 4, 4, 4], 128),
            64 => (&[16, 16, 8, 4, 2], 32, &[1, 2, 4, 8, 16], 128),
            128 => (&[16, 16, 8, 4, 2, 1], 64, &[1, 2, 4, 8, 16, 16], 120),
            256 => (&[16, 16, 8, 8, 4, 2, 1], 128, &[1, 2, 4, 8, 8, 16, 16], 140),
            other => {
                return Err(GanError::Config(format!(
                    "no BigGAN layout for resolution {} (expected 32, 64, 128 or 256)",
                    other
                )))
            }
        };

        let mut generator_blocks = Vec::new();
        let mut res = 4;
        for &m in &g_mult[1..] {
            generator_blocks.push(BlockSpec::Up { out_channels: m * ch });
            res *= 2;
            if res == g_attn {
                generator_blocks.push(BlockSpec::Attention);
            }
        }

        // 32px keeps the last two blocks at 8×8; larger layouts only stop
        // downsampling in the final block.
        let n_down = if resolution == 32 { 2 } else { d_mult.len() - 1 };
        let mut discriminator_blocks = Vec::new();
        let mut res = resolution;
        for (i, &m) in d_mult.iter().enumerate() {
            let downsample = i < n_down;
            discriminator_blocks.push(BlockSpec::Down { out_channels: m * ch, downsample });
            if downsample {
                res /= 2;
                if res == g_attn {
                    discriminator_blocks.push(BlockSpec::Attention);
                }
            }
        }

        Ok(ArchitectureSpec {
            resolution,
            image_channels: 3,
            num_classes,
            latent_dim,
            shared_dim: 128,
            hierarchical: true,
            bottom_width: 4,
            generator_base_channels: g_mult[0] * ch,
            generator_blocks,
            discriminator_blocks,
            g_spectral_norm: true,
            init: InitScheme::Orthogonal,
            bn_eps: 1e-5,
            activation: ActivationFunction::ReLU,
        })
    }

    pub fn num_up_blocks(&self) -> usize {
        self.generator_blocks.iter().filter(|b| matches!(b, BlockSpec::Up { .. })).count()
    }

    /// Sizes of the latent chunks: the first feeds the initial linear layer,
    /// one more per up block. Without hierarchy the whole latent is one chunk.
    pub fn latent_chunks(&self) -> Vec<usize> {
        if !self.hierarchical {
            return vec![self.latent_dim];
        }
        let slots = self.num_up_blocks() + 1;
        let (base, extra) = (self.latent_dim / slots, self.latent_dim % slots);
        (0..slots).map(|i| base + usize::from(i < extra)).collect()
    }

    /// Width of the conditioning vector seen by each up block, in order.
    pub fn block_cond_dims(&self) -> Vec<usize> {
        if !self.hierarchical {
            return vec![self.shared_dim; self.num_up_blocks()];
        }
        self.latent_chunks()[1..].iter().map(|c| c + self.shared_dim).collect()
    }

    /// Rejects layouts that cannot be built or do not reach `resolution`.
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(GanError::Config(msg));
        if self.num_classes == 0 {
            return fail("num_classes must be at least 1".into());
        }
        if self.image_channels == 0 || self.shared_dim == 0 || self.generator_base_channels == 0 {
            return fail("channel and embedding widths must be positive".into());
        }
        if self.bn_eps.is_nan() || self.bn_eps <= 0.0 {
            return fail(format!("bn_eps must be positive, got {}", self.bn_eps));
        }

        let n_up = self.num_up_blocks();
        if n_up == 0 {
            return fail("generator needs at least one up block".into());
        }
        if self.generator_blocks.iter().any(|b| matches!(b, BlockSpec::Down { .. })) {
            return fail("generator blocks may only be `up` or `attention`".into());
        }
        let chunks = self.latent_chunks();
        if chunks.iter().any(|&c| c == 0) {
            return fail(format!("latent_dim {} is too small to split across {} chunks", self.latent_dim, chunks.len()));
        }
        if self.bottom_width << n_up != self.resolution {
            return fail(format!(
                "{} up blocks from a {}px bottom reach {}px, not {}px",
                n_up,
                self.bottom_width,
                self.bottom_width << n_up,
                self.resolution
            ));
        }

        let mut res = self.resolution;
        let mut has_down = false;
        for block in &self.discriminator_blocks {
            match block {
                BlockSpec::Up { .. } => return fail("discriminator blocks may only be `down` or `attention`".into()),
                BlockSpec::Down { out_channels, downsample } => {
                    if *out_channels == 0 {
                        return fail("discriminator block with zero channels".into());
                    }
                    if *downsample {
                        if res % 2 != 0 || res < 2 {
                            return fail(format!("cannot downsample a {}px feature map", res));
                        }
                        res /= 2;
                    }
                    has_down = true;
                }
                BlockSpec::Attention if !has_down => {
                    return fail("discriminator attention must follow a down block".into())
                }
                BlockSpec::Attention => {}
            }
        }
        if !has_down {
            return fail("discriminator needs at least one down block".into());
        }
        if self.generator_blocks.iter().any(|b| matches!(b, BlockSpec::Up { out_channels: 0 })) {
            return fail("generator block with zero channels".into());
        }
        Ok(())
    }
}

/// Small 8px layout with attention in both networks, for unit tests.
#[cfg(test)]
pub(crate) fn tiny_spec() -> ArchitectureSpec {
    ArchitectureSpec {
        resolution: 8,
        image_channels: 3,
        num_classes: 2,
        latent_dim: 12,
        shared_dim: 4,
        hierarchical: true,
        bottom_width: 2,
        generator_base_channels: 8,
        generator_blocks: vec![BlockSpec::Up { out_channels: 8 }, BlockSpec::Attention, BlockSpec::Up { out_channels: 4 }],
        discriminator_blocks: vec![
            BlockSpec::Down { out_channels: 4, downsample: true },
            BlockSpec::Attention,
            BlockSpec::Down { out_channels: 8, downsample: true },
            BlockSpec::Down { out_channels: 8, downsample: false },
        ],
        g_spectral_norm: true,
        init: InitScheme::Orthogonal,
        bn_eps: 1e-5,
        activation: ActivationFunction::ReLU,
    }
}
