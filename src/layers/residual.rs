use rand::rngs::StdRng;
use serde::{Serialize, Deserialize};

use crate::activation::ActivationFunction;
use crate::layers::batch_norm::ConditionalBatchNorm2d;
use crate::layers::conv::Conv2d;
use crate::layers::module::{Mode, Module, Param};
use crate::math::init::InitScheme;
use crate::math::ops::{avg_pool2x, avg_pool2x_backward, upsample_nearest2x, upsample_nearest2x_backward};
use crate::math::tensor::Tensor;

/// Shared construction settings for residual blocks.
#[derive(Debug, Clone, Copy)]
pub struct BlockConfig {
    pub spectral_norm: bool,
    pub init: InitScheme,
    pub activation: ActivationFunction,
    pub bn_eps: f64,
}

// ---------------------------------------------------------------------------
// Generator block
// ---------------------------------------------------------------------------

/// CBN → act → up 2× → conv3 → CBN → act → conv3, plus `up(x)` on the skip
/// path (projected by a 1×1 conv when the channel count changes).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpBlock {
    pub in_channels: usize,
    pub out_channels: usize,
    pub bn1: ConditionalBatchNorm2d,
    pub conv1: Conv2d,
    pub bn2: ConditionalBatchNorm2d,
    pub conv2: Conv2d,
    pub shortcut: Option<Conv2d>,
    pub activation: ActivationFunction,
    #[serde(skip)]
    cache: Option<(Tensor, Tensor)>,
}

impl UpBlock {
    pub fn new(in_channels: usize, out_channels: usize, cond_dim: usize, cfg: BlockConfig, rng: &mut StdRng) -> UpBlock {
        let sn = cfg.spectral_norm;
        UpBlock {
            in_channels,
            out_channels,
            bn1: ConditionalBatchNorm2d::new(in_channels, cond_dim, cfg.bn_eps, sn, cfg.init, rng),
            conv1: Conv2d::new(in_channels, out_channels, 3, true, sn, cfg.init, rng),
            bn2: ConditionalBatchNorm2d::new(out_channels, cond_dim, cfg.bn_eps, sn, cfg.init, rng),
            conv2: Conv2d::new(out_channels, out_channels, 3, true, sn, cfg.init, rng),
            shortcut: (in_channels != out_channels).then(|| Conv2d::new(in_channels, out_channels, 1, true, sn, cfg.init, rng)),
            activation: cfg.activation,
            cache: None,
        }
    }

    /// `[N, C_in, H, W] → [N, C_out, 2H, 2W]`
    pub fn forward(&mut self, x: &Tensor, cond: &Tensor, mode: Mode) -> Tensor {
        let pre1 = self.bn1.forward(x, cond, mode);
        let h = upsample_nearest2x(&self.activation.forward(&pre1));
        let h = self.conv1.forward(&h, mode);
        let pre2 = self.bn2.forward(&h, cond, mode);
        let mut out = self.conv2.forward(&self.activation.forward(&pre2), mode);

        let skip = upsample_nearest2x(x);
        let skip = match self.shortcut.as_mut() {
            Some(sc) => sc.forward(&skip, mode),
            None => skip,
        };
        out.add_assign(&skip);

        self.cache = (mode == Mode::Train).then_some((pre1, pre2));
        out
    }

    /// Returns `(∂L/∂x, ∂L/∂cond)`.
    pub fn backward(&mut self, grad: &Tensor) -> (Tensor, Tensor) {
        let (pre1, pre2) = self.cache.take().expect("UpBlock::backward called without a training-mode forward");

        let g = self.conv2.backward(grad);
        let g = self.activation.backward(&pre2, &g);
        let (g, mut dcond) = self.bn2.backward(&g);
        let g = upsample_nearest2x_backward(&self.conv1.backward(&g));
        let g = self.activation.backward(&pre1, &g);
        let (mut dx, dcond1) = self.bn1.backward(&g);
        dcond.add_assign(&dcond1);

        let g_skip = match self.shortcut.as_mut() {
            Some(sc) => sc.backward(grad),
            None => grad.clone(),
        };
        dx.add_assign(&upsample_nearest2x_backward(&g_skip));
        (dx, dcond)
    }
}

impl Module for UpBlock {
    fn params(&self) -> Vec<&Param> {
        let mut p = self.bn1.params();
        p.extend(self.conv1.params());
        p.extend(self.bn2.params());
        p.extend(self.conv2.params());
        if let Some(sc) = &self.shortcut {
            p.extend(sc.params());
        }
        p
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        let mut p = self.bn1.params_mut();
        p.extend(self.conv1.params_mut());
        p.extend(self.bn2.params_mut());
        p.extend(self.conv2.params_mut());
        if let Some(sc) = self.shortcut.as_mut() {
            p.extend(sc.params_mut());
        }
        p
    }

    fn buffers(&self) -> Vec<&Tensor> {
        let mut b = self.bn1.buffers();
        b.extend(self.conv1.buffers());
        b.extend(self.bn2.buffers());
        b.extend(self.conv2.buffers());
        if let Some(sc) = &self.shortcut {
            b.extend(sc.buffers());
        }
        b
    }

    fn buffers_mut(&mut self) -> Vec<&mut Tensor> {
        let mut b = self.bn1.buffers_mut();
        b.extend(self.conv1.buffers_mut());
        b.extend(self.bn2.buffers_mut());
        b.extend(self.conv2.buffers_mut());
        if let Some(sc) = self.shortcut.as_mut() {
            b.extend(sc.buffers_mut());
        }
        b
    }
}

// ---------------------------------------------------------------------------
// Discriminator block
// ---------------------------------------------------------------------------

/// [act] → conv3 → act → conv3 → [avg-pool 2×2], plus a skip path that is
/// projected whenever channels change or the block downsamples.
///
/// Without preactivation (the first discriminator block) the skip path is
/// pooled before the projection; otherwise it is projected first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownBlock {
    pub in_channels: usize,
    pub out_channels: usize,
    pub preactivation: bool,
    pub downsample: bool,
    pub conv1: Conv2d,
    pub conv2: Conv2d,
    pub shortcut: Option<Conv2d>,
    pub activation: ActivationFunction,
    #[serde(skip)]
    cache: Option<DownCache>,
}

#[derive(Debug, Clone)]
struct DownCache {
    input: Tensor,
    pre: Tensor,
}

impl DownBlock {
    pub fn new(
        in_channels: usize,
        out_channels: usize,
        preactivation: bool,
        downsample: bool,
        cfg: BlockConfig,
        rng: &mut StdRng,
    ) -> DownBlock {
        let sn = cfg.spectral_norm;
        let learnable_sc = in_channels != out_channels || downsample;
        DownBlock {
            in_channels,
            out_channels,
            preactivation,
            downsample,
            conv1: Conv2d::new(in_channels, out_channels, 3, true, sn, cfg.init, rng),
            conv2: Conv2d::new(out_channels, out_channels, 3, true, sn, cfg.init, rng),
            shortcut: learnable_sc.then(|| Conv2d::new(in_channels, out_channels, 1, true, sn, cfg.init, rng)),
            activation: cfg.activation,
            cache: None,
        }
    }

    fn pool(&self, x: Tensor) -> Tensor {
        if self.downsample { avg_pool2x(&x) } else { x }
    }

    fn pool_backward(&self, grad: Tensor) -> Tensor {
        if self.downsample { avg_pool2x_backward(&grad) } else { grad }
    }

    fn skip_forward(&mut self, x: &Tensor, mode: Mode) -> Tensor {
        if self.preactivation {
            let s = match self.shortcut.as_mut() {
                Some(sc) => sc.forward(x, mode),
                None => x.clone(),
            };
            self.pool(s)
        } else {
            let s = self.pool(x.clone());
            match self.shortcut.as_mut() {
                Some(sc) => sc.forward(&s, mode),
                None => s,
            }
        }
    }

    fn skip_backward(&mut self, grad: &Tensor) -> Tensor {
        if self.preactivation {
            let g = self.pool_backward(grad.clone());
            match self.shortcut.as_mut() {
                Some(sc) => sc.backward(&g),
                None => g,
            }
        } else {
            let g = match self.shortcut.as_mut() {
                Some(sc) => sc.backward(grad),
                None => grad.clone(),
            };
            self.pool_backward(g)
        }
    }

    /// `[N, C_in, H, W] → [N, C_out, H/2, W/2]` (or same size without
    /// downsampling).
    pub fn forward(&mut self, x: &Tensor, mode: Mode) -> Tensor {
        let h = if self.preactivation { self.activation.forward(x) } else { x.clone() };
        let pre = self.conv1.forward(&h, mode);
        let h = self.conv2.forward(&self.activation.forward(&pre), mode);
        let mut out = self.pool(h);
        out.add_assign(&self.skip_forward(x, mode));

        self.cache = match mode {
            Mode::Train => Some(DownCache { input: x.clone(), pre }),
            Mode::Eval => None,
        };
        out
    }

    pub fn backward(&mut self, grad: &Tensor) -> Tensor {
        let cache = self.cache.take().expect("DownBlock::backward called without a training-mode forward");

        let g = self.pool_backward(grad.clone());
        let g = self.conv2.backward(&g);
        let g = self.activation.backward(&cache.pre, &g);
        let g = self.conv1.backward(&g);
        let mut dx = if self.preactivation { self.activation.backward(&cache.input, &g) } else { g };

        dx.add_assign(&self.skip_backward(grad));
        dx
    }
}

impl Module for DownBlock {
    fn params(&self) -> Vec<&Param> {
        let mut p = self.conv1.params();
        p.extend(self.conv2.params());
        if let Some(sc) = &self.shortcut {
            p.extend(sc.params());
        }
        p
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        let mut p = self.conv1.params_mut();
        p.extend(self.conv2.params_mut());
        if let Some(sc) = self.shortcut.as_mut() {
            p.extend(sc.params_mut());
        }
        p
    }

    fn buffers(&self) -> Vec<&Tensor> {
        let mut b = self.conv1.buffers();
        b.extend(self.conv2.buffers());
        if let Some(sc) = &self.shortcut {
            b.extend(sc.buffers());
        }
        b
    }

    fn buffers_mut(&mut self) -> Vec<&mut Tensor> {
        let mut b = self.conv1.buffers_mut();
        b.extend(self.conv2.buffers_mut());
        if let Some(sc) = self.shortcut.as_mut() {
            b.extend(sc.buffers_mut());
        }
        b
    }
}
