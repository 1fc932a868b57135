use rand::rngs::StdRng;
use serde::{Serialize, Deserialize};

use crate::error::{GanError, Result};
use crate::layers::module::{Mode, Module, Param};
use crate::layers::spectral_norm::SpectralNorm;
use crate::math::init::InitScheme;
use crate::math::tensor::Tensor;

/// Per-class lookup table `[num_classes, dim]`, optionally spectrally
/// normalized (the discriminator's projection embedding).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Embedding {
    pub num_classes: usize,
    pub dim: usize,
    pub weight: Param,
    spectral: Option<SpectralNorm>,
    #[serde(skip)]
    cache: Option<EmbeddingCache>,
}

#[derive(Debug, Clone)]
struct EmbeddingCache {
    labels: Vec<usize>,
    weight: Vec<f64>,
}

impl Embedding {
    pub fn new(num_classes: usize, dim: usize, spectral_norm: bool, init: InitScheme, rng: &mut StdRng) -> Embedding {
        let w = init.sample(num_classes, dim, rng);
        let spectral = spectral_norm.then(|| SpectralNorm::new(&w, num_classes, dim, rng));
        Embedding {
            num_classes,
            dim,
            weight: Param::new(Tensor::from_data(&[num_classes, dim], w)),
            spectral,
            cache: None,
        }
    }

    /// Rejects labels outside `[0, num_classes)`; never wraps or clamps.
    pub fn check_labels(&self, labels: &[usize]) -> Result<()> {
        match labels.iter().find(|&&l| l >= self.num_classes) {
            Some(bad) => Err(GanError::ShapeMismatch(format!(
                "class label {} out of range [0, {})",
                bad, self.num_classes
            ))),
            None => Ok(()),
        }
    }

    /// `[N] → [N, dim]`
    pub fn forward(&mut self, labels: &[usize], mode: Mode) -> Result<Tensor> {
        self.check_labels(labels)?;
        let weight = match self.spectral.as_mut() {
            Some(sn) => sn.normalized_weight(&self.weight.value.data, mode),
            None => self.weight.value.data.clone(),
        };
        let mut data = Vec::with_capacity(labels.len() * self.dim);
        for &l in labels {
            data.extend_from_slice(&weight[l * self.dim..(l + 1) * self.dim]);
        }
        self.cache = match mode {
            Mode::Train => Some(EmbeddingCache { labels: labels.to_vec(), weight }),
            Mode::Eval => None,
        };
        Ok(Tensor::from_data(&[labels.len(), self.dim], data))
    }

    /// Scatters `[N, dim]` row gradients into the looked-up rows.
    pub fn backward(&mut self, grad: &Tensor) {
        if !self.weight.requires_grad() {
            return;
        }
        let cache = self.cache.as_ref().expect("Embedding::backward called without a training-mode forward");
        assert_eq!(grad.shape, vec![cache.labels.len(), self.dim], "embedding gradient has wrong shape");
        let mut gw = vec![0.0; self.num_classes * self.dim];
        for (row, &l) in grad.data.chunks(self.dim).zip(cache.labels.iter()) {
            for (acc, g) in gw[l * self.dim..(l + 1) * self.dim].iter_mut().zip(row.iter()) {
                *acc += g;
            }
        }
        let gw = match &self.spectral {
            Some(sn) => sn.backward(&cache.weight, &gw),
            None => gw,
        };
        self.weight.accumulate(&gw);
    }
}

impl Module for Embedding {
    fn params(&self) -> Vec<&Param> {
        vec![&self.weight]
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        vec![&mut self.weight]
    }

    fn buffers(&self) -> Vec<&Tensor> {
        self.spectral.as_ref().map(|sn| sn.buffers()).unwrap_or_default()
    }

    fn buffers_mut(&mut self) -> Vec<&mut Tensor> {
        self.spectral.as_mut().map(|sn| sn.buffers_mut()).unwrap_or_default()
    }
}
