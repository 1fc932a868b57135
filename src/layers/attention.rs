use rand::rngs::StdRng;
use serde::{Serialize, Deserialize};

use crate::layers::conv::Conv2d;
use crate::layers::module::{Mode, Module, Param};
use crate::math::init::InitScheme;
use crate::math::ops::{matmul, matmul_at_b, matmul_a_bt, softmax_rows};
use crate::math::tensor::Tensor;

/// Self-attention over all spatial positions of a feature map.
///
/// Query/key use `C/8` channels and value `C/2` (both at least 1), all via
/// 1×1 convolutions. `out = x + γ · o(softmax(QᵀK / √d) · V)`, with the
/// learned gain `γ` starting at zero.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelfAttention {
    pub channels: usize,
    pub query: Conv2d,
    pub key: Conv2d,
    pub value: Conv2d,
    pub output: Conv2d,
    pub gamma: Param,
    #[serde(skip)]
    cache: Option<AttentionCache>,
}

#[derive(Debug, Clone)]
struct AttentionCache {
    shape: (usize, usize, usize, usize),
    query: Tensor,
    key: Tensor,
    value: Tensor,
    /// Row-stochastic attention map per sample, `[N, P, P]`.
    beta: Vec<f64>,
    projected: Tensor,
}

impl SelfAttention {
    pub fn new(channels: usize, spectral_norm: bool, init: InitScheme, rng: &mut StdRng) -> SelfAttention {
        let qk = (channels / 8).max(1);
        let v = (channels / 2).max(1);
        SelfAttention {
            channels,
            query: Conv2d::new(channels, qk, 1, false, spectral_norm, init, rng),
            key: Conv2d::new(channels, qk, 1, false, spectral_norm, init, rng),
            value: Conv2d::new(channels, v, 1, false, spectral_norm, init, rng),
            output: Conv2d::new(v, channels, 1, false, spectral_norm, init, rng),
            gamma: Param::new(Tensor::zeros(&[1])),
            cache: None,
        }
    }

    pub fn forward(&mut self, x: &Tensor, mode: Mode) -> Tensor {
        let (n, c, h, w) = x.dims4();
        assert_eq!(c, self.channels, "attention expects {} channels, got {}", self.channels, c);
        let p = h * w;
        let q = self.query.forward(x, mode);
        let k = self.key.forward(x, mode);
        let v = self.value.forward(x, mode);
        let dk = q.shape[1];
        let dv = v.shape[1];
        let scale = 1.0 / (dk as f64).sqrt();

        let mut beta = vec![0.0; n * p * p];
        let mut attended = Tensor::zeros(&[n, dv, h, w]);
        for i in 0..n {
            // logits[p, q] = Σ_k Q[k, p] K[k, q]
            let mut logits = matmul_at_b(q.sample(i), k.sample(i), dk, p, p);
            for l in logits.iter_mut() {
                *l *= scale;
            }
            softmax_rows(&mut logits, p, p);
            // o[c, p] = Σ_q V[c, q] β[p, q]
            let o = matmul_a_bt(v.sample(i), &logits, dv, p, p);
            attended.data[i * dv * p..(i + 1) * dv * p].copy_from_slice(&o);
            beta[i * p * p..(i + 1) * p * p].copy_from_slice(&logits);
        }

        let projected = self.output.forward(&attended, mode);
        let gamma = self.gamma.value.data[0];
        let out = x.zip_map(&projected, |a, b| a + gamma * b);

        self.cache = match mode {
            Mode::Train => Some(AttentionCache { shape: (n, c, h, w), query: q, key: k, value: v, beta, projected }),
            Mode::Eval => None,
        };
        out
    }

    pub fn backward(&mut self, grad: &Tensor) -> Tensor {
        let cache = self.cache.take().expect("SelfAttention::backward called without a training-mode forward");
        let (n, _, h, w) = cache.shape;
        let p = h * w;
        let dk = cache.query.shape[1];
        let dv = cache.value.shape[1];
        let scale = 1.0 / (dk as f64).sqrt();
        let gamma = self.gamma.value.data[0];

        self.gamma.accumulate(&[grad.dot(&cache.projected)]);
        let d_attended = self.output.backward(&grad.map(|g| g * gamma));

        let mut dq = Tensor::zeros(&cache.query.shape);
        let mut dkey = Tensor::zeros(&cache.key.shape);
        let mut dval = Tensor::zeros(&cache.value.shape);
        for i in 0..n {
            let beta = &cache.beta[i * p * p..(i + 1) * p * p];
            let d_o = d_attended.sample(i);
            // dV[c, q] = Σ_p dO[c, p] β[p, q]
            let dv_i = matmul(d_o, beta, dv, p, p);
            // dβ[p, q] = Σ_c dO[c, p] V[c, q]
            let d_beta = matmul_at_b(d_o, cache.value.sample(i), dv, p, p);
            let mut d_logits = vec![0.0; p * p];
            for r in 0..p {
                let row = r * p..(r + 1) * p;
                let dot: f64 = beta[row.clone()].iter().zip(d_beta[row.clone()].iter()).map(|(b, d)| b * d).sum();
                for col in row {
                    d_logits[col] = beta[col] * (d_beta[col] - dot) * scale;
                }
            }
            // dQ[k, p] = Σ_q K[k, q] dL[p, q];  dK[k, q] = Σ_p Q[k, p] dL[p, q]
            let dq_i = matmul_a_bt(cache.key.sample(i), &d_logits, dk, p, p);
            let dk_i = matmul(cache.query.sample(i), &d_logits, dk, p, p);
            dq.data[i * dk * p..(i + 1) * dk * p].copy_from_slice(&dq_i);
            dkey.data[i * dk * p..(i + 1) * dk * p].copy_from_slice(&dk_i);
            dval.data[i * dv * p..(i + 1) * dv * p].copy_from_slice(&dv_i);
        }

        let mut dx = grad.clone();
        dx.add_assign(&self.query.backward(&dq));
        dx.add_assign(&self.key.backward(&dkey));
        dx.add_assign(&self.value.backward(&dval));
        dx
    }
}

impl Module for SelfAttention {
    fn params(&self) -> Vec<&Param> {
        let mut p = self.query.params();
        p.extend(self.key.params());
        p.extend(self.value.params());
        p.extend(self.output.params());
        p.push(&self.gamma);
        p
    }

    fn params_mut(&mut self) -> Vec<&mut Param> {
        let mut p = self.query.params_mut();
        p.extend(self.key.params_mut());
        p.extend(self.value.params_mut());
        p.extend(self.output.params_mut());
        p.push(&mut self.gamma);
        p
    }

    fn buffers(&self) -> Vec<&Tensor> {
        let mut b = self.query.buffers();
        b.extend(self.key.buffers());
        b.extend(self.value.buffers());
        b.extend(self.output.buffers());
        b
    }

    fn buffers_mut(&mut self) -> Vec<&mut Tensor> {
        let mut b = self.query.buffers_mut();
        b.extend(self.key.buffers_mut());
        b.extend(self.value.buffers_mut());
        b.extend(self.output.buffers_mut());
        b
    }
}
