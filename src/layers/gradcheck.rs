//! Finite-difference checks shared by the layer tests.

use rand::rngs::StdRng;

use crate::layers::module::{Mode, Module};
use crate::math::tensor::Tensor;

const H: f64 = 1e-6;
const MAX_PROBES: usize = 48;

fn assert_close(analytic: f64, numeric: f64, what: &str, idx: usize) {
    let scale = 1.0f64.max(analytic.abs()).max(numeric.abs());
    assert!(
        (analytic - numeric).abs() <= 1e-5 * scale,
        "{} gradient mismatch at {}: analytic {} vs numeric {}",
        what,
        idx,
        analytic,
        numeric
    );
}

fn probe_indices(len: usize) -> Vec<usize> {
    let stride = (len / MAX_PROBES).max(1);
    (0..len).step_by(stride).collect()
}

/// Checks `∂⟨g, f(x)⟩/∂x` against central differences.
///
/// `forward(layer, x, mode)` runs the layer; the analytic pass uses
/// `Mode::Train`, the probes run on clones with `probe_mode`.
pub fn check_input_gradient<L, F, B>(layer: &L, x: &Tensor, forward: F, backward: B, probe_mode: Mode, rng: &mut StdRng)
where
    L: Clone,
    F: Fn(&mut L, &Tensor, Mode) -> Tensor,
    B: Fn(&mut L, &Tensor) -> Tensor,
{
    let mut trained = layer.clone();
    let y = forward(&mut trained, x, Mode::Train);
    let g = Tensor::randn(&y.shape, 1.0, rng);
    let analytic = backward(&mut trained, &g);
    assert_eq!(analytic.shape, x.shape);

    for idx in probe_indices(x.numel()) {
        let mut plus = x.clone();
        plus.data[idx] += H;
        let mut minus = x.clone();
        minus.data[idx] -= H;
        let f_plus = forward(&mut trained.clone(), &plus, probe_mode).dot(&g);
        let f_minus = forward(&mut trained.clone(), &minus, probe_mode).dot(&g);
        assert_close(analytic.data[idx], (f_plus - f_minus) / (2.0 * H), "input", idx);
    }
}

/// Same as [`check_input_gradient`] for parameter number `param` of the
/// layer's `params()` order. Only meaningful without spectral norm, whose
/// σ is frozen in evaluation probes.
pub fn check_param_gradient<L, F, B>(layer: &L, x: &Tensor, param: usize, forward: F, backward: B, probe_mode: Mode, rng: &mut StdRng)
where
    L: Clone + Module,
    F: Fn(&mut L, &Tensor, Mode) -> Tensor,
    B: Fn(&mut L, &Tensor) -> Tensor,
{
    let mut trained = layer.clone();
    trained.zero_grad();
    let y = forward(&mut trained, x, Mode::Train);
    let g = Tensor::randn(&y.shape, 1.0, rng);
    backward(&mut trained, &g);
    let analytic = trained.params()[param].grad().clone();

    for idx in probe_indices(analytic.numel()) {
        let mut plus = trained.clone();
        plus.params_mut()[param].value.data[idx] += H;
        let mut minus = trained.clone();
        minus.params_mut()[param].value.data[idx] -= H;
        let f_plus = forward(&mut plus, x, probe_mode).dot(&g);
        let f_minus = forward(&mut minus, x, probe_mode).dot(&g);
        assert_close(analytic.data[idx], (f_plus - f_minus) / (2.0 * H), "parameter", idx);
    }
}
