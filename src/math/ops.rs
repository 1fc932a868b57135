//! Raw kernels on row-major slices plus the resampling ops used by the
//! residual blocks. Everything here is stride-1, "same" padding.

use crate::math::tensor::Tensor;

// ---------------------------------------------------------------------------
// Matrix products
// ---------------------------------------------------------------------------

/// `C[m, n] = A[m, k] · B[k, n]`
pub fn matmul(a: &[f64], b: &[f64], m: usize, k: usize, n: usize) -> Vec<f64> {
    assert_eq!(a.len(), m * k, "Matrices are of incorrect sizes");
    assert_eq!(b.len(), k * n, "Matrices are of incorrect sizes");
    let mut c = vec![0.0; m * n];
    for i in 0..m {
        let c_row = &mut c[i * n..(i + 1) * n];
        for p in 0..k {
            let a_ip = a[i * k + p];
            if a_ip == 0.0 {
                continue;
            }
            let b_row = &b[p * n..(p + 1) * n];
            for j in 0..n {
                c_row[j] += a_ip * b_row[j];
            }
        }
    }
    c
}

/// `C[m, n] = Aᵀ · B` where `A` is `[k, m]` and `B` is `[k, n]`.
pub fn matmul_at_b(a: &[f64], b: &[f64], k: usize, m: usize, n: usize) -> Vec<f64> {
    assert_eq!(a.len(), k * m, "Matrices are of incorrect sizes");
    assert_eq!(b.len(), k * n, "Matrices are of incorrect sizes");
    let mut c = vec![0.0; m * n];
    for p in 0..k {
        let b_row = &b[p * n..(p + 1) * n];
        for i in 0..m {
            let a_pi = a[p * m + i];
            if a_pi == 0.0 {
                continue;
            }
            let c_row = &mut c[i * n..(i + 1) * n];
            for j in 0..n {
                c_row[j] += a_pi * b_row[j];
            }
        }
    }
    c
}

/// `C[m, n] = A · Bᵀ` where `A` is `[m, k]` and `B` is `[n, k]`.
pub fn matmul_a_bt(a: &[f64], b: &[f64], m: usize, k: usize, n: usize) -> Vec<f64> {
    assert_eq!(a.len(), m * k, "Matrices are of incorrect sizes");
    assert_eq!(b.len(), n * k, "Matrices are of incorrect sizes");
    let mut c = vec![0.0; m * n];
    for i in 0..m {
        let a_row = &a[i * k..(i + 1) * k];
        for j in 0..n {
            let b_row = &b[j * k..(j + 1) * k];
            c[i * n + j] = a_row.iter().zip(b_row.iter()).map(|(x, y)| x * y).sum();
        }
    }
    c
}

/// `y[m] = A[m, n] · x[n]`
pub fn matvec(a: &[f64], x: &[f64], m: usize, n: usize) -> Vec<f64> {
    (0..m)
        .map(|i| a[i * n..(i + 1) * n].iter().zip(x.iter()).map(|(w, v)| w * v).sum())
        .collect()
}

/// `y[n] = Aᵀ · x` where `A` is `[m, n]` and `x` is `[m]`.
pub fn matvec_t(a: &[f64], x: &[f64], m: usize, n: usize) -> Vec<f64> {
    let mut y = vec![0.0; n];
    for i in 0..m {
        let xi = x[i];
        for (yj, aij) in y.iter_mut().zip(a[i * n..(i + 1) * n].iter()) {
            *yj += xi * aij;
        }
    }
    y
}

/// Scales `v` to unit L2 norm in place; `eps` guards against a zero vector.
pub fn normalize(v: &mut [f64], eps: f64) {
    let norm = v.iter().map(|x| x * x).sum::<f64>().sqrt();
    for x in v.iter_mut() {
        *x /= norm + eps;
    }
}

// ---------------------------------------------------------------------------
// Convolution helpers
// ---------------------------------------------------------------------------

/// Unfolds one `[c, h, w]` image into a `[c·k·k, h·w]` column matrix for a
/// `k × k` kernel with padding `k / 2`.
pub fn im2col(x: &[f64], c: usize, h: usize, w: usize, k: usize) -> Vec<f64> {
    let pad = (k / 2) as isize;
    let hw = h * w;
    let mut col = vec![0.0; c * k * k * hw];
    for ch in 0..c {
        for ky in 0..k {
            for kx in 0..k {
                let row = (ch * k + ky) * k + kx;
                let dst = &mut col[row * hw..(row + 1) * hw];
                for y in 0..h {
                    let sy = y as isize + ky as isize - pad;
                    if sy < 0 || sy >= h as isize {
                        continue;
                    }
                    for xx in 0..w {
                        let sx = xx as isize + kx as isize - pad;
                        if sx < 0 || sx >= w as isize {
                            continue;
                        }
                        dst[y * w + xx] = x[(ch * h + sy as usize) * w + sx as usize];
                    }
                }
            }
        }
    }
    col
}

/// Adjoint of [`im2col`]: folds a column matrix back, summing overlaps.
pub fn col2im(col: &[f64], c: usize, h: usize, w: usize, k: usize) -> Vec<f64> {
    let pad = (k / 2) as isize;
    let hw = h * w;
    let mut x = vec![0.0; c * hw];
    for ch in 0..c {
        for ky in 0..k {
            for kx in 0..k {
                let row = (ch * k + ky) * k + kx;
                let src = &col[row * hw..(row + 1) * hw];
                for y in 0..h {
                    let sy = y as isize + ky as isize - pad;
                    if sy < 0 || sy >= h as isize {
                        continue;
                    }
                    for xx in 0..w {
                        let sx = xx as isize + kx as isize - pad;
                        if sx < 0 || sx >= w as isize {
                            continue;
                        }
                        x[(ch * h + sy as usize) * w + sx as usize] += src[y * w + xx];
                    }
                }
            }
        }
    }
    x
}

// ---------------------------------------------------------------------------
// Resampling
// ---------------------------------------------------------------------------

/// Nearest-neighbour 2× upsampling of an NCHW tensor.
pub fn upsample_nearest2x(x: &Tensor) -> Tensor {
    let (n, c, h, w) = x.dims4();
    let (oh, ow) = (h * 2, w * 2);
    let mut out = Tensor::zeros(&[n, c, oh, ow]);
    for plane in 0..n * c {
        let src = &x.data[plane * h * w..(plane + 1) * h * w];
        let dst = &mut out.data[plane * oh * ow..(plane + 1) * oh * ow];
        for y in 0..oh {
            for xx in 0..ow {
                dst[y * ow + xx] = src[(y / 2) * w + xx / 2];
            }
        }
    }
    out
}

/// Gradient of [`upsample_nearest2x`]: sums each 2×2 output block.
pub fn upsample_nearest2x_backward(grad: &Tensor) -> Tensor {
    let (n, c, oh, ow) = grad.dims4();
    let (h, w) = (oh / 2, ow / 2);
    let mut out = Tensor::zeros(&[n, c, h, w]);
    for plane in 0..n * c {
        let src = &grad.data[plane * oh * ow..(plane + 1) * oh * ow];
        let dst = &mut out.data[plane * h * w..(plane + 1) * h * w];
        for y in 0..oh {
            for xx in 0..ow {
                dst[(y / 2) * w + xx / 2] += src[y * ow + xx];
            }
        }
    }
    out
}

/// 2×2 average pooling with stride 2.
pub fn avg_pool2x(x: &Tensor) -> Tensor {
    let (n, c, h, w) = x.dims4();
    assert!(h % 2 == 0 && w % 2 == 0, "average pooling needs even spatial dims, got {}x{}", h, w);
    let (oh, ow) = (h / 2, w / 2);
    let mut out = Tensor::zeros(&[n, c, oh, ow]);
    for plane in 0..n * c {
        let src = &x.data[plane * h * w..(plane + 1) * h * w];
        let dst = &mut out.data[plane * oh * ow..(plane + 1) * oh * ow];
        for y in 0..h {
            for xx in 0..w {
                dst[(y / 2) * ow + xx / 2] += 0.25 * src[y * w + xx];
            }
        }
    }
    out
}

/// Gradient of [`avg_pool2x`].
pub fn avg_pool2x_backward(grad: &Tensor) -> Tensor {
    let (n, c, oh, ow) = grad.dims4();
    let (h, w) = (oh * 2, ow * 2);
    let mut out = Tensor::zeros(&[n, c, h, w]);
    for plane in 0..n * c {
        let src = &grad.data[plane * oh * ow..(plane + 1) * oh * ow];
        let dst = &mut out.data[plane * h * w..(plane + 1) * h * w];
        for y in 0..h {
            for xx in 0..w {
                dst[y * w + xx] = 0.25 * src[(y / 2) * ow + xx / 2];
            }
        }
    }
    out
}

/// Sums every feature map over its spatial positions: `[N, C, H, W] → [N, C]`.
pub fn global_sum_pool(x: &Tensor) -> Tensor {
    let (n, c, h, w) = x.dims4();
    let hw = h * w;
    let data = (0..n * c).map(|plane| x.data[plane * hw..(plane + 1) * hw].iter().sum()).collect();
    Tensor::from_data(&[n, c], data)
}

/// Gradient of [`global_sum_pool`]: broadcasts `[N, C]` back over `h × w`.
pub fn global_sum_pool_backward(grad: &Tensor, h: usize, w: usize) -> Tensor {
    let (n, c) = grad.dims2();
    let hw = h * w;
    let mut out = Tensor::zeros(&[n, c, h, w]);
    for plane in 0..n * c {
        let g = grad.data[plane];
        for v in out.data[plane * hw..(plane + 1) * hw].iter_mut() {
            *v = g;
        }
    }
    out
}

/// Row-wise softmax of a `[rows, cols]` matrix, in place. Subtracts each
/// row's maximum before exponentiating.
pub fn softmax_rows(data: &mut [f64], rows: usize, cols: usize) {
    for r in 0..rows {
        let row = &mut data[r * cols..(r + 1) * cols];
        let max = row.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
        let mut sum = 0.0;
        for v in row.iter_mut() {
            *v = (*v - max).exp();
            sum += *v;
        }
        for v in row.iter_mut() {
            *v /= sum;
        }
    }
}
