//! Parallel CPU backend tensor operations
//!
//! # CPU Backend
//!
//! This module provides high-performance CPU implementations of the differentiable
//! operations the demonstration network is built from.
//!
//! These CPU functions are the default when calling `backprop::xyz`; dispatch routes
//! to `ops::cpu::xyz` as long as WGPU and CUDA are disabled.
//!
//! ## Features
//!
//! - Parallel execution using [`rayon`](https://docs.rs/rayon)
//! - Optional SIMD acceleration using AVX2 (enabled via `simd` feature flag)
//! - Pure Rust fallback path when SIMD is disabled or unavailable
//!
//! ## Implemented Ops
//!
//! - `matmul`: Matrix multiplication with SIMD and multithreading
//! - `add_row`: Broadcast bias addition over the last axis
//! - `conv2d`: 2D cross-correlation with per-channel bias, stride 1, valid padding
//! - `max_pool2d`: Non-overlapping max pooling with argmax gradient routing
//! - `relu`: ReLU activation with forward and backward pass
//! - `log_softmax`: Log-softmax over the last axis
//! - `cross_entropy_logits`: Mean cross-entropy from raw logits and class indices
//! - `sgd`: In-place stochastic gradient descent step
//!
//! ## Design Goals
//!
//! - Deterministic results (given deterministic input and scheduling)
//! - Zero dependencies beyond `rayon`
//! - Modular: CPU functions are separate from backend dispatching
//!
//! ## Safety
//!
//! - SIMD paths use `unsafe` blocks and assume 64-bit AVX2-capable CPUs
//! - Runtime checks are encouraged but not enforced in this module

use crate::ops::dispatch::{FnScalarToTen64, FnToPairTen64, FnToTen64, FnToTripleTen64};
use crate::tensors::{Ten64, Tensor, WithGrad};
use rayon::prelude::*;

#[cfg(all(feature = "simd", target_arch = "x86_64", target_feature = "avx2"))]
use std::arch::x86_64::*;

/// Performs a matrix multiplication `C = A × B` on two 2D tensors (`A: m×k`, `B: k×n`),
/// returning the result tensor and a closure for backpropagation.
///
/// # Requirements
/// - Shapes must be compatible: `A.shape = [m, k]` and `B.shape = [k, n]`.
///
/// # Optimizations
/// - Uses `rayon` for parallel row computation
/// - Uses AVX2 SIMD for fused multiply-adds (if enabled via `--features=simd`)
///
/// # Returns
/// - Output tensor of shape `[m, n]`
/// - Backward function computing gradients w.r.t. `A` and `B`
///
/// # Panics
/// - If the inner dimensions of `A` and `B` do not match.
///
/// # Example
/// ```rust
/// use gradmap::backprop::matmul;
/// use gradmap::{tensor, tensors::WithGrad};
///
/// let a = WithGrad::new(gradmap::tensor!([[5.0, 1.0], [6.0, 3.0]]));
/// let b = WithGrad::new(gradmap::tensor!([[1.0, 2.0], [5.0, 1.9]]));
/// let grad_output = tensor!([[1.0, 2.0], [3.0, 2.0]]);
/// let (c, back) = matmul(&a, &b);
/// let (grad_a, grad_b) = back(&grad_output);
/// ```
pub fn matmul(a: &WithGrad<Ten64>, b: &WithGrad<Ten64>) -> (Ten64, Box<FnToPairTen64>) {
    let m = a.value.shape[0];
    let k = a.value.shape[1];
    let n = b.value.shape[1];
    assert_eq!(k, b.value.shape[0], "matmul shape mismatch");

    let a_data = &a.value.data;
    let b_data = &b.value.data;

    let mut out_data = vec![0.0; m * n];

    out_data.par_chunks_mut(n).enumerate().for_each(|(i, row)| {
        for (j, slot) in row.iter_mut().enumerate() {
            let sum = {
                #[cfg(all(feature = "simd", target_arch = "x86_64", target_feature = "avx2"))]
                {
                    let mut acc = unsafe { _mm256_setzero_pd() };
                    let mut idx = 0;
                    while idx + 4 <= k {
                        unsafe {
                            let a_chunk = _mm256_loadu_pd(&a_data[i * k + idx]);
                            let b_chunk = _mm256_set_pd(
                                b_data[(idx + 3) * n + j],
                                b_data[(idx + 2) * n + j],
                                b_data[(idx + 1) * n + j],
                                b_data[idx * n + j],
                            );
                            acc = _mm256_fmadd_pd(a_chunk, b_chunk, acc);
                        }
                        idx += 4;
                    }

                    let mut temp = [0.0; 4];
                    unsafe { _mm256_storeu_pd(temp.as_mut_ptr(), acc) };
                    let mut sum: f64 = temp.iter().sum();

                    for l in idx..k {
                        sum += a_data[i * k + l] * b_data[l * n + j];
                    }

                    sum
                }

                #[cfg(not(all(feature = "simd", target_arch = "x86_64", target_feature = "avx2")))]
                {
                    let mut sum = 0.0;
                    for l in 0..k {
                        sum += a_data[i * k + l] * b_data[l * n + j];
                    }
                    sum
                }
            };
            *slot = sum;
        }
    });

    let out = Tensor::new(vec![m, n], out_data);

    let a_val = a.value.clone();
    let b_val = b.value.clone();

    let back = move |grad: &Ten64| {
        assert_eq!(grad.shape, vec![m, n], "matmul backward shape mismatch");

        // dL/dA = g · Bᵀ
        let mut ga = vec![0.0; m * k];
        ga.par_chunks_mut(k).enumerate().for_each(|(i, row)| {
            for (l, slot) in row.iter_mut().enumerate() {
                let mut sum = 0.0;
                for j in 0..n {
                    sum += grad.data[i * n + j] * b_val.data[l * n + j];
                }
                *slot = sum;
            }
        });

        // dL/dB = Aᵀ · g
        let mut gb = vec![0.0; k * n];
        gb.par_chunks_mut(n).enumerate().for_each(|(l, row)| {
            for (j, slot) in row.iter_mut().enumerate() {
                let mut sum = 0.0;
                for i in 0..m {
                    sum += a_val.data[i * k + l] * grad.data[i * n + j];
                }
                *slot = sum;
            }
        });

        (Tensor::new(vec![m, k], ga), Tensor::new(vec![k, n], gb))
    };

    (out, Box::new(back))
}

/// Adds a bias vector to every row of the input, broadcasting over the last axis.
///
/// # Requirements
/// - `bias.shape = [d]` where `d` is the input's last dimension.
///
/// # Returns
/// - Output tensor of the input's shape
/// - Backward function computing gradients w.r.t. the input and the bias
///   (the bias gradient is the column-wise sum of the upstream gradient)
pub fn add_row(x: &WithGrad<Ten64>, bias: &WithGrad<Ten64>) -> (Ten64, Box<FnToPairTen64>) {
    let d = *x.value.shape.last().expect("add_row input must have rank >= 1");
    assert_eq!(bias.value.shape, vec![d], "bias must match last input axis");

    let rows = x.value.numel() / d;
    let bias_data = bias.value.data.clone();

    let mut out_data = vec![0.0; x.value.numel()];
    out_data
        .par_chunks_mut(d)
        .zip(x.value.data.par_chunks(d))
        .for_each(|(out_row, in_row)| {
            for j in 0..d {
                out_row[j] = in_row[j] + bias_data[j];
            }
        });

    let out = Tensor::new(x.value.shape.clone(), out_data);
    let x_shape = x.value.shape.clone();

    let back = move |grad: &Ten64| {
        assert_eq!(grad.shape, x_shape, "add_row backward shape mismatch");

        let mut gb = vec![0.0; d];
        for r in 0..rows {
            for j in 0..d {
                gb[j] += grad.data[r * d + j];
            }
        }

        (grad.clone(), Tensor::new(vec![d], gb))
    };

    (out, Box::new(back))
}

/// Performs a 2D cross-correlation of a batched input with a kernel bank,
/// adding a per-output-channel bias. Stride 1, valid padding.
///
/// # Requirements
/// - `input.shape = [n, c_in, h, w]`
/// - `kernel.shape = [c_out, c_in, kh, kw]` with `kh <= h`, `kw <= w`
/// - `bias.shape = [c_out]`
///
/// # Returns
/// - Output tensor of shape `[n, c_out, h - kh + 1, w - kw + 1]`
/// - Backward function mapping `dL/d(out)` to `(dL/d(input), dL/d(kernel), dL/d(bias))`
///
/// # Panics
/// - If the shapes are not rank 4 / rank 4 / rank 1 or the channel counts disagree.
pub fn conv2d(
    input: &WithGrad<Ten64>,
    kernel: &WithGrad<Ten64>,
    bias: &WithGrad<Ten64>,
) -> (Ten64, Box<FnToTripleTen64>) {
    let [n, c_in, h, w]: [usize; 4] = input.value.shape[..]
        .try_into()
        .expect("conv2d input must be [n, c_in, h, w]");
    let [c_out, kc_in, kh, kw]: [usize; 4] = kernel.value.shape[..]
        .try_into()
        .expect("conv2d kernel must be [c_out, c_in, kh, kw]");
    assert_eq!(c_in, kc_in, "conv2d channel mismatch");
    assert_eq!(bias.value.shape, vec![c_out], "conv2d bias must be [c_out]");
    assert!(kh <= h && kw <= w, "conv2d kernel larger than input");

    let oh = h - kh + 1;
    let ow = w - kw + 1;

    let in_data = &input.value.data;
    let k_data = &kernel.value.data;
    let b_data = &bias.value.data;

    let mut out_data = vec![0.0; n * c_out * oh * ow];

    // one plane per (sample, output channel) pair
    out_data
        .par_chunks_mut(oh * ow)
        .enumerate()
        .for_each(|(plane, out_plane)| {
            let i = plane / c_out;
            let oc = plane % c_out;

            for oy in 0..oh {
                for ox in 0..ow {
                    let mut acc = b_data[oc];
                    for ic in 0..c_in {
                        for ky in 0..kh {
                            for kx in 0..kw {
                                let iv = in_data[((i * c_in + ic) * h + oy + ky) * w + ox + kx];
                                let kv = k_data[((oc * c_in + ic) * kh + ky) * kw + kx];
                                acc += iv * kv;
                            }
                        }
                    }
                    out_plane[oy * ow + ox] = acc;
                }
            }
        });

    let out = Tensor::new(vec![n, c_out, oh, ow], out_data);

    let in_val = input.value.clone();
    let k_val = kernel.value.clone();

    let back = move |grad: &Ten64| {
        assert_eq!(
            grad.shape,
            vec![n, c_out, oh, ow],
            "conv2d backward shape mismatch"
        );

        // dL/d(input): scatter each kernel tap, one plane per (sample, input channel)
        let mut gi = vec![0.0; n * c_in * h * w];
        gi.par_chunks_mut(h * w).enumerate().for_each(|(plane, gi_plane)| {
            let i = plane / c_in;
            let ic = plane % c_in;

            for oc in 0..c_out {
                for oy in 0..oh {
                    for ox in 0..ow {
                        let go = grad.data[((i * c_out + oc) * oh + oy) * ow + ox];
                        for ky in 0..kh {
                            for kx in 0..kw {
                                let kv = k_val.data[((oc * c_in + ic) * kh + ky) * kw + kx];
                                gi_plane[(oy + ky) * w + ox + kx] += go * kv;
                            }
                        }
                    }
                }
            }
        });

        // dL/d(kernel): accumulate over samples and output positions, parallel per c_out
        let mut gk = vec![0.0; c_out * c_in * kh * kw];
        gk.par_chunks_mut(c_in * kh * kw)
            .enumerate()
            .for_each(|(oc, gk_bank)| {
                for i in 0..n {
                    for oy in 0..oh {
                        for ox in 0..ow {
                            let go = grad.data[((i * c_out + oc) * oh + oy) * ow + ox];
                            for ic in 0..c_in {
                                for ky in 0..kh {
                                    for kx in 0..kw {
                                        let iv =
                                            in_val.data[((i * c_in + ic) * h + oy + ky) * w + ox + kx];
                                        gk_bank[(ic * kh + ky) * kw + kx] += go * iv;
                                    }
                                }
                            }
                        }
                    }
                }
            });

        // dL/d(bias): total upstream gradient per output channel
        let mut gb = vec![0.0; c_out];
        for i in 0..n {
            for (oc, slot) in gb.iter_mut().enumerate() {
                let start = (i * c_out + oc) * oh * ow;
                *slot += grad.data[start..start + oh * ow].iter().sum::<f64>();
            }
        }

        (
            Tensor::new(vec![n, c_in, h, w], gi),
            Tensor::new(vec![c_out, c_in, kh, kw], gk),
            Tensor::new(vec![c_out], gb),
        )
    };

    (out, Box::new(back))
}

/// Applies non-overlapping max pooling with window and stride `k` over the two
/// trailing spatial axes of a `[n, c, h, w]` tensor.
///
/// Trailing rows/columns that do not fill a window are dropped (floor division).
///
/// # Returns
/// - Output tensor of shape `[n, c, h / k, w / k]`
/// - Backward function routing each upstream gradient to the argmax position
///   of its window; all other positions receive zero
pub fn max_pool2d(input: &WithGrad<Ten64>, k: usize) -> (Ten64, Box<FnToTen64>) {
    let [n, c, h, w]: [usize; 4] = input.value.shape[..]
        .try_into()
        .expect("max_pool2d input must be [n, c, h, w]");
    assert!(k > 0 && k <= h && k <= w, "max_pool2d window out of range");

    let oh = h / k;
    let ow = w / k;

    let in_data = &input.value.data;
    let mut out_data = vec![0.0; n * c * oh * ow];
    let mut argmax = vec![0usize; n * c * oh * ow];

    out_data
        .par_chunks_mut(oh * ow)
        .zip(argmax.par_chunks_mut(oh * ow))
        .enumerate()
        .for_each(|(plane, (out_plane, arg_plane))| {
            let base = plane * h * w;
            for oy in 0..oh {
                for ox in 0..ow {
                    let mut best = f64::NEG_INFINITY;
                    let mut best_idx = 0;
                    for dy in 0..k {
                        for dx in 0..k {
                            let idx = base + (oy * k + dy) * w + ox * k + dx;
                            if in_data[idx] > best {
                                best = in_data[idx];
                                best_idx = idx;
                            }
                        }
                    }
                    out_plane[oy * ow + ox] = best;
                    arg_plane[oy * ow + ox] = best_idx;
                }
            }
        });

    let out = Tensor::new(vec![n, c, oh, ow], out_data);
    let in_shape = input.value.shape.clone();
    let in_len = input.value.numel();

    let back = move |grad: &Ten64| {
        assert_eq!(
            grad.shape,
            vec![n, c, oh, ow],
            "max_pool2d backward shape mismatch"
        );

        let mut gi = vec![0.0; in_len];
        for (&idx, &g) in argmax.iter().zip(&grad.data) {
            gi[idx] += g;
        }
        Tensor::new(in_shape.clone(), gi)
    };

    (out, Box::new(back))
}

/// Applies the ReLU activation function element-wise on the input tensor:
/// $$ f(x) = \\max(0, x) $$
///
/// # Returns
/// - Output tensor of same shape
/// - Backward function which propagates upstream gradients through ReLU:
///   $$ \\frac{\\partial f}{\\partial x} = 1 \\text{ if } x > 0 \\text{ else } 0 $$
///
/// # Optimizations
/// - Uses SIMD (`AVX2`) for fast element-wise max (if `simd` feature enabled)
/// - Uses `rayon` to parallelize both forward and backward passes
///
/// # Notes
/// - Backward function uses input value to compute mask
pub fn relu(input: &WithGrad<Ten64>) -> (Ten64, Box<FnToTen64>) {
    let shape = input.value.shape.clone();
    let len = input.value.numel();
    let mut data = vec![0.0f64; len];

    #[cfg(all(feature = "simd", target_arch = "x86_64", target_feature = "avx2"))]
    {
        const LANES: usize = 4;
        data.par_chunks_mut(LANES)
            .zip(input.value.data.par_chunks(LANES))
            .for_each(|(out_chunk, in_chunk)| unsafe {
                let mut in_buf = [0.0; LANES];
                in_buf[..in_chunk.len()].copy_from_slice(in_chunk);

                let x = _mm256_loadu_pd(in_buf.as_ptr());
                let zero = _mm256_setzero_pd();
                let y = _mm256_max_pd(x, zero);

                let mut out_buf = [0.0; LANES];
                _mm256_storeu_pd(out_buf.as_mut_ptr(), y);

                out_chunk.copy_from_slice(&out_buf[..in_chunk.len()]);
            });
    }

    #[cfg(not(all(feature = "simd", target_arch = "x86_64", target_feature = "avx2")))]
    {
        data.par_iter_mut()
            .zip(input.value.data.par_iter())
            .for_each(|(y, &x)| {
                *y = if x > 0.0 { x } else { 0.0 };
            });
    }

    let out = Tensor::new(shape.clone(), data);
    let input_data = input.value.data.clone();

    let back = move |grad_output: &Ten64| {
        let mut grad = vec![0.0f64; grad_output.numel()];

        grad.par_iter_mut()
            .zip(input_data.par_iter())
            .zip(grad_output.data.par_iter())
            .for_each(|((g, &x), &dy)| {
                *g = if x > 0.0 { dy } else { 0.0 };
            });

        Tensor::new(shape.clone(), grad)
    };

    (out, Box::new(back))
}

/// Computes the log-softmax over the last axis of the input.
///
/// Uses the max-subtraction trick for numerical stability.
///
/// # Returns
/// - Output tensor of the input's shape holding log-probabilities
/// - Backward function `g - softmax * sum(g)` applied row-wise
pub fn log_softmax(input: &WithGrad<Ten64>) -> (Ten64, Box<FnToTen64>) {
    let d = *input
        .value
        .shape
        .last()
        .expect("log_softmax input must have rank >= 1");
    let shape = input.value.shape.clone();

    let mut out_data = vec![0.0; input.value.numel()];
    out_data
        .par_chunks_mut(d)
        .zip(input.value.data.par_chunks(d))
        .for_each(|(out_row, in_row)| {
            let max_val = in_row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let log_sum = in_row.iter().map(|&x| (x - max_val).exp()).sum::<f64>().ln();
            for j in 0..d {
                out_row[j] = in_row[j] - max_val - log_sum;
            }
        });

    let out = Tensor::new(shape.clone(), out_data);
    let out_copy = out.data.clone();

    let back = move |grad: &Ten64| {
        let mut gi = vec![0.0; grad.numel()];
        gi.par_chunks_mut(d)
            .zip(grad.data.par_chunks(d))
            .zip(out_copy.par_chunks(d))
            .for_each(|((gi_row, g_row), o_row)| {
                let g_sum: f64 = g_row.iter().sum();
                for j in 0..d {
                    gi_row[j] = g_row[j] - o_row[j].exp() * g_sum;
                }
            });
        Tensor::new(shape.clone(), gi)
    };

    (out, Box::new(back))
}

/// Computes the mean cross-entropy between raw logits and class-index targets.
///
/// Targets travel as `f64` values inside a `[n]` tensor and are rounded to
/// class indices on use, so the whole batch stays in one tensor type.
///
/// # Formula
/// $$ L = -\\frac{1}{n} \\sum_i \\left( z_{i,t_i} - \\log \\sum_j e^{z_{i,j}} \\right) $$
///
/// # Returns
/// - Scalar loss `f64`
/// - Backward function mapping upstream scalar gradient `dL` to a gradient
///   tensor of the logits' shape: `(softmax - onehot) * dL / n`
///
/// # Panics
/// - If `logits` is not rank 2, `targets` is not `[n]`, the batch is empty,
///   or a target index falls outside the class axis.
pub fn cross_entropy_logits(
    logits: &WithGrad<Ten64>,
    targets: &Ten64,
) -> (f64, Box<FnScalarToTen64>) {
    let [n, classes]: [usize; 2] = logits.value.shape[..]
        .try_into()
        .expect("cross_entropy_logits expects [n, classes] logits");
    assert_eq!(targets.shape, vec![n], "targets must be [n]");
    assert!(n > 0, "cross_entropy_logits on empty batch");

    let logit_data = &logits.value.data;

    let mut softmax = vec![0.0; n * classes];
    let mut loss_sum = 0.0;

    for i in 0..n {
        let offset = i * classes;
        let row = &logit_data[offset..offset + classes];
        let t = targets.data[i].round() as usize;
        assert!(t < classes, "target {t} out of range for {classes} classes");

        let max_val = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let exp_sum: f64 = row.iter().map(|&x| (x - max_val).exp()).sum();

        for j in 0..classes {
            softmax[offset + j] = (row[j] - max_val).exp() / exp_sum;
        }
        loss_sum -= row[t] - max_val - exp_sum.ln();
    }

    let loss = loss_sum / n as f64;

    let shape = logits.value.shape.clone();
    let target_data = targets.data.clone();

    let back = move |grad_output: f64| {
        let mut grad = softmax.clone();
        for i in 0..n {
            let t = target_data[i].round() as usize;
            grad[i * classes + t] -= 1.0;
        }
        for g in &mut grad {
            *g *= grad_output / n as f64;
        }
        Tensor::new(shape.clone(), grad)
    };

    (loss, Box::new(back))
}

/// Performs one step of stochastic gradient descent (SGD) on the given parameter tensor.
///
/// # Formula
/// $$ w := w - \\text{lr} \\cdot \\frac{\\partial L}{\\partial w} $$
///
/// # Behavior
/// - Updates `w.value` in-place
/// - Zeros out `w.grad` after update (gradient reset step)
///
/// # Example
/// ```rust
/// use gradmap::backprop::sgd;
/// use gradmap::tensor;
/// use gradmap::tensors::WithGrad;
///
/// let mut weights = WithGrad::new(tensor!([3.0, 5.0, 4.0]));
/// sgd(&mut weights, 0.01);
/// ```
pub fn sgd(w: &mut WithGrad<Ten64>, lr: f64) {
    for (param, grad) in w.value.data.iter_mut().zip(&w.grad.data) {
        *param -= lr * *grad;
    }
    for grad in &mut w.grad.data {
        *grad = 0.0;
    }
}
