//! Differentiable operations and autograd utilities.
//!
//! # Backpropagation Primitives
//!
//! Provides the operations the demonstration network is assembled from, each
//! with built-in autograd support.
//!
//! **Key Features:**
//! - **Convolution (`conv2d`):** Batched 2D cross-correlation with bias.
//! - **Matrix Multiplication:** m×k · k×n with gradient closures.
//! - **Pooling (`max_pool2d`):** Argmax-routed gradients.
//! - **Activations (`relu`, `log_softmax`):** Elementwise and row-wise.
//! - **Loss (`cross_entropy_logits`):** Scalar mean loss over a batch.
//! - **Optimizer (`sgd`):** In-place parameter update with gradient reset.
//!
//! ## Autograd Pattern
//!
//! Each operation follows a simple pattern:
//! 1. **Inputs** are references to `WithGrad<Ten64>` for tensor ops.
//! 2. **Forward Pass** computes an output `Ten64`.
//! 3. **Backward Pass** returns a closure capturing minimal cloned data to compute gradients.
//! 4. **Gradient Application** uses these results to update `WithGrad` wrappers.
//!
//! Chaining the backward closures in reverse call order is all the
//! "gradient of scalar loss w.r.t. every parameter" machinery this crate
//! has — there is no tape and no graph, by construction.
//!
//! ## Usage Guidelines
//!
//! - Operations **panic** on shape mismatches; ensure consistent tensor dimensions.
//! - The backward closures implement `Fn`, allowing multiple invocations if needed.
//! - Closures capture owned copies of what they need, so they outlive their inputs.

use crate::ops::dispatch::{FnScalarToTen64, FnToPairTen64, FnToTen64, FnToTripleTen64};
use crate::tensors::{Ten64, WithGrad};

/// Performs matrix multiplication of two 2D tensors: `a` (m×k) · `b` (k×n).
///
/// # Returns
/// - `out`: Product tensor (m×n).
/// - `back`: Closure that given `dL/d(out)` returns `(dL/d(a), dL/d(b))`.
///
/// # Panics
/// Panics if internal dimensions do not match (`a.shape[1] != b.shape[0]`).
///
/// # Performance
/// Uses AVX2 if compiled with `simd` feature. Uses Rayon for outer parallelism.
///
/// When compiled with the `wgpu` feature and the Wgpu backend is selected,
/// the forward product runs on the GPU.
pub fn matmul(a: &WithGrad<Ten64>, b: &WithGrad<Ten64>) -> (Ten64, Box<FnToPairTen64>) {
    crate::ops::dispatch::matmul(a, b)
}

/// Adds a `[d]` bias vector to every row of `x`, broadcasting over the last axis.
///
/// # Returns
/// - `out`: Tensor of `x`'s shape.
/// - `back`: Closure that given `dL/d(out)` returns `(dL/d(x), dL/d(bias))`.
///
/// # Panics
/// Panics if `bias` does not match the last axis of `x`.
pub fn add_row(x: &WithGrad<Ten64>, bias: &WithGrad<Ten64>) -> (Ten64, Box<FnToPairTen64>) {
    crate::ops::dispatch::add_row(x, bias)
}

/// Performs a batched 2D cross-correlation with per-channel bias
/// (stride 1, valid padding).
///
/// # Returns
/// - `out`: Tensor of shape `[n, c_out, h - kh + 1, w - kw + 1]`.
/// - `back`: Closure that given `dL/d(out)` returns
///   `(dL/d(input), dL/d(kernel), dL/d(bias))`.
///
/// # Panics
/// Panics on rank or channel mismatches.
pub fn conv2d(
    input: &WithGrad<Ten64>,
    kernel: &WithGrad<Ten64>,
    bias: &WithGrad<Ten64>,
) -> (Ten64, Box<FnToTripleTen64>) {
    crate::ops::dispatch::conv2d(input, kernel, bias)
}

/// Applies non-overlapping max pooling with window and stride `k`.
///
/// # Returns
/// - `out`: Tensor of shape `[n, c, h / k, w / k]`.
/// - `back`: Closure routing each upstream gradient to its window's argmax.
pub fn max_pool2d(input: &WithGrad<Ten64>, k: usize) -> (Ten64, Box<FnToTen64>) {
    crate::ops::dispatch::max_pool2d(input, k)
}

/// Applies the ReLU activation (Rectified Linear Unit): `max(0, x)` elementwise.
///
/// # Returns
/// - `out`: Tensor with negatives zeroed.
/// - `back`: Closure mapping `dL/d(out)` to `dL/d(input)` by passing gradients only where input > 0.
///
/// # Performance
/// Uses AVX2 if compiled with `simd` feature. Uses Rayon for outer parallelism.
pub fn relu(input: &WithGrad<Ten64>) -> (Ten64, Box<FnToTen64>) {
    crate::ops::dispatch::relu(input)
}

/// Computes the log-softmax over the last axis.
///
/// # Returns
/// - `out`: Log-probabilities of the input's shape.
/// - `back`: Closure computing `g - softmax * sum(g)` row-wise.
pub fn log_softmax(input: &WithGrad<Ten64>) -> (Ten64, Box<FnToTen64>) {
    crate::ops::dispatch::log_softmax(input)
}

/// Computes the mean cross-entropy of raw logits against class-index targets.
///
/// # Returns
/// - Scalar loss value
/// - Closure that maps `dL/dloss` into a gradient tensor of the logits' shape
///
/// # Panics
/// Panics if `logits` is not `[n, classes]`, `targets` is not `[n]`, or the
/// batch is empty.
pub fn cross_entropy_logits(
    logits: &WithGrad<Ten64>,
    targets: &Ten64,
) -> (f64, Box<FnScalarToTen64>) {
    crate::ops::dispatch::cross_entropy_logits(logits, targets)
}

/// Performs an in-place Stochastic Gradient Descent (SGD) update.
///
/// Applies: `param = param - learning_rate * gradient` and then zeros gradient.
pub fn sgd(w: &mut WithGrad<Ten64>, lr: f64) {
    crate::ops::dispatch::sgd(w, lr)
}
