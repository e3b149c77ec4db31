//! Operation Dispatch Layer
//!
//! This module selects the correct backend (CPU, WGPU, CUDA, etc.) at runtime
//! for each differentiable operation, based on the global `Backend`.
//!
//! Each function attempts backend-specific implementations in priority order:
//! 1. `Cuda` (if enabled)
//! 2. `Wgpu` (if enabled)
//! 3. Falls back to `Cpu`
//!
//! # Design Highlights
//! - **Pluggable**: Backends are optional and modular
//! - **Minimal overhead**: Function returns immediately upon match
//! - **Fallback logic**: Safe and deterministic fallback to CPU
//!
//! Only matrix multiplication is worth a device round-trip for the tensor
//! sizes this crate works at; all other ops dispatch straight to CPU.
//!
//! # Example
//! ```rust
//! use gradmap::{tensor, tensors::WithGrad};
//! use gradmap::backprop::matmul;
//!
//! let a = WithGrad::new(tensor!([[30.0, 50.0], [20.0, 40.0]]));
//! let b = WithGrad::new(tensor!([[20.0, 40.0], [30.0, 50.0]]));
//! let grad_out = tensor!([[20.4, 40.5], [30.6, 50.2]]);
//! let (out, back) = matmul(&a, &b); // uses GPU if available
//! let (grad_a, grad_b) = back(&grad_out);
//! ```

use crate::backend::{Backend, get_backend};
use crate::tensors::{Ten64, WithGrad};

/// Backward closure returning one gradient tensor.
pub type FnToTen64 = dyn Fn(&Ten64) -> Ten64;
/// Backward closure returning gradients for two inputs.
pub type FnToPairTen64 = dyn Fn(&Ten64) -> (Ten64, Ten64);
/// Backward closure returning gradients for three inputs.
pub type FnToTripleTen64 = dyn Fn(&Ten64) -> (Ten64, Ten64, Ten64);
/// Backward closure mapping an upstream scalar gradient to a tensor.
pub type FnScalarToTen64 = dyn Fn(f64) -> Ten64;

/// Dispatches matrix multiplication to the selected backend (CPU, WGPU, or CUDA).
///
/// # Returns
/// - `Tensor`: Output tensor (m×n)
/// - `Fn`: Closure computing (∂L/∂a, ∂L/∂b)
///
/// # Behavior
/// Attempts CUDA → WGPU → CPU, depending on availability and features.
pub fn matmul(a: &WithGrad<Ten64>, b: &WithGrad<Ten64>) -> (Ten64, Box<FnToPairTen64>) {
    match get_backend() {
        Backend::Cuda => {
            #[cfg(feature = "cuda")]
            {
                if let Some(result) = super::cuda::cuda_matmul(a, b) {
                    return result;
                }
            }
        }
        Backend::Wgpu => {
            #[cfg(feature = "wgpu")]
            {
                if let Some(result) = super::wgpu::wgpu_matmul(a, b) {
                    return result;
                }
            }
        }
        _ => {}
    }

    super::cpu::matmul(a, b)
}

/// Dispatches broadcast bias addition. CPU only.
pub fn add_row(x: &WithGrad<Ten64>, bias: &WithGrad<Ten64>) -> (Ten64, Box<FnToPairTen64>) {
    super::cpu::add_row(x, bias)
}

/// Dispatches 2D convolution. CPU only; accelerator backends fall back.
pub fn conv2d(
    input: &WithGrad<Ten64>,
    kernel: &WithGrad<Ten64>,
    bias: &WithGrad<Ten64>,
) -> (Ten64, Box<FnToTripleTen64>) {
    super::cpu::conv2d(input, kernel, bias)
}

/// Dispatches max pooling. CPU only.
pub fn max_pool2d(input: &WithGrad<Ten64>, k: usize) -> (Ten64, Box<FnToTen64>) {
    super::cpu::max_pool2d(input, k)
}

/// Dispatches the ReLU activation. CPU only.
pub fn relu(input: &WithGrad<Ten64>) -> (Ten64, Box<FnToTen64>) {
    super::cpu::relu(input)
}

/// Dispatches log-softmax. CPU only.
pub fn log_softmax(input: &WithGrad<Ten64>) -> (Ten64, Box<FnToTen64>) {
    super::cpu::log_softmax(input)
}

/// Dispatches cross-entropy-from-logits. CPU only.
pub fn cross_entropy_logits(
    logits: &WithGrad<Ten64>,
    targets: &Ten64,
) -> (f64, Box<FnScalarToTen64>) {
    super::cpu::cross_entropy_logits(logits, targets)
}

/// Dispatches Stochastic Gradient Descent to the selected backend.
///
/// # Behavior
/// Always runs on CPU; the update is memory-bound and in-place.
pub fn sgd(w: &mut WithGrad<Ten64>, lr: f64) {
    super::cpu::sgd(w, lr)
}
