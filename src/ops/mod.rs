//! Backend-specific implementations of the differentiable operations.
//!
//! Every op has a CPU implementation in [`cpu`]; the [`dispatch`] layer
//! consults the global backend and falls back to CPU whenever an
//! accelerator path is unavailable or not compiled in.

pub mod cpu;
pub mod dispatch;

#[cfg(feature = "cuda")]
pub mod cuda;

#[cfg(any(feature = "wgpu", feature = "cuda"))]
pub mod wgpu;
