//! Core tensor data structures and operations.
//!
//! # Core Tensor Utilities
//!
//! This module defines the core logic for representing, manipulating, and computing with
//! multi-dimensional arrays, or tensors.
//!
//! It supports:
//! - Construction of N-dimensional tensors with shape and row-major data layout
//! - Axis manipulation: `unsqueeze`, `select` and `stack`, the primitives the
//!   mapped-axis batch transform is built from
//! - Autograd-compatible `WithGrad` wrappers pairing a value with its gradient
//! - Seeded uniform random initialization for parameter tensors
//! - Compile-time tensor macros
//!
//! ## Design Highlights
//! - Tensors are strongly typed: `Tensor<T>` for any element type (usually `f64`)
//! - Shape is stored as a `Vec<usize>` and enforced at runtime
//! - `WithGrad<T>` pairs any value with its gradient for autograd
//! - The `tensor!` macro supports ergonomic tensor creation from nested arrays
//!
//! ## Limitations
//! - Row-major only
//! - No general broadcasting or shape inference; ops assert the shapes they need
//!
//! ## Example
//!
//! ```rust
//! use gradmap::tensors::Tensor;
//! let t = Tensor::new(vec![2, 3], vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
//! assert_eq!(t.shape, vec![2, 3]);
//! ```

use rand::Rng;

/// Represents an N-dimensional tensor with a shape and flat row-major data.
///
/// - All elements must be the same type (`T`).
/// - `shape` defines the structure, e.g., `[2, 3]` for a 2×3 matrix.
/// - `data` holds the flattened content in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor<T> {
    pub shape: Vec<usize>,
    pub data: Vec<T>,
}

/// The element type every differentiable op in this crate works on.
pub type Ten64 = Tensor<f64>;

impl<T> Tensor<T> {
    /// Creates a new tensor with the given shape and flat data.
    ///
    /// # Panics
    /// Panics if the number of elements in `data` does not match the shape product.
    pub fn new(shape: impl Into<Vec<usize>>, data: Vec<T>) -> Self {
        let shape = shape.into();
        assert_eq!(
            shape.iter().product::<usize>(),
            data.len(),
            "shape {:?} is incompatible with {} data elements",
            shape,
            data.len()
        );
        Self { shape, data }
    }

    /// Number of elements held by the tensor.
    pub fn numel(&self) -> usize {
        self.data.len()
    }

    /// Replaces this tensor's data with another tensor of the same shape.
    ///
    /// # Panics
    /// Panics if shapes do not match.
    pub fn update(&mut self, mut other: Tensor<T>) {
        assert_eq!(self.shape, other.shape, "shape mismatch");
        std::mem::swap(&mut self.data, &mut other.data);
    }

    /// Inserts a singleton dimension at `axis`, consuming the tensor.
    ///
    /// The data is untouched; only the shape changes. `axis` may equal the
    /// current rank to append a trailing dimension.
    ///
    /// # Panics
    /// Panics if `axis` exceeds the tensor rank.
    pub fn unsqueeze(mut self, axis: usize) -> Self {
        assert!(axis <= self.shape.len(), "unsqueeze axis {axis} out of range");
        self.shape.insert(axis, 1);
        self
    }
}

impl<T: Copy> Tensor<T> {
    /// Copies out the sub-tensor at `index` along `axis`, removing that axis.
    ///
    /// For a tensor of shape `[4, 2, 3]`, `select(0, i)` yields shape `[2, 3]`
    /// and `select(1, i)` yields shape `[4, 3]`.
    ///
    /// # Panics
    /// Panics if `axis` is out of range or `index >= shape[axis]`.
    pub fn select(&self, axis: usize, index: usize) -> Tensor<T> {
        assert!(axis < self.shape.len(), "select axis {axis} out of range");
        let axis_len = self.shape[axis];
        assert!(
            index < axis_len,
            "select index {index} out of range for axis length {axis_len}"
        );

        let outer: usize = self.shape[..axis].iter().product();
        let inner: usize = self.shape[axis + 1..].iter().product();

        let mut data = Vec::with_capacity(outer * inner);
        for o in 0..outer {
            let start = (o * axis_len + index) * inner;
            data.extend_from_slice(&self.data[start..start + inner]);
        }

        let mut shape = self.shape.clone();
        shape.remove(axis);
        Tensor::new(shape, data)
    }

    /// Stacks tensors of identical shape along a new leading axis.
    ///
    /// # Panics
    /// Panics if `parts` is empty or the shapes disagree.
    pub fn stack(parts: &[Tensor<T>]) -> Tensor<T> {
        assert!(!parts.is_empty(), "cannot stack zero tensors");
        let first_shape = &parts[0].shape;
        assert!(
            parts.iter().all(|p| p.shape == *first_shape),
            "stack requires uniform shapes"
        );

        let mut shape = vec![parts.len()];
        shape.extend_from_slice(first_shape);

        let mut data = Vec::with_capacity(parts.len() * parts[0].data.len());
        for p in parts {
            data.extend_from_slice(&p.data);
        }
        Tensor::new(shape, data)
    }
}

impl Ten64 {
    /// Creates a tensor of the given shape filled with zeros.
    pub fn zeros(shape: impl Into<Vec<usize>>) -> Self {
        let shape = shape.into();
        let len = shape.iter().product();
        Self::new(shape, vec![0.0; len])
    }

    /// Creates an empty tensor with a zero-length leading axis.
    ///
    /// The trailing dimensions are kept so the result still carries a
    /// meaningful per-element shape, e.g. `[0, 32, 3, 3]`.
    pub fn empty_batched(inner_shape: &[usize]) -> Self {
        let mut shape = vec![0];
        shape.extend_from_slice(inner_shape);
        Self::new(shape, Vec::new())
    }

    /// Fills a tensor of the given shape with values drawn uniformly from
    /// `-limit..limit` using the supplied RNG.
    ///
    /// Passing a seeded `StdRng` makes initialization fully deterministic.
    pub fn rand_uniform(shape: impl Into<Vec<usize>>, limit: f64, rng: &mut impl Rng) -> Self {
        let shape = shape.into();
        let len = shape.iter().product();
        let data = (0..len).map(|_| rng.random_range(-limit..limit)).collect();
        Self::new(shape, data)
    }
}

/// A container for tracking gradients of values (used in autograd).
///
/// Typically used as `WithGrad<Ten64>` or `WithGrad<f64>`.
#[derive(Debug, Clone)]
pub struct WithGrad<T> {
    pub value: T,
    pub grad: T,
}

impl WithGrad<Ten64> {
    /// Wraps a tensor with a zeroed gradient of the same shape.
    pub fn new(value: Ten64) -> Self {
        let grad = Ten64::zeros(value.shape.clone());
        Self { value, grad }
    }
}

impl WithGrad<f64> {
    /// Wraps a scalar with a zeroed gradient.
    pub fn new(value: f64) -> Self {
        Self { value, grad: 0.0 }
    }
}

/// Defines a tensor from nested literal arrays.
///
/// Supports arbitrary dimensionality as long as sublists are uniform in shape.
///
/// # Example
/// ```
/// use gradmap::tensor;
/// let t = tensor!([[1.0, 2.0], [3.0, 4.0]]);
/// assert_eq!(t.shape, vec![2, 2]);
/// ```
#[macro_export]
macro_rules! tensor {
    ($lit:literal) => {
        $crate::tensors::Tensor::new(Vec::<usize>::new(), vec![$lit])
    };

    ([ $( $inner:tt ),+ $(,)? ]) => {{
        let children = vec![ $( tensor!($inner) ),+ ];
        let first_shape = &children[0].shape;
        assert!(children.iter().all(|c| c.shape == *first_shape),
            "ragged tensor literal (rows have mismatched shapes)");
        let mut shape = vec![children.len()];
        shape.extend_from_slice(first_shape);
        let mut data = Vec::with_capacity(children.len() * children[0].data.len());
        for c in children { data.extend(c.data); }
        $crate::tensors::Tensor::new(shape, data)
    }};
}
