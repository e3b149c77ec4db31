//! Mapped-axis batch transform.
//!
//! # Vectorizing a single-sample function
//!
//! [`batch_map`] takes a pure function written for one sample and applies it
//! across a batch: each argument is declared either [`AxisSpec::Mapped`]
//! (sliced along one axis, one slice per call) or [`AxisSpec::Broadcast`]
//! (passed through unchanged to every call). Outputs are stacked along a new
//! leading axis.
//!
//! This is deliberately an explicit batched loop with a declarative
//! per-argument axis specification — not a transform engine. Its correctness
//! contract is exactly the loop it replaces: for any pure, side-effect-free
//! `f`,
//!
//! ```text
//! batch_map(specs, args, f)[i] == f(args sliced at i)   for every i
//! ```
//!
//! The calls run in parallel via `rayon`; `f` must therefore depend only on
//! its explicit arguments, which is also what makes the equivalence contract
//! meaningful.
//!
//! ## Example
//!
//! ```rust
//! use gradmap::tensor;
//! use gradmap::vmap::{batch_map, AxisSpec};
//!
//! // double each row's sum, broadcasting a scale factor
//! let xs = tensor!([[1.0, 2.0], [3.0, 4.0]]);
//! let scale = tensor!([2.0]);
//! let sums: gradmap::tensors::Ten64 = batch_map(
//!     &[AxisSpec::Mapped(0), AxisSpec::Broadcast],
//!     &[&xs, &scale],
//!     |args| args[0].data.iter().sum::<f64>() * args[1].data[0],
//! );
//! assert_eq!(sums.data, vec![6.0, 14.0]);
//! ```

use crate::tensors::{Ten64, Tensor};
use rayon::prelude::*;

/// How one argument participates in a [`batch_map`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AxisSpec {
    /// Slice this argument along the given axis; the mapped function sees
    /// one slice (with that axis removed) per sample.
    Mapped(usize),
    /// Pass this argument to every call unchanged.
    Broadcast,
}

/// Collects per-sample outputs into one batched value.
///
/// Implementations exist for the output shapes the per-sample gradient
/// pattern needs: scalars stack into a `[b]` tensor, tensors gain a new
/// leading axis, and tensor lists stack position-wise.
pub trait Stack: Sized + Send {
    /// The batched form of `Self`.
    type Batched;

    /// Stacks outputs in sample order.
    ///
    /// # Panics
    /// Panics if `parts` is empty; `batch_map` never produces an empty list.
    fn stack(parts: Vec<Self>) -> Self::Batched;
}

impl Stack for f64 {
    type Batched = Ten64;

    fn stack(parts: Vec<Self>) -> Ten64 {
        assert!(!parts.is_empty(), "cannot stack zero scalars");
        Tensor::new(vec![parts.len()], parts)
    }
}

impl Stack for Ten64 {
    type Batched = Ten64;

    fn stack(parts: Vec<Self>) -> Ten64 {
        Tensor::stack(&parts)
    }
}

impl Stack for Vec<Ten64> {
    type Batched = Vec<Ten64>;

    /// Position-wise: the j-th output tensor of every sample stacks into the
    /// j-th batched tensor.
    fn stack(parts: Vec<Self>) -> Vec<Ten64> {
        assert!(!parts.is_empty(), "cannot stack zero tensor lists");
        let width = parts[0].len();
        assert!(
            parts.iter().all(|p| p.len() == width),
            "stack requires uniform list lengths"
        );

        (0..width)
            .map(|j| {
                let column: Vec<Ten64> = parts.iter().map(|p| p[j].clone()).collect();
                Tensor::stack(&column)
            })
            .collect()
    }
}

/// Applies a single-sample function across the mapped axis of the mapped
/// arguments, broadcasting the rest, and stacks the outputs.
///
/// The batch size is taken from the mapped arguments, which must all agree.
/// Sample `i` of a `Mapped(axis)` argument is `arg.select(axis, i)`; the
/// function receives the per-sample argument list in declaration order.
///
/// # Panics
/// - If `specs` and `args` differ in length.
/// - If no argument is mapped, or mapped arguments disagree on batch size.
/// - If the batch is empty: with zero calls the output shape is unknowable
///   here. Callers that know their output shapes (as the per-sample gradient
///   API does) should handle `b = 0` before mapping.
pub fn batch_map<R, F>(specs: &[AxisSpec], args: &[&Ten64], f: F) -> R::Batched
where
    R: Stack,
    F: Fn(&[&Ten64]) -> R + Sync,
{
    assert_eq!(specs.len(), args.len(), "one AxisSpec per argument");

    let mut batch: Option<usize> = None;
    for (spec, arg) in specs.iter().zip(args) {
        if let AxisSpec::Mapped(axis) = *spec {
            assert!(
                axis < arg.shape.len(),
                "mapped axis {axis} out of range for shape {:?}",
                arg.shape
            );
            let b = arg.shape[axis];
            match batch {
                None => batch = Some(b),
                Some(prev) => assert_eq!(prev, b, "mapped arguments disagree on batch size"),
            }
        }
    }

    let b = batch.expect("batch_map requires at least one mapped argument");
    assert!(b > 0, "batch_map cannot infer an output shape from an empty batch");

    let parts: Vec<R> = (0..b)
        .into_par_iter()
        .map(|i| {
            let sliced: Vec<Option<Ten64>> = specs
                .iter()
                .zip(args)
                .map(|(spec, arg)| match *spec {
                    AxisSpec::Mapped(axis) => Some(arg.select(axis, i)),
                    AxisSpec::Broadcast => None,
                })
                .collect();

            let view: Vec<&Ten64> = sliced
                .iter()
                .zip(args)
                .map(|(slice, arg)| slice.as_ref().unwrap_or(*arg))
                .collect();

            f(&view)
        })
        .collect();

    R::stack(parts)
}
