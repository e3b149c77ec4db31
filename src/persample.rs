//! Per-sample gradient computation.
//!
//! Both entry points answer the same question — for every sample in a batch,
//! what is the gradient of that sample's loss with respect to every model
//! parameter? — and both return one `[b, *S]` tensor per parameter tensor of
//! shape `S`, in canonical parameter order.
//!
//! [`per_sample_grads_loop`] is the naive reference: it walks the batch one
//! sample at a time through the stateful model. [`per_sample_grads`] builds
//! the same answer from the functional pieces: the pure single-sample
//! loss-gradient function is applied through [`batch_map`], with the sample
//! and target mapped along axis 0 and every parameter broadcast. The two
//! must agree within floating-point tolerance; that equivalence is the whole
//! point of the pattern, and the test suite holds them to it.

use crate::model::{self, ConvNet};
use crate::tensors::{Ten64, Tensor};
use crate::vmap::{AxisSpec, batch_map};

fn check_batch(xs: &Ten64, ts: &Ten64) -> usize {
    assert!(!xs.shape.is_empty(), "inputs must be batched");
    let b = xs.shape[0];
    assert_eq!(ts.shape, vec![b], "targets must be [batch]");
    b
}

fn empty_grads(model: &ConvNet) -> Vec<Ten64> {
    model
        .param_shapes()
        .iter()
        .map(|shape| Ten64::empty_batched(shape))
        .collect()
}

/// Computes per-sample gradients with an explicit loop over the batch.
///
/// For each sample independently: slice it out, add the singleton batch
/// dimension, forward through the model, compute the scalar loss against the
/// sample's target, and differentiate through every parameter. The
/// per-sample results are stacked per parameter.
///
/// An empty batch yields `[0, *S]` tensors.
///
/// # Panics
/// Panics if `xs` is unbatched or `ts` is not `[batch]`.
pub fn per_sample_grads_loop(model: &ConvNet, xs: &Ten64, ts: &Ten64) -> Vec<Ten64> {
    let b = check_batch(xs, ts);
    if b == 0 {
        return empty_grads(model);
    }

    let mut per_param: Vec<Vec<Ten64>> = vec![Vec::with_capacity(b); model::PARAM_COUNT];
    for i in 0..b {
        let sample = xs.select(0, i);
        let grads = model.grad_one(&sample, ts.data[i]);
        for (stacked, grad) in per_param.iter_mut().zip(grads) {
            stacked.push(grad);
        }
    }

    per_param.into_iter().map(|gs| Tensor::stack(&gs)).collect()
}

/// Computes per-sample gradients in one vectorized call.
///
/// Extracts the parameter set once, then maps the pure single-sample
/// loss-gradient function ([`model::sample_loss_grads`]) over the batch:
/// inputs and targets are `Mapped(0)`, parameters are `Broadcast`. The
/// batched transform fans the samples out across threads and stacks the
/// per-parameter results.
///
/// An empty batch yields `[0, *S]` tensors without entering the transform.
///
/// # Panics
/// Panics if `xs` is unbatched or `ts` is not `[batch]`.
pub fn per_sample_grads(model: &ConvNet, xs: &Ten64, ts: &Ten64) -> Vec<Ten64> {
    let b = check_batch(xs, ts);
    if b == 0 {
        return empty_grads(model);
    }

    let params = model.params();
    let buffers = model.buffers();

    let mut specs = vec![AxisSpec::Mapped(0), AxisSpec::Mapped(0)];
    specs.extend(std::iter::repeat_n(AxisSpec::Broadcast, params.len()));

    let mut args: Vec<&Ten64> = vec![xs, ts];
    args.extend(params.iter());

    batch_map(&specs, &args, |call| {
        let x = call[0];
        let target = call[1].data[0];
        let ps: Vec<Ten64> = call[2..].iter().map(|&p| p.clone()).collect();
        let (_loss, grads) = model::sample_loss_grads(&ps, &buffers, x, target);
        grads
    })
}

/// Per-sample losses through the same mapped transform, mostly useful for
/// checking the purity contract of the single-sample loss function.
pub fn per_sample_losses(model: &ConvNet, xs: &Ten64, ts: &Ten64) -> Ten64 {
    let b = check_batch(xs, ts);
    if b == 0 {
        return Ten64::empty_batched(&[]);
    }

    let params = model.params();
    let buffers = model.buffers();

    let mut specs = vec![AxisSpec::Mapped(0), AxisSpec::Mapped(0)];
    specs.extend(std::iter::repeat_n(AxisSpec::Broadcast, params.len()));

    let mut args: Vec<&Ten64> = vec![xs, ts];
    args.extend(params.iter());

    batch_map(&specs, &args, |call| {
        let x = call[0];
        let target = call[1].data[0];
        let ps: Vec<Ten64> = call[2..].iter().map(|&p| p.clone()).collect();
        model::sample_loss(&ps, &buffers, x, target)
    })
}
