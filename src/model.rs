//! The demonstration network: a small fixed-architecture conv net.
//!
//! # Model
//!
//! `ConvNet` classifies `[n, 1, 28, 28]` inputs into 10 classes:
//!
//! ```text
//! conv(1→c1, 3×3) → relu → conv(c1→c2, 3×3) → relu → maxpool(2)
//!     → flatten → fc(c2·12·12 → h) → relu → fc(h → 10)
//! ```
//!
//! The model exists in two forms:
//!
//! - **Stateful**: [`ConvNet`] owns its parameters as `WithGrad` tensors and
//!   exposes [`ConvNet::logits`] and [`ConvNet::grad_one`] — the per-sample
//!   loop path differentiates through the owned parameters directly.
//! - **Functional**: [`forward_with`] and [`sample_loss_grads`] take the
//!   parameter and buffer sets as explicit arguments and touch no ambient
//!   state. This form is what the mapped-axis batch transform requires:
//!   its output depends only on its explicit inputs.
//!
//! The forward pass computes a log-softmax of the final activations and then
//! hands the raw logits to the caller; the loss consumes logits directly.

use crate::backprop;
use crate::modelio;
use crate::tensors::{Ten64, Tensor, WithGrad};
use rand::Rng;
use std::error::Error;

/// Input channel count the network is built for.
pub const IN_CHANNELS: usize = 1;

/// Input height/width the network is built for.
pub const IN_HW: usize = 28;

/// Number of output classes.
pub const NUM_CLASSES: usize = 10;

/// Number of parameter tensors (two per layer: weight and bias).
pub const PARAM_COUNT: usize = 8;

const KSIZE: usize = 3;
const POOL: usize = 2;

/// Spatial edge after both valid convolutions and the pooling step.
const POOLED_HW: usize = (IN_HW - 2 * (KSIZE - 1)) / POOL;

/// A small convolutional classifier with explicit, inspectable parameters.
///
/// Parameter order everywhere in this crate is: conv1 weight, conv1 bias,
/// conv2 weight, conv2 bias, fc1 weight, fc1 bias, fc2 weight, fc2 bias.
#[derive(Debug, Clone)]
pub struct ConvNet {
    pub conv1_w: WithGrad<Ten64>,
    pub conv1_b: WithGrad<Ten64>,
    pub conv2_w: WithGrad<Ten64>,
    pub conv2_b: WithGrad<Ten64>,
    pub fc1_w: WithGrad<Ten64>,
    pub fc1_b: WithGrad<Ten64>,
    pub fc2_w: WithGrad<Ten64>,
    pub fc2_b: WithGrad<Ten64>,
}

impl ConvNet {
    /// Builds the default-width network (32 and 64 conv channels, 128 hidden
    /// units) with uniform `±1/√fan_in` initialization from the given RNG.
    pub fn new(rng: &mut impl Rng) -> Self {
        Self::with_widths(32, 64, 128, rng)
    }

    /// Builds a network with custom conv channel counts and hidden width.
    ///
    /// Narrow widths keep test instances cheap; the architecture and input
    /// contract are unchanged.
    pub fn with_widths(c1: usize, c2: usize, hidden: usize, rng: &mut impl Rng) -> Self {
        let flat = c2 * POOLED_HW * POOLED_HW;

        let lim1 = 1.0 / ((IN_CHANNELS * KSIZE * KSIZE) as f64).sqrt();
        let lim2 = 1.0 / ((c1 * KSIZE * KSIZE) as f64).sqrt();
        let lim3 = 1.0 / (flat as f64).sqrt();
        let lim4 = 1.0 / (hidden as f64).sqrt();

        Self {
            conv1_w: WithGrad::<Ten64>::new(Ten64::rand_uniform(
                vec![c1, IN_CHANNELS, KSIZE, KSIZE],
                lim1,
                rng,
            )),
            conv1_b: WithGrad::<Ten64>::new(Ten64::rand_uniform(vec![c1], lim1, rng)),
            conv2_w: WithGrad::<Ten64>::new(Ten64::rand_uniform(vec![c2, c1, KSIZE, KSIZE], lim2, rng)),
            conv2_b: WithGrad::<Ten64>::new(Ten64::rand_uniform(vec![c2], lim2, rng)),
            fc1_w: WithGrad::<Ten64>::new(Ten64::rand_uniform(vec![flat, hidden], lim3, rng)),
            fc1_b: WithGrad::<Ten64>::new(Ten64::rand_uniform(vec![hidden], lim3, rng)),
            fc2_w: WithGrad::<Ten64>::new(Ten64::rand_uniform(vec![hidden, NUM_CLASSES], lim4, rng)),
            fc2_b: WithGrad::<Ten64>::new(Ten64::rand_uniform(vec![NUM_CLASSES], lim4, rng)),
        }
    }

    fn param_refs(&self) -> [&WithGrad<Ten64>; PARAM_COUNT] {
        [
            &self.conv1_w,
            &self.conv1_b,
            &self.conv2_w,
            &self.conv2_b,
            &self.fc1_w,
            &self.fc1_b,
            &self.fc2_w,
            &self.fc2_b,
        ]
    }

    /// Clones out the parameter set in canonical order.
    pub fn params(&self) -> Vec<Ten64> {
        self.param_refs().iter().map(|p| p.value.clone()).collect()
    }

    /// Shapes of the parameter tensors in canonical order.
    pub fn param_shapes(&self) -> Vec<Vec<usize>> {
        self.param_refs().iter().map(|p| p.value.shape.clone()).collect()
    }

    /// Non-learnable persistent tensors. `ConvNet` has none, but the
    /// functional interface carries the set so models that do have them
    /// (e.g. normalization statistics) fit the same signatures.
    pub fn buffers(&self) -> Vec<Ten64> {
        Vec::new()
    }

    /// Replaces every parameter tensor, shape-checked.
    ///
    /// # Panics
    /// Panics if the count or any shape disagrees with the current set.
    pub fn set_params(&mut self, params: &[Ten64]) {
        assert_eq!(params.len(), PARAM_COUNT, "ConvNet has {PARAM_COUNT} parameters");
        let slots = [
            &mut self.conv1_w,
            &mut self.conv1_b,
            &mut self.conv2_w,
            &mut self.conv2_b,
            &mut self.fc1_w,
            &mut self.fc1_b,
            &mut self.fc2_w,
            &mut self.fc2_b,
        ];
        for (slot, p) in slots.into_iter().zip(params) {
            slot.value.update(p.clone());
        }
    }

    /// Runs the forward pass on a `[n, 1, 28, 28]` batch, returning logits.
    pub fn logits(&self, x: &Ten64) -> Ten64 {
        let x = WithGrad::<Ten64>::new(x.clone());
        let (logits, _back) = forward_backward(&self.param_refs(), &x);
        logits
    }

    /// Naive single-sample gradient: adds the singleton batch dimension,
    /// forwards, computes the scalar loss against one class index, and
    /// differentiates through every parameter.
    ///
    /// Returns the gradients in canonical parameter order.
    pub fn grad_one(&self, x: &Ten64, target: f64) -> Vec<Ten64> {
        let x = WithGrad::<Ten64>::new(x.clone().unsqueeze(0));
        let targets = Tensor::new(vec![1], vec![target]);

        let (logits, back) = forward_backward(&self.param_refs(), &x);
        let logits = WithGrad::<Ten64>::new(logits);
        let (_loss, back_loss) = backprop::cross_entropy_logits(&logits, &targets);
        back(&back_loss(1.0))
    }

    /// Saves the parameter set to a snapshot file.
    pub fn save(&self, path: &str) -> Result<(), Box<dyn Error>> {
        modelio::save_params(path, &self.params())
    }

    /// Loads a snapshot saved by [`ConvNet::save`] into this model.
    ///
    /// # Errors
    /// Fails on I/O problems or malformed snapshots; panics (via
    /// [`ConvNet::set_params`]) if the snapshot's shapes belong to a
    /// different architecture.
    pub fn load(&mut self, path: &str) -> Result<(), Box<dyn Error>> {
        let params = modelio::load_params(path)?;
        self.set_params(&params);
        Ok(())
    }
}

/// Forward pass plus a deferred backward chain.
///
/// Returns the logits and a closure that, given `dL/d(logits)`, replays every
/// op's backward closure in reverse and yields gradients for all eight
/// parameter tensors in canonical order.
fn forward_backward(
    params: &[&WithGrad<Ten64>; PARAM_COUNT],
    x: &WithGrad<Ten64>,
) -> (Ten64, Box<dyn FnOnce(&Ten64) -> Vec<Ten64>>) {
    let [c1w, c1b, c2w, c2b, f1w, f1b, f2w, f2b] = *params;

    let (a1, back_conv1) = backprop::conv2d(x, c1w, c1b);
    let a1 = WithGrad::<Ten64>::new(a1);
    let (r1, back_relu1) = backprop::relu(&a1);
    let r1 = WithGrad::<Ten64>::new(r1);

    let (a2, back_conv2) = backprop::conv2d(&r1, c2w, c2b);
    let a2 = WithGrad::<Ten64>::new(a2);
    let (r2, back_relu2) = backprop::relu(&a2);
    let r2 = WithGrad::<Ten64>::new(r2);

    let (pooled, back_pool) = backprop::max_pool2d(&r2, POOL);
    let pooled_shape = pooled.shape.clone();
    let n = pooled_shape[0];
    let feat: usize = pooled_shape[1..].iter().product();

    // flatten is a pure reshape; its "backward" is the inverse reshape below
    let flat = WithGrad::<Ten64>::new(Tensor::new(vec![n, feat], pooled.data));

    let (z1, back_mm1) = backprop::matmul(&flat, f1w);
    let z1 = WithGrad::<Ten64>::new(z1);
    let (z1b, back_add1) = backprop::add_row(&z1, f1b);
    let z1b = WithGrad::<Ten64>::new(z1b);
    let (h, back_relu3) = backprop::relu(&z1b);
    let h = WithGrad::<Ten64>::new(h);

    let (z2, back_mm2) = backprop::matmul(&h, f2w);
    let z2 = WithGrad::<Ten64>::new(z2);
    let (logits, back_add2) = backprop::add_row(&z2, f2b);

    // log-probabilities are computed here, but the raw logits are what the
    // caller receives; the loss consumes logits directly
    let logits_wg = WithGrad::<Ten64>::new(logits);
    let (_log_probs, _back_ls) = backprop::log_softmax(&logits_wg);
    let logits = logits_wg.value;

    let back = move |g_logits: &Ten64| {
        let (g_z2, g_f2b) = back_add2(g_logits);
        let (g_h, g_f2w) = back_mm2(&g_z2);
        let g_z1b = back_relu3(&g_h);
        let (g_z1, g_f1b) = back_add1(&g_z1b);
        let (g_flat, g_f1w) = back_mm1(&g_z1);

        let g_pooled = Tensor::new(pooled_shape, g_flat.data);
        let g_r2 = back_pool(&g_pooled);
        let g_a2 = back_relu2(&g_r2);
        let (g_r1, g_c2w, g_c2b) = back_conv2(&g_a2);
        let g_a1 = back_relu1(&g_r1);
        let (_g_x, g_c1w, g_c1b) = back_conv1(&g_a1);

        vec![g_c1w, g_c1b, g_c2w, g_c2b, g_f1w, g_f1b, g_f2w, g_f2b]
    };

    (logits, Box::new(back))
}

/// Forward pass as a pure function of explicit parameters and buffers.
///
/// `x` is one batch `[n, 1, 28, 28]`; the result is `[n, 10]` logits. The
/// output depends only on the arguments — nothing is read from or written to
/// any model object.
///
/// # Panics
/// Panics if `params` is not the canonical eight-tensor set or `buffers` is
/// non-empty (the demonstration model owns no buffers).
pub fn forward_with(params: &[Ten64], buffers: &[Ten64], x: &Ten64) -> Ten64 {
    let wrapped = wrap_params(params, buffers);
    let x = WithGrad::<Ten64>::new(x.clone());
    let (logits, _back) = forward_backward(&as_refs(&wrapped), &x);
    logits
}

/// Stateless single-sample loss: parameters, buffers, one `[1, 28, 28]`
/// sample and one class index in, scalar loss out.
///
/// Adds the singleton batch dimension internally. Calling this twice with
/// identical arguments returns identical results and mutates nothing, which
/// is what makes it a valid mapping target for the batch transform.
pub fn sample_loss(params: &[Ten64], buffers: &[Ten64], x: &Ten64, target: f64) -> f64 {
    let logits = forward_with(params, buffers, &x.clone().unsqueeze(0));
    let logits = WithGrad::<Ten64>::new(logits);
    let targets = Tensor::new(vec![1], vec![target]);
    let (loss, _back) = backprop::cross_entropy_logits(&logits, &targets);
    loss
}

/// The gradient transform of [`sample_loss`] with respect to its first
/// argument: returns the scalar loss together with one gradient tensor per
/// parameter, in canonical order.
pub fn sample_loss_grads(
    params: &[Ten64],
    buffers: &[Ten64],
    x: &Ten64,
    target: f64,
) -> (f64, Vec<Ten64>) {
    let wrapped = wrap_params(params, buffers);
    let x = WithGrad::<Ten64>::new(x.clone().unsqueeze(0));
    let targets = Tensor::new(vec![1], vec![target]);

    let (logits, back) = forward_backward(&as_refs(&wrapped), &x);
    let logits = WithGrad::<Ten64>::new(logits);
    let (loss, back_loss) = backprop::cross_entropy_logits(&logits, &targets);
    (loss, back(&back_loss(1.0)))
}

fn wrap_params(params: &[Ten64], buffers: &[Ten64]) -> Vec<WithGrad<Ten64>> {
    assert_eq!(params.len(), PARAM_COUNT, "ConvNet takes {PARAM_COUNT} parameter tensors");
    assert!(buffers.is_empty(), "ConvNet has no buffers");
    params.iter().map(|p| WithGrad::<Ten64>::new(p.clone())).collect()
}

fn as_refs(wrapped: &[WithGrad<Ten64>]) -> [&WithGrad<Ten64>; PARAM_COUNT] {
    let refs: Vec<&WithGrad<Ten64>> = wrapped.iter().collect();
    refs.try_into()
        .unwrap_or_else(|_| unreachable!("length checked in wrap_params"))
}
