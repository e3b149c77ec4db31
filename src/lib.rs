//! gradmap: per-sample gradients for small conv nets in Rust.
//!
//! Demonstrates and implements the "per-sample gradient via vectorized
//! single-sample transform" pattern: the gradient of each sample's loss with
//! respect to every model parameter, computed once by a naive per-sample
//! loop and once by a declarative mapped-axis batch transform, with the two
//! results held numerically equivalent.
//!
//! # Goals
//!
//! - Keep differentiation explicit: every op returns its output together
//!   with a backward closure, and chaining those closures is the whole
//!   autograd story.
//! - Make the functional seam visible: the model exists both as a stateful
//!   object and as a pure function of explicit parameters/buffers, and the
//!   batch transform only accepts the pure form.
//! - Prioritize correctness, explicitness, and extensibility over black-box
//!   abstraction.
//!
//! # Modules
//!
//! - [`tensors`] — Core tensor data structures and axis helpers.
//! - [`backprop`] — Differentiable operations with backward closures.
//! - [`model`] — The fixed demonstration conv net, stateful and functional.
//! - [`vmap`] — The mapped-axis batch transform (`batch_map` + `AxisSpec`).
//! - [`persample`] — The naive and vectorized per-sample gradient paths.
//! - [`bench`] — Wall-clock comparison utilities.
//! - [`approx`] — Tolerance-based tensor comparison.
//! - [`backend`] — Global compute backend selection.
//! - [`modelio`] — Saving/loading of parameter snapshots.
//!
//! # Example
//!
//! ```rust
//! use gradmap::model::ConvNet;
//! use gradmap::persample::{per_sample_grads, per_sample_grads_loop};
//! use gradmap::tensors::Ten64;
//! use rand::{SeedableRng, rngs::StdRng};
//!
//! let mut rng = StdRng::seed_from_u64(0);
//! let model = ConvNet::with_widths(2, 3, 8, &mut rng);
//! let xs = Ten64::rand_uniform(vec![4, 1, 28, 28], 1.0, &mut rng);
//! let ts = Ten64::new(vec![4], vec![0.0, 3.0, 1.0, 9.0]);
//!
//! let naive = per_sample_grads_loop(&model, &xs, &ts);
//! let mapped = per_sample_grads(&model, &xs, &ts);
//! assert_eq!(naive.len(), mapped.len());
//! ```

pub mod approx;
pub mod backend;
pub mod backprop;
pub mod bench;
pub mod model;
pub mod modelio;
pub mod ops;
pub mod persample;
pub mod tensors;
pub mod vmap;
