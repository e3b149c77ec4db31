//! Per-sample gradients two ways: a naive loop over the batch against the
//! mapped-axis batch transform, with an equivalence check and a timing
//! comparison. Widths are reduced from the default model so the naive path
//! stays tolerable on CPU.

use gradmap::approx::{GRAD_ABS_TOL, GRAD_REL_TOL, all_close, max_abs_diff};
use gradmap::backend::{Backend, set_backend};
use gradmap::bench::{percent_diff, time_fn};
use gradmap::model::ConvNet;
use gradmap::persample::{per_sample_grads, per_sample_grads_loop};
use gradmap::tensors::Ten64;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const BATCH: usize = 64;
const REPS: u32 = 3;
const SEED: u64 = 42;

fn main() {
    set_backend(Backend::Cpu);

    let mut rng = StdRng::seed_from_u64(SEED);
    let model = ConvNet::with_widths(4, 8, 32, &mut rng);

    let xs = Ten64::rand_uniform(vec![BATCH, 1, 28, 28], 1.0, &mut rng);
    let ts = Ten64::new(
        vec![BATCH],
        (0..BATCH).map(|_| f64::from(rng.random_range(0..10))).collect(),
    );

    println!("per-sample gradients for a batch of {BATCH} (seed {SEED})");

    let naive = per_sample_grads_loop(&model, &xs, &ts);
    let mapped = per_sample_grads(&model, &xs, &ts);

    for (i, (a, b)) in naive.iter().zip(&mapped).enumerate() {
        assert!(
            all_close(a, b, GRAD_ABS_TOL, GRAD_REL_TOL),
            "parameter {i} diverged: max |delta| = {:e}",
            max_abs_diff(a, b)
        );
        println!("  parameter {i}: shape {:?} ok", a.shape);
    }
    println!("both paths agree on all {} parameter tensors", naive.len());

    let t_loop = time_fn("per-sample loop", REPS, || {
        per_sample_grads_loop(&model, &xs, &ts)
    });
    let t_mapped = time_fn("batched transform", REPS, || {
        per_sample_grads(&model, &xs, &ts)
    });

    println!("{t_loop}");
    println!("{t_mapped}");

    let delta = percent_diff(&t_loop, &t_mapped);
    if delta >= 0.0 {
        println!("batched transform ran {delta:.1}% faster than the loop");
    } else {
        println!("batched transform ran {:.1}% slower than the loop", -delta);
    }
}
