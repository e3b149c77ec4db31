//! Wall-clock comparison of the two per-sample gradient paths.
//!
//! Purely observational: nothing here affects results, it only measures.
//! The harness is the usual `Instant` + `black_box` loop — run the statement
//! a fixed number of times, keep the work from being optimized away, report
//! the elapsed time per repetition.

use std::fmt;
use std::hint::black_box;
use std::time::{Duration, Instant};

/// Elapsed time for one measured statement.
#[derive(Debug, Clone)]
pub struct Timing {
    /// What was measured.
    pub label: String,
    /// Total elapsed time across all repetitions.
    pub total: Duration,
    /// Number of repetitions measured.
    pub reps: u32,
}

impl Timing {
    /// Representative elapsed duration: total divided by repetitions.
    pub fn per_rep(&self) -> Duration {
        self.total / self.reps
    }
}

impl fmt::Display for Timing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}: {:?} total over {} reps ({:?}/rep)",
            self.label,
            self.total,
            self.reps,
            self.per_rep()
        )
    }
}

/// Runs `f` `reps` times and records the total elapsed time.
///
/// The closure's result is passed through [`black_box`] so the measured work
/// cannot be elided.
///
/// # Panics
/// Panics if `reps` is zero.
pub fn time_fn<T>(label: &str, reps: u32, mut f: impl FnMut() -> T) -> Timing {
    assert!(reps > 0, "cannot time zero repetitions");

    let start = Instant::now();
    for _ in 0..reps {
        black_box(f());
    }

    Timing {
        label: label.to_string(),
        total: start.elapsed(),
        reps,
    }
}

/// Percentage difference of `first` relative to `second`.
///
/// Positive means `first` took longer: `(first / second - 1) * 100`.
pub fn percent_diff(first: &Timing, second: &Timing) -> f64 {
    (first.total.as_secs_f64() / second.total.as_secs_f64() - 1.0) * 100.0
}
