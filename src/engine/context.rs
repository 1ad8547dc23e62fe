//! Run context handed to user programs and kernels.

use std::sync::atomic::{AtomicI64, Ordering};

use crate::engine::convergence::DeltaTracker;

/// Read-mostly view of the run state, shared across worker threads.
///
/// The delta array and the last-iteration flag are the only mutable
/// parts; both are updated through `&self` so the context can be
/// shared freely with the worker pool.
pub struct Context<'a> {
    pub iteration: usize,
    pub num_iterations: usize,
    pub num_vertices: u32,
    pub num_edges: u64,
    pub execthreads: usize,
    pub(crate) deltas: &'a DeltaTracker,
    pub(crate) last_iteration: &'a AtomicI64,
}

impl Context<'_> {
    /// Folds a per-vertex change into `worker`'s max-delta cell.
    pub fn update_delta(&self, worker: usize, delta: f64) {
        self.deltas.update(worker, delta);
    }

    /// `worker`'s current max delta for this iteration.
    pub fn delta(&self, worker: usize) -> f64 {
        self.deltas.get(worker)
    }

    /// Reduction over all workers' deltas.
    pub fn max_delta(&self) -> f64 {
        self.deltas.max()
    }

    /// Clears all delta cells.
    pub fn reset_deltas(&self) {
        self.deltas.reset();
    }

    /// Requests termination after iteration `iteration` completes.
    pub fn set_last_iteration(&self, iteration: usize) {
        self.last_iteration.store(iteration as i64, Ordering::Relaxed);
    }

    pub fn is_last_iteration(&self) -> bool {
        self.last_iteration.load(Ordering::Relaxed) == self.iteration as i64
    }
}
