//! Per-worker delta accumulation and the termination signal.

use std::sync::atomic::{AtomicU64, Ordering};

/// One max-delta cell per worker, reset at every iteration start.
///
/// Each worker only ever writes its own cell, so plain load/store with
/// relaxed ordering suffices; the cross-thread reduction in `max`
/// happens after the update pass has joined.
pub struct DeltaTracker {
    cells: Vec<AtomicU64>,
}

impl DeltaTracker {
    pub(crate) fn new(num_workers: usize) -> Self {
        Self {
            cells: (0..num_workers)
                .map(|_| AtomicU64::new(0f64.to_bits()))
                .collect(),
        }
    }

    pub fn num_workers(&self) -> usize {
        self.cells.len()
    }

    pub fn reset(&self) {
        for c in &self.cells {
            c.store(0f64.to_bits(), Ordering::Relaxed);
        }
    }

    /// Folds `delta` into `worker`'s running maximum.
    pub fn update(&self, worker: usize, delta: f64) {
        let cell = &self.cells[worker];
        let cur = f64::from_bits(cell.load(Ordering::Relaxed));
        if delta > cur {
            cell.store(delta.to_bits(), Ordering::Relaxed);
        }
    }

    pub fn get(&self, worker: usize) -> f64 {
        f64::from_bits(self.cells[worker].load(Ordering::Relaxed))
    }

    /// Reduction over all workers' maxima.
    pub fn max(&self) -> f64 {
        self.cells
            .iter()
            .map(|c| f64::from_bits(c.load(Ordering::Relaxed)))
            .fold(0.0, f64::max)
    }
}
