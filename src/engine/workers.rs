//! The interval worker pool.
//!
//! Updates are the only parallel region: a fixed pool of scoped OS
//! threads claims vertices off a shared queue and executes the user
//! program against materialized views. In deterministic mode a vertex
//! waits until every edge-sharing vertex with a smaller ID inside the
//! interval has completed, which makes the pass equivalent to the
//! sequential ascending-ID schedule for any worker count.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::{Condvar, Mutex};
use smallvec::SmallVec;

use crate::api::VertexProgram;
use crate::engine::buffers::{PassBufs, ValueCells};
use crate::engine::context::Context;
use crate::engine::vertex::{Materialization, VertexInfo, VertexView};
use crate::store::{DegreeIndex, Interval};
use crate::types::EdgeValue;

const NUM_STRIPES: usize = 1024;

/// Completion flags plus striped wait/notify primitives for the
/// ID-order precedence protocol.
struct Precedence {
    done: Vec<AtomicBool>,
    stripes: Vec<(Mutex<()>, Condvar)>,
}

impl Precedence {
    fn new(num_local: usize) -> Self {
        Self {
            done: (0..num_local).map(|_| AtomicBool::new(false)).collect(),
            stripes: (0..NUM_STRIPES.min(num_local.max(1)))
                .map(|_| (Mutex::new(()), Condvar::new()))
                .collect(),
        }
    }

    #[inline]
    fn stripe(&self, local: usize) -> &(Mutex<()>, Condvar) {
        &self.stripes[local % self.stripes.len()]
    }

    /// Blocks until `local` has completed.
    fn wait_for(&self, local: usize) {
        if self.done[local].load(Ordering::Acquire) {
            return;
        }
        let (lock, cvar) = self.stripe(local);
        let mut guard = lock.lock();
        while !self.done[local].load(Ordering::Acquire) {
            cvar.wait(&mut guard);
        }
    }

    fn mark_done(&self, local: usize) {
        self.done[local].store(true, Ordering::Release);
        let (lock, cvar) = self.stripe(local);
        // Taking the stripe lock orders the store before any waiter's
        // re-check, so no wakeup is lost.
        drop(lock.lock());
        cvar.notify_all();
    }
}

/// In-interval vertices sharing an edge with `local`, as local indices.
fn conflicts<E: EdgeValue>(
    local: usize,
    interval: Interval,
    mat: &Materialization,
    bufs: &PassBufs<'_, E>,
) -> SmallVec<[usize; 8]> {
    let mut out: SmallVec<[usize; 8]> = SmallVec::new();
    let mem = bufs.buf(0);
    for &pos in mat.in_positions(local) {
        let src = mem.srcs[pos as usize];
        if interval.contains(src) {
            out.push((src - interval.lo) as usize);
        }
    }
    for run in &mat.out_runs[local] {
        if run.buf != 0 {
            // Window destinations lie in other intervals by definition.
            continue;
        }
        for k in run.start..run.start + run.len {
            out.push((mem.dsts[k as usize] - interval.lo) as usize);
        }
    }
    out.sort_unstable();
    out.dedup();
    out
}

/// Runs one update pass of the vertex API over an interval.
#[allow(clippy::too_many_arguments)]
pub(crate) fn run_update_pass<V, E, P>(
    program: &P,
    interval: Interval,
    mat: &Materialization,
    bufs: &PassBufs<'_, E>,
    values: &ValueCells<'_, V>,
    degrees: &DegreeIndex,
    ctx: &Context<'_>,
    deterministic: bool,
) where
    V: Copy + Send + Sync,
    E: EdgeValue,
    P: VertexProgram<V, E>,
{
    let precedence = Precedence::new(mat.num_local);
    let queue = AtomicUsize::new(0);
    let nthreads = ctx.execthreads.min(mat.num_local).max(1);

    std::thread::scope(|scope| {
        for worker in 0..nthreads {
            let precedence = &precedence;
            let queue = &queue;
            scope.spawn(move || loop {
                let local = queue.fetch_add(1, Ordering::Relaxed);
                if local >= mat.num_local {
                    break;
                }
                if deterministic {
                    for w in conflicts(local, interval, mat, bufs) {
                        if w < local {
                            precedence.wait_for(w);
                        }
                    }
                }
                let id = interval.lo + local as u32;
                let out_runs = &mat.out_runs[local];
                let mut view = VertexView {
                    info: VertexInfo {
                        id,
                        in_degree: degrees.in_degree(id),
                        out_degree: degrees.out_degree(id),
                    },
                    local,
                    worker,
                    num_out: out_runs.iter().map(|r| r.len as usize).sum(),
                    in_pos: mat.in_positions(local),
                    out_runs,
                    bufs,
                    values,
                };
                program.update(&mut view, ctx);
                precedence.mark_done(local);
            });
        }
    });
}
