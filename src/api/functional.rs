//! The functional kernel runtime.
//!
//! A kernel describes one vertex step as four pure-ish functions:
//! `gather` transforms an in-edge into combinable form, `plus` folds
//! contributions (it must be commutative and associative; the runtime
//! combines out of order and across threads), `apply` produces the new
//! vertex value, and `scatter` produces the outgoing edge payload.
//! `init` seeds vertex values on iteration zero and `zero` is the
//! identity of `plus`.
//!
//! Per interval the runtime executes three barrier-separated parallel
//! phases: gather streams the memory shard's records, accumulating per
//! destination; apply combines and produces new vertex values; scatter
//! writes every out-edge run exactly once. Vertices whose in-degree
//! exceeds a threshold accumulate into one cell per worker and defer
//! the cross-worker `plus` to a combine step before `apply`; below the
//! threshold a single mutex-guarded cell is cheaper.

use std::iter::once;

use parking_lot::Mutex;

use crate::engine::buffers::EdgeBuf;
use crate::engine::{
    Context, Engine, EngineOptions, IntervalPass, IntervalState, RunStats, VertexInfo,
};
use crate::error::{Result, VentanaError};
use crate::types::{EdgeValue, Pair, VertexId};

/// In-degree above which a vertex gets per-worker accumulator cells.
pub const DEFAULT_ACCUMULATOR_THRESHOLD: u32 = 32;

/// A functional vertex kernel.
pub trait Kernel: Send + Sync {
    type V: Copy + Default + Send + Sync + 'static;
    type E: EdgeValue;

    /// Initial vertex value, used on iteration zero instead of `apply`.
    fn init(&self, ctx: &Context<'_>, v: &VertexInfo) -> Self::V;

    /// Identity of `plus`.
    fn zero(&self) -> Self::E;

    /// Transforms a neighbor's edge value into combinable form.
    fn gather(&self, ctx: &Context<'_>, v: &VertexInfo, nb_id: VertexId, nb_val: Self::E)
        -> Self::E;

    /// Commutative, associative combine.
    fn plus(&self, acc: Self::E, other: Self::E) -> Self::E;

    /// Produces the vertex's new value from the combined in-edges.
    fn apply(&self, ctx: &Context<'_>, v: &VertexInfo, cur: Self::V, combined: Self::E)
        -> Self::V;

    /// Produces the payload written to each out-edge.
    fn scatter(&self, ctx: &Context<'_>, v: &VertexInfo, nb_id: VertexId, val: Self::V)
        -> Self::E;
}

/// How a kernel payload of type `E` is stored in the edge files.
///
/// Semi-synchronous mode stores `E` directly: a reader sees whatever
/// was last written, including scatters from earlier intervals of the
/// same iteration. Bulk-synchronous mode stores a [`Pair`] and keeps
/// reads on the previous iteration's slot.
pub(crate) trait Payload<E: EdgeValue>: EdgeValue {
    fn current(&self, iteration: usize) -> E;
    fn scattered(&self, iteration: usize, value: E) -> Self;
}

impl<E: EdgeValue> Payload<E> for E {
    #[inline]
    fn current(&self, _iteration: usize) -> E {
        *self
    }

    #[inline]
    fn scattered(&self, _iteration: usize, value: E) -> Self {
        value
    }
}

impl<E: EdgeValue> Payload<E> for Pair<E> {
    #[inline]
    fn current(&self, iteration: usize) -> E {
        self.old(iteration)
    }

    #[inline]
    fn scattered(&self, iteration: usize, value: E) -> Self {
        self.with_new(iteration, value)
    }
}

pub(crate) struct FunctionalPass<K, S> {
    kernel: K,
    threshold: u32,
    _stored: std::marker::PhantomData<S>,
}

impl<K, S> FunctionalPass<K, S> {
    pub(crate) fn new(kernel: K, threshold: u32) -> Self {
        Self {
            kernel,
            threshold,
            _stored: std::marker::PhantomData,
        }
    }
}

fn chunk_bounds(nthreads: usize, total: usize) -> (usize, usize) {
    let n = nthreads.min(total).max(1);
    (n, total.div_ceil(n))
}

impl<K, S> IntervalPass<K::V, S> for FunctionalPass<K, S>
where
    K: Kernel,
    S: Payload<K::E>,
{
    fn execute(
        &mut self,
        st: &mut IntervalState<'_, K::V, S>,
        ctx: &Context<'_>,
    ) -> Result<Vec<bool>> {
        let kernel = &self.kernel;
        let lo = st.interval.lo;
        let nv = st.mat.num_local;
        let iteration = ctx.iteration;
        let degrees = st.degrees;
        let vinfo = |id: VertexId| VertexInfo {
            id,
            in_degree: degrees.in_degree(id),
            out_degree: degrees.out_degree(id),
        };

        // Accumulator layout. Wide vertices own one cell per worker;
        // the rest share a locked cell.
        let mut wide_slot = vec![u32::MAX; nv];
        let mut num_wide = 0usize;
        if iteration > 0 {
            for (local, slot) in wide_slot.iter_mut().enumerate() {
                if degrees.in_degree(lo + local as u32) > self.threshold {
                    *slot = num_wide as u32;
                    num_wide += 1;
                }
            }
        }
        let mut wide_rows: Vec<Vec<K::E>> = (0..st.nthreads)
            .map(|_| vec![kernel.zero(); num_wide])
            .collect();
        let narrow: Vec<Mutex<K::E>> = (0..nv).map(|_| Mutex::new(kernel.zero())).collect();

        // Gather: stream the memory shard's records in static chunks.
        if iteration > 0 {
            let mem = &*st.mem;
            let (nthreads, per) = chunk_bounds(st.nthreads, mem.len());
            let wide_slot = &wide_slot;
            let narrow = &narrow;
            std::thread::scope(|scope| {
                for (worker, row) in wide_rows.iter_mut().enumerate().take(nthreads) {
                    let begin = worker * per;
                    let end = ((worker + 1) * per).min(mem.len());
                    scope.spawn(move || {
                        for i in begin..end {
                            let dst = mem.dsts[i];
                            let local = (dst - lo) as usize;
                            let contribution = kernel.gather(
                                ctx,
                                &vinfo(dst),
                                mem.srcs[i],
                                mem.values[i].current(iteration),
                            );
                            let slot = wide_slot[local];
                            if slot != u32::MAX {
                                let cell = &mut row[slot as usize];
                                *cell = kernel.plus(*cell, contribution);
                            } else {
                                let mut cell = narrow[local].lock();
                                *cell = kernel.plus(*cell, contribution);
                            }
                        }
                    });
                }
            });
        }

        // Apply: combine per-worker cells, then produce new values.
        // Iteration zero seeds with init instead.
        {
            let local_values = &mut st.values[lo as usize..lo as usize + nv];
            let (_, per) = chunk_bounds(st.nthreads, nv);
            let wide_rows = &wide_rows;
            let wide_slot = &wide_slot;
            let narrow = &narrow;
            std::thread::scope(|scope| {
                for (ci, chunk) in local_values.chunks_mut(per).enumerate() {
                    scope.spawn(move || {
                        for (k, value) in chunk.iter_mut().enumerate() {
                            let local = ci * per + k;
                            let id = lo + local as u32;
                            let info = vinfo(id);
                            if iteration == 0 {
                                *value = kernel.init(ctx, &info);
                                continue;
                            }
                            let slot = wide_slot[local];
                            let combined = if slot != u32::MAX {
                                wide_rows
                                    .iter()
                                    .map(|row| row[slot as usize])
                                    .fold(kernel.zero(), |acc, c| kernel.plus(acc, c))
                            } else {
                                *narrow[local].lock()
                            };
                            *value = kernel.apply(ctx, &info, *value, combined);
                        }
                    });
                }
            });
        }

        // Scatter: hand each worker the runs of its vertex chunk as
        // disjoint mutable slices, then write every out-edge once.
        let (nthreads_v, per_v) = chunk_bounds(st.nthreads, nv);
        let mut jobs: Vec<Vec<RunJob<'_, S>>> = (0..nthreads_v).map(|_| Vec::new()).collect();
        let mut dirty = vec![false; 1 + st.windows.len()];
        for (bi, buf) in once(&mut *st.mem).chain(st.windows.iter_mut()).enumerate() {
            let runs = &st.mat.buf_runs[bi];
            if !runs.is_empty() {
                dirty[bi] = true;
            }
            let EdgeBuf { dsts, values, .. } = buf;
            let dsts: &[VertexId] = dsts;
            let mut rest: &mut [S] = values;
            let mut consumed = 0usize;
            for run in runs {
                if degrees.out_degree(run.src) == 0 {
                    return Err(VentanaError::KernelAssertion {
                        vertex: run.src,
                        reason: "scatter on a vertex with zero out-degree",
                    });
                }
                let start = run.start as usize;
                let len = run.len as usize;
                let tail = std::mem::take(&mut rest);
                let (_, tail) = tail.split_at_mut(start - consumed);
                let (vals, tail) = tail.split_at_mut(len);
                rest = tail;
                consumed = start + len;
                let local = (run.src - lo) as usize;
                jobs[local / per_v].push(RunJob {
                    src: run.src,
                    dsts: &dsts[start..start + len],
                    vals,
                });
            }
        }
        {
            let values_ro: &[K::V] = &st.values[lo as usize..lo as usize + nv];
            std::thread::scope(|scope| {
                for worker_jobs in jobs.into_iter() {
                    scope.spawn(move || {
                        for job in worker_jobs {
                            let info = vinfo(job.src);
                            let val = values_ro[(job.src - lo) as usize];
                            for k in 0..job.vals.len() {
                                let payload = kernel.scatter(ctx, &info, job.dsts[k], val);
                                job.vals[k] = job.vals[k].scattered(iteration, payload);
                            }
                        }
                    });
                }
            });
        }

        Ok(dirty)
    }
}

struct RunJob<'a, S> {
    src: VertexId,
    dsts: &'a [VertexId],
    vals: &'a mut [S],
}

/// Configuration for a functional run.
#[derive(Clone, Debug)]
pub struct FunctionalConfig {
    pub niters: usize,
    pub engine: EngineOptions,
    /// In-degree above which per-worker accumulator cells are used.
    pub accumulator_threshold: u32,
}

impl Default for FunctionalConfig {
    fn default() -> Self {
        Self {
            niters: 4,
            engine: EngineOptions::default(),
            accumulator_threshold: DEFAULT_ACCUMULATOR_THRESHOLD,
        }
    }
}

/// Runs a kernel in semi-synchronous mode over single-buffered edges.
///
/// Inside one iteration a vertex sees neighbor values from earlier
/// intervals already updated and from later intervals still at their
/// previous-iteration values; the kernel must tolerate the hybrid
/// view. This is the faster mode: half the edge storage and half the
/// I/O of bulk-synchronous execution.
pub fn run_semisync<K: Kernel>(
    base: impl AsRef<std::path::Path>,
    kernel: K,
    config: &FunctionalConfig,
) -> Result<(Vec<K::V>, RunStats)> {
    let opts = EngineOptions {
        deterministic: true,
        ..config.engine.clone()
    };
    let mut engine = Engine::<K::V, K::E>::open(base, opts)?;
    let mut pass = FunctionalPass::<K, K::E>::new(kernel, config.accumulator_threshold);
    let stats = engine.run_loop(&mut pass, config.niters)?;
    Ok((engine.into_values(), stats))
}

/// Runs a kernel in bulk-synchronous mode over [`Pair`]-buffered edges.
///
/// Every gather reads the previous iteration's slot, so all vertices
/// observe a coherent snapshot regardless of update order, and no
/// inter-vertex locking is needed. The shard set must store
/// `Pair<K::E>` payloads (twice the edge storage).
pub fn run_bulksync<K: Kernel>(
    base: impl AsRef<std::path::Path>,
    kernel: K,
    config: &FunctionalConfig,
) -> Result<(Vec<K::V>, RunStats)> {
    let opts = EngineOptions {
        deterministic: false,
        ..config.engine.clone()
    };
    let mut engine = Engine::<K::V, Pair<K::E>>::open(base, opts)?;
    let mut pass = FunctionalPass::<K, Pair<K::E>>::new(kernel, config.accumulator_threshold);
    let stats = engine.run_loop(&mut pass, config.niters)?;
    Ok((engine.into_values(), stats))
}
