//! The parallel-sliding-windows scheduler.
//!
//! One iteration walks the intervals in ascending ID order. Per
//! interval the engine loads the memory shard, advances the sliding
//! windows, materializes vertex views, dispatches the update pass
//! across the worker pool, and writes modified buffers back. Reads
//! all complete before dispatch and writes all happen after the join,
//! so workers never block on I/O.

pub(crate) mod buffers;
mod context;
mod convergence;
mod vertex;
mod window;
pub(crate) mod workers;

pub use context::Context;
pub use convergence::DeltaTracker;
pub use vertex::{VertexInfo, VertexView};

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{debug, info};

use crate::api::VertexProgram;
use crate::engine::buffers::{EdgeBuf, PassBufs, ValueCells};
use crate::engine::vertex::Materialization;
use crate::engine::window::SlidingWindows;
use crate::error::{Result, VentanaError};
use crate::store::{DegreeIndex, Interval, ShardSet};
use crate::types::EdgeValue;

/// Engine tuning knobs.
#[derive(Clone, Debug)]
pub struct EngineOptions {
    /// Worker threads for update passes. `0` means one per core.
    pub execthreads: usize,
    /// Memory budget for one interval's buffers, in megabytes.
    pub membudget_mb: usize,
    /// Expected shard count; a mismatch with the meta file is an error.
    pub num_shards: Option<usize>,
    /// Serialize edge-sharing vertices so results match the sequential
    /// ascending-ID schedule. Disabling this is only sound when reads
    /// and writes cannot collide, as with double-buffered payloads.
    pub deterministic: bool,
    /// Stop once the global max delta falls below this value.
    pub convergence_threshold: Option<f64>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            execthreads: 0,
            membudget_mb: 1024,
            num_shards: None,
            deterministic: true,
            convergence_threshold: None,
        }
    }
}

/// Counters reported after a run.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RunStats {
    pub iterations: usize,
    pub intervals: usize,
    /// In-edges streamed through update passes. Without repeat passes
    /// this is exactly one per edge per iteration.
    pub edges_processed: u64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    /// Wall time spent loading shards and materializing views.
    pub load_ms: u64,
    /// Wall time spent in update passes.
    pub exec_ms: u64,
    /// Wall time spent flushing modified buffers back to disk.
    pub write_ms: u64,
    pub elapsed_ms: u64,
}

/// Mutable state of one interval step, lent to the executing pass.
pub(crate) struct IntervalState<'a, V, E: EdgeValue> {
    pub interval: Interval,
    pub mem: &'a mut EdgeBuf<E>,
    pub windows: &'a mut [EdgeBuf<E>],
    pub values: &'a mut [V],
    pub mat: &'a Materialization,
    pub degrees: &'a DegreeIndex,
    pub nthreads: usize,
    pub deterministic: bool,
}

/// One execution strategy for the update phase of an interval.
///
/// The engine loop is shared between the vertex API and the
/// functional runtime; only what happens between load and write-back
/// differs. `execute` returns per-buffer dirty flags (memory shard
/// first, then windows in order).
pub(crate) trait IntervalPass<V, E: EdgeValue> {
    fn before_iteration(&mut self, _ctx: &Context<'_>) {}
    fn after_iteration(&mut self, _ctx: &Context<'_>) {}
    fn before_exec_interval(&mut self, _interval: Interval, _ctx: &Context<'_>) {}
    fn execute(&mut self, st: &mut IntervalState<'_, V, E>, ctx: &Context<'_>)
        -> Result<Vec<bool>>;
    fn repeat(&mut self, _ctx: &Context<'_>) -> bool {
        false
    }
}

/// The out-of-core engine: an opened shard set, the degree index, and
/// the memory-resident vertex value array.
#[derive(Debug)]
pub struct Engine<V, E: EdgeValue> {
    set: ShardSet,
    degrees: DegreeIndex,
    values: Vec<V>,
    opts: EngineOptions,
    _edge: std::marker::PhantomData<E>,
}

impl<V, E> Engine<V, E>
where
    V: Copy + Default + Send + Sync + 'static,
    E: EdgeValue,
{
    /// Opens the shard set, builds the degree index, and verifies that
    /// every interval fits the memory budget.
    pub fn open(base: impl AsRef<std::path::Path>, opts: EngineOptions) -> Result<Self> {
        let set = ShardSet::open(base, opts.num_shards)?;
        if set.meta().value_width as usize != E::WIDTH {
            return Err(VentanaError::ShardFormat(format!(
                "shard set stores {}-byte edge values but the program expects {}",
                set.meta().value_width,
                E::WIDTH
            )));
        }
        let degrees = DegreeIndex::build(&set)?;
        let values = vec![V::default(); set.num_vertices() as usize];
        let engine = Self {
            set,
            degrees,
            values,
            opts,
            _edge: std::marker::PhantomData,
        };
        engine.check_budget()?;
        Ok(engine)
    }

    fn check_budget(&self) -> Result<()> {
        let budget = self.opts.membudget_mb as u64 * 1024 * 1024;
        for p in 0..self.set.num_shards() {
            let interval = self.set.shard(p).interval();
            let mut required = self.set.shard(p).len_bytes();
            for q in 0..self.set.num_shards() {
                if q != p {
                    required += self.set.shard(q).slice_len(interval);
                }
            }
            if required > budget {
                return Err(VentanaError::BudgetExceeded {
                    interval: p,
                    required,
                    budget,
                });
            }
        }
        Ok(())
    }

    pub fn num_vertices(&self) -> u32 {
        self.set.num_vertices()
    }

    pub fn num_edges(&self) -> u64 {
        self.set.num_edges()
    }

    pub fn degrees(&self) -> &DegreeIndex {
        &self.degrees
    }

    /// Current vertex values, indexed by vertex ID.
    pub fn values(&self) -> &[V] {
        &self.values
    }

    pub fn into_values(self) -> Vec<V> {
        self.values
    }

    /// Seeds the vertex value array before a run.
    pub fn set_values(&mut self, values: Vec<V>) -> Result<()> {
        if values.len() != self.values.len() {
            return Err(VentanaError::InvalidArgument(format!(
                "expected {} vertex values, got {}",
                self.values.len(),
                values.len()
            )));
        }
        self.values = values;
        Ok(())
    }

    fn effective_threads(&self) -> usize {
        if self.opts.execthreads > 0 {
            self.opts.execthreads
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        }
    }

    /// Runs a vertex-API program for up to `niters` iterations.
    pub fn run<P: VertexProgram<V, E>>(
        &mut self,
        program: &mut P,
        niters: usize,
    ) -> Result<RunStats> {
        let mut pass = VertexApiPass { program };
        self.run_loop(&mut pass, niters)
    }

    /// The shared iteration/interval loop.
    pub(crate) fn run_loop<X: IntervalPass<V, E>>(
        &mut self,
        pass: &mut X,
        niters: usize,
    ) -> Result<RunStats> {
        if self.set.num_vertices() == 0 {
            return Err(VentanaError::KernelAssertion {
                vertex: 0,
                reason: "graph has no vertices",
            });
        }
        let nthreads = self.effective_threads();
        let tracker = DeltaTracker::new(nthreads);
        let last_iteration = AtomicI64::new(-1);
        let num_edges = self.set.num_edges();
        let num_shards = self.set.num_shards();
        let mut stats = RunStats::default();
        let mut load_time = Duration::ZERO;
        let mut exec_time = Duration::ZERO;
        let mut write_time = Duration::ZERO;
        let started = Instant::now();

        for iteration in 0..niters {
            let ctx = Context {
                iteration,
                num_iterations: niters,
                num_vertices: self.set.num_vertices(),
                num_edges,
                execthreads: nthreads,
                deltas: &tracker,
                last_iteration: &last_iteration,
            };
            ctx.reset_deltas();
            pass.before_iteration(&ctx);
            let mut windows = SlidingWindows::new(num_shards);

            for p in 0..num_shards {
                let interval = self.set.shard(p).interval();
                if interval.is_empty() {
                    continue;
                }
                let phase = Instant::now();
                let mut bufs = windows.load::<E>(&mut self.set, p, interval)?;
                stats.bytes_read += bufs.bytes_read;
                let mat = Materialization::build(interval, &bufs);
                load_time += phase.elapsed();
                pass.before_exec_interval(interval, &ctx);

                let interval_edges = bufs.mem.len() as u64;
                let phase = Instant::now();
                let mut dirty = vec![false; 1 + bufs.windows.len()];
                loop {
                    stats.edges_processed += interval_edges;
                    let mut st = IntervalState {
                        interval,
                        mem: &mut bufs.mem,
                        windows: &mut bufs.windows,
                        values: &mut self.values,
                        mat: &mat,
                        degrees: &self.degrees,
                        nthreads,
                        deterministic: self.opts.deterministic,
                    };
                    for (d, e) in dirty.iter_mut().zip(pass.execute(&mut st, &ctx)?) {
                        *d |= e;
                    }
                    if !pass.repeat(&ctx) {
                        break;
                    }
                    debug!(iteration, shard = p, "repeating update pass");
                }
                exec_time += phase.elapsed();

                let phase = Instant::now();
                if dirty[0] {
                    let block = bufs.mem.encode();
                    stats.bytes_written += block.bytes.len() as u64;
                    self.set.write_back(&block)?;
                }
                for (wi, w) in bufs.windows.iter().enumerate() {
                    if dirty[wi + 1] {
                        let block = w.encode();
                        stats.bytes_written += block.bytes.len() as u64;
                        self.set.write_back(&block)?;
                    }
                }
                write_time += phase.elapsed();
                stats.intervals += 1;
            }

            pass.after_iteration(&ctx);
            if let Some(threshold) = self.opts.convergence_threshold {
                if iteration > 0
                    && tracker.max() < threshold
                    && last_iteration.load(Ordering::Relaxed) < 0
                {
                    info!(
                        iteration,
                        max_delta = tracker.max(),
                        threshold,
                        "converged, stopping"
                    );
                    last_iteration.store(iteration as i64, Ordering::Relaxed);
                }
            }
            stats.iterations += 1;
            if last_iteration.load(Ordering::Relaxed) == iteration as i64 {
                break;
            }
        }

        stats.load_ms = load_time.as_millis() as u64;
        stats.exec_ms = exec_time.as_millis() as u64;
        stats.write_ms = write_time.as_millis() as u64;
        stats.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            iterations = stats.iterations,
            edges_processed = stats.edges_processed,
            bytes_read = stats.bytes_read,
            bytes_written = stats.bytes_written,
            load_ms = stats.load_ms,
            exec_ms = stats.exec_ms,
            write_ms = stats.write_ms,
            elapsed_ms = stats.elapsed_ms,
            "run finished"
        );
        Ok(stats)
    }
}

struct VertexApiPass<'p, P> {
    program: &'p mut P,
}

impl<V, E, P> IntervalPass<V, E> for VertexApiPass<'_, P>
where
    V: Copy + Default + Send + Sync + 'static,
    E: EdgeValue,
    P: VertexProgram<V, E>,
{
    fn before_iteration(&mut self, ctx: &Context<'_>) {
        self.program.before_iteration(ctx.iteration, ctx);
    }

    fn after_iteration(&mut self, ctx: &Context<'_>) {
        self.program.after_iteration(ctx.iteration, ctx);
    }

    fn before_exec_interval(&mut self, interval: Interval, ctx: &Context<'_>) {
        self.program
            .before_exec_interval(interval.lo, interval.hi, ctx);
    }

    fn execute(
        &mut self,
        st: &mut IntervalState<'_, V, E>,
        ctx: &Context<'_>,
    ) -> Result<Vec<bool>> {
        let bufs = PassBufs::new(st.mem, st.windows);
        let lo = st.interval.lo as usize;
        let hi = st.interval.hi as usize;
        let values = ValueCells::new(&mut st.values[lo..hi]);
        workers::run_update_pass(
            &*self.program,
            st.interval,
            st.mat,
            &bufs,
            &values,
            st.degrees,
            ctx,
            st.deterministic,
        );
        Ok(bufs.dirty_flags())
    }

    fn repeat(&mut self, ctx: &Context<'_>) -> bool {
        self.program.repeat_updates(ctx)
    }
}
