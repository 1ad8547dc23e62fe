//! User program contracts.
//!
//! Two surfaces exist: the vertex API, where a program inspects and
//! mutates per-vertex views directly, and the functional API in
//! [`functional`], where a kernel describes one vertex step as
//! gather/plus/apply/scatter and the runtime owns the edge traffic.

pub mod functional;

use crate::engine::{Context, VertexView};
use crate::types::{EdgeValue, VertexId};

/// A vertex-centric program driven by the engine.
///
/// `update` runs on worker threads, potentially many vertices at once;
/// everything it needs must go through the view and the context. The
/// remaining callbacks run on the engine thread between passes.
pub trait VertexProgram<V: Copy, E: EdgeValue>: Send + Sync {
    /// Called once before each iteration starts.
    fn before_iteration(&mut self, _iteration: usize, _ctx: &Context<'_>) {}

    /// Called once after each iteration completes.
    fn after_iteration(&mut self, _iteration: usize, _ctx: &Context<'_>) {}

    /// Called before each interval's update pass, with the interval
    /// bounds `[lo, hi)`.
    fn before_exec_interval(&mut self, _lo: VertexId, _hi: VertexId, _ctx: &Context<'_>) {}

    /// The vertex update function.
    fn update(&self, v: &mut VertexView<'_, V, E>, ctx: &Context<'_>);

    /// When true, the engine reruns the interval's update pass on the
    /// current buffers before moving on.
    fn repeat_updates(&mut self, _ctx: &Context<'_>) -> bool {
        false
    }
}
