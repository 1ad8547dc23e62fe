//! Out-of-core graph computation on a single machine.
//!
//! Ventana processes graphs larger than main memory by streaming
//! vertex and edge data from disk in shards and sliding a window over
//! them: each iteration reads every edge sequentially, runs a user
//! program over materialized vertex views (or a functional
//! gather/plus/apply/scatter kernel), and writes updated edge values
//! back in place.

pub mod api;
pub mod engine;
pub mod error;
pub mod store;
pub mod types;

pub use crate::api::functional::{
    run_bulksync, run_semisync, FunctionalConfig, Kernel, DEFAULT_ACCUMULATOR_THRESHOLD,
};
pub use crate::api::VertexProgram;
pub use crate::engine::{
    Context, DeltaTracker, Engine, EngineOptions, RunStats, VertexInfo, VertexView,
};
pub use crate::error::{Result, VentanaError};
pub use crate::store::{DegreeIndex, Interval, Meta, ShardSet, ShardSetBuilder};
pub use crate::types::{EdgeValue, Pair, VertexId};
