use std::io;

use thiserror::Error;

use crate::types::VertexId;

pub type Result<T> = std::result::Result<T, VentanaError>;

/// Errors surfaced by the shard store and the execution engine.
///
/// The engine does not retry: I/O and format errors abort the run.
/// Convergence below the configured threshold is normal termination,
/// not an error.
#[derive(Debug, Error)]
pub enum VentanaError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Index/edge file lengths disagree, a sort invariant is violated,
    /// or the meta file does not describe the files on disk.
    #[error("shard format error: {0}")]
    ShardFormat(String),

    /// An interval's memory shard plus its sliding-window slices do not
    /// fit the configured memory budget.
    #[error("interval {interval} needs {required} bytes but the memory budget is {budget} bytes")]
    BudgetExceeded {
        interval: usize,
        required: u64,
        budget: u64,
    },

    /// A user kernel violated its contract; the diagnostic names the
    /// vertex at which the violation was detected.
    #[error("kernel assertion failed at vertex {vertex}: {reason}")]
    KernelAssertion {
        vertex: VertexId,
        reason: &'static str,
    },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}
