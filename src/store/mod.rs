//! Shard storage layer.
//!
//! A graph is partitioned into `P` shards; shard `p` holds every edge
//! whose destination falls in the `p`-th vertex interval. Within a
//! shard, records are sorted by source, then destination, so each
//! source's edges form one contiguous run. Each shard persists as an
//! edge file of packed fixed-width records plus an index file mapping
//! each appearing source to the byte offset of its run; a single meta
//! file records the interval boundaries and shard count.

mod builder;
mod degrees;
pub(crate) mod format;
mod plan;
mod shard;

pub use builder::ShardSetBuilder;
pub use degrees::DegreeIndex;
pub use format::Meta;
pub use plan::{plan_intervals, Interval};
pub use shard::{Block, Shard, ShardSet};
