//! Interval I/O: the memory-shard load and the sliding windows.
//!
//! For interval `p` the engine loads shard `p` in full (every in-edge
//! of the interval) and slices every other shard to the range of
//! sources inside the interval (every out-edge of the interval). The
//! windows turn what would be random adjacency access into sequential
//! reads: because intervals are processed in ascending ID order, each
//! shard's cursor only ever moves forward within one iteration.

use tracing::trace;

use crate::engine::buffers::EdgeBuf;
use crate::error::Result;
use crate::store::{Interval, ShardSet};
use crate::types::EdgeValue;

/// Per-shard byte cursors, reset at the start of every iteration.
pub(crate) struct SlidingWindows {
    cursors: Vec<u64>,
}

pub(crate) struct IntervalBuffers<E> {
    /// Shard `p` loaded in full.
    pub mem: EdgeBuf<E>,
    /// Window slices, one per shard `q != p`, ascending `q`. Each
    /// buffer remembers its own shard and byte offset for write-back.
    pub windows: Vec<EdgeBuf<E>>,
    /// Bytes read from disk for this interval.
    pub bytes_read: u64,
}

impl SlidingWindows {
    pub(crate) fn new(num_shards: usize) -> Self {
        Self {
            cursors: vec![0; num_shards],
        }
    }

    /// Loads everything interval `p` needs and advances the cursors.
    pub(crate) fn load<E: EdgeValue>(
        &mut self,
        set: &mut ShardSet,
        p: usize,
        interval: Interval,
    ) -> Result<IntervalBuffers<E>> {
        let mem_block = set.load_shard(p)?;
        let mut bytes_read = mem_block.bytes.len() as u64;
        let mem = EdgeBuf::decode(mem_block)?;

        let mut windows = Vec::with_capacity(set.num_shards().saturating_sub(1));
        for q in 0..set.num_shards() {
            let (start, end) = set.shard(q).byte_range(interval);
            debug_assert!(
                start >= self.cursors[q],
                "window cursor for shard {q} moved backwards"
            );
            self.cursors[q] = end;
            if q == p {
                // The interval's own out-edge run is already in memory
                // as part of the memory shard.
                continue;
            }
            let block = set.slice(q, interval)?;
            bytes_read += block.bytes.len() as u64;
            trace!(
                shard = q,
                start,
                end,
                bytes = block.bytes.len(),
                "advanced sliding window"
            );
            windows.push(EdgeBuf::decode(block)?);
        }

        Ok(IntervalBuffers {
            mem,
            windows,
            bytes_read,
        })
    }
}
