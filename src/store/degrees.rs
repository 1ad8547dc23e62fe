//! Memory-resident per-vertex degree index.
//!
//! Out-degrees come straight from the shard indexes (one run length
//! per source per shard). In-degrees require one sequential pass over
//! every edge file; the pass doubles as deep validation of the sort
//! and interval invariants the engine later relies on. Built once at
//! engine startup, never mutated afterwards.

use std::fs::File;

use memmap2::Mmap;
use tracing::debug;

use crate::error::{Result, VentanaError};
use crate::store::format::{read_u32_at, record_len};
use crate::store::shard::ShardSet;
use crate::types::VertexId;

#[derive(Debug)]
pub struct DegreeIndex {
    degrees: Vec<(u32, u32)>,
}

impl DegreeIndex {
    /// Scans the shard set, validating edge-level invariants along the
    /// way: sources ascend, destinations lie in the shard's interval
    /// and ascend within a run, and records agree with the index.
    pub fn build(set: &ShardSet) -> Result<Self> {
        let n = set.num_vertices() as usize;
        let mut degrees = vec![(0u32, 0u32); n];
        let rl = record_len(set.meta().value_width as usize);

        for p in 0..set.num_shards() {
            let shard = set.shard(p);
            for entry in shard.index() {
                if entry.src as usize >= n {
                    return Err(VentanaError::ShardFormat(format!(
                        "shard {p}: source {} out of range",
                        entry.src
                    )));
                }
                degrees[entry.src as usize].1 += entry.edge_count as u32;
            }

            if shard.len_bytes() == 0 {
                continue;
            }
            let file = File::open(set.edata_path(p))?;
            // SAFETY: the mapping is read-only and lives only for this
            // scan; shard files are not mutated while the set is open.
            let mmap = unsafe { Mmap::map(&file)? };
            let data = &mmap[..];
            let iv = shard.interval();

            let mut prev: Option<(VertexId, VertexId)> = None;
            let mut pos = 0usize;
            while pos + rl <= data.len() {
                let src = read_u32_at(data, pos);
                let dst = read_u32_at(data, pos + 4);
                if !iv.contains(dst) {
                    return Err(VentanaError::ShardFormat(format!(
                        "shard {p}: edge ({src}, {dst}) outside interval [{}, {})",
                        iv.lo, iv.hi
                    )));
                }
                if let Some((ps, pd)) = prev {
                    if (src, dst) < (ps, pd) {
                        return Err(VentanaError::ShardFormat(format!(
                            "shard {p}: records out of order at byte {pos}"
                        )));
                    }
                }
                prev = Some((src, dst));
                degrees[dst as usize].0 += 1;
                pos += rl;
            }
        }

        debug!(vertices = n, "built degree index");
        Ok(Self { degrees })
    }

    #[inline]
    pub fn in_degree(&self, v: VertexId) -> u32 {
        self.degrees[v as usize].0
    }

    #[inline]
    pub fn out_degree(&self, v: VertexId) -> u32 {
        self.degrees[v as usize].1
    }

    pub fn len(&self) -> usize {
        self.degrees.len()
    }

    pub fn is_empty(&self) -> bool {
        self.degrees.is_empty()
    }
}
