//! Shard set construction from in-memory edge triples.
//!
//! The builder owns the on-disk format end-to-end: it plans intervals,
//! partitions edges by destination, sorts each shard by source, and
//! writes the edge, index, and meta files. Parsing external edge-list
//! formats is left to callers; the builder takes already-typed triples.

use std::fs;
use std::path::Path;

use tracing::info;

use crate::error::{Result, VentanaError};
use crate::store::format::{edata_path, index_path, record_len, IndexEntry, Meta};
use crate::store::plan::plan_intervals;
use crate::types::{EdgeValue, VertexId};

/// Accumulates `(src, dst, value)` triples and writes a shard set.
pub struct ShardSetBuilder<E: EdgeValue> {
    num_vertices: u32,
    num_shards: usize,
    edges: Vec<(VertexId, VertexId, E)>,
}

impl<E: EdgeValue> ShardSetBuilder<E> {
    pub fn new(num_vertices: u32, num_shards: usize) -> Self {
        Self {
            num_vertices,
            num_shards,
            edges: Vec::new(),
        }
    }

    pub fn add_edge(&mut self, src: VertexId, dst: VertexId, value: E) {
        self.edges.push((src, dst, value));
    }

    pub fn num_edges(&self) -> usize {
        self.edges.len()
    }

    /// Plans intervals, partitions, sorts, and writes all files.
    pub fn finish(mut self, base: impl AsRef<Path>) -> Result<Meta> {
        let base = base.as_ref();
        if let Some(parent) = base.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        for &(src, dst, _) in &self.edges {
            if src >= self.num_vertices || dst >= self.num_vertices {
                return Err(VentanaError::InvalidArgument(format!(
                    "edge ({src}, {dst}) references a vertex outside [0, {})",
                    self.num_vertices
                )));
            }
        }

        let mut in_counts = vec![0u64; self.num_vertices as usize];
        for &(_, dst, _) in &self.edges {
            in_counts[dst as usize] += 1;
        }
        let intervals = plan_intervals(&in_counts, self.num_shards)?;

        // Destination interval decides the shard; within a shard the
        // sort key is (src, dst).
        self.edges.sort_by_key(|&(src, dst, _)| (dst, src));
        let rl = record_len(E::WIDTH);
        let mut cursor = 0usize;
        for (p, iv) in intervals.iter().enumerate() {
            let start = cursor;
            while cursor < self.edges.len() && iv.contains(self.edges[cursor].1) {
                cursor += 1;
            }
            let mut shard_edges = self.edges[start..cursor].to_vec();
            shard_edges.sort_by_key(|&(src, dst, _)| (src, dst));

            let mut edata = Vec::with_capacity(shard_edges.len() * rl);
            let mut index = Vec::new();
            let mut run_src: Option<VertexId> = None;
            let mut run_count = 0u64;
            let mut run_pos = 0u64;
            for &(src, dst, value) in &shard_edges {
                if run_src != Some(src) {
                    if let Some(s) = run_src {
                        IndexEntry {
                            src: s,
                            file_pos: run_pos,
                            edge_count: run_count,
                        }
                        .encode_into(&mut index);
                    }
                    run_src = Some(src);
                    run_pos = edata.len() as u64;
                    run_count = 0;
                }
                run_count += 1;
                edata.extend_from_slice(&src.to_ne_bytes());
                edata.extend_from_slice(&dst.to_ne_bytes());
                let at = edata.len();
                edata.resize(at + E::WIDTH, 0);
                value.write_to(&mut edata[at..]);
            }
            if let Some(s) = run_src {
                IndexEntry {
                    src: s,
                    file_pos: run_pos,
                    edge_count: run_count,
                }
                .encode_into(&mut index);
            }

            fs::write(edata_path(base, p), &edata)?;
            fs::write(index_path(base, p), &index)?;
        }

        let meta = Meta {
            value_width: E::WIDTH as u32,
            num_vertices: self.num_vertices,
            intervals,
        };
        meta.store(base)?;
        info!(
            base = %base.display(),
            vertices = self.num_vertices,
            edges = self.edges.len(),
            shards = self.num_shards,
            "wrote shard set"
        );
        Ok(meta)
    }
}
