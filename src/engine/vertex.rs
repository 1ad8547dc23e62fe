//! Vertex materialization: per-vertex views over the interval buffers.

use smallvec::SmallVec;

use crate::engine::buffers::{PassBufs, ValueCells};
use crate::engine::window::IntervalBuffers;
use crate::store::Interval;
use crate::types::{EdgeValue, VertexId};

/// Identity and degrees of a vertex, as handed to user programs.
#[derive(Clone, Copy, Debug)]
pub struct VertexInfo {
    pub id: VertexId,
    pub in_degree: u32,
    pub out_degree: u32,
}

/// One contiguous run of records sharing a source, inside one buffer.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Run {
    pub src: VertexId,
    pub start: u32,
    pub len: u32,
}

/// A run viewed from its owning vertex: `buf` 0 is the memory shard,
/// `1..` the sliding windows.
#[derive(Clone, Copy, Debug)]
pub(crate) struct OutRun {
    pub buf: u32,
    pub start: u32,
    pub len: u32,
}

/// Index structures assembled once per interval: where each local
/// vertex's in-edges sit in the memory shard, and which runs of which
/// buffers hold its out-edges.
pub(crate) struct Materialization {
    pub num_local: usize,
    /// Prefix offsets into `in_pos`, length `num_local + 1`.
    pub in_off: Vec<u32>,
    /// Record indices into the memory shard, grouped by destination.
    pub in_pos: Vec<u32>,
    /// Out-edge runs per local vertex.
    pub out_runs: Vec<SmallVec<[OutRun; 4]>>,
    /// All runs per buffer, ascending by start offset. Used to hand
    /// workers disjoint mutable run slices during scatter.
    pub buf_runs: Vec<Vec<Run>>,
}

impl Materialization {
    pub(crate) fn build<E: EdgeValue>(interval: Interval, bufs: &IntervalBuffers<E>) -> Self {
        let lo = interval.lo;
        let num_local = interval.len();

        // In-edges: one counting pass, one placement pass over the
        // memory shard. Record order is preserved per vertex, so each
        // vertex sees its in-edges in ascending source order.
        let mut in_off = vec![0u32; num_local + 1];
        for &dst in &bufs.mem.dsts {
            in_off[(dst - lo) as usize + 1] += 1;
        }
        for i in 1..in_off.len() {
            in_off[i] += in_off[i - 1];
        }
        let mut in_pos = vec![0u32; bufs.mem.len()];
        let mut cursor = in_off.clone();
        for (i, &dst) in bufs.mem.dsts.iter().enumerate() {
            let slot = (dst - lo) as usize;
            in_pos[cursor[slot] as usize] = i as u32;
            cursor[slot] += 1;
        }

        // Out-edges: detect runs of equal source per buffer. For the
        // memory shard only in-interval sources count; window slices
        // contain in-interval sources by construction.
        let mut out_runs: Vec<SmallVec<[OutRun; 4]>> = vec![SmallVec::new(); num_local];
        let mut buf_runs: Vec<Vec<Run>> = Vec::with_capacity(1 + bufs.windows.len());
        let mem_runs = runs_of(&bufs.mem.srcs, Some(interval));
        for run in &mem_runs {
            out_runs[(run.src - lo) as usize].push(OutRun {
                buf: 0,
                start: run.start,
                len: run.len,
            });
        }
        buf_runs.push(mem_runs);
        for (wi, w) in bufs.windows.iter().enumerate() {
            let runs = runs_of(&w.srcs, None);
            for run in &runs {
                out_runs[(run.src - lo) as usize].push(OutRun {
                    buf: wi as u32 + 1,
                    start: run.start,
                    len: run.len,
                });
            }
            buf_runs.push(runs);
        }

        Self {
            num_local,
            in_off,
            in_pos,
            out_runs,
            buf_runs,
        }
    }

    pub(crate) fn in_positions(&self, local: usize) -> &[u32] {
        &self.in_pos[self.in_off[local] as usize..self.in_off[local + 1] as usize]
    }
}

fn runs_of(srcs: &[VertexId], filter: Option<Interval>) -> Vec<Run> {
    let mut runs = Vec::new();
    let mut i = 0usize;
    while i < srcs.len() {
        let src = srcs[i];
        let start = i;
        while i < srcs.len() && srcs[i] == src {
            i += 1;
        }
        if filter.map_or(true, |iv| iv.contains(src)) {
            runs.push(Run {
                src,
                start: start as u32,
                len: (i - start) as u32,
            });
        }
    }
    runs
}

/// A vertex's window onto the interval buffers during an update pass.
///
/// In-edges are read-only; out-edges and the vertex's own value are
/// writable. Views of distinct vertices may live on distinct worker
/// threads at once; the pass scheduler keeps edge-sharing vertices
/// from running concurrently in deterministic mode.
pub struct VertexView<'a, V, E: EdgeValue> {
    pub(crate) info: VertexInfo,
    pub(crate) local: usize,
    pub(crate) worker: usize,
    pub(crate) num_out: usize,
    pub(crate) in_pos: &'a [u32],
    pub(crate) out_runs: &'a [OutRun],
    pub(crate) bufs: &'a PassBufs<'a, E>,
    pub(crate) values: &'a ValueCells<'a, V>,
}

impl<V: Copy, E: EdgeValue> VertexView<'_, V, E> {
    #[inline]
    pub fn id(&self) -> VertexId {
        self.info.id
    }

    #[inline]
    pub fn info(&self) -> VertexInfo {
        self.info
    }

    /// ID of the worker executing this vertex's update, in `[0, T)`.
    #[inline]
    pub fn worker(&self) -> usize {
        self.worker
    }

    #[inline]
    pub fn num_in_edges(&self) -> usize {
        self.in_pos.len()
    }

    #[inline]
    pub fn num_out_edges(&self) -> usize {
        self.num_out
    }

    /// The `i`-th in-edge as `(source, value)`.
    pub fn in_edge(&self, i: usize) -> (VertexId, E) {
        let idx = self.in_pos[i] as usize;
        let buf = self.bufs.buf(0);
        // SAFETY: the record's endpoints are this vertex and `src`; the
        // scheduler serializes edge-sharing vertices, so no concurrent
        // write to this cell exists while this view is live.
        (buf.srcs[idx], unsafe { buf.values.get(idx) })
    }

    /// The `i`-th out-edge as `(destination, value)`.
    pub fn out_edge(&self, i: usize) -> (VertexId, E) {
        let (buf_id, idx) = self.locate_out(i);
        let buf = self.bufs.buf(buf_id);
        // SAFETY: as for in_edge; only this vertex and the destination
        // touch the record, and the two never run concurrently.
        (buf.dsts[idx], unsafe { buf.values.get(idx) })
    }

    /// Overwrites the `i`-th out-edge value.
    pub fn set_out_edge(&mut self, i: usize, value: E) {
        let (buf_id, idx) = self.locate_out(i);
        let buf = self.bufs.buf(buf_id);
        // SAFETY: records have a unique source, so only this vertex
        // writes this cell; the destination's concurrent read is
        // excluded by the scheduler.
        unsafe { buf.values.set(idx, value) };
        self.bufs.mark_dirty(buf_id);
    }

    /// The vertex's current value.
    pub fn data(&self) -> V {
        // SAFETY: only the owning vertex's update accesses its slot.
        unsafe { self.values.get(self.local) }
    }

    pub fn set_data(&mut self, value: V) {
        // SAFETY: as for data().
        unsafe { self.values.set(self.local, value) };
    }

    fn locate_out(&self, mut i: usize) -> (usize, usize) {
        for run in self.out_runs {
            if i < run.len as usize {
                return (run.buf as usize, run.start as usize + i);
            }
            i -= run.len as usize;
        }
        panic!("out-edge index out of bounds");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::window::SlidingWindows;
    use crate::store::{ShardSet, ShardSetBuilder};

    #[test]
    fn test_materialization_groups_in_and_out_edges() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("g");
        let mut b = ShardSetBuilder::<u32>::new(4, 2);
        b.add_edge(0, 1, 10);
        b.add_edge(2, 1, 11);
        b.add_edge(3, 1, 12);
        b.add_edge(1, 0, 13);
        b.add_edge(1, 3, 14);
        b.finish(&base).unwrap();

        let mut set = ShardSet::open(&base, None).unwrap();
        let mut win = SlidingWindows::new(2);
        let interval = set.shard(0).interval();
        assert!(interval.contains(0) && interval.contains(1));

        let bufs = win.load::<u32>(&mut set, 0, interval).unwrap();
        let mat = Materialization::build(interval, &bufs);

        // Vertex 1 (local 1) has in-edges from 0, 2, 3 in source order.
        let pos = mat.in_positions(1);
        assert_eq!(pos.len(), 3);
        let srcs: Vec<u32> = pos.iter().map(|&i| bufs.mem.srcs[i as usize]).collect();
        assert_eq!(srcs, vec![0, 2, 3]);

        // Vertex 1's out-edges: (1,0) in the memory shard, (1,3) in
        // the window over shard 1.
        let runs = &mat.out_runs[1];
        assert_eq!(runs.iter().map(|r| r.len).sum::<u32>(), 2);
        assert!(runs.iter().any(|r| r.buf == 0));
        assert!(runs.iter().any(|r| r.buf == 1));

        // Vertex 0 has one in-edge (from 1) and one out-edge (to 1).
        assert_eq!(mat.in_positions(0).len(), 1);
        assert_eq!(mat.out_runs[0].iter().map(|r| r.len).sum::<u32>(), 1);
    }
}
