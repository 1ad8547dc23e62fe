//! Shard files: open, validate, slice, write back.

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Result, VentanaError};
use crate::store::format::{
    edata_path, index_path, record_len, IndexEntry, Meta, INDEX_ENTRY_LEN,
};
use crate::store::plan::Interval;
use crate::types::VertexId;

/// A contiguous byte range loaded from one shard's edge file.
///
/// Blocks are read in full, mutated in memory, and written back to the
/// same offset. The store never returns a shorter range than requested
/// and slicing is idempotent.
#[derive(Debug)]
pub struct Block {
    pub shard: usize,
    pub byte_off: u64,
    pub bytes: Vec<u8>,
}

/// One shard: its edge file handle and the memory-resident index.
#[derive(Debug)]
pub struct Shard {
    id: usize,
    interval: Interval,
    edata: File,
    edata_len: u64,
    index: Vec<IndexEntry>,
    record_len: usize,
}

impl Shard {
    fn open(base: &Path, id: usize, interval: Interval, value_width: usize) -> Result<Self> {
        let rl = record_len(value_width);

        let index_file = index_path(base, id);
        let raw = std::fs::read(&index_file).map_err(|e| {
            VentanaError::ShardFormat(format!(
                "cannot read index file {}: {e}",
                index_file.display()
            ))
        })?;
        if raw.len() % INDEX_ENTRY_LEN != 0 {
            return Err(VentanaError::ShardFormat(format!(
                "index file {} length {} is not a multiple of {INDEX_ENTRY_LEN}",
                index_file.display(),
                raw.len()
            )));
        }
        let index: Vec<IndexEntry> = raw
            .chunks_exact(INDEX_ENTRY_LEN)
            .map(IndexEntry::decode)
            .collect();

        let edata_file = edata_path(base, id);
        let edata = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&edata_file)
            .map_err(|e| {
                VentanaError::ShardFormat(format!(
                    "cannot open edge file {}: {e}",
                    edata_file.display()
                ))
            })?;
        let edata_len = edata.metadata()?.len();

        let shard = Self {
            id,
            interval,
            edata,
            edata_len,
            index,
            record_len: rl,
        };
        shard.validate(&edata_file)?;
        Ok(shard)
    }

    /// Structural validation: the index must tile the edge file with
    /// monotonically increasing source runs.
    fn validate(&self, edata_file: &Path) -> Result<()> {
        let rl = self.record_len as u64;
        if self.edata_len % rl != 0 {
            return Err(VentanaError::ShardFormat(format!(
                "edge file {} length {} is not a multiple of the record width {rl}",
                edata_file.display(),
                self.edata_len
            )));
        }
        let mut expect_pos = 0u64;
        let mut prev_src: Option<VertexId> = None;
        for entry in &self.index {
            if entry.file_pos != expect_pos {
                return Err(VentanaError::ShardFormat(format!(
                    "shard {}: run for source {} starts at byte {} but {} expected",
                    self.id, entry.src, entry.file_pos, expect_pos
                )));
            }
            if entry.edge_count == 0 {
                return Err(VentanaError::ShardFormat(format!(
                    "shard {}: empty run for source {}",
                    self.id, entry.src
                )));
            }
            if let Some(prev) = prev_src {
                if entry.src <= prev {
                    return Err(VentanaError::ShardFormat(format!(
                        "shard {}: index sources out of order ({} after {prev})",
                        self.id, entry.src
                    )));
                }
            }
            prev_src = Some(entry.src);
            expect_pos += entry.edge_count * rl;
        }
        if expect_pos != self.edata_len {
            return Err(VentanaError::ShardFormat(format!(
                "shard {}: index covers {} bytes but the edge file has {}",
                self.id, expect_pos, self.edata_len
            )));
        }
        Ok(())
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn interval(&self) -> Interval {
        self.interval
    }

    pub fn len_bytes(&self) -> u64 {
        self.edata_len
    }

    pub fn num_edges(&self) -> u64 {
        self.edata_len / self.record_len as u64
    }

    pub(crate) fn index(&self) -> &[IndexEntry] {
        &self.index
    }

    /// Byte range covering all edges whose source lies in `range`,
    /// computed from the index alone.
    pub(crate) fn byte_range(&self, range: Interval) -> (u64, u64) {
        let start = match self.index.binary_search_by_key(&range.lo, |e| e.src) {
            Ok(i) => self.index[i].file_pos,
            Err(i) => self
                .index
                .get(i)
                .map(|e| e.file_pos)
                .unwrap_or(self.edata_len),
        };
        let end = match self.index.binary_search_by_key(&range.hi, |e| e.src) {
            Ok(i) => self.index[i].file_pos,
            Err(i) => self
                .index
                .get(i)
                .map(|e| e.file_pos)
                .unwrap_or(self.edata_len),
        };
        (start, end)
    }

    /// Bytes a sliding-window slice for `range` would occupy.
    pub fn slice_len(&self, range: Interval) -> u64 {
        let (start, end) = self.byte_range(range);
        end - start
    }

    fn read_range(&mut self, start: u64, end: u64) -> Result<Block> {
        let mut bytes = vec![0u8; (end - start) as usize];
        self.edata.seek(SeekFrom::Start(start))?;
        self.edata.read_exact(&mut bytes)?;
        Ok(Block {
            shard: self.id,
            byte_off: start,
            bytes,
        })
    }
}

/// An opened, validated set of shard files.
#[derive(Debug)]
pub struct ShardSet {
    base: PathBuf,
    meta: Meta,
    shards: Vec<Shard>,
}

impl ShardSet {
    /// Opens and validates every shard under `base`.
    ///
    /// `num_shards` optionally pins the expected shard count; a
    /// disagreement with the meta file is a format error rather than a
    /// silent reinterpretation.
    pub fn open(base: impl AsRef<Path>, num_shards: Option<usize>) -> Result<Self> {
        let base = base.as_ref().to_path_buf();
        let meta = Meta::load(&base)?;
        if let Some(n) = num_shards {
            if n != meta.num_shards() {
                return Err(VentanaError::ShardFormat(format!(
                    "shard count override {n} disagrees with meta file ({})",
                    meta.num_shards()
                )));
            }
        }
        let mut shards = Vec::with_capacity(meta.num_shards());
        for (p, iv) in meta.intervals.iter().enumerate() {
            shards.push(Shard::open(&base, p, *iv, meta.value_width as usize)?);
        }
        let num_edges: u64 = shards.iter().map(|s| s.num_edges()).sum();
        info!(
            base = %base.display(),
            shards = shards.len(),
            vertices = meta.num_vertices,
            edges = num_edges,
            "opened shard set"
        );
        Ok(Self { base, meta, shards })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn meta(&self) -> &Meta {
        &self.meta
    }

    pub fn num_shards(&self) -> usize {
        self.shards.len()
    }

    pub fn num_vertices(&self) -> u32 {
        self.meta.num_vertices
    }

    pub fn num_edges(&self) -> u64 {
        self.shards.iter().map(|s| s.num_edges()).sum()
    }

    pub fn shard(&self, p: usize) -> &Shard {
        &self.shards[p]
    }

    pub(crate) fn edata_path(&self, p: usize) -> PathBuf {
        edata_path(&self.base, p)
    }

    /// Loads shard `p`'s edge file in full (the memory shard).
    pub fn load_shard(&mut self, p: usize) -> Result<Block> {
        let len = self.shards[p].edata_len;
        debug!(shard = p, bytes = len, "loading memory shard");
        self.shards[p].read_range(0, len)
    }

    /// Reads the contiguous range of shard `p` covering all edges whose
    /// source lies in `range`.
    pub fn slice(&mut self, p: usize, range: Interval) -> Result<Block> {
        let (start, end) = self.shards[p].byte_range(range);
        self.shards[p].read_range(start, end)
    }

    /// Flushes a block back to the byte offset it was read from.
    pub fn write_back(&mut self, block: &Block) -> Result<()> {
        let shard = &mut self.shards[block.shard];
        debug_assert!(block.byte_off + block.bytes.len() as u64 <= shard.edata_len);
        shard.edata.seek(SeekFrom::Start(block.byte_off))?;
        shard.edata.write_all(&block.bytes)?;
        shard.edata.flush()?;
        Ok(())
    }
}
