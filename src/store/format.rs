//! On-disk record codecs for the shard file family.
//!
//! Byte order is host-native throughout; shard sets are not portable
//! across endianness. Three file kinds exist for a base path `base`:
//!
//! - `base.meta`    — magic, version, value width, vertex count, and
//!   the interval table (shard count is the table length);
//! - `base.index.P` — packed `(src, file_pos, edge_count)` entries,
//!   sorted by src, one per source appearing in shard `P`;
//! - `base.edata.P` — packed `(src, dst, value)` records sorted by
//!   `(src, dst)`.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Result, VentanaError};
use crate::store::plan::Interval;
use crate::types::VertexId;

pub(crate) const META_MAGIC: u32 = 0x5653_5744;
pub(crate) const FORMAT_VERSION: u32 = 1;

/// Bytes per index entry: src u32 + file_pos u64 + edge_count u64.
pub(crate) const INDEX_ENTRY_LEN: usize = 20;

/// Bytes of source and destination IDs preceding the value in a record.
pub(crate) const RECORD_HEADER_LEN: usize = 8;

#[inline]
pub(crate) fn record_len(value_width: usize) -> usize {
    RECORD_HEADER_LEN + value_width
}

pub(crate) fn meta_path(base: &Path) -> PathBuf {
    with_suffix(base, "meta")
}

pub(crate) fn index_path(base: &Path, shard: usize) -> PathBuf {
    with_suffix(base, &format!("index.{shard}"))
}

pub(crate) fn edata_path(base: &Path, shard: usize) -> PathBuf {
    with_suffix(base, &format!("edata.{shard}"))
}

fn with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut name = base.as_os_str().to_os_string();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

#[inline]
pub(crate) fn read_u32_at(data: &[u8], offset: usize) -> u32 {
    u32::from_ne_bytes(data[offset..offset + 4].try_into().unwrap())
}

#[inline]
pub(crate) fn read_u64_at(data: &[u8], offset: usize) -> u64 {
    u64::from_ne_bytes(data[offset..offset + 8].try_into().unwrap())
}

/// One index-file entry: the byte offset and length of a source's run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct IndexEntry {
    pub src: VertexId,
    pub file_pos: u64,
    pub edge_count: u64,
}

impl IndexEntry {
    pub(crate) fn decode(data: &[u8]) -> Self {
        Self {
            src: read_u32_at(data, 0),
            file_pos: read_u64_at(data, 4),
            edge_count: read_u64_at(data, 12),
        }
    }

    pub(crate) fn encode_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.src.to_ne_bytes());
        out.extend_from_slice(&self.file_pos.to_ne_bytes());
        out.extend_from_slice(&self.edge_count.to_ne_bytes());
    }
}

/// Contents of the global meta file: everything the engine needs to
/// interpret the shard files, fixed at build time.
#[derive(Clone, Debug)]
pub struct Meta {
    pub value_width: u32,
    pub num_vertices: u32,
    pub intervals: Vec<Interval>,
}

impl Meta {
    pub fn num_shards(&self) -> usize {
        self.intervals.len()
    }

    pub(crate) fn load(base: &Path) -> Result<Self> {
        let path = meta_path(base);
        let data = fs::read(&path).map_err(|e| {
            VentanaError::ShardFormat(format!("cannot read meta file {}: {e}", path.display()))
        })?;
        if data.len() < 20 {
            return Err(VentanaError::ShardFormat(format!(
                "meta file {} is truncated ({} bytes)",
                path.display(),
                data.len()
            )));
        }
        if read_u32_at(&data, 0) != META_MAGIC {
            return Err(VentanaError::ShardFormat(format!(
                "bad magic in meta file {}",
                path.display()
            )));
        }
        let version = read_u32_at(&data, 4);
        if version != FORMAT_VERSION {
            return Err(VentanaError::ShardFormat(format!(
                "unsupported format version {version} in {}",
                path.display()
            )));
        }
        let value_width = read_u32_at(&data, 8);
        let num_vertices = read_u32_at(&data, 12);
        let num_shards = read_u32_at(&data, 16) as usize;
        let expected = 20 + num_shards * 8;
        if data.len() != expected {
            return Err(VentanaError::ShardFormat(format!(
                "meta file {} has {} bytes, expected {expected} for {num_shards} shards",
                path.display(),
                data.len()
            )));
        }

        let mut intervals = Vec::with_capacity(num_shards);
        for p in 0..num_shards {
            let lo = read_u32_at(&data, 20 + p * 8);
            let hi = read_u32_at(&data, 24 + p * 8);
            intervals.push(Interval::new(lo, hi));
        }
        let meta = Self {
            value_width,
            num_vertices,
            intervals,
        };
        meta.validate()?;
        Ok(meta)
    }

    pub(crate) fn store(&self, base: &Path) -> Result<()> {
        self.validate()?;
        let mut out = Vec::with_capacity(20 + self.intervals.len() * 8);
        out.extend_from_slice(&META_MAGIC.to_ne_bytes());
        out.extend_from_slice(&FORMAT_VERSION.to_ne_bytes());
        out.extend_from_slice(&self.value_width.to_ne_bytes());
        out.extend_from_slice(&self.num_vertices.to_ne_bytes());
        out.extend_from_slice(&(self.intervals.len() as u32).to_ne_bytes());
        for iv in &self.intervals {
            out.extend_from_slice(&iv.lo.to_ne_bytes());
            out.extend_from_slice(&iv.hi.to_ne_bytes());
        }
        fs::write(meta_path(base), out)?;
        Ok(())
    }

    /// Intervals must be disjoint, contiguous, and cover `[0, N)`.
    fn validate(&self) -> Result<()> {
        if self.intervals.is_empty() {
            return Err(VentanaError::ShardFormat(
                "meta file describes zero shards".into(),
            ));
        }
        let mut expect_lo = 0;
        for (p, iv) in self.intervals.iter().enumerate() {
            if iv.lo != expect_lo || iv.hi < iv.lo {
                return Err(VentanaError::ShardFormat(format!(
                    "interval table broken at shard {p}: [{}, {})",
                    iv.lo, iv.hi
                )));
            }
            expect_lo = iv.hi;
        }
        if expect_lo != self.num_vertices {
            return Err(VentanaError::ShardFormat(format!(
                "intervals cover [0, {expect_lo}) but the graph has {} vertices",
                self.num_vertices
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_entry_round_trip() {
        let entry = IndexEntry {
            src: 7,
            file_pos: 1024,
            edge_count: 3,
        };
        let mut buf = Vec::new();
        entry.encode_into(&mut buf);
        assert_eq!(buf.len(), INDEX_ENTRY_LEN);
        assert_eq!(IndexEntry::decode(&buf), entry);
    }

    #[test]
    fn test_meta_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("g");
        let meta = Meta {
            value_width: 4,
            num_vertices: 10,
            intervals: vec![Interval::new(0, 4), Interval::new(4, 10)],
        };
        meta.store(&base).unwrap();
        let loaded = Meta::load(&base).unwrap();
        assert_eq!(loaded.value_width, 4);
        assert_eq!(loaded.num_vertices, 10);
        assert_eq!(loaded.intervals, meta.intervals);
    }

    #[test]
    fn test_meta_rejects_gap_in_intervals() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("g");
        let meta = Meta {
            value_width: 4,
            num_vertices: 10,
            intervals: vec![Interval::new(0, 4), Interval::new(5, 10)],
        };
        assert!(meta.store(&base).is_err());
    }

    #[test]
    fn test_meta_rejects_bad_magic() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("g");
        let meta = Meta {
            value_width: 4,
            num_vertices: 2,
            intervals: vec![Interval::new(0, 2)],
        };
        meta.store(&base).unwrap();
        let path = meta_path(&base);
        let mut bytes = fs::read(&path).unwrap();
        bytes[0] ^= 0xFF;
        fs::write(&path, bytes).unwrap();
        assert!(matches!(
            Meta::load(&base),
            Err(VentanaError::ShardFormat(_))
        ));
    }
}
