//! BAI (BAM Index) support for random access queries.
//!
//! # Binning Scheme
//!
//! 37,450 bins over a 512 Mbp coordinate space, branching factor 8:
//! - Level 0: bin 0 (entire sequence)
//! - Level 1: bins 1-8 (64 Mbp each)
//! - Level 2: bins 9-72 (8 Mbp each)
//! - Level 3: bins 73-584 (1 Mbp each)
//! - Level 4: bins 585-4680 (128 Kbp each)
//! - Level 5: bins 4681-37448 (16 Kbp each)
//!
//! Bin 37450 is a pseudo-bin some indexers append with per-reference
//! statistics; it is parsed into [`ReferenceMetadata`] and never queried.
//!
//! # Linear Index
//!
//! One virtual offset per 16 Kbp window: the smallest offset of any record
//! overlapping that window. It is only a lower bound; entries need not be
//! monotonic, and dropping it would never change which records a query
//! finds, only how much is read.
//!
//! # Format
//!
//! ```text
//! magic[4]     "BAI\1"
//! n_ref[4]     Number of reference sequences (int32)
//! For each reference:
//!   n_bin[4]   Number of bins (int32)
//!   For each bin:
//!     bin[4]   Bin number (uint32)
//!     n_chunk[4] Number of chunks (int32)
//!     For each chunk:
//!       chunk_beg[8]  Virtual offset (uint64)
//!       chunk_end[8]  Virtual offset (uint64)
//!   n_intv[4]  Number of intervals (int32)
//!   For each interval:
//!     ioffset[8] Virtual offset (uint64)
//! n_no_coor[8] Unplaced reads (uint64, optional)
//! ```

use crate::error::{BamseekError, Result};
use crate::io::bgzf::VirtualOffset;
use std::fs::File;
use std::io::{self, BufReader, Read};
use std::path::Path;

/// BAI file magic.
const BAI_MAGIC: &[u8; 4] = b"BAI\x01";

/// Width of a linear-index window and of a level-5 bin, as a shift.
pub const LINEAR_SHIFT: u32 = 14;

/// Exclusive upper bound of the binning coordinate space (512 Mbp).
pub const MAX_COORDINATE: u32 = 1 << 29;

/// Largest real bin id.
pub const MAX_BIN: u32 = 37448;

/// Pseudo-bin carrying per-reference statistics.
pub const METADATA_BIN: u32 = 37450;

/// First bin id of the deepest level.
const LEVEL5_FIRST_BIN: u32 = 4681;

/// A half-open range `[begin, end)` of virtual offsets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Chunk {
    /// Virtual file offset where chunk starts
    pub begin: VirtualOffset,
    /// Virtual file offset where chunk ends (exclusive)
    pub end: VirtualOffset,
}

impl Chunk {
    /// Create a new chunk.
    pub fn new(begin: VirtualOffset, end: VirtualOffset) -> Self {
        Chunk { begin, end }
    }

    /// Whether the chunk covers no bytes.
    pub fn is_empty(&self) -> bool {
        self.begin >= self.end
    }
}

/// A node of the binning tree with the chunks assigned to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bin {
    /// Bin number (0-37448)
    pub id: u32,
    /// Chunks of data in this bin
    pub chunks: Vec<Chunk>,
}

impl Bin {
    /// Create a bin.
    pub fn new(id: u32, chunks: Vec<Chunk>) -> Self {
        Bin { id, chunks }
    }

    /// Tree level of a bin id: 0 is the root, 5 the 16 Kbp leaves.
    pub fn level_of(id: u32) -> u8 {
        match id {
            0 => 0,
            1..=8 => 1,
            9..=72 => 2,
            73..=584 => 3,
            585..=4680 => 4,
            _ => 5,
        }
    }

    /// Tree level of this bin.
    pub fn level(&self) -> u8 {
        Self::level_of(self.id)
    }

    /// Genomic interval `[start, end)` this bin covers, `None` for ids
    /// outside the tree.
    pub fn span(&self) -> Option<(u32, u32)> {
        if self.id > MAX_BIN {
            return None;
        }
        let level = u32::from(self.level());
        let first = ((1u32 << (3 * level)) - 1) / 7;
        let shift = 29 - 3 * level;
        let start = (self.id - first) << shift;
        Some((start, start + (1 << shift)))
    }

    /// Whether this bin could hold records overlapping `[begin, end)`.
    ///
    /// Inclusive at both ends of the coarsened interval, so a bin that only
    /// abuts the query counts. False positives are expected; false
    /// negatives never happen.
    pub fn can_overlap_with(&self, begin: u32, end: u32) -> bool {
        if self.id == 0 {
            return true;
        }

        let mut magic = LEVEL5_FIRST_BIN;
        let mut b = begin >> LINEAR_SHIFT;
        let mut e = end >> LINEAR_SHIFT;
        while magic != 0 {
            if let Some(cell) = self.id.checked_sub(magic) {
                if b <= cell && cell <= e {
                    return true;
                }
            }
            magic >>= 3;
            b >>= 3;
            e >>= 3;
        }
        false
    }
}

/// Statistics some indexers store in pseudo-bin 37450.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReferenceMetadata {
    /// Virtual offset of the first record placed on this reference
    pub first_offset: VirtualOffset,
    /// Virtual offset just past the last record placed on this reference
    pub last_offset: VirtualOffset,
    /// Number of mapped reads
    pub mapped: u64,
    /// Number of placed but unmapped reads
    pub unmapped: u64,
}

/// Binning and linear index for one reference sequence.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReferenceIndex {
    /// Bins for this reference (hierarchical spatial index)
    pub bins: Vec<Bin>,
    /// Linear index: minimum virtual offset per 16 Kbp window
    pub linear_index: Vec<VirtualOffset>,
    /// Pseudo-bin statistics, when the index carries them
    pub metadata: Option<ReferenceMetadata>,
}

impl ReferenceIndex {
    /// Create a reference index from its parts.
    pub fn new(bins: Vec<Bin>, linear_index: Vec<VirtualOffset>) -> Self {
        ReferenceIndex {
            bins,
            linear_index,
            metadata: None,
        }
    }

    /// Lower bound on the offset of any record overlapping `begin`.
    ///
    /// Positions past the end of the linear index use its last entry.
    pub fn min_offset(&self, begin: u32) -> Option<VirtualOffset> {
        let window = (begin >> LINEAR_SHIFT) as usize;
        self.linear_index
            .get(window)
            .or_else(|| self.linear_index.last())
            .copied()
    }

    /// Chunks that may hold records overlapping `[begin, end)`, sorted and merged.
    pub fn resolve(&self, begin: u32, end: u32) -> Vec<Chunk> {
        let mut chunks: Vec<Chunk> = self
            .bins
            .iter()
            .filter(|bin| bin.can_overlap_with(begin, end))
            .flat_map(|bin| bin.chunks.iter().copied())
            .collect();

        if let Some(floor) = self.min_offset(begin) {
            chunks.retain(|chunk| chunk.end >= floor);
        }

        merge_chunks(chunks)
    }
}

/// BAI (BAM Index) structure.
///
/// Immutable once loaded; share it between sessions behind an `Arc`.
///
/// # Example
///
/// ```no_run
/// use bamseek::io::bam::BaiIndex;
///
/// # fn main() -> bamseek::Result<()> {
/// let index = BaiIndex::from_path("alignments.bam.bai")?;
/// let chunks = index.resolve(0, 1_000_000, 2_000_000)?;
/// println!("{} chunks to read", chunks.len());
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BaiIndex {
    /// Index data for each reference sequence
    pub references: Vec<ReferenceIndex>,
    /// Number of unplaced reads, if present in the index
    pub n_no_coor: Option<u64>,
}

impl BaiIndex {
    /// Create an index from per-reference data.
    pub fn new(references: Vec<ReferenceIndex>) -> Self {
        BaiIndex {
            references,
            n_no_coor: None,
        }
    }

    /// Load a BAI index from a file.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be opened or is not a valid BAI.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let index = Self::read(&mut BufReader::new(file))?;
        tracing::debug!(
            path = %path.as_ref().display(),
            references = index.references.len(),
            "loaded BAI index"
        );
        Ok(index)
    }

    /// Read a BAI index from a reader.
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        let mut magic = [0u8; 4];
        read_exact(reader, &mut magic, "magic")?;
        if &magic != BAI_MAGIC {
            return Err(invalid(format!(
                "expected magic 'BAI\\x01', got {magic:?}"
            )));
        }

        let n_ref = read_count(reader, "reference count")?;
        let mut references = Vec::with_capacity(n_ref.min(1 << 16));
        for ref_id in 0..n_ref {
            references.push(read_reference_index(reader, ref_id)?);
        }

        // Optional trailing field
        let mut buf = [0u8; 8];
        let n_no_coor = match read_full(reader, &mut buf)? {
            0 => None,
            8 => Some(u64::from_le_bytes(buf)),
            n => {
                return Err(invalid(format!(
                    "trailing n_no_coor field is {n} bytes, expected 8"
                )))
            }
        };

        Ok(BaiIndex {
            references,
            n_no_coor,
        })
    }

    /// Number of reference sequences covered.
    pub fn reference_count(&self) -> usize {
        self.references.len()
    }

    /// Index data for one reference.
    ///
    /// # Errors
    ///
    /// Returns `UnknownReference` if `ref_id` is out of range.
    pub fn reference(&self, ref_id: usize) -> Result<&ReferenceIndex> {
        self.references
            .get(ref_id)
            .ok_or(BamseekError::UnknownReference {
                ref_id,
                reference_count: self.references.len(),
            })
    }

    /// Resolve `[begin, end)` on `ref_id` to the chunks worth reading.
    ///
    /// Returns an empty list when no bin overlaps; that is not an error.
    ///
    /// # Errors
    ///
    /// Returns `UnknownReference` if `ref_id` is out of range.
    pub fn resolve(&self, ref_id: usize, begin: u32, end: u32) -> Result<Vec<Chunk>> {
        let chunks = self.reference(ref_id)?.resolve(begin, end);
        tracing::debug!(ref_id, begin, end, chunks = chunks.len(), "resolved region");
        Ok(chunks)
    }
}

/// Bin a record spanning `[begin, end)` belongs to (the smallest bin that
/// contains it entirely).
pub fn region_to_bin(begin: u32, end: u32) -> u32 {
    let end = end.max(begin.saturating_add(1)) - 1;
    for level in (1..=5u32).rev() {
        let shift = 29 - 3 * level;
        if begin >> shift == end >> shift {
            let first = ((1u32 << (3 * level)) - 1) / 7;
            return first + (begin >> shift);
        }
    }
    0
}

/// Sort chunks by `begin` and merge any that overlap or abut.
///
/// Merging changes the number of seeks, never the set of blocks visited.
pub fn merge_chunks(mut chunks: Vec<Chunk>) -> Vec<Chunk> {
    chunks.retain(|chunk| !chunk.is_empty());
    if chunks.is_empty() {
        return chunks;
    }

    chunks.sort_by_key(|c| (c.begin, c.end));

    let mut merged: Vec<Chunk> = Vec::with_capacity(chunks.len());
    for chunk in chunks {
        match merged.last_mut() {
            Some(current) if chunk.begin <= current.end => {
                current.end = current.end.max(chunk.end);
            }
            _ => merged.push(chunk),
        }
    }
    merged
}

fn read_reference_index<R: Read>(reader: &mut R, ref_id: usize) -> Result<ReferenceIndex> {
    let n_bin = read_count(reader, "bin count")?;
    let mut bins = Vec::with_capacity(n_bin.min(MAX_BIN as usize + 2));
    let mut metadata = None;

    for _ in 0..n_bin {
        let id = read_u32(reader, "bin id")?;
        let n_chunk = read_count(reader, "chunk count")?;

        let mut chunks = Vec::with_capacity(n_chunk.min(1 << 16));
        for _ in 0..n_chunk {
            let begin = VirtualOffset::from_raw(read_u64(reader, "chunk begin")?);
            let end = VirtualOffset::from_raw(read_u64(reader, "chunk end")?);
            chunks.push(Chunk::new(begin, end));
        }

        if id == METADATA_BIN {
            if chunks.len() != 2 {
                return Err(invalid(format!(
                    "reference {ref_id}: metadata bin has {} chunks, expected 2",
                    chunks.len()
                )));
            }
            metadata = Some(ReferenceMetadata {
                first_offset: chunks[0].begin,
                last_offset: chunks[0].end,
                mapped: chunks[1].begin.to_raw(),
                unmapped: chunks[1].end.to_raw(),
            });
            continue;
        }

        bins.push(Bin::new(id, chunks));
    }

    let n_intv = read_count(reader, "interval count")?;
    let mut linear_index = Vec::with_capacity(n_intv.min(1 << 16));
    for _ in 0..n_intv {
        linear_index.push(VirtualOffset::from_raw(read_u64(reader, "linear index")?));
    }

    Ok(ReferenceIndex {
        bins,
        linear_index,
        metadata,
    })
}

fn invalid(msg: String) -> BamseekError {
    BamseekError::InvalidIndex { msg }
}

fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

fn read_exact<R: Read>(reader: &mut R, buf: &mut [u8], what: &str) -> Result<()> {
    if read_full(reader, buf)? < buf.len() {
        return Err(invalid(format!("index truncated while reading {what}")));
    }
    Ok(())
}

fn read_u32<R: Read>(reader: &mut R, what: &str) -> Result<u32> {
    let mut buf = [0u8; 4];
    read_exact(reader, &mut buf, what)?;
    Ok(u32::from_le_bytes(buf))
}

fn read_u64<R: Read>(reader: &mut R, what: &str) -> Result<u64> {
    let mut buf = [0u8; 8];
    read_exact(reader, &mut buf, what)?;
    Ok(u64::from_le_bytes(buf))
}

fn read_count<R: Read>(reader: &mut R, what: &str) -> Result<usize> {
    let value = read_u32(reader, what)? as i32;
    if value < 0 {
        return Err(invalid(format!("negative {what}: {value}")));
    }
    Ok(value as usize)
}
