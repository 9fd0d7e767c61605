//! Indexed region queries.
//!
//! [`RandomAccessManager`] resolves a [`Region`] through the index, seeks to
//! the first chunk and hands back a [`RegionReader`]: a byte stream that
//! covers every resolved chunk and stops after the last one, without
//! decompressing the rest of the file. Record parsing and exact coordinate
//! filtering happen downstream.
//!
//! # Example
//!
//! ```no_run
//! use bamseek::io::bam::{RandomAccessManager, Region};
//! use bamseek::io::bgzf::PipelineConfig;
//! use std::io::Read;
//!
//! # fn main() -> bamseek::Result<()> {
//! let manager = RandomAccessManager::from_path("alignments.bam", PipelineConfig::default())?;
//! let mut reader = manager.open(&Region::new(0, 1_000_000, 2_000_000)?)?;
//!
//! let mut bytes = Vec::new();
//! reader.read_to_end(&mut bytes)?;
//! # Ok(())
//! # }
//! ```

use super::index::{BaiIndex, Chunk, MAX_COORDINATE};
use super::slice::{slice, SliceOptions, SliceSummary};
use crate::error::{BamseekError, Result};
use crate::io::bgzf::{BlockDescriptor, BlockReader, BlockStream, PipelineConfig, VirtualOffset};
use crate::io::sink::DataSink;
use crate::io::source::{ArchiveRead, DataSource};
use rayon::ThreadPool;
use std::collections::VecDeque;
use std::fmt;
use std::io::{self, BufRead, Read, Seek, Write};
use std::sync::Arc;

/// End of a chunk that runs to the end of the archive.
const OPEN_END: VirtualOffset = VirtualOffset::from_raw(u64::MAX);

/// A 0-based, half-open genomic interval on one reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Region {
    /// Reference sequence index
    pub ref_id: usize,
    /// Start position (inclusive)
    pub begin: u32,
    /// End position (exclusive)
    pub end: u32,
}

impl Region {
    /// Create a region.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRange` if `begin > end` or `end` lies beyond the
    /// 512 Mbp binning space.
    pub fn new(ref_id: usize, begin: u32, end: u32) -> Result<Self> {
        if begin > end {
            return Err(BamseekError::InvalidRange(format!(
                "start ({begin}) > end ({end}) on reference {ref_id}"
            )));
        }
        if end > MAX_COORDINATE {
            return Err(BamseekError::InvalidRange(format!(
                "end ({end}) beyond the indexable limit {MAX_COORDINATE}"
            )));
        }
        Ok(Region { ref_id, begin, end })
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ref#{}:{}-{}", self.ref_id, self.begin, self.end)
    }
}

/// Whether a session can fast-forward, decided once when the manager is built.
#[derive(Debug, Clone)]
pub enum IndexState {
    /// Queries resolve through the index
    Indexed(Arc<BaiIndex>),
    /// No index: every query streams the whole archive
    Unindexed,
}

/// Turns region queries into bounded byte streams over one archive.
///
/// The manager holds only immutable state (source location, index, worker
/// pool). Each [`RandomAccessManager::open`] opens its own file handle, so
/// any number of sessions may run concurrently.
pub struct RandomAccessManager {
    source: DataSource,
    index: IndexState,
    config: PipelineConfig,
    pool: Option<Arc<ThreadPool>>,
    data_start: VirtualOffset,
}

impl RandomAccessManager {
    /// Create a manager.
    pub fn new(source: DataSource, index: IndexState, config: PipelineConfig) -> Result<Self> {
        let pool = config.build_pool()?;
        Ok(Self {
            source,
            index,
            config,
            pool,
            data_start: VirtualOffset::ZERO,
        })
    }

    /// Open an archive and look for its index next to it.
    ///
    /// A missing index is not an error: the manager falls back to full
    /// scans and says so at `warn` level. An index that exists but cannot
    /// be parsed is an error.
    pub fn from_path<P: AsRef<std::path::Path>>(path: P, config: PipelineConfig) -> Result<Self> {
        let source = DataSource::from_path(path);
        let index = match source.index_candidates().into_iter().find(|p| p.is_file()) {
            Some(index_path) => IndexState::Indexed(Arc::new(BaiIndex::from_path(index_path)?)),
            None => IndexState::Unindexed,
        };
        Self::new(source, index, config)
    }

    /// Where records begin in the decompressed stream (after the header).
    ///
    /// Full scans start here. Defaults to the start of the archive.
    pub fn with_data_start(mut self, data_start: VirtualOffset) -> Self {
        self.data_start = data_start;
        self
    }

    /// The index state chosen at construction.
    pub fn index(&self) -> &IndexState {
        &self.index
    }

    /// Decompression settings used by sessions.
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Chunks an indexed query would read; `None` without an index.
    pub fn resolve(&self, region: &Region) -> Result<Option<Vec<Chunk>>> {
        match &self.index {
            IndexState::Indexed(index) => {
                Ok(Some(index.resolve(region.ref_id, region.begin, region.end)?))
            }
            IndexState::Unindexed => Ok(None),
        }
    }

    /// Open a bounded stream over `region` with a fresh file handle.
    pub fn open(&self, region: &Region) -> Result<RegionReader<Box<dyn ArchiveRead>>> {
        self.open_with(self.source.open()?, region)
    }

    /// Open a bounded stream over `region` on a caller-supplied reader.
    ///
    /// # Errors
    ///
    /// - `UnknownReference` if the region names a reference the index lacks
    /// - `Seek` if the reader cannot seek to the first chunk
    pub fn open_with<R: Read + Seek>(&self, reader: R, region: &Region) -> Result<RegionReader<R>> {
        match self.resolve(region)? {
            Some(chunks) => RegionReader::new(
                reader,
                chunks,
                region.to_string(),
                &self.config,
                self.pool.clone(),
            ),
            None => {
                tracing::warn!(
                    region = %region,
                    archive = %self.source.path().display(),
                    "no index available, falling back to a full scan"
                );
                self.full_scan(reader)
            }
        }
    }

    /// Stream every record from the data start to the end of the archive.
    pub fn open_full(&self) -> Result<RegionReader<Box<dyn ArchiveRead>>> {
        self.full_scan(self.source.open()?)
    }

    fn full_scan<R: Read + Seek>(&self, reader: R) -> Result<RegionReader<R>> {
        let everything = Chunk::new(self.data_start, OPEN_END);
        RegionReader::new(
            reader,
            vec![everything],
            "full scan".to_string(),
            &self.config,
            self.pool.clone(),
        )
    }

    /// Extract `region` into a new archive written to `out`.
    ///
    /// # Errors
    ///
    /// Slicing needs an index; without one this returns `InvalidIndex`.
    pub fn slice<W: Write>(
        &self,
        region: &Region,
        out: W,
        options: &SliceOptions,
    ) -> Result<SliceSummary> {
        self.slice_with(self.source.open()?, region, out, options)
    }

    /// [`RandomAccessManager::slice`] into a file or standard output.
    pub fn slice_to(
        &self,
        region: &Region,
        sink: &DataSink,
        options: &SliceOptions,
    ) -> Result<SliceSummary> {
        self.slice(region, sink.open()?, options)
    }

    /// [`RandomAccessManager::slice`] on a caller-supplied reader.
    pub fn slice_with<R: Read + Seek, W: Write>(
        &self,
        reader: R,
        region: &Region,
        out: W,
        options: &SliceOptions,
    ) -> Result<SliceSummary> {
        let chunks = self.resolve(region)?.ok_or_else(|| BamseekError::InvalidIndex {
            msg: format!(
                "cannot slice {region} from {}: archive has no index",
                self.source.path().display()
            ),
        })?;
        slice(reader, &chunks, out, options)
    }
}

/// The decompressed block currently being delivered.
struct Window {
    descriptor: BlockDescriptor,
    data: Vec<u8>,
    pos: usize,
    end: usize,
}

/// Byte stream over a list of chunks.
///
/// Seeks explicitly between chunks separated by a gap; never reads blocks
/// past the last chunk's end.
pub struct RegionReader<R> {
    stream: BlockStream<R>,
    chunks: VecDeque<Chunk>,
    current: Option<Chunk>,
    window: Option<Window>,
    label: String,
    positioned: bool,
    done: bool,
}

impl<R: Read + Seek> RegionReader<R> {
    /// Read `chunks` (sorted, non-overlapping) from `reader`.
    ///
    /// Seeks to the first chunk before returning.
    pub fn new(
        reader: R,
        chunks: Vec<Chunk>,
        label: String,
        config: &PipelineConfig,
        pool: Option<Arc<ThreadPool>>,
    ) -> Result<Self> {
        let stream = BlockStream::from_config(BlockReader::new(reader), config, pool)?;
        let mut region_reader = Self {
            stream,
            chunks: chunks.into_iter().filter(|c| !c.is_empty()).collect(),
            current: None,
            window: None,
            label,
            positioned: false,
            done: false,
        };
        region_reader.start_next_chunk()?;
        Ok(region_reader)
    }

    /// Chunks not yet started.
    pub fn remaining_chunks(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.iter()
    }

    /// Virtual offset of the next byte this reader will deliver.
    pub fn virtual_position(&self) -> Option<VirtualOffset> {
        if self.done {
            return None;
        }
        match (&self.window, &self.current) {
            (Some(window), _) if window.pos < window.data.len() => Some(VirtualOffset::new(
                window.descriptor.file_offset,
                window.pos as u16,
            )),
            (Some(window), _) => Some(VirtualOffset::new(window.descriptor.end_offset(), 0)),
            (None, Some(chunk)) => Some(chunk.begin),
            (None, None) => None,
        }
    }

    /// Stop the session: outstanding decompression is abandoned and the
    /// file handle released without waiting on workers.
    pub fn close(mut self) {
        self.finish();
    }

    fn finish(&mut self) {
        self.done = true;
        self.window = None;
        self.current = None;
        self.chunks.clear();
        self.stream.cancel();
    }

    /// Begin the next chunk, seeking when it does not continue where the
    /// previous one stopped.
    fn start_next_chunk(&mut self) -> Result<()> {
        let Some(chunk) = self.chunks.pop_front() else {
            self.finish();
            return Ok(());
        };
        self.current = Some(chunk);

        let begin = chunk.begin;
        let stop_before = if chunk.end.uoffset() == 0 {
            chunk.end.coffset()
        } else {
            chunk.end.coffset().saturating_add(1)
        };

        // Continue inside the block we already hold
        if let Some(window) = &mut self.window {
            if window.descriptor.file_offset == begin.coffset() {
                let uoffset = usize::from(begin.uoffset());
                let len = window.data.len();
                if uoffset > len {
                    return Err(self.offset_error(begin, len));
                }
                window.pos = uoffset.max(window.pos);
                window.end = window_end(&window.descriptor, window.data.len(), &chunk);
                self.stream.set_stop_before(Some(stop_before));
                return Ok(());
            }
        }
        self.window = None;

        let contiguous = self.positioned
            && self.stream.is_idle()
            && self.stream.source_position() == begin.coffset();
        if !contiguous {
            tracing::trace!(offset = %begin, label = %self.label, "seeking to chunk");
            self.stream.seek(begin.coffset())?;
            self.positioned = true;
        }
        self.stream.set_stop_before(Some(stop_before));

        // The first block must exist and hold `uoffset` bytes
        match self.next_window(&chunk)? {
            Some(mut window) => {
                let uoffset = usize::from(begin.uoffset());
                if uoffset > window.data.len() {
                    return Err(self.offset_error(begin, window.data.len()));
                }
                window.pos = uoffset;
                self.window = Some(window);
            }
            // A scan to the end of an archive without records
            None if chunk.end == OPEN_END && begin.uoffset() == 0 => {}
            None => {
                return Err(begin.invalid(format!(
                    "no block at this file offset (while reading {})",
                    self.label
                )))
            }
        }
        Ok(())
    }

    fn next_window(&mut self, chunk: &Chunk) -> Result<Option<Window>> {
        match self.stream.next() {
            Some(Ok(block)) => {
                let len = block.data.len();
                let end = window_end(&block.descriptor, len, chunk);
                if block.descriptor.file_offset == chunk.end.coffset()
                    && usize::from(chunk.end.uoffset()) > len
                {
                    return Err(self.offset_error(chunk.end, len));
                }
                Ok(Some(Window {
                    descriptor: block.descriptor,
                    data: block.data,
                    pos: 0,
                    end,
                }))
            }
            Some(Err(e)) => Err(e),
            None => Ok(None),
        }
    }

    /// Make sure the window has unread bytes; `false` once every chunk is done.
    fn fill(&mut self) -> Result<bool> {
        loop {
            if self.done {
                return Ok(false);
            }
            if let Some(window) = &self.window {
                if window.pos < window.end {
                    return Ok(true);
                }
            }

            let Some(chunk) = self.current else {
                self.start_next_chunk()?;
                continue;
            };

            let chunk_finished = match &self.window {
                Some(window) => window.descriptor.file_offset >= chunk.end.coffset(),
                None => false,
            };
            if chunk_finished {
                self.current = None;
                continue;
            }

            match self.next_window(&chunk)? {
                Some(window) => {
                    self.window = Some(window);
                }
                None => {
                    // No more blocks before the chunk's end
                    self.current = None;
                }
            }
        }
    }

    fn offset_error(&self, offset: VirtualOffset, block_len: usize) -> BamseekError {
        offset.invalid(format!(
            "block holds {block_len} decompressed bytes (while reading {})",
            self.label
        ))
    }
}

/// End of the deliverable part of a block for `chunk`.
fn window_end(descriptor: &BlockDescriptor, len: usize, chunk: &Chunk) -> usize {
    if descriptor.file_offset == chunk.end.coffset() {
        usize::from(chunk.end.uoffset()).min(len)
    } else {
        len
    }
}

impl<R: Read + Seek> Read for RegionReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let available = self.fill_buf()?;
        let n = available.len().min(buf.len());
        buf[..n].copy_from_slice(&available[..n]);
        self.consume(n);
        Ok(n)
    }
}

impl<R: Read + Seek> BufRead for RegionReader<R> {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        if let Err(e) = self.fill() {
            self.finish();
            return Err(e.into());
        }
        match &self.window {
            Some(window) if !self.done => Ok(&window.data[window.pos..window.end]),
            _ => Ok(&[]),
        }
    }

    fn consume(&mut self, amt: usize) {
        if let Some(window) = &mut self.window {
            window.pos = (window.pos + amt).min(window.end);
        }
    }
}
