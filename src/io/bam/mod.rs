//! Indexed random access into BAM archives.
//!
//! A BAM file is a BGZF archive; its `.bai` companion maps genomic
//! coordinates to ranges of virtual offsets. This module covers the path
//! from a coordinate query to bytes:
//!
//! 1. [`BaiIndex::resolve`] collects the chunks of every bin that can
//!    overlap the query, drops those below the linear-index floor and merges
//!    the rest
//! 2. [`RandomAccessManager::open`] seeks to the first chunk and streams
//!    decompressed bytes until the last chunk ends
//! 3. [`slice()`] copies the same range into a new archive, re-encoding only
//!    the two boundary blocks
//!
//! Record parsing is left to the caller: a [`RegionReader`] delivers raw
//! record bytes, and chunks are a superset of the overlapping records.
//!
//! # Example
//!
//! ```no_run
//! use bamseek::io::bam::{RandomAccessManager, Region, SliceOptions};
//! use bamseek::io::bgzf::PipelineConfig;
//! use std::fs::File;
//!
//! # fn main() -> bamseek::Result<()> {
//! let manager = RandomAccessManager::from_path("sample.bam", PipelineConfig::default())?;
//! let region = Region::new(0, 10_000, 20_000)?;
//!
//! let summary = manager.slice(&region, File::create("region.bam")?, &SliceOptions::default())?;
//! println!("re-encoded {} blocks", summary.blocks_reencoded);
//! # Ok(())
//! # }
//! ```

pub mod index;
pub mod query;
pub mod slice;

pub use index::{
    merge_chunks, region_to_bin, BaiIndex, Bin, Chunk, ReferenceIndex, ReferenceMetadata,
};
pub use query::{IndexState, RandomAccessManager, Region, RegionReader};
pub use slice::{slice, SliceOptions, SliceSummary};
