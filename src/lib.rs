//! bamseek: indexed random access and slicing for BAM archives
//!
//! # Overview
//!
//! bamseek reads regions out of large block-compressed alignment archives
//! without scanning them. A `.bai` index turns a genomic interval into a
//! handful of compressed byte ranges; only those blocks are read and
//! decompressed, optionally on a worker pool.
//!
//! ## Key Features
//!
//! - **Indexed queries**: seek straight to the blocks a region needs
//! - **Parallel decompression**: bounded lookahead, strict block order
//! - **Slicing**: extract a region as a new archive, re-encoding two blocks at most
//! - **Graceful fallback**: without an index, queries stream the whole file
//!
//! ## Quick Start
//!
//! ```no_run
//! use bamseek::io::bam::{RandomAccessManager, Region};
//! use bamseek::io::bgzf::PipelineConfig;
//! use std::io::BufRead;
//!
//! # fn main() -> bamseek::Result<()> {
//! let manager = RandomAccessManager::from_path("sample.bam", PipelineConfig::default())?;
//! let mut reader = manager.open(&Region::new(0, 100_000, 200_000)?)?;
//!
//! loop {
//!     let bytes = reader.fill_buf()?;
//!     if bytes.is_empty() {
//!         break;
//!     }
//!     let n = bytes.len();
//!     // Hand the bytes to a record parser
//!     reader.consume(n);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`io::bgzf`]: block framing, virtual offsets, decompression pipeline, writer
//! - [`io::bam`]: index parsing, region queries, slicing
//! - [`error`]: error taxonomy shared by all of the above

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod error;
pub mod io;

// Re-export commonly used types
pub use error::{BamseekError, Result};
pub use io::bam::{BaiIndex, Chunk, RandomAccessManager, Region, RegionReader};
pub use io::bgzf::{PipelineConfig, VirtualOffset};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
