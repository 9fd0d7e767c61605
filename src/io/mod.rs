//! I/O module: block-compressed archives, indexed access and file plumbing.

pub mod bam;
pub mod bgzf;
mod sink;
mod source;

pub use sink::DataSink;
pub use source::{ArchiveRead, DataSource, MMAP_THRESHOLD};
