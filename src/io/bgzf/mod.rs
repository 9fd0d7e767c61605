//! BGZF (Blocked GNU Zip Format) container.
//!
//! Bgzip files consist of independent compressed blocks, each decompressing
//! to at most 64 KB. A [`VirtualOffset`] names any byte of the decompressed
//! stream as (block file offset, offset inside the block), which is what
//! makes indexed random access possible.
//!
//! - [`block`]: framing, single-block inflate/deflate, EOF marker
//! - [`pipeline`]: sequential and bounded-parallel block streams
//! - [`writer`]: parallel block writer
//! - [`virtual_offset`]: 48/16-bit virtual addresses

pub mod block;
pub mod pipeline;
pub mod virtual_offset;
pub mod writer;

pub use block::{
    compress_block, decompress_block, BlockDescriptor, BlockReader, RawBlock, BGZF_BLOCK_SIZE,
    BGZF_EOF, MAX_BLOCK_SIZE,
};
pub use pipeline::{
    BlockStream, DecompressedBlock, DecompressionMode, PipelineConfig, PARALLEL_BLOCK_COUNT,
};
pub use virtual_offset::VirtualOffset;
pub use writer::BgzfWriter;
