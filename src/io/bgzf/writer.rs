//! Parallel BGZF writer.
//!
//! # Architecture
//!
//! Mirrors the decompression pipeline for writing:
//! 1. Buffer input until a block holds `BGZF_BLOCK_SIZE` bytes
//! 2. Queue full blocks until `PARALLEL_BLOCK_COUNT` are pending
//! 3. Compress the pending blocks in parallel using rayon
//! 4. Write compressed blocks sequentially, in order
//!
//! The slice engine uses [`BgzfWriter::append_raw`] to splice verbatim
//! block ranges between freshly encoded boundary blocks.

use super::block::{compress_block, BGZF_BLOCK_SIZE, BGZF_EOF};
use super::pipeline::PARALLEL_BLOCK_COUNT;
use super::virtual_offset::VirtualOffset;
use crate::error::Result;
use flate2::Compression;
use rayon::prelude::*;
use std::io::{self, Write};

/// Writes data as a sequence of BGZF blocks terminated by the EOF marker.
pub struct BgzfWriter<W: Write> {
    /// Underlying writer for compressed output
    inner: W,
    /// Full blocks waiting to be compressed
    uncompressed_blocks: Vec<Vec<u8>>,
    /// Current uncompressed block being filled
    current_block: Vec<u8>,
    /// Compressed bytes handed to `inner` so far
    compressed_position: u64,
    level: Compression,
    blocks_written: usize,
}

impl<W: Write> BgzfWriter<W> {
    /// Create a writer with the default compression level.
    pub fn new(inner: W) -> Self {
        Self::with_compression(inner, Compression::default())
    }

    /// Create a writer with an explicit compression level.
    pub fn with_compression(inner: W, level: Compression) -> Self {
        Self {
            inner,
            uncompressed_blocks: Vec::with_capacity(PARALLEL_BLOCK_COUNT),
            current_block: Vec::with_capacity(BGZF_BLOCK_SIZE),
            compressed_position: 0,
            level,
            blocks_written: 0,
        }
    }

    /// Virtual offset the next written byte will have.
    ///
    /// Compresses any queued blocks first so the compressed position is known.
    pub fn virtual_position(&mut self) -> Result<VirtualOffset> {
        self.flush_blocks()?;
        Ok(VirtualOffset::new(
            self.compressed_position,
            self.current_block.len() as u16,
        ))
    }

    /// Number of blocks written so far (EOF marker excluded).
    pub fn blocks_written(&self) -> usize {
        self.blocks_written
    }

    /// Close the current block even if it is not full.
    pub fn flush_block(&mut self) -> Result<()> {
        if !self.current_block.is_empty() {
            let block = std::mem::replace(
                &mut self.current_block,
                Vec::with_capacity(BGZF_BLOCK_SIZE),
            );
            self.uncompressed_blocks.push(block);
        }
        self.flush_blocks()
    }

    /// Append bytes that are already complete BGZF blocks.
    ///
    /// Closes the current block first so the raw bytes start on a boundary.
    pub fn append_raw(&mut self, blocks: &[u8]) -> Result<()> {
        self.flush_block()?;
        self.inner.write_all(blocks)?;
        self.compressed_position += blocks.len() as u64;
        Ok(())
    }

    /// Like [`BgzfWriter::append_raw`], streaming from `copy`.
    pub(crate) fn append_raw_with<F>(&mut self, copy: F) -> Result<u64>
    where
        F: FnOnce(&mut W) -> Result<u64>,
    {
        self.flush_block()?;
        let copied = copy(&mut self.inner)?;
        self.compressed_position += copied;
        Ok(copied)
    }

    /// Compress all queued blocks in parallel and write them in order.
    fn flush_blocks(&mut self) -> Result<()> {
        if self.uncompressed_blocks.is_empty() {
            return Ok(());
        }

        let level = self.level;
        let compressed_blocks: Vec<_> = self
            .uncompressed_blocks
            .par_iter()
            .map(|block| compress_block(block, level))
            .collect::<Result<Vec<_>>>()?;

        for block in compressed_blocks {
            self.inner.write_all(&block)?;
            self.compressed_position += block.len() as u64;
            self.blocks_written += 1;
        }

        self.uncompressed_blocks.clear();
        Ok(())
    }

    /// Flush remaining data, write the EOF marker and return the inner writer.
    pub fn finish(mut self) -> Result<W> {
        self.flush_block()?;
        self.inner.write_all(&BGZF_EOF)?;
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write> Write for BgzfWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut remaining = buf;

        while !remaining.is_empty() {
            let space_in_block = BGZF_BLOCK_SIZE - self.current_block.len();
            let to_copy = remaining.len().min(space_in_block);

            self.current_block.extend_from_slice(&remaining[..to_copy]);
            remaining = &remaining[to_copy..];

            if self.current_block.len() >= BGZF_BLOCK_SIZE {
                let block = std::mem::replace(
                    &mut self.current_block,
                    Vec::with_capacity(BGZF_BLOCK_SIZE),
                );
                self.uncompressed_blocks.push(block);

                if self.uncompressed_blocks.len() >= PARALLEL_BLOCK_COUNT {
                    self.flush_blocks()?;
                }
            }
        }

        Ok(buf.len())
    }

    /// Flushes the underlying writer; a partial block stays open.
    fn flush(&mut self) -> io::Result<()> {
        self.flush_blocks()?;
        self.inner.flush()
    }
}
