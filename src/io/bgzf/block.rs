//! BGZF block framing.
//!
//! # Block Structure
//!
//! Each BGZF block is a complete gzip member with a `BC` extra subfield:
//! - Bytes 0-1: Gzip magic (31, 139)
//! - Byte 2: CM=8 (deflate)
//! - Byte 3: FLG with FEXTRA (0x04) set
//! - Bytes 4-9: MTIME, XFL, OS
//! - Bytes 10-11: XLEN (extra field length)
//! - Extra subfields, including BSIZE
//!   - SI1=66 ('B'), SI2=67 ('C')
//!   - SLEN=2
//!   - BSIZE (little-endian u16): total block size - 1
//! - Raw deflate payload
//! - CRC32 and ISIZE (uncompressed size), 4 bytes each
//!
//! A block with ISIZE=0 is the end-of-stream marker.

use crate::error::{BamseekError, Result};
use flate2::read::DeflateDecoder;
use flate2::write::DeflateEncoder;
use flate2::Compression;
use std::io::{self, Read, Seek, SeekFrom, Write};

/// Size of the fixed gzip header that precedes the extra field.
const GZIP_FIXED_HEADER_SIZE: usize = 12;

/// Size of a standard BGZF block header (XLEN=6).
pub const BGZF_HEADER_SIZE: usize = 18;

/// Size of the BGZF block footer (CRC32 + ISIZE).
pub const BGZF_FOOTER_SIZE: usize = 8;

/// Upper bound on both the compressed and the uncompressed size of a block.
pub const MAX_BLOCK_SIZE: usize = 64 * 1024;

/// Uncompressed bytes packed into each block this crate writes.
///
/// Kept below `MAX_BLOCK_SIZE` so that incompressible data still fits the
/// 16-bit BSIZE field after deflate overhead.
pub const BGZF_BLOCK_SIZE: usize = 60 * 1024;

/// BGZF EOF marker block (empty block signaling end of file).
pub const BGZF_EOF: [u8; 28] = [
    31, 139, 8, 4, 0, 0, 0, 0, 0, 255, // Header
    6, 0, 66, 67, 2, 0, 27, 0, // Extra field with BSIZE=27
    3, 0, // Empty deflate block
    0, 0, 0, 0, // CRC32
    0, 0, 0, 0, // ISIZE=0
];

/// Location and sizes of one block in the archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockDescriptor {
    /// Compressed file offset of the first header byte
    pub file_offset: u64,
    /// Total block size on disk (header + payload + footer)
    pub compressed_size: u32,
    /// ISIZE from the footer
    pub uncompressed_size: u32,
}

impl BlockDescriptor {
    /// File offset of the byte following this block.
    pub fn end_offset(&self) -> u64 {
        self.file_offset + u64::from(self.compressed_size)
    }

    /// Whether this is the empty terminal block.
    pub fn is_eof(&self) -> bool {
        self.uncompressed_size == 0
    }
}

/// A block read from the archive, still compressed.
#[derive(Debug, Clone)]
pub struct RawBlock {
    /// Where the block sits and how big it is
    pub descriptor: BlockDescriptor,
    /// Complete block bytes: header + compressed data + footer
    pub data: Vec<u8>,
    payload_start: usize,
}

impl RawBlock {
    /// Compressed deflate payload between header and footer.
    pub fn payload(&self) -> &[u8] {
        &self.data[self.payload_start..self.data.len() - BGZF_FOOTER_SIZE]
    }

    /// CRC32 recorded in the footer.
    pub fn crc32(&self) -> u32 {
        let len = self.data.len();
        u32::from_le_bytes([
            self.data[len - 8],
            self.data[len - 7],
            self.data[len - 6],
            self.data[len - 5],
        ])
    }
}

/// Reads one block at a time from a byte source, tracking the file offset.
pub struct BlockReader<R> {
    inner: R,
    position: u64,
}

impl<R> BlockReader<R> {
    /// Wrap a reader positioned at the start of the archive.
    pub fn new(inner: R) -> Self {
        Self { inner, position: 0 }
    }

    /// Compressed file offset of the next block header.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Get a mutable reference to the underlying reader.
    pub fn get_mut(&mut self) -> &mut R {
        &mut self.inner
    }

    /// Unwrap the underlying reader.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read> BlockReader<R> {
    /// Read the next block.
    ///
    /// Returns `Ok(None)` when the source is exhausted exactly at a block
    /// boundary. The EOF marker is returned like any other block; callers
    /// check [`BlockDescriptor::is_eof`].
    ///
    /// # Errors
    ///
    /// - `CorruptBlock` on bad magic, missing `BC` subfield or an
    ///   inconsistent BSIZE
    /// - `TruncatedInput` if the source ends inside a block
    pub fn read_block(&mut self) -> Result<Option<RawBlock>> {
        let offset = self.position;

        let mut header = [0u8; GZIP_FIXED_HEADER_SIZE];
        let n = read_full(&mut self.inner, &mut header)?;
        if n == 0 {
            return Ok(None);
        }
        if n < header.len() {
            return Err(BamseekError::TruncatedInput {
                offset,
                expected: BGZF_HEADER_SIZE,
                available: n,
            });
        }

        // Check gzip magic
        if header[0] != 31 || header[1] != 139 {
            return Err(corrupt(
                offset,
                format!("invalid gzip magic [{}, {}]", header[0], header[1]),
            ));
        }
        if header[2] != 8 {
            return Err(corrupt(
                offset,
                format!("unsupported compression method {}", header[2]),
            ));
        }
        if header[3] & 0x04 == 0 {
            return Err(corrupt(offset, "missing FEXTRA flag (plain gzip, not BGZF)"));
        }

        let xlen = u16::from_le_bytes([header[10], header[11]]) as usize;
        let mut extra = vec![0u8; xlen];
        let n = read_full(&mut self.inner, &mut extra)?;
        if n < xlen {
            return Err(BamseekError::TruncatedInput {
                offset,
                expected: GZIP_FIXED_HEADER_SIZE + xlen,
                available: GZIP_FIXED_HEADER_SIZE + n,
            });
        }

        let block_size = match find_bsize(&extra) {
            Some(bsize) => bsize as usize + 1,
            None => return Err(corrupt(offset, "missing BC subfield")),
        };

        let payload_start = GZIP_FIXED_HEADER_SIZE + xlen;
        if block_size < payload_start + BGZF_FOOTER_SIZE {
            return Err(corrupt(
                offset,
                format!("block size {block_size} smaller than its own header"),
            ));
        }

        let mut data = Vec::with_capacity(block_size);
        data.extend_from_slice(&header);
        data.extend_from_slice(&extra);
        data.resize(block_size, 0);
        let n = read_full(&mut self.inner, &mut data[payload_start..])?;
        if payload_start + n < block_size {
            return Err(BamseekError::TruncatedInput {
                offset,
                expected: block_size,
                available: payload_start + n,
            });
        }

        let isize = u32::from_le_bytes([
            data[block_size - 4],
            data[block_size - 3],
            data[block_size - 2],
            data[block_size - 1],
        ]);
        if isize as usize > MAX_BLOCK_SIZE {
            return Err(corrupt(
                offset,
                format!("ISIZE {isize} exceeds the {MAX_BLOCK_SIZE}-byte block limit"),
            ));
        }

        self.position += block_size as u64;

        Ok(Some(RawBlock {
            descriptor: BlockDescriptor {
                file_offset: offset,
                compressed_size: block_size as u32,
                uncompressed_size: isize,
            },
            data,
            payload_start,
        }))
    }

    /// Copy `len` bytes verbatim from the current position into `out`.
    ///
    /// Used for block ranges that need no re-framing.
    pub fn copy_raw<W: Write + ?Sized>(&mut self, len: u64, out: &mut W) -> Result<()> {
        let offset = self.position;
        let copied = io::copy(&mut (&mut self.inner).take(len), out)?;
        self.position += copied;
        if copied < len {
            return Err(BamseekError::TruncatedInput {
                offset,
                expected: len as usize,
                available: copied as usize,
            });
        }
        Ok(())
    }
}

impl<R: Seek> BlockReader<R> {
    /// Position the reader at a block boundary.
    ///
    /// # Errors
    ///
    /// Returns `Seek` if the underlying medium cannot seek there.
    pub fn seek(&mut self, coffset: u64) -> Result<()> {
        tracing::trace!(coffset, "seeking BGZF stream");
        self.inner
            .seek(SeekFrom::Start(coffset))
            .map_err(|source| BamseekError::Seek {
                offset: coffset,
                source,
            })?;
        self.position = coffset;
        Ok(())
    }
}

/// Decompress a single block and verify its footer.
///
/// # Errors
///
/// Returns `CorruptBlock` if the deflate stream is invalid or the CRC32 /
/// ISIZE of the output disagree with the footer.
pub fn decompress_block(block: &RawBlock) -> Result<Vec<u8>> {
    let offset = block.descriptor.file_offset;
    let expected = block.descriptor.uncompressed_size as usize;

    let mut decompressed = Vec::with_capacity(expected);
    DeflateDecoder::new(block.payload())
        .take(MAX_BLOCK_SIZE as u64 + 1)
        .read_to_end(&mut decompressed)
        .map_err(|e| corrupt(offset, format!("deflate error: {e}")))?;

    if decompressed.len() != expected {
        return Err(corrupt(
            offset,
            format!(
                "ISIZE mismatch: footer says {expected}, payload inflates to {}",
                decompressed.len()
            ),
        ));
    }

    let crc = crc32fast::hash(&decompressed);
    if crc != block.crc32() {
        return Err(corrupt(
            offset,
            format!("CRC32 mismatch: footer {:#010x}, computed {crc:#010x}", block.crc32()),
        ));
    }

    Ok(decompressed)
}

/// Compress up to `BGZF_BLOCK_SIZE` bytes into one BGZF block.
///
/// # BGZF Block Structure
///
/// Standard gzip header (10 bytes):
/// - ID1=31, ID2=139, CM=8, FLG=4 (FEXTRA)
/// - MTIME=0, XFL=0, OS=255
///
/// Extra field (8 bytes): XLEN=6, SI1='B', SI2='C', SLEN=2, BSIZE
///
/// Compressed data + CRC32 + ISIZE
pub fn compress_block(data: &[u8], level: Compression) -> Result<Vec<u8>> {
    if data.len() > BGZF_BLOCK_SIZE {
        return Err(BamseekError::InvalidRange(format!(
            "{} bytes do not fit one BGZF block (limit {BGZF_BLOCK_SIZE})",
            data.len()
        )));
    }

    let mut deflate = DeflateEncoder::new(Vec::new(), level);
    deflate.write_all(data)?;
    let deflated = deflate.finish()?;

    let total_size = BGZF_HEADER_SIZE + deflated.len() + BGZF_FOOTER_SIZE;
    let mut block = Vec::with_capacity(total_size);

    // Header
    block.extend_from_slice(&[31, 139, 8, 4, 0, 0, 0, 0, 0, 255]);

    // Extra field
    block.extend_from_slice(&6u16.to_le_bytes());
    block.push(66);
    block.push(67);
    block.extend_from_slice(&2u16.to_le_bytes());
    block.extend_from_slice(&((total_size - 1) as u16).to_le_bytes());

    block.extend_from_slice(&deflated);

    block.extend_from_slice(&crc32fast::hash(data).to_le_bytes());
    block.extend_from_slice(&(data.len() as u32).to_le_bytes());

    Ok(block)
}

/// Locate the BSIZE value inside the gzip extra field.
fn find_bsize(extra: &[u8]) -> Option<u16> {
    let mut pos = 0;
    while pos + 4 <= extra.len() {
        let si1 = extra[pos];
        let si2 = extra[pos + 1];
        let slen = u16::from_le_bytes([extra[pos + 2], extra[pos + 3]]) as usize;

        if si1 == 66 && si2 == 67 && slen == 2 {
            if pos + 6 > extra.len() {
                return None;
            }
            return Some(u16::from_le_bytes([extra[pos + 4], extra[pos + 5]]));
        }

        pos += 4 + slen;
    }
    None
}

/// Read until `buf` is full or the source is exhausted.
fn read_full<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn corrupt(offset: u64, reason: impl Into<String>) -> BamseekError {
    BamseekError::CorruptBlock {
        offset,
        reason: reason.into(),
    }
}
