//! Region extraction into a new archive.
//!
//! Only the boundary blocks of the resolved range are decompressed and
//! re-encoded; every block fully inside it is copied byte-for-byte. The
//! output always ends with the EOF marker, so it is a complete archive on
//! its own.

use super::index::Chunk;
use crate::error::Result;
use crate::io::bgzf::{decompress_block, BgzfWriter, BlockReader, RawBlock, VirtualOffset};
use flate2::Compression;
use std::io::{Read, Seek, Write};

/// How a slice is written.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceOptions {
    /// End of the archive header; `[0, header_end)` is copied ahead of the region
    pub header_end: Option<VirtualOffset>,
    /// Level used for re-encoded boundary blocks
    pub compression: Compression,
}

impl Default for SliceOptions {
    fn default() -> Self {
        Self {
            header_end: None,
            compression: Compression::default(),
        }
    }
}

impl SliceOptions {
    /// Copy the header that ends at `header_end` into every slice.
    pub fn with_header_end(mut self, header_end: VirtualOffset) -> Self {
        self.header_end = Some(header_end);
        self
    }
}

/// What a slice did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SliceSummary {
    /// Boundary blocks decompressed and written as new blocks
    pub blocks_reencoded: usize,
    /// Compressed bytes copied verbatim
    pub bytes_copied: u64,
    /// Chunks covered by the slice
    pub chunks: usize,
}

/// Write the bytes covered by `chunks` to `out` as a new archive.
///
/// The range from the first chunk's begin to the last chunk's end is
/// extracted as one span, so gaps between chunks are carried along and left
/// to downstream record filtering.
///
/// # Errors
///
/// - `InvalidOffset` if a boundary `uoffset` exceeds its block
/// - `CorruptBlock`/`TruncatedInput` from reading the source
pub fn slice<R, W>(
    reader: R,
    chunks: &[Chunk],
    out: W,
    options: &SliceOptions,
) -> Result<SliceSummary>
where
    R: Read + Seek,
    W: Write,
{
    let mut source = BlockReader::new(reader);
    let mut writer = BgzfWriter::with_compression(out, options.compression);
    let mut summary = SliceSummary::default();

    let live: Vec<&Chunk> = chunks.iter().filter(|c| !c.is_empty()).collect();

    if let Some(header_end) = options.header_end {
        copy_range(
            &mut source,
            &mut writer,
            VirtualOffset::ZERO,
            header_end,
            &mut summary,
        )?;
    }

    if let (Some(first), Some(last)) = (live.first(), live.last()) {
        let begin = match options.header_end {
            Some(header_end) => first.begin.max(header_end),
            None => first.begin,
        };
        copy_range(&mut source, &mut writer, begin, last.end, &mut summary)?;
        summary.chunks = live.len();
    }

    writer.finish()?;
    tracing::debug!(
        chunks = summary.chunks,
        blocks_reencoded = summary.blocks_reencoded,
        bytes_copied = summary.bytes_copied,
        "slice written"
    );
    Ok(summary)
}

/// Copy the decompressed range `[begin, end)` into `writer`.
fn copy_range<R, W>(
    source: &mut BlockReader<R>,
    writer: &mut BgzfWriter<W>,
    begin: VirtualOffset,
    end: VirtualOffset,
    summary: &mut SliceSummary,
) -> Result<()>
where
    R: Read + Seek,
    W: Write,
{
    if begin >= end {
        return Ok(());
    }

    source.seek(begin.coffset())?;
    let leading = read_block_at(source, begin)?;
    let start = usize::from(begin.uoffset());

    if leading.descriptor.file_offset == end.coffset() {
        let data = decompress_block(&leading)?;
        check_within(begin, data.len())?;
        check_within(end, data.len())?;
        reencode(writer, &data[start..usize::from(end.uoffset())], summary)?;
        return Ok(());
    }

    if start == 0 {
        writer.append_raw(&leading.data)?;
        summary.bytes_copied += leading.data.len() as u64;
    } else {
        let data = decompress_block(&leading)?;
        check_within(begin, data.len())?;
        reencode(writer, &data[start..], summary)?;
    }

    // Blocks strictly between the boundaries
    let interior = end.coffset().saturating_sub(leading.descriptor.end_offset());
    if interior > 0 {
        let copied =
            writer.append_raw_with(|out| source.copy_raw(interior, out).map(|()| interior))?;
        summary.bytes_copied += copied;
    }

    if end.uoffset() > 0 {
        let trailing = read_block_at(source, end)?;
        let data = decompress_block(&trailing)?;
        check_within(end, data.len())?;
        reencode(writer, &data[..usize::from(end.uoffset())], summary)?;
    }
    Ok(())
}

/// Read the block `offset` points into; the reader must already sit there.
fn read_block_at<R: Read>(source: &mut BlockReader<R>, offset: VirtualOffset) -> Result<RawBlock> {
    match source.read_block()? {
        Some(block) if block.descriptor.file_offset == offset.coffset() => Ok(block),
        Some(block) => Err(offset.invalid(format!(
            "expected a block at file offset {}, found one at {}",
            offset.coffset(),
            block.descriptor.file_offset
        ))),
        None => Err(offset.invalid("no block at this file offset")),
    }
}

fn check_within(offset: VirtualOffset, block_len: usize) -> Result<()> {
    if usize::from(offset.uoffset()) > block_len {
        return Err(offset.invalid(format!(
            "block holds {block_len} decompressed bytes"
        )));
    }
    Ok(())
}

fn reencode<W: Write>(
    writer: &mut BgzfWriter<W>,
    bytes: &[u8],
    summary: &mut SliceSummary,
) -> Result<()> {
    if bytes.is_empty() {
        return Ok(());
    }
    writer.write_all(bytes)?;
    writer.flush_block()?;
    summary.blocks_reencoded += 1;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::bgzf::{BlockStream, BGZF_EOF};
    use std::io::Cursor;

    /// Four blocks of 50 bytes: "0000...", "1111...", "2222...", "3333...".
    fn archive() -> (Vec<u8>, Vec<VirtualOffset>) {
        let mut writer = BgzfWriter::new(Vec::new());
        let mut starts = Vec::new();
        for fill in b'0'..=b'3' {
            starts.push(writer.virtual_position().unwrap());
            writer.write_all(&[fill; 50]).unwrap();
            writer.flush_block().unwrap();
        }
        starts.push(writer.virtual_position().unwrap());
        (writer.finish().unwrap(), starts)
    }

    fn decompress_all(archive: Vec<u8>) -> Vec<u8> {
        BlockStream::sequential(BlockReader::new(Cursor::new(archive)))
            .flat_map(|block| block.unwrap().data)
            .collect()
    }

    #[test]
    fn test_boundary_blocks_reencoded_interior_copied() {
        let (source, starts) = archive();
        let chunk = Chunk::new(
            VirtualOffset::new(starts[0].coffset(), 45),
            VirtualOffset::new(starts[3].coffset(), 5),
        );

        let mut out = Vec::new();
        let summary = slice(
            Cursor::new(source.clone()),
            &[chunk],
            &mut out,
            &SliceOptions::default(),
        )
        .unwrap();

        assert_eq!(summary.blocks_reencoded, 2);
        assert_eq!(summary.bytes_copied, starts[3].coffset() - starts[1].coffset());
        assert!(out.ends_with(&BGZF_EOF));

        // Interior blocks appear verbatim
        let interior = &source[starts[1].coffset() as usize..starts[3].coffset() as usize];
        assert!(out.windows(interior.len()).any(|w| w == interior));

        let mut expected = vec![b'0'; 5];
        expected.extend([b'1'; 50]);
        expected.extend([b'2'; 50]);
        expected.extend([b'3'; 5]);
        assert_eq!(decompress_all(out), expected);
    }

    #[test]
    fn test_aligned_range_needs_no_reencoding() {
        let (source, starts) = archive();
        let chunk = Chunk::new(starts[1], starts[3]);

        let mut out = Vec::new();
        let summary = slice(
            Cursor::new(source.clone()),
            &[chunk],
            &mut out,
            &SliceOptions::default(),
        )
        .unwrap();

        assert_eq!(summary.blocks_reencoded, 0);
        let verbatim = &source[starts[1].coffset() as usize..starts[3].coffset() as usize];
        assert_eq!(&out[..verbatim.len()], verbatim);
    }

    #[test]
    fn test_range_inside_one_block() {
        let (source, starts) = archive();
        let c = starts[2].coffset();
        let chunk = Chunk::new(VirtualOffset::new(c, 10), VirtualOffset::new(c, 20));

        let mut out = Vec::new();
        let summary =
            slice(Cursor::new(source), &[chunk], &mut out, &SliceOptions::default()).unwrap();

        assert_eq!(summary.blocks_reencoded, 1);
        assert_eq!(summary.bytes_copied, 0);
        assert_eq!(decompress_all(out), vec![b'2'; 10]);
    }

    #[test]
    fn test_header_is_prepended() {
        let (source, starts) = archive();
        let options = SliceOptions::default().with_header_end(starts[1]);
        let chunk = Chunk::new(
            VirtualOffset::new(starts[2].coffset(), 48),
            VirtualOffset::new(starts[2].coffset(), 50),
        );

        let mut out = Vec::new();
        slice(Cursor::new(source), &[chunk], &mut out, &options).unwrap();

        let mut expected = vec![b'0'; 50];
        expected.extend(b"22");
        assert_eq!(decompress_all(out), expected);
    }

    #[test]
    fn test_no_chunks_writes_only_eof() {
        let (source, _) = archive();
        let mut out = Vec::new();
        let summary = slice(Cursor::new(source), &[], &mut out, &SliceOptions::default()).unwrap();
        assert_eq!(summary, SliceSummary::default());
        assert_eq!(out, BGZF_EOF);
    }

    #[test]
    fn test_out_of_range_uoffset_is_rejected() {
        let (source, starts) = archive();
        let chunk = Chunk::new(
            VirtualOffset::new(starts[1].coffset(), 60),
            VirtualOffset::new(starts[2].coffset(), 0),
        );
        let err = slice(Cursor::new(source), &[chunk], Vec::new(), &SliceOptions::default())
            .unwrap_err();
        assert!(matches!(err, crate::BamseekError::InvalidOffset { uoffset: 60, .. }));
    }

    #[test]
    fn test_offset_between_blocks_is_rejected() {
        let (source, starts) = archive();
        let chunk = Chunk::new(
            VirtualOffset::new(starts[1].coffset() + 3, 0),
            starts[3],
        );
        let err = slice(Cursor::new(source), &[chunk], Vec::new(), &SliceOptions::default())
            .unwrap_err();
        assert!(matches!(
            err,
            crate::BamseekError::InvalidOffset { .. }
                | crate::BamseekError::CorruptBlock { .. }
                | crate::BamseekError::TruncatedInput { .. }
        ));
    }
}
