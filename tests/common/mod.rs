//! Shared fixtures: a toy coordinate-sorted archive and a matching index.
//!
//! Records are 16 bytes: ref_id, begin, end, serial (all little-endian u32).
//! They stand in for BAM records, which this crate never parses.

#![allow(dead_code)]

use bamseek::io::bam::{region_to_bin, BaiIndex, Bin, Chunk, ReferenceIndex, ReferenceMetadata};
use bamseek::io::bgzf::{BgzfWriter, BlockReader, BlockStream};
use bamseek::VirtualOffset;
use std::collections::BTreeMap;
use std::io::{self, Cursor, Read, Seek, SeekFrom, Write};
use std::sync::{Arc, Mutex};

pub const RECORD_SIZE: usize = 16;
pub const HEADER: &[u8] = b"TOY\x01header-text";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToyRecord {
    pub ref_id: u32,
    pub begin: u32,
    pub end: u32,
    pub serial: u32,
}

impl ToyRecord {
    pub fn new(ref_id: u32, begin: u32, end: u32, serial: u32) -> Self {
        Self {
            ref_id,
            begin,
            end,
            serial,
        }
    }

    pub fn overlaps(&self, ref_id: u32, begin: u32, end: u32) -> bool {
        self.ref_id == ref_id && self.begin < end && begin < self.end
    }

    fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut out = [0u8; RECORD_SIZE];
        out[0..4].copy_from_slice(&self.ref_id.to_le_bytes());
        out[4..8].copy_from_slice(&self.begin.to_le_bytes());
        out[8..12].copy_from_slice(&self.end.to_le_bytes());
        out[12..16].copy_from_slice(&self.serial.to_le_bytes());
        out
    }
}

pub fn parse_records(bytes: &[u8]) -> Vec<ToyRecord> {
    assert_eq!(bytes.len() % RECORD_SIZE, 0, "stream ends mid-record");
    bytes
        .chunks_exact(RECORD_SIZE)
        .map(|raw| {
            let field = |i: usize| u32::from_le_bytes(raw[i..i + 4].try_into().unwrap());
            ToyRecord::new(field(0), field(4), field(8), field(12))
        })
        .collect()
}

pub struct Fixture {
    pub archive: Vec<u8>,
    pub index: BaiIndex,
    pub records: Vec<ToyRecord>,
    /// Virtual offset right after the header
    pub header_end: VirtualOffset,
}

impl Fixture {
    /// Records overlapping the region, by brute force.
    pub fn expected(&self, ref_id: u32, begin: u32, end: u32) -> Vec<ToyRecord> {
        self.records
            .iter()
            .copied()
            .filter(|r| r.overlaps(ref_id, begin, end))
            .collect()
    }

    pub fn index_bytes(&self) -> Vec<u8> {
        encode_index(&self.index)
    }
}

/// Write `records` (sorted by reference then begin), closing a block every
/// `records_per_block` records, and index them the way an indexer would.
pub fn build_fixture(records: &[ToyRecord], records_per_block: usize, n_ref: usize) -> Fixture {
    let mut writer = BgzfWriter::new(Vec::new());
    writer.write_all(HEADER).unwrap();
    writer.flush_block().unwrap();
    let header_end = writer.virtual_position().unwrap();

    let mut placed = Vec::with_capacity(records.len());
    for (i, record) in records.iter().enumerate() {
        let begin = writer.virtual_position().unwrap();
        writer.write_all(&record.encode()).unwrap();
        let end = writer.virtual_position().unwrap();
        placed.push((*record, Chunk::new(begin, end)));
        if (i + 1) % records_per_block == 0 {
            writer.flush_block().unwrap();
        }
    }
    let archive = writer.finish().unwrap();

    let mut index = BaiIndex::new((0..n_ref).map(|id| index_reference(&placed, id)).collect());
    index.n_no_coor = Some(0);

    Fixture {
        archive,
        index,
        records: records.to_vec(),
        header_end,
    }
}

fn index_reference(placed: &[(ToyRecord, Chunk)], ref_id: usize) -> ReferenceIndex {
    let mut bins: BTreeMap<u32, Vec<Chunk>> = BTreeMap::new();
    let mut windows: Vec<Option<VirtualOffset>> = Vec::new();
    let mut span: Option<Chunk> = None;
    let mut mapped = 0;

    for (record, chunk) in placed.iter().filter(|(r, _)| r.ref_id as usize == ref_id) {
        let chunks = bins.entry(region_to_bin(record.begin, record.end)).or_default();
        match chunks.last_mut() {
            Some(last) if last.end == chunk.begin => last.end = chunk.end,
            _ => chunks.push(*chunk),
        }

        let first_window = (record.begin >> 14) as usize;
        let last_window = ((record.end.max(record.begin + 1) - 1) >> 14) as usize;
        if windows.len() <= last_window {
            windows.resize(last_window + 1, None);
        }
        for window in &mut windows[first_window..=last_window] {
            window.get_or_insert(chunk.begin);
        }

        span = Some(match span {
            Some(s) => Chunk::new(s.begin, chunk.end),
            None => *chunk,
        });
        mapped += 1;
    }

    let mut previous = VirtualOffset::ZERO;
    let linear_index = windows
        .into_iter()
        .map(|w| {
            if let Some(offset) = w {
                previous = offset;
            }
            previous
        })
        .collect();

    let mut reference = ReferenceIndex::new(
        bins.into_iter().map(|(id, chunks)| Bin::new(id, chunks)).collect(),
        linear_index,
    );
    reference.metadata = span.map(|s| ReferenceMetadata {
        first_offset: s.begin,
        last_offset: s.end,
        mapped,
        unmapped: 0,
    });
    reference
}

/// Serialize an index in the on-disk BAI layout.
pub fn encode_index(index: &BaiIndex) -> Vec<u8> {
    let mut out = b"BAI\x01".to_vec();
    out.extend((index.references.len() as u32).to_le_bytes());
    for reference in &index.references {
        let n_bin = reference.bins.len() + usize::from(reference.metadata.is_some());
        out.extend((n_bin as u32).to_le_bytes());
        for bin in &reference.bins {
            out.extend(bin.id.to_le_bytes());
            out.extend((bin.chunks.len() as u32).to_le_bytes());
            for chunk in &bin.chunks {
                out.extend(chunk.begin.to_raw().to_le_bytes());
                out.extend(chunk.end.to_raw().to_le_bytes());
            }
        }
        if let Some(meta) = reference.metadata {
            out.extend(37450u32.to_le_bytes());
            out.extend(2u32.to_le_bytes());
            out.extend(meta.first_offset.to_raw().to_le_bytes());
            out.extend(meta.last_offset.to_raw().to_le_bytes());
            out.extend(meta.mapped.to_le_bytes());
            out.extend(meta.unmapped.to_le_bytes());
        }
        out.extend((reference.linear_index.len() as u32).to_le_bytes());
        for offset in &reference.linear_index {
            out.extend(offset.to_raw().to_le_bytes());
        }
    }
    if let Some(n) = index.n_no_coor {
        out.extend(n.to_le_bytes());
    }
    out
}

/// Decompress a whole archive.
pub fn decompress_all(archive: &[u8]) -> Vec<u8> {
    BlockStream::sequential(BlockReader::new(Cursor::new(archive)))
        .flat_map(|block| block.unwrap().data)
        .collect()
}

/// A reader that logs every absolute seek.
pub struct SeekRecorder<R> {
    inner: R,
    pub seeks: Arc<Mutex<Vec<u64>>>,
}

impl<R> SeekRecorder<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            seeks: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<R: Read> Read for SeekRecorder<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

impl<R: Seek> Seek for SeekRecorder<R> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let landed = self.inner.seek(pos)?;
        if let SeekFrom::Start(offset) = pos {
            self.seeks.lock().unwrap().push(offset);
        }
        Ok(landed)
    }
}

/// A medium that cannot seek.
pub struct Unseekable<R>(pub R);

impl<R: Read> Read for Unseekable<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl<R> Seek for Unseekable<R> {
    fn seek(&mut self, _pos: SeekFrom) -> io::Result<u64> {
        Err(io::Error::new(io::ErrorKind::Unsupported, "pipe"))
    }
}
