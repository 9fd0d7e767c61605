//! Error types for bamseek

use std::io;
use thiserror::Error;

/// Result type alias for bamseek operations
pub type Result<T> = std::result::Result<T, BamseekError>;

/// Error types that can occur while reading, querying or slicing an archive
#[derive(Debug, Error)]
pub enum BamseekError {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Block framing cannot be trusted (bad magic, bad checksum, bad deflate stream)
    #[error("Corrupt BGZF block at file offset {offset}: {reason}")]
    CorruptBlock {
        /// Compressed file offset of the block
        offset: u64,
        /// What was wrong with it
        reason: String,
    },

    /// Fewer bytes available than a block header declared
    #[error("Truncated input at file offset {offset}: expected {expected} bytes, got {available}")]
    TruncatedInput {
        /// Compressed file offset of the block
        offset: u64,
        /// Bytes the header declared
        expected: usize,
        /// Bytes actually available
        available: usize,
    },

    /// Virtual offset inconsistent with the archive (index/archive mismatch)
    #[error("Invalid virtual offset {raw:#x} (coffset={coffset}, uoffset={uoffset}): {reason}")]
    InvalidOffset {
        /// Packed 64-bit value
        raw: u64,
        /// Compressed block offset
        coffset: u64,
        /// Offset within the uncompressed block
        uoffset: u64,
        /// Why the offset was rejected
        reason: String,
    },

    /// Query names a reference id outside the index
    #[error("Unknown reference id {ref_id} (index has {reference_count} references)")]
    UnknownReference {
        /// Requested reference id
        ref_id: usize,
        /// References present in the index
        reference_count: usize,
    },

    /// Underlying medium refused to seek
    #[error("Cannot seek to file offset {offset}: {source}")]
    Seek {
        /// Requested compressed file offset
        offset: u64,
        /// Error reported by the medium
        #[source]
        source: io::Error,
    },

    /// Malformed index file
    #[error("Invalid index: {msg}")]
    InvalidIndex {
        /// Error message
        msg: String,
    },

    /// Invalid range or region
    #[error("Invalid range: {0}")]
    InvalidRange(String),
}

impl BamseekError {
    /// Recover a `BamseekError` that was tunnelled through `std::io::Error`
    /// by one of the `Read` implementations in this crate.
    pub fn from_io(err: io::Error) -> Self {
        let ours = err
            .get_ref()
            .map_or(false, |inner| inner.is::<BamseekError>());
        if !ours {
            return BamseekError::Io(err);
        }

        let kind = err.kind();
        match err.into_inner().map(|inner| inner.downcast::<BamseekError>()) {
            Some(Ok(inner)) => *inner,
            Some(Err(other)) => BamseekError::Io(io::Error::new(kind, other)),
            None => BamseekError::Io(io::Error::from(kind)),
        }
    }
}

impl From<BamseekError> for io::Error {
    fn from(err: BamseekError) -> Self {
        match err {
            BamseekError::Io(inner) => inner,
            BamseekError::TruncatedInput { .. } => io::Error::new(io::ErrorKind::UnexpectedEof, err),
            other => io::Error::new(io::ErrorKind::InvalidData, other),
        }
    }
}
