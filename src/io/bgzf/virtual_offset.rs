//! BGZF virtual file offsets.
//!
//! A 64-bit value combining:
//! - Bits 63-16: Compressed file offset (byte position of a block in the archive)
//! - Bits 15-0: Uncompressed offset within that block's decompressed payload
//!
//! The packed integer orders exactly like `(coffset, uoffset)`, so the derived
//! `Ord` on the raw value is the address order of the stream.

use crate::error::{BamseekError, Result};
use std::fmt;

/// Largest compressed offset that fits in the high 48 bits.
pub const MAX_COFFSET: u64 = (1 << 48) - 1;

/// Largest intra-block offset that fits in the low 16 bits.
pub const MAX_UOFFSET: u32 = u16::MAX as u32;

/// Virtual file offset in BGZF format.
///
/// # Example
///
/// ```
/// # use bamseek::io::bgzf::VirtualOffset;
/// let offset = VirtualOffset::new(1024, 512);
/// assert_eq!(offset.coffset(), 1024);
/// assert_eq!(offset.uoffset(), 512);
/// assert_eq!(VirtualOffset::from_raw(offset.to_raw()), offset);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct VirtualOffset(u64);

impl VirtualOffset {
    /// Start of the archive.
    pub const ZERO: VirtualOffset = VirtualOffset(0);

    /// Create a virtual offset from its parts.
    ///
    /// `coffset` is masked to 48 bits; use [`VirtualOffset::pack`] when the
    /// inputs come from untrusted arithmetic.
    pub const fn new(coffset: u64, uoffset: u16) -> Self {
        VirtualOffset(((coffset & MAX_COFFSET) << 16) | uoffset as u64)
    }

    /// Create a virtual offset, rejecting parts that do not fit.
    ///
    /// # Errors
    ///
    /// Returns `InvalidOffset` if `uoffset` exceeds the 16-bit intra-block
    /// limit or `coffset` exceeds 48 bits.
    pub fn pack(coffset: u64, uoffset: u32) -> Result<Self> {
        if uoffset > MAX_UOFFSET || coffset > MAX_COFFSET {
            return Err(BamseekError::InvalidOffset {
                raw: coffset.wrapping_shl(16) | u64::from(uoffset & MAX_UOFFSET),
                coffset,
                uoffset: u64::from(uoffset),
                reason: "component does not fit the 48/16-bit layout".to_string(),
            });
        }
        Ok(Self::new(coffset, uoffset as u16))
    }

    /// Create from raw 64-bit value.
    pub const fn from_raw(value: u64) -> Self {
        VirtualOffset(value)
    }

    /// Get raw 64-bit value.
    pub const fn to_raw(self) -> u64 {
        self.0
    }

    /// Compressed file offset of the block (high 48 bits).
    pub const fn coffset(self) -> u64 {
        self.0 >> 16
    }

    /// Offset within the decompressed block (low 16 bits).
    pub const fn uoffset(self) -> u16 {
        (self.0 & 0xFFFF) as u16
    }

    /// Build an `InvalidOffset` error that carries this address.
    pub(crate) fn invalid(self, reason: impl Into<String>) -> BamseekError {
        BamseekError::InvalidOffset {
            raw: self.0,
            coffset: self.coffset(),
            uoffset: u64::from(self.uoffset()),
            reason: reason.into(),
        }
    }
}

impl From<u64> for VirtualOffset {
    fn from(value: u64) -> Self {
        VirtualOffset::from_raw(value)
    }
}

impl From<VirtualOffset> for u64 {
    fn from(offset: VirtualOffset) -> Self {
        offset.to_raw()
    }
}

impl fmt::Display for VirtualOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.coffset(), self.uoffset())
    }
}
