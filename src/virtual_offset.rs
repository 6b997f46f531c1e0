//! BGZF virtual file offsets.
//!
//! A virtual offset packs the byte position of a compressed block in the
//! upper 48 bits and the position inside the decompressed block in the lower
//! 16 bits, so the natural `u64` order is also the file order.

use noodles::bgzf;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(
    Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct VirtualOffset(u64);

impl VirtualOffset {
    /// Largest compressed block position that fits in 48 bits
    pub const MAX_COMPRESSED: u64 = (1 << 48) - 1;

    pub const MIN: VirtualOffset = VirtualOffset(0);
    pub const MAX: VirtualOffset = VirtualOffset(u64::MAX);

    const UNCOMPRESSED_BITS: u32 = 16;
    const UNCOMPRESSED_MASK: u64 = 0xffff;

    /// Build an offset from its parts. Returns `None` if the block position
    /// does not fit in 48 bits.
    pub fn new(compressed: u64, uncompressed: u16) -> Option<Self> {
        if compressed > Self::MAX_COMPRESSED {
            return None;
        }
        Some(Self(
            (compressed << Self::UNCOMPRESSED_BITS) | u64::from(uncompressed),
        ))
    }

    /// Offset of the first byte of the block starting at `byte_offset`.
    ///
    /// Positions beyond 48 bits saturate to [`VirtualOffset::MAX`].
    pub fn at_block_start(byte_offset: u64) -> Self {
        Self::new(byte_offset, 0).unwrap_or(Self::MAX)
    }

    pub const fn from_encoded(raw: u64) -> Self {
        Self(raw)
    }

    pub const fn to_encoded(self) -> u64 {
        self.0
    }

    /// Byte position of the compressed block
    pub const fn compressed(self) -> u64 {
        self.0 >> Self::UNCOMPRESSED_BITS
    }

    /// Position within the decompressed block
    pub const fn uncompressed(self) -> u16 {
        (self.0 & Self::UNCOMPRESSED_MASK) as u16
    }

    /// Byte offset usable by a framework that only knows raw file positions.
    pub const fn to_byte_offset_floor(self) -> u64 {
        self.compressed()
    }
}

impl From<bgzf::VirtualPosition> for VirtualOffset {
    fn from(position: bgzf::VirtualPosition) -> Self {
        Self(u64::from(position))
    }
}

impl From<VirtualOffset> for bgzf::VirtualPosition {
    fn from(offset: VirtualOffset) -> Self {
        bgzf::VirtualPosition::from(offset.0)
    }
}

impl fmt::Display for VirtualOffset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.compressed(), self.uncompressed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parts_and_encoding() {
        let offset = VirtualOffset::new(123_456, 789).unwrap();
        assert_eq!(offset.compressed(), 123_456);
        assert_eq!(offset.uncompressed(), 789);
        assert_eq!(offset.to_encoded(), (123_456 << 16) | 789);
        assert_eq!(VirtualOffset::from_encoded(offset.to_encoded()), offset);
        assert_eq!(offset.to_byte_offset_floor(), 123_456);
        assert_eq!(offset.to_string(), "123456:789");
    }

    #[test]
    fn test_ordering_follows_file_order() {
        let a = VirtualOffset::new(10, 65_535).unwrap();
        let b = VirtualOffset::new(11, 0).unwrap();
        let c = VirtualOffset::new(11, 1).unwrap();
        assert!(a < b);
        assert!(b < c);
        assert_eq!(VirtualOffset::at_block_start(11), b);
    }

    #[test]
    fn test_compressed_overflow() {
        assert!(VirtualOffset::new(VirtualOffset::MAX_COMPRESSED, 0).is_some());
        assert!(VirtualOffset::new(VirtualOffset::MAX_COMPRESSED + 1, 0).is_none());
        assert_eq!(
            VirtualOffset::at_block_start(u64::MAX),
            VirtualOffset::MAX
        );
    }

    #[test]
    fn test_noodles_conversion() {
        let offset = VirtualOffset::new(42, 7).unwrap();
        let position: bgzf::VirtualPosition = offset.into();
        assert_eq!(u64::from(position), offset.to_encoded());
        assert_eq!(VirtualOffset::from(position), offset);
    }
}
