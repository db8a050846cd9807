//! Position encoding
//!
//! A [`Position`] packs a chunk (block) index, a byte offset inside that
//! chunk and two flag bits into one 32-bit word:
//!
//! ```text
//!  31 ............. offset_bits | offset_bits-1 ........ 2 | 1 | 0
//!        block index            |   offset (4-aligned)     | R | U
//! ```
//!
//! `U` is [`flags::UNRESOLVED`] and `R` is [`flags::IS_RUNTIME_FILE`]. Offsets
//! are always multiples of four, so the flags never collide with offset bits.
//! The split between block and offset is derived once from the chunk size.

use thiserror::Error;

/// Position flag bits
pub mod flags {
    /// The word still holds an encoded position and needs resolving
    pub const UNRESOLVED: u32 = 1 << 0;
    /// The position names a runtime-loaded file record
    pub const IS_RUNTIME_FILE: u32 = 1 << 1;
    /// All flag bits
    pub const MASK: u32 = UNRESOLVED | IS_RUNTIME_FILE;
}

/// Smallest chunk size the encoding accepts.
pub const MIN_CHUNK_SIZE: u32 = 16;

/// Largest chunk size the encoding accepts (leaves at least two block bits).
pub const MAX_CHUNK_SIZE: u32 = 1 << 30;

/// Errors raised while encoding positions
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PositionError {
    /// Chunk size outside the supported range or not word-aligned
    #[error("Invalid chunk size {0}: must be a multiple of 4 between {MIN_CHUNK_SIZE} and {MAX_CHUNK_SIZE}")]
    InvalidChunkSize(u32),

    /// Block index not representable
    #[error("Block index {block} exceeds the maximum of {max} blocks")]
    BlockOutOfRange { block: u32, max: u32 },

    /// Offset beyond the chunk
    #[error("Offset {offset:#x} lies outside a chunk of {chunk_size:#x} bytes")]
    OffsetOutOfRange { offset: u32, chunk_size: u32 },

    /// Offset uses the flag bits
    #[error("Offset {0:#x} is not 4-byte aligned")]
    MisalignedOffset(u32),

    /// Flags outside [`flags::MASK`]
    #[error("Invalid position flags {0:#x}")]
    InvalidFlags(u32),
}

/// An encoded `(block, offset, flags)` reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Position(u32);

impl Position {
    /// The null position (table terminator, absent fixup table)
    pub const NULL: Position = Position(0);

    /// Wrap a raw word
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Position(raw)
    }

    /// The raw encoded word
    #[inline]
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// Whether this is the null word
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Flag bits
    #[inline]
    pub const fn flags(self) -> u32 {
        self.0 & flags::MASK
    }

    /// Whether the unresolved flag is set
    #[inline]
    pub const fn is_unresolved(self) -> bool {
        self.0 & flags::UNRESOLVED != 0
    }

    /// Whether the position refers to a runtime-loaded file record
    #[inline]
    pub const fn is_runtime_file(self) -> bool {
        self.0 & flags::IS_RUNTIME_FILE != 0
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#010x}", self.0)
    }
}

/// The block/offset split for one chunk size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PositionLayout {
    chunk_size: u32,
    offset_bits: u32,
}

impl PositionLayout {
    /// Derive the layout for `chunk_size`: `ceil(log2(chunk_size))` offset
    /// bits, the remainder for the block index.
    pub fn for_chunk_size(chunk_size: u32) -> Result<Self, PositionError> {
        if !(MIN_CHUNK_SIZE..=MAX_CHUNK_SIZE).contains(&chunk_size) || chunk_size % 4 != 0 {
            return Err(PositionError::InvalidChunkSize(chunk_size));
        }
        let offset_bits = 32 - (chunk_size - 1).leading_zeros();
        Ok(Self {
            chunk_size,
            offset_bits,
        })
    }

    /// Chunk size this layout was derived from
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Bits reserved for the in-chunk offset
    pub fn offset_bits(&self) -> u32 {
        self.offset_bits
    }

    /// Bits reserved for the block index
    pub fn block_bits(&self) -> u32 {
        32 - self.offset_bits
    }

    /// Number of blocks the encoding can address. The all-ones block index is
    /// never produced, so the chunk-table placeholder cannot decode as a
    /// valid position.
    pub fn max_blocks(&self) -> u32 {
        ((1u64 << self.block_bits()) - 1) as u32
    }

    /// Encode `(block, offset)` with `flags`
    pub fn encode(&self, block: u32, offset: u32, flag_bits: u32) -> Result<Position, PositionError> {
        if flag_bits & !flags::MASK != 0 {
            return Err(PositionError::InvalidFlags(flag_bits));
        }
        if block >= self.max_blocks() {
            return Err(PositionError::BlockOutOfRange {
                block,
                max: self.max_blocks(),
            });
        }
        if offset >= self.chunk_size {
            return Err(PositionError::OffsetOutOfRange {
                offset,
                chunk_size: self.chunk_size,
            });
        }
        if offset & flags::MASK != 0 {
            return Err(PositionError::MisalignedOffset(offset));
        }
        Ok(Position((block << self.offset_bits) | offset | flag_bits))
    }

    /// Encode an absolute bundle offset (chunk `n` starts at `n * chunk_size`)
    pub fn encode_absolute(&self, absolute: u32, flag_bits: u32) -> Result<Position, PositionError> {
        self.encode(
            absolute / self.chunk_size,
            absolute % self.chunk_size,
            flag_bits,
        )
    }

    /// Split a position into `(block, offset)`, ignoring flags
    pub fn decode(&self, position: Position) -> (u32, u32) {
        let raw = position.raw();
        let offset_mask = (1u32 << self.offset_bits) - 1;
        (raw >> self.offset_bits, raw & offset_mask & !flags::MASK)
    }
}

/// A 4-byte reference slot, viewed as either an encoded position or an
/// address written by the loader
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    /// Still holds an encoded position
    Unresolved(Position),
    /// Holds a resolved address
    Resolved(u32),
}

impl Slot {
    /// Interpret a raw slot word
    pub fn from_word(word: u32) -> Self {
        if word & flags::UNRESOLVED != 0 {
            Slot::Unresolved(Position::from_raw(word))
        } else {
            Slot::Resolved(word)
        }
    }

    /// The raw word to store
    pub fn to_word(self) -> u32 {
        match self {
            Slot::Unresolved(position) => position.raw(),
            Slot::Resolved(address) => address,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_bit_split() {
        let layout = PositionLayout::for_chunk_size(2048).unwrap();
        assert_eq!(layout.offset_bits(), 11);
        assert_eq!(layout.block_bits(), 21);
        assert_eq!(layout.max_blocks(), (1 << 21) - 1);

        // Non power of two rounds the offset field up
        let layout = PositionLayout::for_chunk_size(3000).unwrap();
        assert_eq!(layout.offset_bits(), 12);
    }

    #[test]
    fn test_invalid_chunk_sizes() {
        assert!(PositionLayout::for_chunk_size(0).is_err());
        assert!(PositionLayout::for_chunk_size(8).is_err());
        assert!(PositionLayout::for_chunk_size(2046).is_err());
        assert!(PositionLayout::for_chunk_size(MAX_CHUNK_SIZE + 4).is_err());
    }

    #[test]
    fn test_round_trip_across_range() {
        for chunk_size in [16u32, 2048, 3000, 0x8000, 0x10000] {
            let layout = PositionLayout::for_chunk_size(chunk_size).unwrap();
            let blocks = [0, 1, 2, 7, layout.max_blocks() - 1];
            let offsets = [0, 4, chunk_size / 2 & !3, chunk_size - 4];
            for &block in &blocks {
                for &offset in &offsets {
                    for flag_bits in [0, flags::UNRESOLVED, flags::MASK] {
                        let p = layout.encode(block, offset, flag_bits).unwrap();
                        assert_eq!(layout.decode(p), (block, offset));
                        assert_eq!(p.flags(), flag_bits);
                    }
                }
            }
        }
    }

    #[test]
    fn test_encode_rejects_out_of_range() {
        let layout = PositionLayout::for_chunk_size(2048).unwrap();
        assert!(matches!(
            layout.encode(layout.max_blocks(), 0, 0),
            Err(PositionError::BlockOutOfRange { .. })
        ));
        assert!(matches!(
            layout.encode(0, 2048, 0),
            Err(PositionError::OffsetOutOfRange { .. })
        ));
        assert!(matches!(
            layout.encode(0, 6, 0),
            Err(PositionError::MisalignedOffset(6))
        ));
        assert!(matches!(
            layout.encode(0, 4, 4),
            Err(PositionError::InvalidFlags(4))
        ));
    }

    #[test]
    fn test_encode_absolute() {
        let layout = PositionLayout::for_chunk_size(2048).unwrap();
        let p = layout.encode_absolute(2048 * 3 + 16, flags::UNRESOLVED).unwrap();
        assert_eq!(layout.decode(p), (3, 16));
        assert!(p.is_unresolved());
        assert!(!p.is_runtime_file());
    }

    #[test]
    fn test_unresolved_position_is_never_null() {
        let layout = PositionLayout::for_chunk_size(2048).unwrap();
        let p = layout.encode(0, 0, flags::UNRESOLVED).unwrap();
        assert!(!p.is_null());
    }

    #[test]
    fn test_slot_tagging() {
        assert_eq!(Slot::from_word(0x1000), Slot::Resolved(0x1000));
        assert_eq!(
            Slot::from_word(0x1001),
            Slot::Unresolved(Position::from_raw(0x1001))
        );
        assert_eq!(Slot::Resolved(0x2000).to_word(), 0x2000);
    }
}
