//! Binary format primitives shared by the packer and the loader.

pub mod endian;
pub mod position;
pub mod reader;
pub mod writer;

pub use endian::Endian;
pub use position::{flags, Position, PositionError, PositionLayout, Slot};
pub use reader::{BundleInfo, BundleReader, FormatError};
pub use writer::BundleWriter;

/// Width in bytes of every table word and reference slot.
pub const WORD: u32 = 4;

/// Placeholder stored in every Chunk Table entry until load time.
pub const CHUNK_PLACEHOLDER: u32 = u32::MAX;

/// Round `value` up to the next multiple of `to` (`to` must be non-zero).
#[inline]
pub fn round_up(value: u32, to: u32) -> u32 {
    value.div_ceil(to) * to
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_up() {
        assert_eq!(round_up(0, 4), 0);
        assert_eq!(round_up(1, 4), 4);
        assert_eq!(round_up(10, 4), 12);
        assert_eq!(round_up(12, 4), 12);
        assert_eq!(round_up(13, 12), 24);
    }
}
