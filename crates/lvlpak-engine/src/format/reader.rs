//! Bundle reader
//!
//! Bounds-checked decoding of a bundle file as it sits on disk (before any
//! load-time fixup). Used by `lvlpak inspect` and by [`crate::loader::ChunkImage`]
//! to size the chunk set.

use serde::Serialize;
use thiserror::Error;

use super::endian::Endian;
use super::position::{Position, PositionError, PositionLayout};
use super::{CHUNK_PLACEHOLDER, WORD};

/// Errors raised while decoding a bundle file
#[derive(Debug, Error)]
pub enum FormatError {
    /// Ran past the end of the data
    #[error("Unexpected end of bundle at offset {offset:#x} (need {need} bytes, have {have})")]
    UnexpectedEnd { offset: usize, need: usize, have: usize },

    /// No zero word terminates the chunk table
    #[error("Chunk table is not terminated")]
    MissingChunkTerminator,

    /// Chunk table holds something other than placeholders
    #[error("Chunk table entry {index} holds {value:#x}, expected the unresolved placeholder")]
    BadChunkEntry { index: u32, value: u32 },

    /// No null word terminates the fixup table
    #[error("Fixup table at offset {0:#x} is not terminated")]
    MissingFixupTerminator(usize),

    /// A table word is not an unresolved position
    #[error("Word {value:#x} at offset {offset:#x} is not an unresolved position")]
    NotAPosition { offset: usize, value: u32 },

    /// Invalid chunk size
    #[error(transparent)]
    Position(#[from] PositionError),
}

/// Result alias for bundle decoding
pub type Result<T> = std::result::Result<T, FormatError>;

/// Read cursor over bundle bytes
#[derive(Clone)]
pub struct BundleReader<'a> {
    data: &'a [u8],
    pos: usize,
    endian: Endian,
}

impl<'a> BundleReader<'a> {
    /// Create a reader at offset zero
    pub fn new(data: &'a [u8], endian: Endian) -> Self {
        Self { data, pos: 0, endian }
    }

    /// Current byte position
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Remaining bytes from the current position
    pub fn remaining(&self) -> usize {
        self.data.len().saturating_sub(self.pos)
    }

    /// Seek to an absolute position
    pub fn seek(&mut self, pos: usize) {
        self.pos = pos;
    }

    /// Read one word
    pub fn read_u32(&mut self) -> Result<u32> {
        if self.remaining() < WORD as usize {
            return Err(FormatError::UnexpectedEnd {
                offset: self.pos,
                need: WORD as usize,
                have: self.remaining(),
            });
        }
        let mut bytes = [0u8; 4];
        bytes.copy_from_slice(&self.data[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(self.endian.read_u32(bytes))
    }

    /// Count chunk-table placeholders up to the zero terminator, leaving the
    /// cursor on the word after it
    pub fn read_chunk_table(&mut self) -> Result<u32> {
        self.seek(0);
        let mut count = 0u32;
        loop {
            let word = match self.read_u32() {
                Ok(word) => word,
                Err(FormatError::UnexpectedEnd { .. }) => {
                    return Err(FormatError::MissingChunkTerminator)
                }
                Err(e) => return Err(e),
            };
            if word == 0 {
                return Ok(count);
            }
            if word != CHUNK_PLACEHOLDER {
                return Err(FormatError::BadChunkEntry { index: count, value: word });
            }
            count += 1;
        }
    }
}

/// A decoded position for reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PositionInfo {
    /// Raw word
    pub raw: u32,
    /// Chunk index
    pub block: u32,
    /// Offset inside the chunk
    pub offset: u32,
    /// Byte offset in the bundle file
    pub file_offset: u64,
    /// Whether the runtime-file flag is set
    pub runtime_file: bool,
}

impl PositionInfo {
    fn decode(layout: &PositionLayout, position: Position) -> Self {
        let (block, offset) = layout.decode(position);
        Self {
            raw: position.raw(),
            block,
            offset,
            file_offset: block as u64 * layout.chunk_size() as u64 + offset as u64,
            runtime_file: position.is_runtime_file(),
        }
    }
}

/// Summary of a bundle file
#[derive(Debug, Clone, Serialize)]
pub struct BundleInfo {
    /// File length in bytes
    pub size: usize,
    /// CRC-32 of the whole file
    pub crc32: u32,
    /// Chunk size the bundle was decoded with
    pub chunk_size: u32,
    /// Number of chunk table entries
    pub chunk_count: u32,
    /// Bytes before the first packed item when the fixup table is inline
    pub header_size: u32,
    /// Root position
    pub start: PositionInfo,
    /// Where the fixup table lives, if any
    pub fixup_table: Option<PositionInfo>,
    /// Fixup table entries
    pub fixups: Vec<PositionInfo>,
}

impl BundleInfo {
    /// Decode the header and fixup table of a bundle file
    pub fn decode(data: &[u8], chunk_size: u32, endian: Endian) -> Result<Self> {
        let layout = PositionLayout::for_chunk_size(chunk_size)?;
        let mut reader = BundleReader::new(data, endian);
        let chunk_count = reader.read_chunk_table()?;

        let start_offset = reader.position();
        let start = Position::from_raw(reader.read_u32()?);
        if !start.is_unresolved() {
            return Err(FormatError::NotAPosition {
                offset: start_offset,
                value: start.raw(),
            });
        }
        let table = Position::from_raw(reader.read_u32()?);
        let mut header_size = reader.position() as u32;

        let mut fixups = Vec::new();
        let fixup_table = if table.is_null() {
            None
        } else {
            let info = PositionInfo::decode(&layout, table);
            let table_offset = info.file_offset as usize;
            reader.seek(table_offset);
            loop {
                let at = reader.position();
                let word = match reader.read_u32() {
                    Ok(word) => word,
                    Err(FormatError::UnexpectedEnd { .. }) => {
                        return Err(FormatError::MissingFixupTerminator(table_offset))
                    }
                    Err(e) => return Err(e),
                };
                if word == 0 {
                    break;
                }
                let entry = Position::from_raw(word);
                if !entry.is_unresolved() {
                    return Err(FormatError::NotAPosition { offset: at, value: word });
                }
                fixups.push(PositionInfo::decode(&layout, entry));
            }
            if table_offset == header_size as usize {
                header_size = reader.position() as u32;
            }
            Some(info)
        };

        Ok(Self {
            size: data.len(),
            crc32: crc32fast::hash(data),
            chunk_size,
            chunk_count,
            header_size,
            start: PositionInfo::decode(&layout, start),
            fixup_table,
            fixups,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{flags, BundleWriter};

    fn tiny_bundle(endian: Endian) -> Vec<u8> {
        let layout = PositionLayout::for_chunk_size(64).unwrap();
        let mut writer = BundleWriter::new(endian);
        writer.emit_u32(CHUNK_PLACEHOLDER);
        writer.emit_u32(0);
        writer.emit_position(layout.encode(0, 24, flags::UNRESOLVED).unwrap());
        writer.emit_position(layout.encode(0, 16, flags::UNRESOLVED).unwrap());
        writer.emit_position(layout.encode(0, 24, flags::UNRESOLVED).unwrap());
        writer.emit_u32(0);
        // root: one slot pointing at itself
        writer.emit_position(layout.encode(0, 24, flags::UNRESOLVED).unwrap());
        writer.into_bytes()
    }

    #[test]
    fn test_decode_header() {
        for endian in [Endian::Little, Endian::Big] {
            let bytes = tiny_bundle(endian);
            let info = BundleInfo::decode(&bytes, 64, endian).unwrap();
            assert_eq!(info.chunk_count, 1);
            assert_eq!(info.header_size, 24);
            assert_eq!(info.start.offset, 24);
            assert_eq!(info.fixup_table.unwrap().offset, 16);
            assert_eq!(info.fixups.len(), 1);
            assert_eq!(info.fixups[0].file_offset, 24);
        }
    }

    #[test]
    fn test_missing_chunk_terminator() {
        let bytes = [0xFFu8; 12];
        let result = BundleInfo::decode(&bytes, 64, Endian::Little);
        assert!(matches!(result, Err(FormatError::MissingChunkTerminator)));
    }

    #[test]
    fn test_bad_chunk_entry() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0x1000u32.to_le_bytes());
        bytes.extend_from_slice(&0u32.to_le_bytes());
        let result = BundleInfo::decode(&bytes, 64, Endian::Little);
        assert!(matches!(result, Err(FormatError::BadChunkEntry { index: 0, .. })));
    }

    #[test]
    fn test_truncated_fixup_table() {
        let mut bytes = tiny_bundle(Endian::Little);
        bytes.truncate(20);
        let result = BundleInfo::decode(&bytes, 64, Endian::Little);
        assert!(matches!(result, Err(FormatError::MissingFixupTerminator(16))));
    }
}
