//! Bundle writer
//!
//! Append-only byte buffer with endianness-aware word emission and
//! back-patching of words written earlier (the end-mode fixup pointer).

use super::endian::Endian;
use super::position::Position;

/// Bundle writer for emitting tables and packed data
pub struct BundleWriter {
    /// Internal buffer containing the bundle bytes
    buffer: Vec<u8>,
    /// Byte order for words
    endian: Endian,
}

impl BundleWriter {
    /// Create a new writer
    pub fn new(endian: Endian) -> Self {
        Self {
            buffer: Vec::new(),
            endian,
        }
    }

    /// Create a new writer with capacity
    pub fn with_capacity(endian: Endian, capacity: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(capacity),
            endian,
        }
    }

    /// Byte order in use
    pub fn endian(&self) -> Endian {
        self.endian
    }

    /// Get the bytes written so far
    pub fn buffer(&self) -> &[u8] {
        &self.buffer
    }

    /// Consume the writer and return the bytes
    pub fn into_bytes(self) -> Vec<u8> {
        self.buffer
    }

    /// Current write offset
    pub fn offset(&self) -> u32 {
        self.buffer.len() as u32
    }

    // ===== Basic Emission =====

    /// Emit a raw byte
    pub fn emit_u8(&mut self, value: u8) {
        self.buffer.push(value);
    }

    /// Emit a 32-bit word
    pub fn emit_u32(&mut self, value: u32) {
        let bytes = self.endian.u32_bytes(value);
        self.buffer.extend_from_slice(&bytes);
    }

    /// Emit an encoded position
    pub fn emit_position(&mut self, position: Position) {
        self.emit_u32(position.raw());
    }

    /// Emit raw bytes
    pub fn emit_bytes(&mut self, bytes: &[u8]) {
        self.buffer.extend_from_slice(bytes);
    }

    /// Emit `count` copies of `byte`
    pub fn emit_fill(&mut self, byte: u8, count: u32) {
        self.buffer.resize(self.buffer.len() + count as usize, byte);
    }

    // ===== Padding =====

    /// Zero-fill up to absolute `offset`; returns the number of bytes added.
    /// Does nothing if the writer is already at or past `offset`.
    pub fn pad_to(&mut self, offset: u32) -> u32 {
        let current = self.offset();
        if offset <= current {
            return 0;
        }
        self.emit_fill(0, offset - current);
        offset - current
    }

    /// Zero-fill up to the next multiple of `boundary`; returns bytes added
    pub fn align_to(&mut self, boundary: u32) -> u32 {
        if boundary <= 1 {
            return 0;
        }
        let target = super::round_up(self.offset(), boundary);
        self.pad_to(target)
    }

    // ===== Patching =====

    /// Overwrite a word previously emitted at `offset`
    pub fn patch_u32(&mut self, offset: u32, value: u32) {
        let offset = offset as usize;
        let bytes = self.endian.u32_bytes(value);
        self.buffer[offset..offset + 4].copy_from_slice(&bytes);
    }

    /// Reserve a word for later patching (returns its offset)
    pub fn reserve_u32(&mut self) -> u32 {
        let offset = self.offset();
        self.emit_u32(0);
        offset
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_words() {
        let mut writer = BundleWriter::new(Endian::Little);
        writer.emit_u32(0xAABBCCDD);
        writer.emit_u8(7);
        assert_eq!(writer.buffer(), &[0xDD, 0xCC, 0xBB, 0xAA, 7]);

        let mut writer = BundleWriter::new(Endian::Big);
        writer.emit_u32(0xAABBCCDD);
        assert_eq!(writer.buffer(), &[0xAA, 0xBB, 0xCC, 0xDD]);
    }

    #[test]
    fn test_padding() {
        let mut writer = BundleWriter::new(Endian::Little);
        writer.emit_bytes(&[1, 2, 3]);
        assert_eq!(writer.align_to(4), 1);
        assert_eq!(writer.offset(), 4);
        assert_eq!(writer.align_to(4), 0);
        assert_eq!(writer.pad_to(10), 6);
        assert_eq!(writer.pad_to(2), 0);
        assert_eq!(writer.offset(), 10);
    }

    #[test]
    fn test_reserve_and_patch() {
        let mut writer = BundleWriter::new(Endian::Little);
        writer.emit_u32(1);
        let slot = writer.reserve_u32();
        writer.emit_u32(3);
        writer.patch_u32(slot, 0x1234);
        assert_eq!(&writer.buffer()[4..8], &0x1234u32.to_le_bytes());
        assert_eq!(writer.offset(), 12);
    }
}
