//! Bundle loader
//!
//! Runtime half of the format. The bundle sits in memory as one region per
//! chunk, each at its own base address. [`BundleLoader::init`] fills the
//! chunk table with those bases and rewrites every slot listed in the fixup
//! table from an encoded position to a real address. Runtime-file slots go
//! through a [`FileLoader`] callback once per file; the file record caches
//! the returned address so later slots and later passes reuse it.
//!
//! `init` is idempotent: a resolved start word means the bundle has already
//! been fixed up, and nothing is touched.

mod image;

pub use image::ChunkImage;

use thiserror::Error;
use tracing::{debug, info, trace};

use crate::format::{
    FormatError, Endian, Position, PositionError, PositionLayout, Slot, CHUNK_PLACEHOLDER, WORD,
};

/// Error returned by a [`FileLoader`]
pub type CallbackError = Box<dyn std::error::Error + Send + Sync>;

/// Loads a runtime file and returns the address it now lives at
pub trait FileLoader {
    /// Load `name`; the address must be non-zero and even
    fn load(&mut self, name: &str) -> Result<u32, CallbackError>;
}

impl<F> FileLoader for F
where
    F: FnMut(&str) -> Result<u32, CallbackError>,
{
    fn load(&mut self, name: &str) -> Result<u32, CallbackError> {
        self(name)
    }
}

/// Errors that can occur while resolving a resident bundle
#[derive(Debug, Error)]
pub enum LoadError {
    /// Unusable chunk size
    #[error(transparent)]
    Position(#[from] PositionError),

    /// Bundle file could not be split into chunks
    #[error(transparent)]
    Format(#[from] FormatError),

    /// No memory regions supplied
    #[error("No chunk regions supplied")]
    NoRegions,

    /// Region base is null, unaligned, or the region wraps the address space
    #[error("Chunk region {index} has an invalid base address {base:#x}")]
    BadRegionBase { index: usize, base: u32 },

    /// Wrong number of bases for an image
    #[error("Expected {expected} chunk base addresses, got {actual}")]
    RegionCountMismatch { expected: usize, actual: usize },

    /// No zero word terminates the chunk table within region 0
    #[error("Chunk table is not terminated within the first chunk")]
    MissingChunkTerminator,

    /// More chunk table entries than regions
    #[error("Chunk table lists {entries} chunks but only {regions} regions were supplied")]
    ChunkTableTooLong { entries: usize, regions: usize },

    /// Chunk table entry is neither a placeholder nor the region's base
    #[error("Chunk table entry {index} holds {value:#x}")]
    BadChunkEntry { index: usize, value: u32 },

    /// The start word is null
    #[error("Bundle has a null start position")]
    NullStart,

    /// Position names a block with no region
    #[error("Position {position} names block {block}, but only {regions} regions exist")]
    BlockOutOfRange { position: Position, block: u32, regions: usize },

    /// Position points outside its region
    #[error("Offset {offset:#x} lies outside block {block} ({len} bytes)")]
    OffsetOutOfRange { block: u32, offset: u32, len: usize },

    /// Fixup table runs off its region
    #[error("Fixup table at {0} is not terminated")]
    MissingFixupTerminator(Position),

    /// Runtime file record is malformed
    #[error("Runtime file record at {0} has no valid NUL-terminated name")]
    BadFileRecord(Position),

    /// Callback returned an unusable address
    #[error("Loader returned invalid address {address:#x} for '{name}'")]
    BadAddress { name: String, address: u32 },

    /// Callback failed
    #[error("Failed to load runtime file '{name}'")]
    Callback {
        name: String,
        #[source]
        source: CallbackError,
    },
}

/// One chunk resident in memory
#[derive(Debug)]
pub struct ChunkRegion<'m> {
    /// Address the chunk is loaded at
    pub base: u32,
    /// The chunk's bytes
    pub memory: &'m mut [u8],
}

/// Result of [`BundleLoader::init`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOutcome {
    /// Address of the root section
    pub root: u32,
    /// Slots rewritten in this pass
    pub fixups_applied: usize,
    /// Callback invocations in this pass
    pub runtime_loads: usize,
    /// Whether the fixup table memory may be released (no callback ran)
    pub fixup_releasable: bool,
    /// Whether the bundle had already been resolved
    pub already_resolved: bool,
}

/// Resolves a bundle resident in chunk regions
#[derive(Debug)]
pub struct BundleLoader<'m> {
    regions: Vec<ChunkRegion<'m>>,
    layout: PositionLayout,
    endian: Endian,
}

impl<'m> BundleLoader<'m> {
    /// Wrap `regions` (region `i` holds chunk `i`). Bases must be non-zero,
    /// 4-byte aligned and leave the region inside the address space.
    pub fn new(regions: Vec<ChunkRegion<'m>>, chunk_size: u32, endian: Endian) -> Result<Self, LoadError> {
        let layout = PositionLayout::for_chunk_size(chunk_size)?;
        if regions.is_empty() {
            return Err(LoadError::NoRegions);
        }
        for (index, region) in regions.iter().enumerate() {
            let fits = (region.base as u64 + region.memory.len() as u64) <= u32::MAX as u64 + 1;
            if region.base == 0 || region.base % WORD != 0 || !fits {
                return Err(LoadError::BadRegionBase {
                    index,
                    base: region.base,
                });
            }
        }
        Ok(Self {
            regions,
            layout,
            endian,
        })
    }

    /// Number of regions
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Resolve the bundle. The first call rewrites the chunk table, every
    /// fixup slot and the start word; later calls only report the root.
    pub fn init(&mut self, loader: &mut dyn FileLoader) -> Result<LoadOutcome, LoadError> {
        let entries = self.chunk_table_len()?;
        if entries > self.regions.len() {
            return Err(LoadError::ChunkTableTooLong {
                entries,
                regions: self.regions.len(),
            });
        }
        let start_at = (entries as u32 + 1) * WORD;
        let start_word = self.read(0, start_at)?;
        let table_word = self.read(0, start_at + WORD)?;

        let start = match Slot::from_word(start_word) {
            Slot::Resolved(0) => return Err(LoadError::NullStart),
            Slot::Resolved(root) => {
                debug!(root = format_args!("{:#x}", root), "bundle already resolved");
                return Ok(LoadOutcome {
                    root,
                    fixups_applied: 0,
                    runtime_loads: 0,
                    fixup_releasable: true,
                    already_resolved: true,
                });
            }
            Slot::Unresolved(position) => position,
        };

        for index in 0..entries {
            let at = index as u32 * WORD;
            let value = self.read(0, at)?;
            let base = self.regions[index].base;
            if value != CHUNK_PLACEHOLDER && value != base {
                return Err(LoadError::BadChunkEntry { index, value });
            }
            self.write(0, at, base)?;
        }

        let mut fixups_applied = 0;
        let mut runtime_loads = 0;
        let table = Position::from_raw(table_word);
        if !table.is_null() {
            let (block, offset) = self.locate(table)?;
            let len = self.regions[block as usize].memory.len() as u32;
            let mut at = offset;
            loop {
                if at + WORD > len {
                    return Err(LoadError::MissingFixupTerminator(table));
                }
                let entry = self.read(block, at)?;
                at += WORD;
                if entry == 0 {
                    break;
                }
                let (slot_block, slot_offset) = self.locate(Position::from_raw(entry))?;
                let value = match Slot::from_word(self.read(slot_block, slot_offset)?) {
                    Slot::Resolved(_) => continue,
                    Slot::Unresolved(target) if target.is_runtime_file() => {
                        let (address, loaded) = self.runtime_file(target, loader)?;
                        runtime_loads += loaded as usize;
                        address
                    }
                    Slot::Unresolved(target) => self.address(target)?,
                };
                self.write(slot_block, slot_offset, value)?;
                fixups_applied += 1;
                trace!(slot = %Position::from_raw(entry), value = format_args!("{:#x}", value), "fixup");
            }
        }

        let root = self.address(start)?;
        self.write(0, start_at, root)?;
        info!(
            root = format_args!("{:#x}", root),
            fixups = fixups_applied,
            runtime_loads,
            "bundle resolved"
        );
        Ok(LoadOutcome {
            root,
            fixups_applied,
            runtime_loads,
            fixup_releasable: runtime_loads == 0,
            already_resolved: false,
        })
    }

    /// Word at an absolute address inside one of the regions
    pub fn word_at(&self, address: u32) -> Option<u32> {
        self.regions.iter().find_map(|region| {
            let offset = address.checked_sub(region.base)? as usize;
            let bytes = region.memory.get(offset..offset.checked_add(4)?)?;
            Some(self.endian.read_u32([bytes[0], bytes[1], bytes[2], bytes[3]]))
        })
    }

    /// Give the regions back
    pub fn into_regions(self) -> Vec<ChunkRegion<'m>> {
        self.regions
    }

    /// Resolve a runtime file record: return its cached address, or call
    /// the loader and cache the result. The flag reports a callback.
    fn runtime_file(&mut self, record: Position, loader: &mut dyn FileLoader) -> Result<(u32, bool), LoadError> {
        let (block, offset) = self.locate(record)?;
        let cached = self.read(block, offset)?;
        if cached != 0 {
            return Ok((cached, false));
        }
        let name = self.record_name(block, offset + WORD, record)?;
        let address = loader
            .load(&name)
            .map_err(|source| LoadError::Callback {
                name: name.clone(),
                source,
            })?;
        if address == 0 || address % 2 != 0 {
            return Err(LoadError::BadAddress { name, address });
        }
        debug!(file = %name, address = format_args!("{:#x}", address), "loaded runtime file");
        self.write(block, offset, address)?;
        Ok((address, true))
    }

    fn record_name(&self, block: u32, offset: u32, record: Position) -> Result<String, LoadError> {
        let memory = &self.regions[block as usize].memory;
        let tail = memory
            .get(offset as usize..)
            .ok_or(LoadError::BadFileRecord(record))?;
        let end = tail
            .iter()
            .position(|&b| b == 0)
            .ok_or(LoadError::BadFileRecord(record))?;
        std::str::from_utf8(&tail[..end])
            .map(str::to_string)
            .map_err(|_| LoadError::BadFileRecord(record))
    }

    /// Count chunk table entries up to the zero terminator in region 0
    fn chunk_table_len(&self) -> Result<usize, LoadError> {
        let len = self.regions[0].memory.len() as u32;
        let mut at = 0;
        while at + WORD <= len {
            if self.read(0, at)? == 0 {
                return Ok((at / WORD) as usize);
            }
            at += WORD;
        }
        Err(LoadError::MissingChunkTerminator)
    }

    fn locate(&self, position: Position) -> Result<(u32, u32), LoadError> {
        let (block, offset) = self.layout.decode(position);
        let region = self
            .regions
            .get(block as usize)
            .ok_or(LoadError::BlockOutOfRange {
                position,
                block,
                regions: self.regions.len(),
            })?;
        if offset as usize >= region.memory.len() {
            return Err(LoadError::OffsetOutOfRange {
                block,
                offset,
                len: region.memory.len(),
            });
        }
        Ok((block, offset))
    }

    fn address(&self, position: Position) -> Result<u32, LoadError> {
        let (block, offset) = self.locate(position)?;
        let region = &self.regions[block as usize];
        region
            .base
            .checked_add(offset)
            .ok_or(LoadError::OffsetOutOfRange {
                block,
                offset,
                len: region.memory.len(),
            })
    }

    fn read(&self, block: u32, offset: u32) -> Result<u32, LoadError> {
        let memory = &self.regions[block as usize].memory;
        let at = offset as usize;
        let bytes = memory.get(at..at + 4).ok_or(LoadError::OffsetOutOfRange {
            block,
            offset,
            len: memory.len(),
        })?;
        Ok(self.endian.read_u32([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn write(&mut self, block: u32, offset: u32, value: u32) -> Result<(), LoadError> {
        let bytes = self.endian.u32_bytes(value);
        let memory = &mut self.regions[block as usize].memory;
        let len = memory.len();
        let at = offset as usize;
        memory
            .get_mut(at..at + 4)
            .ok_or(LoadError::OffsetOutOfRange { block, offset, len })?
            .copy_from_slice(&bytes);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{flags, BundleWriter};

    const CHUNK: u32 = 64;

    fn position(block: u32, offset: u32, flag_bits: u32) -> u32 {
        PositionLayout::for_chunk_size(CHUNK)
            .unwrap()
            .encode(block, offset, flag_bits)
            .unwrap()
            .raw()
    }

    /// Two chunks. Block 0: header, root at 32 with slots to block 1 and to
    /// a runtime file record at block 1 offset 8. Block 1: data word, then
    /// the record.
    fn two_chunk_bundle() -> (Vec<u8>, Vec<u8>) {
        let u = flags::UNRESOLVED;
        let mut first = BundleWriter::new(Endian::Little);
        first.emit_u32(CHUNK_PLACEHOLDER);
        first.emit_u32(CHUNK_PLACEHOLDER);
        first.emit_u32(0);
        first.emit_u32(position(0, 32, u)); // start
        first.emit_u32(position(0, 20, u)); // fixup table
        first.emit_u32(position(0, 32, u));
        first.emit_u32(position(0, 36, u));
        first.emit_u32(0);
        first.emit_u32(position(1, 0, u)); // root slot 0
        first.emit_u32(position(1, 8, u | flags::IS_RUNTIME_FILE)); // root slot 1
        first.pad_to(CHUNK);

        let mut second = BundleWriter::new(Endian::Little);
        second.emit_u32(0xCAFE);
        second.emit_u32(0);
        second.emit_u32(0); // record cache
        second.emit_bytes(b"song.ogg\0");
        second.pad_to(CHUNK);
        (first.into_bytes(), second.into_bytes())
    }

    #[test]
    fn test_init_resolves_slots_and_is_idempotent() {
        let (mut first, mut second) = two_chunk_bundle();
        let regions = vec![
            ChunkRegion { base: 0x1000, memory: &mut first },
            ChunkRegion { base: 0x8000, memory: &mut second },
        ];
        let mut loader = BundleLoader::new(regions, CHUNK, Endian::Little).unwrap();
        let mut calls = Vec::new();
        let mut callback = |name: &str| -> Result<u32, CallbackError> {
            calls.push(name.to_string());
            Ok(0x4_0000)
        };

        let outcome = loader.init(&mut callback).unwrap();
        assert_eq!(outcome.root, 0x1000 + 32);
        assert_eq!(outcome.fixups_applied, 2);
        assert_eq!(outcome.runtime_loads, 1);
        assert!(!outcome.fixup_releasable);
        assert!(!outcome.already_resolved);
        assert_eq!(loader.word_at(0x1000), Some(0x1000));
        assert_eq!(loader.word_at(0x1004), Some(0x8000));
        assert_eq!(loader.word_at(0x1000 + 32), Some(0x8000));
        assert_eq!(loader.word_at(0x1000 + 36), Some(0x4_0000));
        assert_eq!(loader.word_at(0x8008), Some(0x4_0000));

        let again = loader.init(&mut callback).unwrap();
        assert_eq!(again.root, outcome.root);
        assert!(again.already_resolved);
        assert_eq!(again.runtime_loads, 0);
        assert_eq!(loader.word_at(0x1000 + 32), Some(0x8000));
        drop(loader);
        assert_eq!(calls, vec!["song.ogg".to_string()]);
    }

    #[test]
    fn test_region_validation() {
        let mut memory = vec![0u8; 64];
        let err = BundleLoader::new(
            vec![ChunkRegion { base: 0x1002, memory: &mut memory }],
            CHUNK,
            Endian::Little,
        )
        .unwrap_err();
        assert!(matches!(err, LoadError::BadRegionBase { index: 0, base: 0x1002 }));
        assert!(matches!(
            BundleLoader::new(Vec::new(), CHUNK, Endian::Little),
            Err(LoadError::NoRegions)
        ));
        let mut memory = vec![0u8; 64];
        let err = BundleLoader::new(
            vec![ChunkRegion { base: 0xFFFF_FFF0, memory: &mut memory }],
            CHUNK,
            Endian::Little,
        )
        .unwrap_err();
        assert!(matches!(err, LoadError::BadRegionBase { .. }));
    }

    #[test]
    fn test_chunk_table_longer_than_regions() {
        let (mut first, _) = two_chunk_bundle();
        let regions = vec![ChunkRegion { base: 0x1000, memory: &mut first }];
        let mut loader = BundleLoader::new(regions, CHUNK, Endian::Little).unwrap();
        let mut callback = |_: &str| -> Result<u32, CallbackError> { Ok(4) };
        assert!(matches!(
            loader.init(&mut callback),
            Err(LoadError::ChunkTableTooLong { entries: 2, regions: 1 })
        ));
    }

    #[test]
    fn test_missing_chunk_terminator() {
        let mut memory = vec![0xFFu8; 64];
        let regions = vec![ChunkRegion { base: 0x1000, memory: &mut memory }];
        let mut loader = BundleLoader::new(regions, CHUNK, Endian::Little).unwrap();
        let mut callback = |_: &str| -> Result<u32, CallbackError> { Ok(4) };
        assert!(matches!(
            loader.init(&mut callback),
            Err(LoadError::MissingChunkTerminator)
        ));
    }

    /// One 48-byte chunk whose start word points at offset 48, one past
    /// the end of the chunk
    fn start_past_chunk_end() -> Vec<u8> {
        let layout = PositionLayout::for_chunk_size(48).unwrap();
        let start = layout.encode(0, 0, flags::UNRESOLVED).unwrap().raw() | 48;
        let mut writer = BundleWriter::new(Endian::Little);
        writer.emit_u32(CHUNK_PLACEHOLDER);
        writer.emit_u32(0);
        writer.emit_u32(start);
        writer.emit_u32(0);
        writer.pad_to(48);
        writer.into_bytes()
    }

    #[test]
    fn test_offset_at_chunk_end_rejected() {
        for base in [0x1000, 0xFFFF_FFD0] {
            let mut memory = start_past_chunk_end();
            let regions = vec![ChunkRegion { base, memory: &mut memory }];
            let mut loader = BundleLoader::new(regions, 48, Endian::Little).unwrap();
            let mut callback = |_: &str| -> Result<u32, CallbackError> { Ok(4) };
            let result = loader.init(&mut callback);
            assert!(
                matches!(
                    result,
                    Err(LoadError::OffsetOutOfRange { block: 0, offset: 48, len: 48 })
                ),
                "base {:#x}: {:?}",
                base,
                result
            );
        }
    }

    #[test]
    fn test_fixup_entry_block_out_of_range() {
        let (mut first, mut second) = two_chunk_bundle();
        first[20..24].copy_from_slice(&position(5, 0, 0).to_le_bytes());
        let regions = vec![
            ChunkRegion { base: 0x1000, memory: &mut first },
            ChunkRegion { base: 0x8000, memory: &mut second },
        ];
        let mut loader = BundleLoader::new(regions, CHUNK, Endian::Little).unwrap();
        let mut callback = |_: &str| -> Result<u32, CallbackError> { Ok(4) };
        assert!(matches!(
            loader.init(&mut callback),
            Err(LoadError::BlockOutOfRange { block: 5, regions: 2, .. })
        ));
    }

    #[test]
    fn test_slot_target_outside_short_region() {
        let (mut first, mut second) = two_chunk_bundle();
        // root slot 0 now targets offset 40 of a region cut down to 32 bytes
        first[32..36].copy_from_slice(&position(1, 40, flags::UNRESOLVED).to_le_bytes());
        second.truncate(32);
        let regions = vec![
            ChunkRegion { base: 0x1000, memory: &mut first },
            ChunkRegion { base: 0x8000, memory: &mut second },
        ];
        let mut loader = BundleLoader::new(regions, CHUNK, Endian::Little).unwrap();
        let mut callback = |_: &str| -> Result<u32, CallbackError> { Ok(4) };
        assert!(matches!(
            loader.init(&mut callback),
            Err(LoadError::OffsetOutOfRange { block: 1, offset: 40, len: 32 })
        ));
    }

    #[test]
    fn test_callback_failures() {
        let (mut first, mut second) = two_chunk_bundle();
        let regions = vec![
            ChunkRegion { base: 0x1000, memory: &mut first },
            ChunkRegion { base: 0x8000, memory: &mut second },
        ];
        let mut loader = BundleLoader::new(regions, CHUNK, Endian::Little).unwrap();

        let mut odd = |_: &str| -> Result<u32, CallbackError> { Ok(0x4001) };
        assert!(matches!(
            loader.init(&mut odd),
            Err(LoadError::BadAddress { address: 0x4001, .. })
        ));

        let mut failing = |name: &str| -> Result<u32, CallbackError> {
            Err(format!("{} is missing", name).into())
        };
        match loader.init(&mut failing) {
            Err(LoadError::Callback { name, source }) => {
                assert_eq!(name, "song.ogg");
                assert_eq!(source.to_string(), "song.ogg is missing");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_null_start() {
        let (mut first, _) = two_chunk_bundle();
        // Shrink the chunk table to one entry so only region 0 is needed
        first[4..8].copy_from_slice(&0u32.to_le_bytes());
        let regions = vec![ChunkRegion { base: 0x1000, memory: &mut first }];
        let mut loader = BundleLoader::new(regions, CHUNK, Endian::Little).unwrap();
        let mut callback = |_: &str| -> Result<u32, CallbackError> { Ok(4) };
        // start word is now read from offset 8, which holds 0
        assert!(matches!(loader.init(&mut callback), Err(LoadError::NullStart)));
    }
}
