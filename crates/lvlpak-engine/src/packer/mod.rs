//! Bundle packer
//!
//! Lays the reachable sections and blobs of a [`CompiledProgram`] out into
//! fixed-size chunks and emits the bundle bytes:
//!
//! ```text
//! +----------------------------+  offset 0
//! | chunk table (placeholders) |  4 * (chunks + 1)
//! | start position             |  4
//! | fixup table position       |  4
//! | fixup table (front mode)   |  4 * (fixups + 1)
//! +----------------------------+
//! | packed items ...           |  first-fit, never crossing a chunk
//! +----------------------------+
//! | sector padding (optional)  |
//! | fixup table (end mode)     |
//! +----------------------------+
//! ```
//!
//! The header size depends on the chunk count, which depends on the layout,
//! which depends on the header size. The packer starts from an estimate and
//! re-places with a larger chunk table until the layout fits it.

pub mod layout;

use rustc_hash::FxHashSet;
use std::cmp::Reverse;
use std::fmt::Write as _;
use thiserror::Error;
use tracing::{debug, info, trace};

use crate::compiler::{CompiledProgram, Part, Section, SectionId};
use crate::config::{BundleConfig, FixupMode};
use crate::format::{
    flags, round_up, BundleWriter, Endian, Position, PositionError, PositionLayout, CHUNK_PLACEHOLDER,
    WORD,
};
use crate::store::BlobId;

use layout::{LayoutItem, Oversized};

/// Errors that can occur while laying out or emitting a bundle
#[derive(Debug, Error)]
pub enum PackError {
    /// Item bigger than one chunk
    #[error("{what} is {size} bytes, larger than the {chunk_size}-byte chunk")]
    OversizedItem { what: String, size: u64, chunk_size: u32 },

    /// More chunks than positions can address
    #[error("Bundle needs {chunks} chunks but at most {max} are addressable")]
    CapacityExceeded { chunks: u32, max: u32 },

    /// Header does not fit in the first chunk
    #[error("Header of {header_size} bytes does not fit in a {chunk_size}-byte chunk")]
    HeaderTooLarge { header_size: u64, chunk_size: u32 },

    /// End-mode fixup table does not fit in one chunk
    #[error("Fixup table of {size} bytes does not fit in a {chunk_size}-byte chunk")]
    FixupTableTooLarge { size: u64, chunk_size: u32 },

    /// End-mode fixup table pushed past the reserved block
    #[error("Fixup table lands in block {block}, past the block after the last of {chunks} chunks")]
    FixupTableUnaddressable { block: u32, chunks: u32 },

    /// Sector padding larger than a chunk
    #[error("Sector size {sector_size} is larger than the {chunk_size}-byte chunk")]
    SectorTooLarge { sector_size: u32, chunk_size: u32 },

    /// Header estimate never settled
    #[error("Layout did not converge after {passes} passes")]
    LayoutDidNotConverge { passes: u32 },

    /// Emitted length disagrees with the layout
    #[error("Bundle size mismatch: expected {expected} bytes, wrote {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// An item was placed twice
    #[error("Offset of '{0}' was already assigned")]
    OffsetAlreadyAssigned(String),

    /// A reference points at something that was never placed
    #[error("Reference to unplaced item '{0}'")]
    Unplaced(String),

    /// Position encoding failure
    #[error(transparent)]
    Position(#[from] PositionError),
}

/// Layout and emission settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PackOptions {
    /// Chunk size in bytes
    pub chunk_size: u32,
    /// Output byte order
    pub endian: Endian,
    /// Fixup table placement
    pub fixups: FixupMode,
    /// Hardware sector size (0 disables padding)
    pub sector_size: u32,
    /// Keep discovery order
    pub pinned_order: bool,
    /// Bound on header-estimate passes
    pub max_layout_passes: u32,
}

impl Default for PackOptions {
    fn default() -> Self {
        BundleConfig::default().pack_options()
    }
}

/// What a placement holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PlacementKind {
    /// A script section
    Section,
    /// A runtime file record
    Record,
    /// A data blob
    Blob,
}

impl std::fmt::Display for PlacementKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PlacementKind::Section => "section",
            PlacementKind::Record => "record",
            PlacementKind::Blob => "blob",
        })
    }
}

/// One placed item
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Placement {
    /// Absolute offset in the bundle
    pub offset: u32,
    /// Content size
    pub size: u32,
    /// Reserved size
    pub pad_size: u32,
    /// Item kind
    pub kind: PlacementKind,
    /// Section name or file name
    pub name: String,
}

/// A packed bundle
#[derive(Debug, Clone)]
pub struct PackedBundle {
    /// File contents
    pub bytes: Vec<u8>,
    /// Chunk size the bundle was packed for
    pub chunk_size: u32,
    /// Chunk table entries
    pub chunk_count: u32,
    /// Bytes before the first item
    pub header_size: u32,
    /// Fixup table entries
    pub fixup_count: usize,
    /// Offset of the fixup table, if one was written
    pub fixup_table: Option<u32>,
    /// Root position
    pub start: Position,
    /// Every placed item, by offset
    pub placements: Vec<Placement>,
    /// Unused bytes between items
    pub slack: u64,
    /// Header-estimate passes taken
    pub passes: u32,
}

impl PackedBundle {
    /// Text listing of the layout
    pub fn render_map(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# lvlpak map");
        let _ = writeln!(out, "chunk_size   {}", self.chunk_size);
        let _ = writeln!(out, "chunks       {}", self.chunk_count);
        let _ = writeln!(out, "header_size  {}", self.header_size);
        let _ = writeln!(out, "fixups       {}", self.fixup_count);
        let _ = writeln!(out, "slack        {}", self.slack);
        let _ = writeln!(out, "size         {}", self.bytes.len());
        let _ = writeln!(out);
        let _ = writeln!(
            out,
            "{:<10}  {:>5}  {:>8}  {:>8}  {:<7}  name",
            "offset", "block", "size", "pad", "kind"
        );
        for placement in &self.placements {
            let _ = writeln!(
                out,
                "{:#010x}  {:>5}  {:>8}  {:>8}  {:<7}  {}",
                placement.offset,
                placement.offset / self.chunk_size,
                placement.size,
                placement.pad_size,
                placement.kind.to_string(),
                placement.name
            );
        }
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Item {
    Section(SectionId),
    Blob(BlobId),
}

struct ItemInfo {
    item: Item,
    size: u32,
    pad_size: u32,
    alignment: u32,
    kind: PlacementKind,
    name: String,
}

/// Lays out and emits bundles
#[derive(Debug, Clone)]
pub struct Packer {
    options: PackOptions,
    layout: PositionLayout,
}

impl Packer {
    /// Create a packer; fails on an unusable chunk or sector size
    pub fn new(options: PackOptions) -> Result<Self, PackError> {
        let layout = PositionLayout::for_chunk_size(options.chunk_size)?;
        if options.sector_size > options.chunk_size {
            return Err(PackError::SectorTooLarge {
                sector_size: options.sector_size,
                chunk_size: options.chunk_size,
            });
        }
        Ok(Self { options, layout })
    }

    /// Options in use
    pub fn options(&self) -> &PackOptions {
        &self.options
    }

    /// Largest chunk count this packer accepts. One block index is kept
    /// free for an end-mode fixup table and the file must stay below 4 GiB.
    pub fn max_chunks(&self) -> u32 {
        let by_encoding = self.layout.max_blocks().saturating_sub(1);
        let by_size = (u32::MAX / self.options.chunk_size).saturating_sub(1);
        by_encoding.min(by_size)
    }

    /// Header size for `chunks` chunk table entries
    pub fn header_size(&self, chunks: u32, fixups: usize) -> u64 {
        let mut size = WORD as u64 * (chunks as u64 + 1) + 2 * WORD as u64;
        if self.options.fixups == FixupMode::Front {
            size += WORD as u64 * (fixups as u64 + 1);
        }
        size
    }

    /// Lay out and emit `program`. Offsets are committed into the program,
    /// so a program can only be packed once.
    pub fn pack(&self, program: &CompiledProgram) -> Result<PackedBundle, PackError> {
        let chunk_size = self.options.chunk_size;
        let items = self.collect(program);
        let fixup_count: usize = items
            .iter()
            .filter_map(|info| match info.item {
                Item::Section(id) => Some(program.section(id).reference_count()),
                Item::Blob(_) => None,
            })
            .sum();

        let layout_items: Vec<LayoutItem> = items
            .iter()
            .map(|info| LayoutItem {
                pad_size: info.pad_size,
                alignment: info.alignment,
            })
            .collect();
        let mut order: Vec<usize> = (0..items.len()).collect();
        if !self.options.pinned_order {
            order.sort_by_key(|&i| Reverse(items[i].pad_size));
        }

        // Every stored blob is reachable, so the store's running total
        // stands in for the blobs here
        let section_total: u64 = items
            .iter()
            .filter(|info| matches!(info.item, Item::Section(_)))
            .map(|info| info.pad_size as u64)
            .sum();
        let total = section_total + program.store.total_pad_size();
        let estimate = (self.header_size(1, fixup_count) + total).div_ceil(chunk_size as u64);
        let mut capacity = estimate.clamp(1, u32::MAX as u64) as u32;
        let mut passes = 0;
        let (layout, header_size) = loop {
            passes += 1;
            if passes > self.options.max_layout_passes {
                return Err(PackError::LayoutDidNotConverge {
                    passes: self.options.max_layout_passes,
                });
            }
            if capacity > self.max_chunks() {
                return Err(PackError::CapacityExceeded {
                    chunks: capacity,
                    max: self.max_chunks(),
                });
            }
            let header_size = self.header_size(capacity, fixup_count);
            if header_size > chunk_size as u64 {
                return Err(PackError::HeaderTooLarge {
                    header_size,
                    chunk_size,
                });
            }
            let layout = layout::place(&layout_items, &order, header_size as u32, chunk_size)
                .map_err(|Oversized { index }| PackError::OversizedItem {
                    what: format!("{} '{}'", items[index].kind, items[index].name),
                    size: items[index].pad_size as u64,
                    chunk_size,
                })?;
            debug!(pass = passes, capacity, used = layout.chunks_used, "layout pass");
            if layout.chunks_used <= capacity {
                break (layout, header_size as u32);
            }
            capacity = layout.chunks_used;
        };

        self.commit(program, &items, &layout.offsets)?;

        let mut writer = BundleWriter::with_capacity(
            self.options.endian,
            capacity as usize * chunk_size as usize,
        );
        for _ in 0..capacity {
            writer.emit_u32(CHUNK_PLACEHOLDER);
        }
        writer.emit_u32(0);

        let root = program.section(program.root);
        let root_offset = root
            .offset()
            .ok_or_else(|| PackError::Unplaced(root.name.clone()))?;
        let start = self.layout.encode_absolute(root_offset, flags::UNRESOLVED)?;
        writer.emit_position(start);
        let table_word = writer.reserve_u32();

        let mut slots = Vec::with_capacity(fixup_count);
        for info in &items {
            if let Item::Section(id) = info.item {
                let section = program.section(id);
                let base = section
                    .offset()
                    .ok_or_else(|| PackError::Unplaced(section.name.clone()))?;
                slots.extend(
                    section
                        .parts_with_offsets()
                        .filter(|(_, part)| part.is_reference())
                        .map(|(at, _)| base + at),
                );
            }
        }
        slots.sort_unstable();

        let mut fixup_table = None;
        if self.options.fixups == FixupMode::Front {
            fixup_table = Some(self.emit_fixup_table(&mut writer, table_word, &slots)?);
        }
        if writer.offset() != header_size {
            return Err(PackError::SizeMismatch {
                expected: header_size as u64,
                actual: writer.offset() as u64,
            });
        }

        let mut by_offset: Vec<usize> = (0..items.len()).collect();
        by_offset.sort_by_key(|&i| layout.offsets[i]);
        for &index in &by_offset {
            let info = &items[index];
            let offset = layout.offsets[index];
            writer.pad_to(offset);
            match info.item {
                Item::Section(id) => self.emit_section(&mut writer, program, program.section(id))?,
                Item::Blob(id) => writer.emit_bytes(program.store.bytes(id)),
            }
            writer.pad_to(offset + info.pad_size);
            trace!(offset, size = info.size, name = %info.name, "emitted item");
        }

        let chunk_bytes = capacity as u64 * chunk_size as u64;
        let end_pad = chunk_bytes - writer.offset() as u64;
        let mut tail_pad = 0u64;
        if self.options.sector_size > 0 {
            tail_pad += writer.align_to(self.options.sector_size) as u64;
        }
        let mut fixup_after = 0u64;
        if self.options.fixups == FixupMode::End {
            let table_len = WORD as u64 * (slots.len() as u64 + 1);
            if table_len > chunk_size as u64 {
                return Err(PackError::FixupTableTooLarge {
                    size: table_len,
                    chunk_size,
                });
            }
            let at = writer.offset();
            if (at % chunk_size) as u64 + table_len > chunk_size as u64 {
                tail_pad += writer.pad_to(round_up(at, chunk_size)) as u64;
            }
            let block = writer.offset() / chunk_size;
            if block > capacity {
                return Err(PackError::FixupTableUnaddressable {
                    block,
                    chunks: capacity,
                });
            }
            fixup_table = Some(self.emit_fixup_table(&mut writer, table_word, &slots)?);
            fixup_after = table_len;
        }

        let expected = chunk_bytes - end_pad + tail_pad + fixup_after;
        let bytes = writer.into_bytes();
        if bytes.len() as u64 != expected {
            return Err(PackError::SizeMismatch {
                expected,
                actual: bytes.len() as u64,
            });
        }

        let placements: Vec<Placement> = by_offset
            .iter()
            .map(|&i| Placement {
                offset: layout.offsets[i],
                size: items[i].size,
                pad_size: items[i].pad_size,
                kind: items[i].kind,
                name: items[i].name.clone(),
            })
            .collect();

        info!(
            chunks = capacity,
            items = placements.len(),
            fixups = slots.len(),
            size = bytes.len(),
            slack = layout.slack,
            "packed bundle"
        );
        Ok(PackedBundle {
            bytes,
            chunk_size,
            chunk_count: capacity,
            header_size,
            fixup_count: slots.len(),
            fixup_table,
            start,
            placements,
            slack: layout.slack,
            passes,
        })
    }

    /// Reachable sections and canonical blobs in discovery order
    fn collect(&self, program: &CompiledProgram) -> Vec<ItemInfo> {
        let pad = program.store.pad_size();
        let mut items = vec![Item::Section(program.root)];
        let mut seen_sections = FxHashSet::default();
        let mut seen_blobs = FxHashSet::default();
        seen_sections.insert(program.root);

        let mut next = 0;
        while next < items.len() {
            if let Item::Section(id) = items[next] {
                for part in &program.section(id).parts {
                    match part {
                        Part::SectionRef(target) | Part::RuntimeFileRef { section: target, .. } => {
                            if seen_sections.insert(*target) {
                                items.push(Item::Section(*target));
                            }
                        }
                        Part::BlobRef(blob) => {
                            let canonical = program.store.canonical(*blob);
                            if seen_blobs.insert(canonical) {
                                items.push(Item::Blob(canonical));
                            }
                        }
                        _ => {}
                    }
                }
            }
            next += 1;
        }

        items
            .into_iter()
            .map(|item| match item {
                Item::Section(id) => {
                    let section = program.section(id);
                    ItemInfo {
                        item,
                        size: section.size,
                        pad_size: round_up(section.size, pad),
                        alignment: section.alignment.unwrap_or(1),
                        kind: if section.runtime_file {
                            PlacementKind::Record
                        } else {
                            PlacementKind::Section
                        },
                        name: section.name.clone(),
                    }
                }
                Item::Blob(id) => {
                    let blob = program.store.blob(id);
                    ItemInfo {
                        item,
                        size: blob.size,
                        pad_size: blob.pad_size,
                        alignment: blob.alignment.unwrap_or(1),
                        kind: PlacementKind::Blob,
                        name: blob.name.clone().unwrap_or_else(|| format!("blob {}", id)),
                    }
                }
            })
            .collect()
    }

    /// Write the accepted offsets into the program (write-once)
    fn commit(&self, program: &CompiledProgram, items: &[ItemInfo], offsets: &[u32]) -> Result<(), PackError> {
        for (info, &offset) in items.iter().zip(offsets) {
            let already = match info.item {
                Item::Section(id) => program.section(id).offset.set(offset).is_err(),
                Item::Blob(id) => program.store.assign_offset(id, offset).is_err(),
            };
            if already {
                return Err(PackError::OffsetAlreadyAssigned(info.name.clone()));
            }
        }
        Ok(())
    }

    fn emit_section(
        &self,
        writer: &mut BundleWriter,
        program: &CompiledProgram,
        section: &Section,
    ) -> Result<(), PackError> {
        for part in &section.parts {
            match part {
                Part::Literal(bytes) => writer.emit_bytes(bytes),
                Part::BlobRef(id) => {
                    let offset = program.store.offset(*id).ok_or_else(|| {
                        PackError::Unplaced(
                            program.store.blob(*id).name.clone().unwrap_or_else(|| id.to_string()),
                        )
                    })?;
                    writer.emit_position(self.layout.encode_absolute(offset, flags::UNRESOLVED)?);
                }
                Part::SectionRef(id) => {
                    let target = program.section(*id);
                    let offset = target
                        .offset()
                        .ok_or_else(|| PackError::Unplaced(target.name.clone()))?;
                    writer.emit_position(self.layout.encode_absolute(offset, flags::UNRESOLVED)?);
                }
                Part::RuntimeFileRef { section: id, .. } => {
                    let record = program.section(*id);
                    let offset = record
                        .offset()
                        .ok_or_else(|| PackError::Unplaced(record.name.clone()))?;
                    writer.emit_position(
                        self.layout
                            .encode_absolute(offset, flags::UNRESOLVED | flags::IS_RUNTIME_FILE)?,
                    );
                }
                Part::Align { size, .. } => writer.emit_fill(0, *size),
                Part::Pad(count) => writer.emit_fill(0, *count),
            }
        }
        Ok(())
    }

    /// Emit the null-terminated fixup table at the writer's position and
    /// point the table word at it
    fn emit_fixup_table(
        &self,
        writer: &mut BundleWriter,
        table_word: u32,
        slots: &[u32],
    ) -> Result<u32, PackError> {
        let at = writer.offset();
        let pointer = self.layout.encode_absolute(at, flags::UNRESOLVED)?;
        writer.patch_u32(table_word, pointer.raw());
        for &slot in slots {
            writer.emit_position(self.layout.encode_absolute(slot, flags::UNRESOLVED)?);
        }
        writer.emit_u32(0);
        Ok(at)
    }
}
