//! Chunk placement
//!
//! First-fit placement of items into fixed-size chunks. The cursor walks
//! forward through the bundle; at each step the first remaining item (in
//! the given order) whose aligned range fits before the end of the current
//! chunk is placed. When nothing fits, the rest of the chunk is skipped and
//! the first remaining item starts the next chunk. No item ever crosses a
//! chunk boundary.

use crate::format::round_up;

/// Size and alignment of one item to place
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LayoutItem {
    /// Bytes reserved for the item (its padded size)
    pub pad_size: u32,
    /// Alignment relative to the chunk start (1 if none)
    pub alignment: u32,
}

/// Result of one placement pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    /// Absolute offset of each item, indexed like the input items
    pub offsets: Vec<u32>,
    /// Chunks touched by the header and the placed items
    pub chunks_used: u32,
    /// Unused bytes between the header and the last item
    pub slack: u64,
    /// Offset just past the last placed byte
    pub end: u64,
}

/// An item larger than a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Oversized {
    /// Index of the offending item
    pub index: usize,
}

/// Place `items` in `order`, starting right after a header of
/// `header_size` bytes. Offsets are `u64`-checked and reported as `u32`;
/// callers bound the chunk count so every offset fits.
pub fn place(
    items: &[LayoutItem],
    order: &[usize],
    header_size: u32,
    chunk_size: u32,
) -> Result<Layout, Oversized> {
    if let Some(&index) = order.iter().find(|&&i| items[i].pad_size > chunk_size) {
        return Err(Oversized { index });
    }

    let chunk = chunk_size as u64;
    let mut offsets = vec![0u32; items.len()];
    let mut remaining: Vec<usize> = order.to_vec();
    let mut cursor = header_size as u64;
    let mut slack = 0u64;
    let mut last_block = if header_size == 0 { 0 } else { (cursor - 1) / chunk };

    while !remaining.is_empty() {
        let chunk_start = cursor / chunk * chunk;
        let chunk_end = chunk_start + chunk;

        let fit = remaining.iter().enumerate().find_map(|(slot, &index)| {
            let item = items[index];
            let at = chunk_start + aligned(cursor - chunk_start, item.alignment);
            (at < chunk_end && at + item.pad_size as u64 <= chunk_end).then_some((slot, at))
        });

        let (slot, at) = match fit {
            Some(found) => found,
            None => {
                // Skip the tail; offset 0 satisfies every alignment
                slack += chunk_end - cursor;
                cursor = chunk_end;
                (0, chunk_end)
            }
        };

        let index = remaining.remove(slot);
        slack += at - cursor;
        offsets[index] = at as u32;
        cursor = at + items[index].pad_size as u64;
        last_block = last_block.max(at / chunk);
    }

    Ok(Layout {
        offsets,
        chunks_used: (last_block + 1) as u32,
        slack,
        end: cursor,
    })
}

fn aligned(offset: u64, alignment: u32) -> u64 {
    if alignment <= 1 {
        offset
    } else {
        round_up(offset as u32, alignment) as u64
    }
}
