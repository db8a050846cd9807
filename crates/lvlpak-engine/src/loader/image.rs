//! Chunked in-memory image of a bundle file

use crate::format::{BundleReader, Endian, PositionLayout, WORD};

use super::{BundleLoader, ChunkRegion, LoadError};

/// A bundle file split into chunk-sized, zero-filled buffers, ready to be
/// handed to a [`BundleLoader`] at arbitrary base addresses
#[derive(Debug, Clone)]
pub struct ChunkImage {
    chunks: Vec<Vec<u8>>,
    chunk_size: u32,
    endian: Endian,
}

impl ChunkImage {
    /// Split `bytes` into chunks. The chunk count covers both the chunk
    /// table and the file length, so an end-mode fixup table placed past
    /// the last data chunk gets a region of its own.
    pub fn from_bytes(bytes: &[u8], chunk_size: u32, endian: Endian) -> Result<Self, LoadError> {
        PositionLayout::for_chunk_size(chunk_size)?;
        let listed = BundleReader::new(bytes, endian).read_chunk_table()? as usize;
        let cs = chunk_size as usize;
        let count = listed.max((bytes.len() + cs - 1) / cs);

        let chunks = (0..count)
            .map(|index| {
                let mut chunk = vec![0u8; cs];
                let start = (index * cs).min(bytes.len());
                let end = (start + cs).min(bytes.len());
                chunk[..end - start].copy_from_slice(&bytes[start..end]);
                chunk
            })
            .collect();
        Ok(Self {
            chunks,
            chunk_size,
            endian,
        })
    }

    /// Number of chunk buffers
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Chunk size
    pub fn chunk_size(&self) -> u32 {
        self.chunk_size
    }

    /// Bytes of chunk `index`
    pub fn chunk(&self, index: usize) -> Option<&[u8]> {
        self.chunks.get(index).map(Vec::as_slice)
    }

    /// Bases laying the chunks out back to back from `base`
    pub fn contiguous_bases(&self, base: u32) -> Vec<u32> {
        (0..self.chunks.len() as u32)
            .map(|i| base.wrapping_add(i.wrapping_mul(self.chunk_size)))
            .collect()
    }

    /// Pair each chunk with its base address
    pub fn regions(&mut self, bases: &[u32]) -> Result<Vec<ChunkRegion<'_>>, LoadError> {
        if bases.len() != self.chunks.len() {
            return Err(LoadError::RegionCountMismatch {
                expected: self.chunks.len(),
                actual: bases.len(),
            });
        }
        Ok(self
            .chunks
            .iter_mut()
            .zip(bases)
            .map(|(memory, &base)| ChunkRegion {
                base,
                memory: memory.as_mut_slice(),
            })
            .collect())
    }

    /// A loader over this image with chunk `i` at `bases[i]`
    pub fn loader(&mut self, bases: &[u32]) -> Result<BundleLoader<'_>, LoadError> {
        let chunk_size = self.chunk_size;
        let endian = self.endian;
        let regions = self.regions(bases)?;
        BundleLoader::new(regions, chunk_size, endian)
    }

    /// Word at byte `offset` of chunk `index`
    pub fn word(&self, index: usize, offset: u32) -> Option<u32> {
        let chunk = self.chunks.get(index)?;
        let at = offset as usize;
        let bytes = chunk.get(at..at + WORD as usize)?;
        Some(self.endian.read_u32([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }
}
