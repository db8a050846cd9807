//! Content store
//!
//! Deduplicates blobs by content. Every distinct byte sequence is stored once
//! (its *canonical* blob); later blobs with identical bytes, or interned under
//! a filename already seen, become aliases that share the canonical's offset.
//!
//! The lookup hash is deliberately cheap and order-insensitive (a wrapping
//! sum of little-endian words), so every hash hit is confirmed by comparing
//! sizes and bytes before two blobs are aliased.

mod blob;

pub use blob::{Blob, BlobId, Storage};

use rustc_hash::FxHashMap;
use thiserror::Error;
use tracing::trace;

use crate::format::round_up;

/// Errors that can occur while interning or placing blobs
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The same file was requested with incompatible alignments
    #[error("Alignment conflict for '{name}': {existing} and {requested} do not divide each other")]
    AlignmentConflict {
        name: String,
        existing: u32,
        requested: u32,
    },

    /// Alignment that is neither a divisor nor a multiple of 4
    #[error("Invalid alignment {0}: must be 1, 2 or a multiple of 4")]
    InvalidAlignment(u32),

    /// Offset written twice
    #[error("Offset of blob {0} was already assigned")]
    OffsetAlreadyAssigned(BlobId),
}

/// Check that an alignment can be honored on word-aligned offsets.
pub fn validate_alignment(alignment: u32) -> Result<u32, StoreError> {
    match alignment {
        0 => Err(StoreError::InvalidAlignment(0)),
        1 | 2 => Ok(alignment),
        n if n % 4 == 0 => Ok(n),
        n => Err(StoreError::InvalidAlignment(n)),
    }
}

/// Merge two alignment requirements: the larger wins if it is a multiple of
/// the smaller, otherwise `None`.
pub fn merge_alignment(a: Option<u32>, b: Option<u32>) -> Option<Option<u32>> {
    match (a, b) {
        (None, other) | (other, None) => Some(other),
        (Some(x), Some(y)) if x % y == 0 => Some(Some(x)),
        (Some(x), Some(y)) if y % x == 0 => Some(Some(y)),
        _ => None,
    }
}

/// Content hash: wrapping sum of the little-endian words in `bytes`.
/// Trailing bytes that do not fill a word are ignored.
pub fn content_hash(bytes: &[u8]) -> u32 {
    bytes
        .chunks_exact(4)
        .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
        .fold(0u32, u32::wrapping_add)
}

/// Deduplicating blob store
#[derive(Debug)]
pub struct ContentStore {
    /// All blobs, canonical and alias
    blobs: Vec<Blob>,
    /// Canonical blobs bucketed by hash
    by_hash: FxHashMap<u32, Vec<BlobId>>,
    /// Blob interned under each filename
    by_name: FxHashMap<String, BlobId>,
    /// Content deduplication switch
    dedup: bool,
    /// Pad granularity for `PadSize`
    pad_size: u32,
    /// Next synthetic hash when dedup is off
    next_unique: u32,
    /// Sum of canonical pad sizes
    total_pad_size: u64,
    /// Interns satisfied by an existing canonical blob
    dedup_hits: usize,
}

impl ContentStore {
    /// Create an empty store. `pad_size` must be a non-zero multiple of 4.
    pub fn new(pad_size: u32, dedup: bool) -> Self {
        debug_assert!(pad_size != 0 && pad_size % 4 == 0);
        Self {
            blobs: Vec::new(),
            by_hash: FxHashMap::default(),
            by_name: FxHashMap::default(),
            dedup,
            pad_size,
            next_unique: 0,
            total_pad_size: 0,
            dedup_hits: 0,
        }
    }

    /// Number of blobs, aliases included
    pub fn len(&self) -> usize {
        self.blobs.len()
    }

    /// Whether nothing has been interned
    pub fn is_empty(&self) -> bool {
        self.blobs.is_empty()
    }

    /// Running total of canonical pad sizes
    pub fn total_pad_size(&self) -> u64 {
        self.total_pad_size
    }

    /// Interns answered by an existing blob
    pub fn dedup_hits(&self) -> usize {
        self.dedup_hits
    }

    /// Pad granularity
    pub fn pad_size(&self) -> u32 {
        self.pad_size
    }

    /// Look up a blob
    pub fn blob(&self, id: BlobId) -> &Blob {
        &self.blobs[id.index()]
    }

    /// Follow the alias chain to the canonical blob
    pub fn canonical(&self, id: BlobId) -> BlobId {
        match self.blobs[id.index()].storage {
            Storage::Owned(_) => id,
            Storage::Alias(target) => target,
        }
    }

    /// Bytes of a blob (through its canonical)
    pub fn bytes(&self, id: BlobId) -> &[u8] {
        match &self.blobs[self.canonical(id).index()].storage {
            Storage::Owned(bytes) => bytes,
            Storage::Alias(_) => unreachable!("alias chains are flattened"),
        }
    }

    /// Offset of a blob, once its canonical has been placed
    pub fn offset(&self, id: BlobId) -> Option<u32> {
        self.blobs[self.canonical(id).index()].offset.get().copied()
    }

    /// Iterate over canonical blob ids in creation order
    pub fn canonical_ids(&self) -> impl Iterator<Item = BlobId> + '_ {
        self.blobs
            .iter()
            .enumerate()
            .filter(|(_, blob)| blob.is_canonical())
            .map(|(index, _)| BlobId::new(index))
    }

    /// Blob previously interned under `name`, reconciling `alignment` with
    /// the alignment it already carries.
    pub fn find_by_name(
        &mut self,
        name: &str,
        alignment: Option<u32>,
    ) -> Result<Option<BlobId>, StoreError> {
        let Some(&id) = self.by_name.get(name) else {
            return Ok(None);
        };
        self.reconcile(id, name, alignment)?;
        self.dedup_hits += 1;
        Ok(Some(id))
    }

    /// Intern `bytes`, optionally under a filename and with an alignment
    /// requirement, returning the blob that represents them.
    pub fn intern(
        &mut self,
        bytes: Vec<u8>,
        name: Option<&str>,
        alignment: Option<u32>,
    ) -> Result<BlobId, StoreError> {
        if let Some(alignment) = alignment {
            validate_alignment(alignment)?;
        }
        if let Some(name) = name {
            if let Some(id) = self.find_by_name(name, alignment)? {
                return Ok(id);
            }
        }

        let hash = if self.dedup {
            content_hash(&bytes)
        } else {
            let unique = self.next_unique;
            self.next_unique = self.next_unique.wrapping_add(1);
            unique
        };

        if self.dedup {
            if let Some(canonical) = self.find_identical(hash, &bytes, alignment) {
                let id = BlobId::new(self.blobs.len());
                trace!(blob = %id, canonical = %canonical, "aliasing identical content");
                self.blobs.push(Blob {
                    name: name.map(str::to_string),
                    size: bytes.len() as u32,
                    pad_size: self.blob(canonical).pad_size,
                    alignment,
                    hash,
                    storage: Storage::Alias(canonical),
                    offset: Default::default(),
                });
                if let Some(name) = name {
                    self.by_name.insert(name.to_string(), id);
                }
                self.dedup_hits += 1;
                return Ok(id);
            }
        }

        let id = BlobId::new(self.blobs.len());
        let size = bytes.len() as u32;
        let pad_size = round_up(size, self.pad_size);
        self.total_pad_size += pad_size as u64;
        self.blobs.push(Blob {
            name: name.map(str::to_string),
            size,
            pad_size,
            alignment,
            hash,
            storage: Storage::Owned(bytes),
            offset: Default::default(),
        });
        self.by_hash.entry(hash).or_default().push(id);
        if let Some(name) = name {
            self.by_name.insert(name.to_string(), id);
        }
        trace!(blob = %id, size, hash = format_args!("{:#010x}", hash), "stored new blob");
        Ok(id)
    }

    /// Record the placed offset of a canonical blob (write-once)
    pub fn assign_offset(&self, id: BlobId, offset: u32) -> Result<(), StoreError> {
        let canonical = self.canonical(id);
        self.blobs[canonical.index()]
            .offset
            .set(offset)
            .map_err(|_| StoreError::OffsetAlreadyAssigned(canonical))
    }

    /// Find a canonical blob with byte-identical content whose alignment can
    /// absorb `alignment`, and widen its alignment if needed.
    fn find_identical(&mut self, hash: u32, bytes: &[u8], alignment: Option<u32>) -> Option<BlobId> {
        let candidates = self.by_hash.get(&hash)?;
        let found = candidates.iter().copied().find(|&candidate| {
            let blob = &self.blobs[candidate.index()];
            blob.size as usize == bytes.len()
                && matches!(&blob.storage, Storage::Owned(existing) if existing.as_slice() == bytes)
                && merge_alignment(blob.alignment, alignment).is_some()
        })?;
        let blob = &mut self.blobs[found.index()];
        if let Some(merged) = merge_alignment(blob.alignment, alignment) {
            blob.alignment = merged;
        }
        Some(found)
    }

    fn reconcile(&mut self, id: BlobId, name: &str, alignment: Option<u32>) -> Result<(), StoreError> {
        let canonical = self.canonical(id);
        let mut merged = [None; 2];
        for (slot, target) in merged.iter_mut().zip([id, canonical]) {
            let existing = self.blobs[target.index()].alignment;
            *slot = Some(merge_alignment(existing, alignment).ok_or_else(|| {
                StoreError::AlignmentConflict {
                    name: name.to_string(),
                    existing: existing.unwrap_or(1),
                    requested: alignment.unwrap_or(1),
                }
            })?);
        }
        for (target, value) in [id, canonical].into_iter().zip(merged) {
            if let Some(value) = value {
                self.blobs[target.index()].alignment = value;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_ignores_remainder_and_order() {
        assert_eq!(content_hash(&[1, 0, 0, 0, 2, 0, 0, 0]), 3);
        assert_eq!(content_hash(&[1, 0, 0, 0, 2, 0, 0, 0, 9]), 3);
        // Swapping words keeps the sum: collisions are expected
        assert_eq!(
            content_hash(&[2, 0, 0, 0, 1, 0, 0, 0]),
            content_hash(&[1, 0, 0, 0, 2, 0, 0, 0])
        );
        assert_eq!(content_hash(&[0xFF; 8]), 0xFFFF_FFFEu32);
    }

    #[test]
    fn test_identical_content_dedupes() {
        let mut store = ContentStore::new(4, true);
        let a = store.intern(vec![7; 100], Some("a.bin"), None).unwrap();
        let b = store.intern(vec![7; 100], Some("b.bin"), None).unwrap();
        assert_ne!(a, b);
        assert_eq!(store.canonical(b), a);
        assert_eq!(store.canonical_ids().count(), 1);
        assert_eq!(store.total_pad_size(), 100);
        assert_eq!(store.dedup_hits(), 1);

        store.assign_offset(b, 64).unwrap();
        assert_eq!(store.offset(a), Some(64));
        assert_eq!(store.offset(b), Some(64));
    }

    #[test]
    fn test_hash_collision_is_verified() {
        let mut store = ContentStore::new(4, true);
        let a = store.intern(vec![1, 0, 0, 0, 2, 0, 0, 0], None, None).unwrap();
        let b = store.intern(vec![2, 0, 0, 0, 1, 0, 0, 0], None, None).unwrap();
        assert_eq!(store.blob(a).hash, store.blob(b).hash);
        assert_eq!(store.canonical(b), b);
        assert_eq!(store.canonical_ids().count(), 2);
    }

    #[test]
    fn test_same_name_always_aliases() {
        let mut store = ContentStore::new(4, false);
        let a = store.intern(vec![1, 2, 3], Some("x.bin"), None).unwrap();
        let b = store.intern(vec![1, 2, 3], Some("x.bin"), None).unwrap();
        assert_eq!(a, b);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_dedup_disabled_keeps_copies() {
        let mut store = ContentStore::new(4, false);
        let a = store.intern(vec![5; 16], Some("a.bin"), None).unwrap();
        let b = store.intern(vec![5; 16], Some("b.bin"), None).unwrap();
        assert_eq!(store.canonical(a), a);
        assert_eq!(store.canonical(b), b);
        assert_ne!(store.blob(a).hash, store.blob(b).hash);
        assert_eq!(store.total_pad_size(), 32);
    }

    #[test]
    fn test_alignment_reconciliation() {
        let mut store = ContentStore::new(4, true);
        let a = store.intern(vec![0; 8], Some("t.bin"), Some(4)).unwrap();
        store.intern(vec![0; 8], Some("t.bin"), Some(16)).unwrap();
        assert_eq!(store.blob(a).alignment, Some(16));

        let err = store.intern(vec![0; 8], Some("t.bin"), Some(12)).unwrap_err();
        assert!(matches!(err, StoreError::AlignmentConflict { existing: 16, requested: 12, .. }));
    }

    #[test]
    fn test_incompatible_alignment_is_not_aliased() {
        let mut store = ContentStore::new(4, true);
        let a = store.intern(vec![3; 8], Some("a.bin"), Some(8)).unwrap();
        let b = store.intern(vec![3; 8], Some("b.bin"), Some(12)).unwrap();
        assert_eq!(store.canonical(b), b);
        assert_ne!(store.canonical(a), store.canonical(b));
    }

    #[test]
    fn test_invalid_alignment() {
        let mut store = ContentStore::new(4, true);
        assert_eq!(
            store.intern(vec![1], None, Some(6)),
            Err(StoreError::InvalidAlignment(6))
        );
        assert!(validate_alignment(2).is_ok());
        assert!(validate_alignment(24).is_ok());
    }

    #[test]
    fn test_offset_is_write_once() {
        let mut store = ContentStore::new(4, true);
        let a = store.intern(vec![1; 4], None, None).unwrap();
        store.assign_offset(a, 16).unwrap();
        assert_eq!(
            store.assign_offset(a, 32),
            Err(StoreError::OffsetAlreadyAssigned(a))
        );
        assert_eq!(store.offset(a), Some(16));
    }
}
