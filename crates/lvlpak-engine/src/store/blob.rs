//! Blob records

use once_cell::unsync::OnceCell;

/// Index of a blob inside a [`super::ContentStore`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlobId(u32);

impl BlobId {
    pub(crate) fn new(index: usize) -> Self {
        BlobId(index as u32)
    }

    /// Arena index
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for BlobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Where a blob's bytes live
#[derive(Debug)]
pub enum Storage {
    /// Canonical blob owning its bytes
    Owned(Vec<u8>),
    /// Same content as another (canonical) blob
    Alias(BlobId),
}

/// An immutable byte sequence placed once in the bundle
#[derive(Debug)]
pub struct Blob {
    /// Filename the blob was loaded from, if any
    pub name: Option<String>,
    /// Byte length
    pub size: u32,
    /// Length rounded up to the pad granularity
    pub pad_size: u32,
    /// Required alignment relative to the chunk it lands in
    pub alignment: Option<u32>,
    /// Lookup hash (content sum, or a unique counter when dedup is off)
    pub hash: u32,
    /// Bytes or canonical link
    pub storage: Storage,
    /// Absolute bundle offset, assigned once by the packer
    pub(crate) offset: OnceCell<u32>,
}

impl Blob {
    /// Whether this blob owns its bytes
    pub fn is_canonical(&self) -> bool {
        matches!(self.storage, Storage::Owned(_))
    }
}
