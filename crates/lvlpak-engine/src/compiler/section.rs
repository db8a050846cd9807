//! Sections and their parts

use once_cell::unsync::OnceCell;

use crate::error::BuildErrorKind;
use crate::format::{round_up, WORD};
use crate::script::Origin;
use crate::store::BlobId;

/// Index of a section in a [`super::CompiledProgram`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SectionId(u32);

impl SectionId {
    pub(crate) fn new(index: usize) -> Self {
        SectionId(index as u32)
    }

    /// Arena index
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for SectionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// One piece of a section's contents
#[derive(Debug, Clone, PartialEq)]
pub enum Part {
    /// Bytes copied verbatim
    Literal(Vec<u8>),
    /// Position of a blob
    BlobRef(BlobId),
    /// Position of another section
    SectionRef(SectionId),
    /// Position of the synthesized record for a runtime-loaded file
    RuntimeFileRef {
        /// Filename handed to the runtime loader
        name: String,
        /// The `load:<name>` record section
        section: SectionId,
    },
    /// Zero bytes bringing the section size to a multiple of `boundary`
    Align {
        /// Requested boundary
        boundary: u32,
        /// Bytes emitted at the current position
        size: u32,
    },
    /// Zero bytes
    Pad(u32),
}

impl Part {
    /// Bytes this part occupies
    pub fn size(&self) -> u32 {
        match self {
            Part::Literal(bytes) => bytes.len() as u32,
            Part::BlobRef(_) | Part::SectionRef(_) | Part::RuntimeFileRef { .. } => WORD,
            Part::Align { size, .. } => *size,
            Part::Pad(count) => *count,
        }
    }

    /// Whether the part is a 4-byte reference slot needing a fixup
    pub fn is_reference(&self) -> bool {
        matches!(
            self,
            Part::BlobRef(_) | Part::SectionRef(_) | Part::RuntimeFileRef { .. }
        )
    }
}

/// A named, ordered list of parts placed as one item
#[derive(Debug, Clone)]
pub struct Section {
    /// Section name (`load:<file>` for runtime file records)
    pub name: String,
    /// Contents in order
    pub parts: Vec<Part>,
    /// Sum of part sizes
    pub size: u32,
    /// Alignment relative to the chunk the section lands in
    pub alignment: Option<u32>,
    /// Header line, if the section came from a script
    pub origin: Option<Origin>,
    /// Whether this is a synthesized runtime file record
    pub runtime_file: bool,
    pub(crate) offset: OnceCell<u32>,
}

impl Section {
    /// An empty section
    pub fn new(name: impl Into<String>, alignment: Option<u32>, origin: Option<Origin>) -> Self {
        Self {
            name: name.into(),
            parts: Vec::new(),
            size: 0,
            alignment,
            origin,
            runtime_file: false,
            offset: OnceCell::new(),
        }
    }

    /// The record section for a runtime-loaded file: a zero cache word
    /// followed by the NUL-terminated filename
    pub fn runtime_file_record(filename: &str) -> Self {
        let mut name = filename.as_bytes().to_vec();
        name.push(0);
        let mut section = Section::new(format!("load:{}", filename), None, None);
        section.runtime_file = true;
        section.parts.push(Part::Literal(vec![0; WORD as usize]));
        section.parts.push(Part::Literal(name));
        section.size = section.parts.iter().map(Part::size).sum();
        section
    }

    /// Append a part. `Align` sizes are recomputed against the current
    /// size; reference parts must land on a word boundary.
    pub fn push(&mut self, part: Part) -> Result<(), BuildErrorKind> {
        let part = match part {
            Part::Align { boundary, .. } => Part::Align {
                boundary,
                size: round_up(self.size, boundary) - self.size,
            },
            other => other,
        };
        if part.is_reference() && self.size % WORD != 0 {
            return Err(BuildErrorKind::MisalignedReference {
                section: self.name.clone(),
                offset: self.size,
            });
        }
        self.size = self.size.saturating_add(part.size());
        self.parts.push(part);
        Ok(())
    }

    /// Parts paired with their byte offset inside the section
    pub fn parts_with_offsets(&self) -> impl Iterator<Item = (u32, &Part)> {
        self.parts.iter().scan(0u32, |at, part| {
            let offset = *at;
            *at += part.size();
            Some((offset, part))
        })
    }

    /// Number of reference parts
    pub fn reference_count(&self) -> usize {
        self.parts.iter().filter(|part| part.is_reference()).count()
    }

    /// Placed offset, once the packer has committed a layout
    pub fn offset(&self) -> Option<u32> {
        self.offset.get().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_is_recomputed_on_push() {
        let mut section = Section::new("s", None, None);
        section.push(Part::Literal(vec![1, 2, 3])).unwrap();
        section.push(Part::Align { boundary: 8, size: 99 }).unwrap();
        assert_eq!(section.parts[1], Part::Align { boundary: 8, size: 5 });
        assert_eq!(section.size, 8);

        section.push(Part::Align { boundary: 8, size: 0 }).unwrap();
        assert_eq!(section.parts[2], Part::Align { boundary: 8, size: 0 });
    }

    #[test]
    fn test_misaligned_reference() {
        let mut section = Section::new("s", None, None);
        section.push(Part::Literal(vec![0; 2])).unwrap();
        let err = section.push(Part::SectionRef(SectionId::new(0))).unwrap_err();
        assert!(matches!(
            err,
            BuildErrorKind::MisalignedReference { offset: 2, .. }
        ));
        section.push(Part::Pad(2)).unwrap();
        section.push(Part::SectionRef(SectionId::new(0))).unwrap();
        assert_eq!(section.size, 8);
        assert_eq!(section.reference_count(), 1);
    }

    #[test]
    fn test_runtime_file_record() {
        let record = Section::runtime_file_record("music.bin");
        assert_eq!(record.name, "load:music.bin");
        assert!(record.runtime_file);
        assert_eq!(record.size, 4 + 9 + 1);
        let offsets: Vec<u32> = record.parts_with_offsets().map(|(at, _)| at).collect();
        assert_eq!(offsets, vec![0, 4]);
    }
}
