//! Script keywords

/// A recognised script keyword
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keyword {
    /// `file` / `data`: reference a deduplicated blob
    File,
    /// `level` / `pntr`: reference another section
    Level,
    /// `load`: reference a file the runtime loads on demand
    Load,
    /// `long`: 32-bit integers
    Long,
    /// `word`: 16-bit integers
    Word,
    /// `byte`: 8-bit integers
    Byte,
    /// `float`: IEEE-754 singles
    Float,
    /// `string`: raw string bytes
    String,
    /// `binc`: inline a file's bytes
    Binc,
    /// `align`: pad the section to a boundary
    Align,
    /// `pad`: zero bytes
    Pad,
    /// `path`: base directory for later file lines of the section
    Path,
    /// `insert`: splice another section's parts
    Insert,
}

impl Keyword {
    /// Look up a lower-cased keyword
    pub fn parse(word: &str) -> Option<Self> {
        Some(match word {
            "file" | "data" => Keyword::File,
            "level" | "pntr" => Keyword::Level,
            "load" => Keyword::Load,
            "long" => Keyword::Long,
            "word" => Keyword::Word,
            "byte" => Keyword::Byte,
            "float" => Keyword::Float,
            "string" => Keyword::String,
            "binc" => Keyword::Binc,
            "align" => Keyword::Align,
            "pad" => Keyword::Pad,
            "path" => Keyword::Path,
            "insert" => Keyword::Insert,
            _ => return None,
        })
    }

    /// Width in bytes of one value for the numeric keywords
    pub fn element_width(self) -> Option<u32> {
        match self {
            Keyword::Long | Keyword::Float => Some(4),
            Keyword::Word => Some(2),
            Keyword::Byte => Some(1),
            _ => None,
        }
    }

    /// Accepted integer range (signed minimum, unsigned maximum)
    pub(crate) fn int_range(self) -> Option<(i64, i64)> {
        match self {
            Keyword::Long => Some((i32::MIN as i64, u32::MAX as i64)),
            Keyword::Word => Some((i16::MIN as i64, u16::MAX as i64)),
            Keyword::Byte => Some((i8::MIN as i64, u8::MAX as i64)),
            _ => None,
        }
    }
}
