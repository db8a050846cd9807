//! Section scripts
//!
//! A script is a list of `[name]` sections, each holding `keyword args…`
//! lines. This module reads scripts into a [`SectionTable`]; the
//! [`crate::compiler`] gives the keywords their meaning.

mod files;
mod lexer;
mod reader;

pub use files::{normalize, DiskFiles, FileSource, MemoryFiles};
pub use lexer::{tokenize, LexError, Token};
pub use reader::{
    substitute, Arg, Origin, ScriptLine, ScriptReader, ScriptSection, SectionTable,
};
