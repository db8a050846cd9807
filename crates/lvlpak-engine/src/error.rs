//! Build errors and warnings
//!
//! Every error raised between reading a script and emitting a bundle is a
//! [`BuildError`]: a [`BuildErrorKind`] plus the script line it came from,
//! when there is one. Warnings never stop a build; they are collected and
//! reported with the final summary.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

use crate::packer::PackError;
use crate::script::Origin;
use crate::store::StoreError;

/// What a failed reference pointed at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefKind {
    /// A named section
    Section,
    /// A data file
    File,
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RefKind::Section => f.write_str("section"),
            RefKind::File => f.write_str("file"),
        }
    }
}

/// Build error kinds
#[derive(Debug, Error)]
pub enum BuildErrorKind {
    /// Malformed script line
    #[error("Syntax error: {0}")]
    Syntax(String),

    /// `$(NAME)` with no definition
    #[error("Undefined variable $({0})")]
    UndefinedVariable(String),

    /// Keyword the compiler does not know
    #[error("Unknown keyword '{0}'")]
    UnknownKeyword(String),

    /// Keyword argument missing, mistyped or out of range
    #[error("Invalid argument for '{keyword}': {message}")]
    InvalidArgument { keyword: String, message: String },

    /// Section or file that cannot be found
    #[error("Unresolvable reference to {kind} '{name}'")]
    UnresolvableReference { kind: RefKind, name: String },

    /// Section header seen twice under the `error` policy
    #[error("Section '{0}' is defined more than once")]
    DuplicateSection(String),

    /// `level`/`pntr` back into a section still being compiled
    #[error("Cyclic section reference: {0}")]
    CyclicSection(String),

    /// `insert` of a section into itself, directly or indirectly
    #[error("Cyclic insert of section '{0}'")]
    CyclicInsert(String),

    /// Section bigger than one chunk
    #[error("{what} is {size} bytes, larger than the {chunk_size}-byte chunk")]
    OversizedItem { what: String, size: u64, chunk_size: u32 },

    /// Reference slot not on a word boundary within its section
    #[error("Reference in section '{section}' at offset {offset} is not 4-byte aligned")]
    MisalignedReference { section: String, offset: u32 },

    /// Content store failure (alignment conflicts)
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Layout or emission failure
    #[error(transparent)]
    Pack(#[from] PackError),

    /// File read failure
    #[error("Cannot read '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl BuildErrorKind {
    /// Stable error code shown in diagnostics
    pub fn code(&self) -> &'static str {
        match self {
            BuildErrorKind::Syntax(_) => "E0001",
            BuildErrorKind::UndefinedVariable(_) => "E0002",
            BuildErrorKind::UnknownKeyword(_) => "E0003",
            BuildErrorKind::InvalidArgument { .. } => "E0004",
            BuildErrorKind::UnresolvableReference { .. } => "E0005",
            BuildErrorKind::DuplicateSection(_) => "E0006",
            BuildErrorKind::CyclicSection(_) => "E0007",
            BuildErrorKind::CyclicInsert(_) => "E0008",
            BuildErrorKind::OversizedItem { .. } => "E0009",
            BuildErrorKind::MisalignedReference { .. } => "E0010",
            BuildErrorKind::Store(StoreError::AlignmentConflict { .. }) => "E0011",
            BuildErrorKind::Store(_) => "E0012",
            BuildErrorKind::Pack(PackError::CapacityExceeded { .. }) => "E0013",
            BuildErrorKind::Pack(PackError::OversizedItem { .. }) => "E0009",
            BuildErrorKind::Pack(_) => "E0014",
            BuildErrorKind::Io { .. } => "E0015",
        }
    }
}

/// A fatal build error with its source location
#[derive(Debug, Error)]
#[error("{kind}")]
pub struct BuildError {
    /// What went wrong
    #[source]
    pub kind: BuildErrorKind,
    /// Script line responsible, if known
    pub origin: Option<Origin>,
}

impl BuildError {
    /// Error without a location
    pub fn new(kind: BuildErrorKind) -> Self {
        Self { kind, origin: None }
    }

    /// Error attributed to a script line
    pub fn at(kind: BuildErrorKind, origin: &Origin) -> Self {
        Self {
            kind,
            origin: Some(origin.clone()),
        }
    }

    /// Attach `origin` unless a more specific one is already present
    pub fn or_at(mut self, origin: &Origin) -> Self {
        if self.origin.is_none() {
            self.origin = Some(origin.clone());
        }
        self
    }
}

impl From<BuildErrorKind> for BuildError {
    fn from(kind: BuildErrorKind) -> Self {
        Self::new(kind)
    }
}

impl From<StoreError> for BuildError {
    fn from(error: StoreError) -> Self {
        Self::new(error.into())
    }
}

impl From<PackError> for BuildError {
    fn from(error: PackError) -> Self {
        Self::new(error.into())
    }
}

/// Warning kinds
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WarningKind {
    /// Empty section or data file
    ZeroLengthItem { what: String },
    /// Second definition of a section dropped under the `ignore` policy
    DuplicateSectionIgnored(String),
}

impl fmt::Display for WarningKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WarningKind::ZeroLengthItem { what } => write!(f, "{} is empty", what),
            WarningKind::DuplicateSectionIgnored(name) => {
                write!(f, "duplicate section '{}' ignored; keeping the first definition", name)
            }
        }
    }
}

/// A non-fatal build diagnostic
#[derive(Debug, Clone, PartialEq)]
pub struct Warning {
    /// What was noticed
    pub kind: WarningKind,
    /// Script line responsible, if known
    pub origin: Option<Origin>,
}

impl Warning {
    /// Warning attributed to an optional script line
    pub fn new(kind: WarningKind, origin: Option<&Origin>) -> Self {
        Self {
            kind,
            origin: origin.cloned(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.origin {
            Some(origin) => write!(f, "{}: {}", origin, self.kind),
            None => write!(f, "{}", self.kind),
        }
    }
}
