//! Lvlpak Engine
//!
//! This crate builds and loads relocatable chunked resource bundles:
//! - **Script**: lexer and reader for the section script format (`script` module)
//! - **Store**: content-addressed blob deduplication (`store` module)
//! - **Compiler**: expands scripts into a graph of sections (`compiler` module)
//! - **Packer**: lays sections and blobs out into fixed-size chunks (`packer` module)
//! - **Loader**: resolves a resident bundle's positions into addresses (`loader` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use lvlpak_engine::{BundleConfig, Build, DiskFiles};
//!
//! let config = BundleConfig::default();
//! let mut build = Build::new(&config, &DiskFiles);
//! let bundle = build.run("levels/main.lvs".as_ref())?;
//! std::fs::write("main.lvl", &bundle.bytes)?;
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// ============================================================================
// Core Modules
// ============================================================================

/// Binary format primitives: positions, endianness, writer and reader
pub mod format;

/// Content-addressed blob storage
pub mod store;

/// Section script lexer, reader and file access
pub mod script;

/// Section compiler
pub mod compiler;

/// Chunk layout and bundle emission
pub mod packer;

/// Runtime bundle loader
pub mod loader;

// ============================================================================
// Pipeline
// ============================================================================

/// Build configuration (`lvlpak.toml`)
pub mod config;

/// Error rendering with source excerpts
pub mod diagnostics;

/// Build errors and warnings
pub mod error;

/// Script → sections → bundle pipeline
pub mod build;

pub use build::{Build, BuildStats};
pub use compiler::{CompiledProgram, Part, Section, SectionCompiler, SectionId};
pub use config::{BundleConfig, BundleSettings, ConfigError, DuplicatePolicy, FixupMode};
pub use error::{BuildError, BuildErrorKind, Warning, WarningKind};
pub use format::{Endian, Position, PositionLayout, Slot};
pub use loader::{BundleLoader, ChunkImage, ChunkRegion, FileLoader, LoadError, LoadOutcome};
pub use packer::{PackError, PackOptions, PackedBundle, Packer};
pub use script::{DiskFiles, FileSource, MemoryFiles, SectionTable};
pub use store::{BlobId, ContentStore, StoreError};
