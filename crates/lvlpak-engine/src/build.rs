//! Build pipeline
//!
//! Script → sections → bundle. A [`Build`] owns the source map so that
//! errors and warnings raised at any stage can be rendered afterwards.

use serde::Serialize;
use std::path::Path;
use tracing::info;

use crate::compiler::SectionCompiler;
use crate::config::BundleConfig;
use crate::diagnostics::SourceMap;
use crate::error::{BuildError, Warning};
use crate::packer::{PackedBundle, Packer, PlacementKind};
use crate::script::{FileSource, ScriptReader};

/// Figures reported after a successful build
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BuildStats {
    /// Distinct blobs stored
    pub blobs: usize,
    /// Blob requests answered by an existing blob
    pub dedup_hits: usize,
    /// Sections placed, runtime file records included
    pub sections: usize,
    /// Unused bytes between placed items
    pub slack: u64,
    /// Chunks in the bundle
    pub chunks: u32,
    /// Bundle size in bytes
    pub size: usize,
}

/// One run of the build pipeline
pub struct Build<'a> {
    config: &'a BundleConfig,
    files: &'a dyn FileSource,
    sources: SourceMap,
    warnings: Vec<Warning>,
    stats: Option<BuildStats>,
}

impl<'a> Build<'a> {
    /// Create a build reading through `files`
    pub fn new(config: &'a BundleConfig, files: &'a dyn FileSource) -> Self {
        Self {
            config,
            files,
            sources: SourceMap::new(),
            warnings: Vec::new(),
            stats: None,
        }
    }

    /// Read the script at `path`, compile from the configured root and pack
    pub fn run(&mut self, path: &Path) -> Result<PackedBundle, BuildError> {
        let config = self.config;
        let settings = &config.bundle;
        let mut reader = ScriptReader::new(
            self.files,
            &mut self.sources,
            &config.defines,
            settings.duplicate_sections,
        );
        let read = reader.read_file(path);
        let (table, warnings) = reader.finish();
        self.warnings.extend(warnings);
        read?;

        let program = SectionCompiler::new(&table, self.files, config).compile(&settings.root)?;
        self.warnings.extend(program.warnings.iter().cloned());

        let bundle = Packer::new(config.pack_options())?.pack(&program)?;
        let stats = BuildStats {
            blobs: program.store.canonical_ids().count(),
            dedup_hits: program.store.dedup_hits(),
            sections: bundle
                .placements
                .iter()
                .filter(|p| p.kind != PlacementKind::Blob)
                .count(),
            slack: bundle.slack,
            chunks: bundle.chunk_count,
            size: bundle.bytes.len(),
        };
        info!(
            script = %path.display(),
            size = stats.size,
            chunks = stats.chunks,
            blobs = stats.blobs,
            dedup_hits = stats.dedup_hits,
            warnings = self.warnings.len(),
            "built bundle"
        );
        self.stats = Some(stats);
        Ok(bundle)
    }

    /// Every script file read so far
    pub fn sources(&self) -> &SourceMap {
        &self.sources
    }

    /// Warnings from every stage that ran
    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    /// Statistics of the last successful run
    pub fn stats(&self) -> Option<BuildStats> {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BuildErrorKind, WarningKind};
    use crate::script::MemoryFiles;

    fn config() -> BundleConfig {
        let mut config = BundleConfig::default();
        config.bundle.chunk_size = 2048;
        config
    }

    #[test]
    fn test_run_reports_stats() {
        let files = MemoryFiles::new()
            .with("lv/main.lvs", "[root]\nfile a.bin\nfile b.bin\nlevel child\n[child]\nlong 1\n")
            .with("lv/a.bin", vec![7u8; 10])
            .with("lv/b.bin", vec![7u8; 10]);
        let config = config();
        let mut build = Build::new(&config, &files);
        let bundle = build.run(Path::new("lv/main.lvs")).unwrap();
        let stats = build.stats().unwrap();
        assert_eq!(stats.blobs, 1);
        assert_eq!(stats.dedup_hits, 1);
        assert_eq!(stats.sections, 2);
        assert_eq!(stats.chunks, 1);
        assert_eq!(stats.size, bundle.bytes.len());
        assert_eq!(build.sources().len(), 1);
    }

    #[test]
    fn test_warnings_from_reader_and_compiler() {
        let files = MemoryFiles::new()
            .with("main.lvs", "[root]\nbinc empty.bin\n[root]\nlong 2\n")
            .with("empty.bin", Vec::new());
        let mut config = config();
        config.bundle.duplicate_sections = crate::config::DuplicatePolicy::Ignore;
        let mut build = Build::new(&config, &files);
        build.run(Path::new("main.lvs")).unwrap();
        let kinds: Vec<&WarningKind> = build.warnings().iter().map(|w| &w.kind).collect();
        assert!(matches!(kinds[0], WarningKind::DuplicateSectionIgnored(name) if name == "root"));
        assert!(matches!(kinds[1], WarningKind::ZeroLengthItem { .. }));
    }

    #[test]
    fn test_missing_script() {
        let files = MemoryFiles::new();
        let config = config();
        let mut build = Build::new(&config, &files);
        let err = build.run(Path::new("nope.lvs")).unwrap_err();
        assert!(matches!(err.kind, BuildErrorKind::Io { .. }));
        assert!(build.stats().is_none());
    }

    #[test]
    fn test_missing_root() {
        let files = MemoryFiles::new().with("main.lvs", "[other]\nlong 1\n");
        let config = config();
        let mut build = Build::new(&config, &files);
        let err = build.run(Path::new("main.lvs")).unwrap_err();
        assert!(matches!(err.kind, BuildErrorKind::UnresolvableReference { .. }));
    }
}
