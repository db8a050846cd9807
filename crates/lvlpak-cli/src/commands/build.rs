//! `lvlpak build`: compile a section script into a bundle.

use anyhow::Context;
use clap::Args;
use std::path::{Path, PathBuf};

use lvlpak_engine::diagnostics::{summary, Diagnostic};
use lvlpak_engine::{Build, BundleConfig, DiskFiles, Endian, FixupMode};

use super::{parse_define, parse_u32};
use crate::output::StyledOutput;

/// Name of the config file looked up beside the script
pub const CONFIG_FILE: &str = "lvlpak.toml";

#[derive(Debug, Args)]
pub struct BuildArgs {
    /// Section script to build
    pub script: PathBuf,

    /// Output bundle (defaults to the script path with a .lvl extension)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Configuration file (defaults to lvlpak.toml beside the script)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Root section name
    #[arg(long)]
    pub root: Option<String>,

    /// Chunk size in bytes
    #[arg(long, value_parser = parse_u32)]
    pub chunk_size: Option<u32>,

    /// Blob padding granularity
    #[arg(long, value_parser = parse_u32)]
    pub pad_size: Option<u32>,

    /// Fixup table placement: front, end or none
    #[arg(long)]
    pub fixups: Option<FixupMode>,

    /// Store identical files separately
    #[arg(long)]
    pub no_dedup: bool,

    /// Place items in discovery order instead of largest first
    #[arg(long)]
    pub pinned: bool,

    /// Pad the bundle to a multiple of this many bytes
    #[arg(long, value_parser = parse_u32)]
    pub sector_size: Option<u32>,

    /// Byte order: little or big
    #[arg(long)]
    pub endian: Option<Endian>,

    /// Define a script variable
    #[arg(short = 'D', value_name = "NAME=VALUE", value_parser = parse_define)]
    pub define: Vec<(String, String)>,

    /// Write a layout map to this file
    #[arg(long)]
    pub map: Option<PathBuf>,
}

pub fn execute(args: BuildArgs, out: &mut StyledOutput) -> anyhow::Result<()> {
    let config = resolve_config(&args)?;
    let mut build = Build::new(&config, &DiskFiles);
    let result = build.run(&args.script);

    for warning in build.warnings() {
        Diagnostic::from_warning(warning).emit(out.stderr(), build.sources())?;
    }
    let warnings = build.warnings().len();

    let bundle = match result {
        Ok(bundle) => bundle,
        Err(error) => {
            Diagnostic::from_build_error(&error).emit(out.stderr(), build.sources())?;
            out.stderr_summary(&format!("build failed: {}", summary(1, warnings)), true);
            std::process::exit(1);
        }
    };

    let output = args
        .output
        .clone()
        .unwrap_or_else(|| args.script.with_extension("lvl"));
    std::fs::write(&output, &bundle.bytes)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    if let Some(map) = &args.map {
        std::fs::write(map, bundle.render_map())
            .with_context(|| format!("Failed to write {}", map.display()))?;
    }

    out.success("Built");
    out.plain(&format!(" {}", output.display()));
    out.newline();
    if let Some(stats) = build.stats() {
        out.field("  size", format!("{} bytes", stats.size));
        out.field("  chunks", format!("{} x {} bytes", stats.chunks, bundle.chunk_size));
        out.field("  sections", stats.sections);
        out.field("  blobs", format!("{} ({} dedup hits)", stats.blobs, stats.dedup_hits));
        out.field("  fixups", bundle.fixup_count);
        out.field("  slack", format!("{} bytes", stats.slack));
    }
    if let Some(map) = &args.map {
        out.info(&format!("  map written to {}", map.display()));
        out.newline();
    }
    out.flush();
    if warnings > 0 {
        out.stderr_summary(&summary(0, warnings), true);
    }
    Ok(())
}

/// Config file (explicit, beside the script, or defaults) with flag overrides
fn resolve_config(args: &BuildArgs) -> anyhow::Result<BundleConfig> {
    let beside = args
        .script
        .parent()
        .unwrap_or(Path::new("."))
        .join(CONFIG_FILE);
    let mut config = match &args.config {
        Some(path) => BundleConfig::from_file(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None if beside.is_file() => BundleConfig::from_file(&beside)
            .with_context(|| format!("Failed to load {}", beside.display()))?,
        None => BundleConfig::default(),
    };

    let settings = &mut config.bundle;
    if let Some(root) = &args.root {
        settings.root = root.clone();
    }
    if let Some(chunk_size) = args.chunk_size {
        settings.chunk_size = chunk_size;
    }
    if let Some(pad_size) = args.pad_size {
        settings.pad_size = pad_size;
    }
    if let Some(fixups) = args.fixups {
        settings.fixups = fixups;
    }
    if let Some(sector_size) = args.sector_size {
        settings.sector_size = sector_size;
    }
    if let Some(endian) = args.endian {
        settings.endian = endian;
    }
    if args.no_dedup {
        settings.dedup = false;
    }
    if args.pinned {
        settings.pinned_order = true;
    }
    for (name, value) in &args.define {
        config.defines.insert(name.clone(), value.clone());
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}
