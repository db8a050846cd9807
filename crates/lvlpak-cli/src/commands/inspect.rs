//! `lvlpak inspect`: decode a bundle header and fixup table.

use anyhow::Context;
use clap::Args;
use std::path::PathBuf;

use lvlpak_engine::format::BundleInfo;
use lvlpak_engine::Endian;

use super::{bundle_format, parse_u32};
use crate::output::StyledOutput;

#[derive(Debug, Args)]
pub struct InspectArgs {
    /// Bundle file
    pub bundle: PathBuf,

    /// Chunk size the bundle was built with
    #[arg(long, value_parser = parse_u32)]
    pub chunk_size: Option<u32>,

    /// Byte order the bundle was built with
    #[arg(long)]
    pub endian: Option<Endian>,

    /// Print JSON instead of text
    #[arg(long)]
    pub json: bool,
}

pub fn execute(args: InspectArgs, out: &mut StyledOutput) -> anyhow::Result<()> {
    let (chunk_size, endian) = bundle_format(args.chunk_size, args.endian);
    let bytes = std::fs::read(&args.bundle)
        .with_context(|| format!("Failed to read {}", args.bundle.display()))?;
    let info = BundleInfo::decode(&bytes, chunk_size, endian)
        .with_context(|| format!("Failed to decode {}", args.bundle.display()))?;

    if args.json {
        out.plain(&serde_json::to_string_pretty(&info)?);
        out.newline();
        return Ok(());
    }

    out.bold(&args.bundle.display().to_string());
    out.newline();
    out.field("  size", format!("{} bytes", info.size));
    out.field("  crc32", format!("{:08x}", info.crc32));
    out.field("  chunk size", info.chunk_size);
    out.field("  chunks", info.chunk_count);
    out.field("  header", format!("{} bytes", info.header_size));
    out.field(
        "  start",
        format!(
            "{:#010x} (block {}, offset {:#x})",
            info.start.raw, info.start.block, info.start.offset
        ),
    );
    match &info.fixup_table {
        Some(table) => out.field(
            "  fixup table",
            format!(
                "file offset {:#x}, {} entries",
                table.file_offset,
                info.fixups.len()
            ),
        ),
        None => out.field("  fixup table", "none"),
    }
    for fixup in &info.fixups {
        out.plain(&format!(
            "    {:#010x}  block {:>4}  offset {:#07x}  file {:#010x}",
            fixup.raw, fixup.block, fixup.offset, fixup.file_offset
        ));
        out.newline();
    }
    out.flush();
    Ok(())
}
