//! `lvlpak load`: resolve a bundle in simulated chunk memory.
//!
//! Chunks are laid out back to back from `--base`. Runtime files are read
//! from `--files` and given addresses past the last chunk; without a
//! directory they are recorded with no contents.

use anyhow::Context;
use clap::Args;
use std::path::PathBuf;

use lvlpak_engine::loader::CallbackError;
use lvlpak_engine::{ChunkImage, Endian};

use super::{bundle_format, parse_u32};
use crate::output::StyledOutput;

#[derive(Debug, Args)]
pub struct LoadArgs {
    /// Bundle file
    pub bundle: PathBuf,

    /// Chunk size the bundle was built with
    #[arg(long, value_parser = parse_u32)]
    pub chunk_size: Option<u32>,

    /// Byte order the bundle was built with
    #[arg(long)]
    pub endian: Option<Endian>,

    /// Address of the first chunk
    #[arg(long, default_value = "0x10000", value_parser = parse_u32)]
    pub base: u32,

    /// Directory runtime files are read from
    #[arg(long)]
    pub files: Option<PathBuf>,
}

struct RuntimeLoad {
    name: String,
    address: u32,
    size: usize,
}

pub fn execute(args: LoadArgs, out: &mut StyledOutput) -> anyhow::Result<()> {
    let (chunk_size, endian) = bundle_format(args.chunk_size, args.endian);
    let bytes = std::fs::read(&args.bundle)
        .with_context(|| format!("Failed to read {}", args.bundle.display()))?;
    let mut image = ChunkImage::from_bytes(&bytes, chunk_size, endian)
        .with_context(|| format!("Failed to split {} into chunks", args.bundle.display()))?;

    let chunks = image.chunk_count() as u64;
    let end = args.base as u64 + chunks * chunk_size as u64;
    anyhow::ensure!(
        end <= u32::MAX as u64,
        "{} chunks of {} bytes do not fit above {:#x}",
        chunks,
        chunk_size,
        args.base
    );
    let bases = image.contiguous_bases(args.base);

    let mut loads: Vec<RuntimeLoad> = Vec::new();
    let mut next = end as u32;
    let files = args.files.clone();
    let mut callback = |name: &str| -> Result<u32, CallbackError> {
        let size = match &files {
            Some(dir) => std::fs::read(dir.join(name))?.len(),
            None => 0,
        };
        let address = next;
        let advance = ((size as u64 + 3) & !3).max(4);
        next = u32::try_from(next as u64 + advance)
            .map_err(|_| format!("no address space left for '{}'", name))?;
        loads.push(RuntimeLoad {
            name: name.to_string(),
            address,
            size,
        });
        Ok(address)
    };

    let mut loader = image.loader(&bases)?;
    let outcome = loader
        .init(&mut callback)
        .with_context(|| format!("Failed to resolve {}", args.bundle.display()))?;
    let again = loader.init(&mut callback)?;
    anyhow::ensure!(
        again.already_resolved && again.root == outcome.root,
        "second fixup pass did not report the resolved root"
    );
    drop(loader);

    out.bold(&args.bundle.display().to_string());
    out.newline();
    out.field("  root", format!("{:#010x}", outcome.root));
    out.field("  chunks", format!("{} from {:#x}", chunks, args.base));
    out.field("  fixups", outcome.fixups_applied);
    out.field("  runtime files", outcome.runtime_loads);
    for load in &loads {
        out.plain(&format!("    {:#010x}  {:>8} bytes  ", load.address, load.size));
        out.info(&load.name);
        out.newline();
    }
    if outcome.fixup_releasable {
        out.success("  fixup table may be released");
    } else {
        out.warning("  fixup table must be kept");
    }
    out.newline();
    out.flush();
    Ok(())
}
