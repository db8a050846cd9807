//! Integration tests for the build → load lifecycle
//!
//! Scripts are built into bundles, split into chunk images and resolved at
//! chosen base addresses, then the resolved memory is checked word by word.

use lvlpak_engine::format::BundleInfo;
use lvlpak_engine::loader::CallbackError;
use lvlpak_engine::packer::PlacementKind;
use lvlpak_engine::{
    Build, BundleConfig, ChunkImage, DiskFiles, Endian, FixupMode, MemoryFiles, PackedBundle,
};
use std::path::Path;

fn config(chunk_size: u32) -> BundleConfig {
    let mut config = BundleConfig::default();
    config.bundle.chunk_size = chunk_size;
    config
}

fn build(config: &BundleConfig, files: &MemoryFiles) -> PackedBundle {
    let mut build = Build::new(config, files);
    build
        .run(Path::new("main.lvs"))
        .unwrap_or_else(|e| panic!("build failed: {}", e))
}

fn no_runtime_files(name: &str) -> Result<u32, CallbackError> {
    Err(format!("unexpected runtime load of {}", name).into())
}

#[test]
fn test_single_file_root_resolves_after_header() {
    let files = MemoryFiles::new()
        .with("main.lvs", "[root]\nbinc payload.bin\n")
        .with("payload.bin", (0u8..10).collect::<Vec<_>>());
    let config = config(2048);
    let bundle = build(&config, &files);
    assert_eq!(bundle.chunk_count, 1);

    let mut image = ChunkImage::from_bytes(&bundle.bytes, 2048, Endian::Little).unwrap();
    let bases = image.contiguous_bases(0x1000);
    let mut loader = image.loader(&bases).unwrap();
    let outcome = loader.init(&mut no_runtime_files).unwrap();

    assert_eq!(outcome.root, 0x1000 + bundle.header_size);
    assert_eq!(outcome.fixups_applied, 0);
    assert_eq!(loader.word_at(outcome.root), Some(u32::from_le_bytes([0, 1, 2, 3])));
    assert_eq!(loader.word_at(0x1000), Some(0x1000));
}

#[test]
fn test_identical_files_share_one_blob() {
    let content: Vec<u8> = (0u8..100).collect();
    let files = MemoryFiles::new()
        .with("main.lvs", "[root]\nfile a.bin\nfile b.bin\nfile a.bin\n")
        .with("a.bin", content.clone())
        .with("b.bin", content);
    let config = config(2048);
    let mut build = Build::new(&config, &files);
    let bundle = build.run(Path::new("main.lvs")).unwrap();

    let stats = build.stats().unwrap();
    assert_eq!(stats.blobs, 1);
    let blobs: Vec<_> = bundle
        .placements
        .iter()
        .filter(|p| p.kind == PlacementKind::Blob)
        .collect();
    assert_eq!(blobs.len(), 1);
    assert_eq!(blobs[0].size, 100);

    let mut image = ChunkImage::from_bytes(&bundle.bytes, 2048, Endian::Little).unwrap();
    let bases = image.contiguous_bases(0x2_0000);
    let mut loader = image.loader(&bases).unwrap();
    let outcome = loader.init(&mut no_runtime_files).unwrap();
    assert_eq!(outcome.fixups_applied, 3);

    let first = loader.word_at(outcome.root).unwrap();
    assert_eq!(loader.word_at(outcome.root + 4), Some(first));
    assert_eq!(loader.word_at(outcome.root + 8), Some(first));
    assert_eq!(first, 0x2_0000 + blobs[0].offset);
    assert_eq!(loader.word_at(first + 96), Some(u32::from_le_bytes([96, 97, 98, 99])));
}

#[test]
fn test_identical_files_kept_apart_without_dedup() {
    let content: Vec<u8> = (0u8..100).collect();
    let files = MemoryFiles::new()
        .with("main.lvs", "[root]\nfile a.bin\nfile b.bin\nfile a.bin\n")
        .with("a.bin", content.clone())
        .with("b.bin", content);
    let mut config = config(2048);
    config.bundle.dedup = false;
    let mut build = Build::new(&config, &files);
    let bundle = build.run(Path::new("main.lvs")).unwrap();

    let stats = build.stats().unwrap();
    assert_eq!(stats.blobs, 2);
    // only the repeated filename
    assert_eq!(stats.dedup_hits, 1);
    let blobs: Vec<_> = bundle
        .placements
        .iter()
        .filter(|p| p.kind == PlacementKind::Blob)
        .collect();
    assert_eq!(blobs.len(), 2);
    assert_ne!(blobs[0].offset, blobs[1].offset);

    let mut image = ChunkImage::from_bytes(&bundle.bytes, 2048, Endian::Little).unwrap();
    let bases = image.contiguous_bases(0x2_0000);
    let mut loader = image.loader(&bases).unwrap();
    let outcome = loader.init(&mut no_runtime_files).unwrap();
    let a = loader.word_at(outcome.root).unwrap();
    let b = loader.word_at(outcome.root + 4).unwrap();
    // the same filename still shares storage
    assert_eq!(loader.word_at(outcome.root + 8), Some(a));
    assert_ne!(a, b);
    assert_eq!(loader.word_at(a + 96), loader.word_at(b + 96));
}

#[test]
fn test_runtime_file_loaded_once() {
    let files = MemoryFiles::new().with(
        "main.lvs",
        "[root]\nload music.ogg\nlevel sub\nload music.ogg\n[sub]\nload music.ogg\nlong 5\n",
    );
    let config = config(2048);
    let bundle = build(&config, &files);

    let mut image = ChunkImage::from_bytes(&bundle.bytes, 2048, Endian::Little).unwrap();
    let bases = image.contiguous_bases(0x1000);
    let mut loader = image.loader(&bases).unwrap();

    let mut calls = 0;
    let mut callback = |name: &str| -> Result<u32, CallbackError> {
        assert_eq!(name, "music.ogg");
        calls += 1;
        Ok(0x0010_0000)
    };

    let first = loader.init(&mut callback).unwrap();
    assert_eq!(first.runtime_loads, 1);
    assert_eq!(first.fixups_applied, 4);
    assert!(!first.fixup_releasable);
    assert_eq!(loader.word_at(first.root), Some(0x0010_0000));
    assert_eq!(loader.word_at(first.root + 8), Some(0x0010_0000));
    let sub = loader.word_at(first.root + 4).unwrap();
    assert_eq!(loader.word_at(sub), Some(0x0010_0000));
    assert_eq!(loader.word_at(sub + 4), Some(5));

    let second = loader.init(&mut callback).unwrap();
    assert!(second.already_resolved);
    assert_eq!(second.root, first.root);
    assert_eq!(second.runtime_loads, 0);
    assert_eq!(second.fixups_applied, 0);
    drop(loader);
    assert_eq!(calls, 1);
}

#[test]
fn test_second_init_changes_nothing() {
    let files = MemoryFiles::new().with(
        "main.lvs",
        "[root]\nlevel a\nlevel b\n[a]\nlong 1 2 3\nlevel b\n[b]\nstring \"bee\"\n",
    );
    let config = config(256);
    let bundle = build(&config, &files);

    let mut image = ChunkImage::from_bytes(&bundle.bytes, 256, Endian::Little).unwrap();
    let bases = image.contiguous_bases(0x8000);
    let snapshot = {
        let mut loader = image.loader(&bases).unwrap();
        loader.init(&mut no_runtime_files).unwrap();
        drop(loader);
        image.clone()
    };
    let mut loader = image.loader(&bases).unwrap();
    let outcome = loader.init(&mut no_runtime_files).unwrap();
    assert!(outcome.already_resolved);
    drop(loader);
    for index in 0..image.chunk_count() {
        assert_eq!(image.chunk(index), snapshot.chunk(index));
    }
}

#[test]
fn test_sections_spread_over_scattered_chunks() {
    let script = "\
[root]
level a
level b
level c
[a]
long 0xA0 1 2 3 4 5 6 7 8 9 10 11
[b]
long 0xB0 1 2 3 4 5 6 7 8 9 10 11
[c]
long 0xC0 1 2 3 4 5 6 7 8 9 10 11
";
    let files = MemoryFiles::new().with("main.lvs", script);
    let config = config(64);
    let bundle = build(&config, &files);
    assert!(bundle.chunk_count > 1);
    for placement in &bundle.placements {
        let first = placement.offset / 64;
        let last = (placement.offset + placement.pad_size - 1) / 64;
        assert_eq!(first, last, "{} crosses a chunk boundary", placement.name);
    }

    let mut image = ChunkImage::from_bytes(&bundle.bytes, 64, Endian::Little).unwrap();
    let bases: Vec<u32> = (0..image.chunk_count() as u32)
        .map(|i| 0x10_0000 - i * 0x1000)
        .collect();
    let mut loader = image.loader(&bases).unwrap();
    let outcome = loader.init(&mut no_runtime_files).unwrap();
    assert_eq!(outcome.fixups_applied, 3);
    for (slot, expected) in [0xA0, 0xB0, 0xC0].into_iter().enumerate() {
        let target = loader.word_at(outcome.root + 4 * slot as u32).unwrap();
        assert_eq!(loader.word_at(target), Some(expected));
        assert_eq!(loader.word_at(target + 44), Some(11));
    }
}

#[test]
fn test_end_mode_table_is_loadable() {
    let files = MemoryFiles::new()
        .with("main.lvs", "[root]\nlevel leaf\nfile d.bin\n[leaf]\nword 1 2\n")
        .with("d.bin", vec![0xEE; 40]);
    let mut config = config(128);
    config.bundle.fixups = FixupMode::End;
    config.bundle.endian = Endian::Big;
    let bundle = build(&config, &files);

    let table = bundle.fixup_table.unwrap();
    let data_end = bundle
        .placements
        .iter()
        .map(|p| p.offset + p.pad_size)
        .max()
        .unwrap();
    assert!(table >= data_end);

    let info = BundleInfo::decode(&bundle.bytes, 128, Endian::Big).unwrap();
    assert_eq!(info.fixups.len(), 2);

    let mut image = ChunkImage::from_bytes(&bundle.bytes, 128, Endian::Big).unwrap();
    let bases = image.contiguous_bases(0x4000);
    let mut loader = image.loader(&bases).unwrap();
    let outcome = loader.init(&mut no_runtime_files).unwrap();
    assert_eq!(outcome.fixups_applied, 2);
    let leaf = loader.word_at(outcome.root).unwrap();
    assert_eq!(loader.word_at(leaf), Some(0x0001_0002));
    let blob = loader.word_at(outcome.root + 4).unwrap();
    assert_eq!(loader.word_at(blob), Some(0xEEEE_EEEE));
}

#[test]
fn test_build_from_disk_with_config() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("levels")).unwrap();
    std::fs::create_dir_all(dir.path().join("data")).unwrap();
    std::fs::write(
        dir.path().join("lvlpak.toml"),
        "[bundle]\nchunk_size = 512\n\n[paths]\nsearch = [\"data\"]\n\n[defines]\nLEVEL = \"2\"\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("levels/main.lvs"),
        "# level $(LEVEL)\n[root]\nfile level$(LEVEL).bin\n",
    )
    .unwrap();
    std::fs::write(dir.path().join("data/level2.bin"), [1u8, 2, 3, 4, 5, 6, 7, 8]).unwrap();

    let config = BundleConfig::from_file(&dir.path().join("lvlpak.toml")).unwrap();
    let mut build = Build::new(&config, &DiskFiles);
    let bundle = build.run(&dir.path().join("levels/main.lvs")).unwrap();
    assert_eq!(bundle.chunk_size, 512);
    assert!(bundle
        .placements
        .iter()
        .any(|p| p.name.ends_with("level2.bin") && p.size == 8));
}
