//! Layout benchmarks
//!
//! First-fit placement on synthetic item sets, and a full pack of a
//! generated script.
//!
//! Run with: cargo bench -p lvlpak-engine --bench layout

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use lvlpak_engine::packer::layout::{place, LayoutItem};
use lvlpak_engine::{Build, BundleConfig, MemoryFiles};
use std::path::Path;

/// Deterministic mix of sizes and alignments, largest first
fn items(count: usize, chunk_size: u32) -> Vec<LayoutItem> {
    let mut items: Vec<LayoutItem> = (0..count as u32)
        .map(|i| LayoutItem {
            pad_size: 4 * (1 + (i.wrapping_mul(2_654_435_761) >> 7) % (chunk_size / 16)),
            alignment: [1, 1, 4, 16][(i % 4) as usize],
        })
        .collect();
    items.sort_by(|a, b| b.pad_size.cmp(&a.pad_size));
    items
}

/// A script with `sections` leaf sections hanging off the root
fn script(sections: usize) -> String {
    let mut out = String::from("[root]\n");
    for i in 0..sections {
        out.push_str(&format!("level s{}\n", i));
    }
    for i in 0..sections {
        out.push_str(&format!("[s{}]\nlong {}\nstring \"{}\"\n", i, i, "x".repeat(i % 60)));
    }
    out
}

fn bench_place(c: &mut Criterion) {
    let mut group = c.benchmark_group("place");
    for count in [100usize, 1_000, 10_000] {
        let items = items(count, 2048);
        let order: Vec<usize> = (0..count).collect();
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &items, |b, items| {
            b.iter(|| place(black_box(items), black_box(&order), 64, 2048))
        });
    }
    group.finish();
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("build");
    for sections in [50usize, 500] {
        let files = MemoryFiles::new().with("main.lvs", script(sections));
        let mut config = BundleConfig::default();
        config.bundle.chunk_size = 1024;
        group.bench_with_input(BenchmarkId::from_parameter(sections), &files, |b, files| {
            b.iter(|| {
                let mut build = Build::new(&config, files);
                build.run(Path::new("main.lvs"))
            })
        });
    }
    group.finish();
}

criterion_group!(benches, bench_place, bench_build);
criterion_main!(benches);
