use std::io::Cursor;

use criterion::{black_box, BatchSize, BenchmarkId, Criterion, Throughput};
use criterion::{criterion_group, criterion_main};

use solidpak::{build, list_members, BuildConfig, CompressionProfile, ProgressTracker, SourceEntry};

const FILES: usize = 64;

fn corpus(file_size: usize) -> Vec<(String, Vec<u8>)> {
    (0..FILES)
        .map(|i| {
            // Every fourth file repeats an earlier one so dedup has work to do.
            let seed = if i % 4 == 3 { i - 1 } else { i };
            let bytes = (0..file_size)
                .map(|j| ((j * 7 + seed * 13) % 97) as u8)
                .collect();
            (format!("dir{}/file{i}.dat", i % 8), bytes)
        })
        .collect()
}

fn entries(corpus: &[(String, Vec<u8>)]) -> Vec<SourceEntry> {
    corpus
        .iter()
        .map(|(name, bytes)| SourceEntry::memory(name.clone(), bytes.clone()))
        .collect()
}

fn bench_build(c: &mut Criterion) {
    let mut group = c.benchmark_group("build");
    let config = BuildConfig {
        profile: CompressionProfile::default().with_level(3),
        ..BuildConfig::default()
    };
    for &size in &[4 * 1024_usize, 64 * 1024] {
        let files = corpus(size);
        group.throughput(Throughput::Bytes((FILES * size) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &files, |b, files| {
            b.iter_batched(
                || entries(files),
                |sources| {
                    let mut out = Cursor::new(Vec::new());
                    build(&sources, &mut out, &config, &mut ProgressTracker::disabled())
                        .expect("build");
                    black_box(out.into_inner())
                },
                BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

fn bench_list(c: &mut Criterion) {
    let mut group = c.benchmark_group("list");
    for &size in &[4 * 1024_usize, 64 * 1024] {
        let mut out = Cursor::new(Vec::new());
        build(
            &entries(&corpus(size)),
            &mut out,
            &BuildConfig::default(),
            &mut ProgressTracker::disabled(),
        )
        .expect("build");
        let container = out.into_inner();

        group.throughput(Throughput::Bytes((FILES * size) as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &container, |b, container| {
            b.iter(|| list_members(black_box(&container[..])).expect("list"));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_build, bench_list);
criterion_main!(benches);
