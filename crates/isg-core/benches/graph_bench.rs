//! # Graph Benchmarks
//!
//! Performance benchmarks for isg-core ingestion, queries and snapshots.
//!
//! Run with: `cargo bench -p isg-core`

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use isg_core::{
    Checksum, Engine, EngineConfig, EntityRef, FileBatch, FileEvent, FileUpdate, ImpactOptions,
    RawEntity, RawRelationship, export_snapshot, import_snapshot,
};
use std::hint::black_box;

/// `files` modules of 20 functions; each function calls the next one and the
/// same-numbered function of the previous module.
fn workspace(files: usize, checksum: u64) -> Vec<FileUpdate> {
    (0..files)
        .map(|f| {
            let mut batch = FileBatch::new(format!("src/m{f}.rs"), Checksum(checksum));
            for i in 0..20 {
                batch = batch
                    .entity(RawEntity::new(format!("f{f}_{i}"), "fn", i + 1).qualified(format!("m{f}::f{i}")));
                if i + 1 < 20 {
                    batch = batch.relationship(RawRelationship::new(
                        format!("f{f}_{i}"),
                        "calls",
                        format!("f{f}_{}", i + 1),
                    ));
                }
                if f > 0 {
                    batch = batch.relationship(RawRelationship::new(
                        format!("f{f}_{i}"),
                        "calls",
                        format!("m{}::f{i}", f - 1),
                    ));
                }
            }
            batch.into()
        })
        .collect()
}

fn loaded(files: usize) -> Engine {
    let engine = Engine::default();
    engine.ingest(&workspace(files, 1));
    engine
}

// =============================================================================
// BENCHMARKS
// =============================================================================

fn bench_ingest(c: &mut Criterion) {
    let mut group = c.benchmark_group("ingest");

    for files in [10, 100, 500].iter() {
        let updates = workspace(*files, 1);
        group.bench_with_input(BenchmarkId::from_parameter(files), &updates, |b, updates| {
            b.iter(|| {
                let engine = Engine::default();
                black_box(engine.ingest(updates))
            });
        });
    }

    group.finish();
}

fn bench_incremental_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("incremental_update");

    for files in [100, 500].iter() {
        let engine = loaded(*files);
        let mut checksum = 1;

        group.bench_with_input(BenchmarkId::from_parameter(files), files, |b, _| {
            b.iter(|| {
                checksum += 1;
                let changed = workspace(1, checksum);
                let events = [FileEvent::changed("src/m0.rs", Checksum(checksum))];
                black_box(engine.update(&events, &changed))
            });
        });
    }

    group.finish();
}

/// One-file update on a 100k-entity graph, snapshot clone included.
fn bench_large_graph_update(c: &mut Criterion) {
    let mut group = c.benchmark_group("large_graph_update");
    group.sample_size(10);

    let engine = loaded(5_000);
    let mut checksum = 1;
    group.bench_function("one_file", |b| {
        b.iter(|| {
            checksum += 1;
            let changed = workspace(1, checksum);
            let events = [FileEvent::changed("src/m0.rs", Checksum(checksum))];
            black_box(engine.update(&events, &changed))
        });
    });

    group.finish();
}

fn bench_callers(c: &mut Criterion) {
    let mut group = c.benchmark_group("callers");

    for files in [100, 500].iter() {
        let engine = loaded(*files);
        let snapshot = engine.snapshot();
        let queries = snapshot.query(engine.query_config());
        let target: EntityRef = "m0::f10".into();

        group.bench_with_input(BenchmarkId::from_parameter(files), &target, |b, target| {
            b.iter(|| black_box(queries.callers(target)));
        });
    }

    group.finish();
}

fn bench_blast_radius(c: &mut Criterion) {
    let mut group = c.benchmark_group("blast_radius");

    for files in [100, 500].iter() {
        let engine = loaded(*files);
        let snapshot = engine.snapshot();
        let queries = snapshot.query(engine.query_config());
        let target: EntityRef = "m0::f19".into();

        group.bench_with_input(BenchmarkId::new("depth_3", files), &target, |b, target| {
            let options = ImpactOptions::default().depth(3);
            b.iter(|| black_box(queries.blast_radius(target, &options)));
        });

        group.bench_with_input(BenchmarkId::new("unbounded", files), &target, |b, target| {
            let options = ImpactOptions::default();
            b.iter(|| black_box(queries.blast_radius(target, &options)));
        });
    }

    group.finish();
}

fn bench_fuzzy_search(c: &mut Criterion) {
    let mut group = c.benchmark_group("fuzzy_search");

    for files in [100, 500].iter() {
        let engine = loaded(*files);
        let snapshot = engine.snapshot();

        group.bench_with_input(BenchmarkId::new("prefix", files), files, |b, _| {
            b.iter(|| black_box(snapshot.fuzzy("f4", 20)));
        });

        group.bench_with_input(BenchmarkId::new("typo", files), files, |b, _| {
            b.iter(|| black_box(snapshot.fuzzy("f42_1O", 20)));
        });
    }

    group.finish();
}

fn bench_snapshot(c: &mut Criterion) {
    let mut group = c.benchmark_group("snapshot");

    for files in [100, 500].iter() {
        let engine = loaded(*files);
        let snapshot = engine.snapshot();
        let bytes = engine.export().expect("export");

        group.bench_with_input(BenchmarkId::new("export", files), files, |b, _| {
            b.iter(|| black_box(export_snapshot(snapshot.graph())));
        });

        group.bench_with_input(BenchmarkId::new("import", files), &bytes, |b, bytes| {
            let limit = EngineConfig::default().ingest.max_snapshot_bytes;
            b.iter(|| black_box(import_snapshot(bytes, limit)));
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_ingest,
    bench_incremental_update,
    bench_large_graph_update,
    bench_callers,
    bench_blast_radius,
    bench_fuzzy_search,
    bench_snapshot,
);
criterion_main!(benches);
