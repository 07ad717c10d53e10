use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use bitsift::bitmap::vector::Vector;
use bitsift::core::types::Compression;
use bitsift::engine::engine::Engine;

#[derive(Clone)]
struct Event {
    source: &'static str,
    level: &'static str,
    shard: i32,
}

const SOURCES: [&str; 8] = ["api", "web", "batch", "cron", "sync", "cache", "queue", "edge"];
const LEVELS: [&str; 4] = ["debug", "info", "warn", "error"];

/// Benchmark filter + facet execution over growing item counts
fn bench_filter_and_facet(c: &mut Criterion) {
    let mut group = c.benchmark_group("filter_and_facet");

    for items in [1_000u32, 10_000, 50_000] {
        let mut engine = Engine::new(false).unwrap();
        let source = engine
            .add_catalog("source", Compression::Compressed, |e: &Event| e.source)
            .unwrap();
        let level = engine
            .add_catalog("level", Compression::CompressedWithPackedPosition, |e: &Event| {
                e.level
            })
            .unwrap();
        let mut rng = StdRng::seed_from_u64(17);
        for pk in 0..items {
            let event = Event {
                source: SOURCES[rng.gen_range(0..SOURCES.len())],
                level: LEVELS[rng.gen_range(0..LEVELS.len())],
                shard: 0,
            };
            engine.add(&event, pk).unwrap();
        }

        group.bench_with_input(BenchmarkId::from_parameter(items), &items, |b, _| {
            b.iter(|| {
                let result = engine
                    .create_query()
                    .filter(source.exact("api") | source.exact("edge"))
                    .facet(&level)
                    .unwrap()
                    .execute(0, 20)
                    .unwrap();
                black_box(result.total);
            });
        });
    }
    group.finish();
}

/// Benchmark a boolean tree with a range leaf and paging
fn bench_boolean_query(c: &mut Criterion) {
    let mut engine = Engine::<Event, u32>::new(false).unwrap();
    let source = engine
        .add_catalog("source", Compression::Compressed, |e: &Event| e.source)
        .unwrap();
    let level = engine
        .add_catalog("level", Compression::CompressedWithPackedPosition, |e: &Event| e.level)
        .unwrap();
    let shard = engine
        .add_catalog("shard", Compression::Compressed, |e: &Event| e.shard)
        .unwrap();
    let mut rng = StdRng::seed_from_u64(17);
    for pk in 0..20_000u32 {
        let event = Event {
            source: SOURCES[rng.gen_range(0..SOURCES.len())],
            level: LEVELS[rng.gen_range(0..LEVELS.len())],
            shard: rng.gen_range(0..64),
        };
        engine.add(&event, pk).unwrap();
    }

    c.bench_function("boolean_query_20k", |b| {
        b.iter(|| {
            let result = engine
                .create_query()
                .filter(
                    (source.exact("api") | source.exact("web"))
                        & !level.exact("debug")
                        & shard.range(Some(8), Some(32)).unwrap(),
                )
                .sort_by_primary_key(true)
                .unwrap()
                .execute(100, 25)
                .unwrap();
            black_box(result.primary_keys.len());
        });
    });
}

/// Benchmark the AND population kernel across compressions
fn bench_and_population(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(99);
    let mut flat = Vector::new(false, Compression::None).unwrap();
    let mut packed = Vector::new(false, Compression::CompressedWithPackedPosition).unwrap();
    let mut sparse_bits: Vec<u32> = (0..5_000).map(|_| rng.gen_range(0..2_000_000)).collect();
    sparse_bits.sort_unstable();
    sparse_bits.dedup();
    for bit in 0..1_000_000u32 {
        flat.set_bit(bit, bit % 3 == 0).unwrap();
    }
    for &bit in &sparse_bits {
        packed.set_bit(bit, true).unwrap();
    }

    c.bench_function("and_population_n_cwpp_1m", |b| {
        b.iter(|| black_box(flat.and_population(&packed).unwrap()));
    });
}

criterion_group!(
    benches,
    bench_filter_and_facet,
    bench_boolean_query,
    bench_and_population
);
criterion_main!(benches);
