use criterion::*;
use std::hint::black_box;

use agent_runtime::core::types::{EntityId, Vec2};
use agent_runtime::ecs::{Component, ComponentRegistry, EntityStore, Position};
use agent_runtime::spatial::SpatialIndex;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const WORLD: f32 = 2_000.0;
const ENTITIES: usize = 10_000;

fn populated_index(count: usize) -> SpatialIndex {
    let mut rng = ChaCha8Rng::seed_from_u64(7);
    let mut index = SpatialIndex::new(25.0);
    for i in 0..count {
        let pos = Vec2::new(rng.gen_range(0.0..WORLD), rng.gen_range(0.0..WORLD));
        index.upsert(EntityId(i as u64 + 1), pos);
    }
    index
}

fn query_points(n: usize) -> Vec<Vec2> {
    let mut rng = ChaCha8Rng::seed_from_u64(11);
    (0..n)
        .map(|_| Vec2::new(rng.gen_range(0.0..WORLD), rng.gen_range(0.0..WORLD)))
        .collect()
}

fn spatial_benchmark(c: &mut Criterion) {
    let index = populated_index(ENTITIES);
    let points = query_points(256);

    let mut group = c.benchmark_group("spatial");

    for radius in [10.0_f32, 50.0, 150.0] {
        group.bench_with_input(BenchmarkId::new("query_radius_10k", radius), &radius, |b, &r| {
            b.iter(|| {
                for p in &points {
                    black_box(index.query_radius(*p, r, |_| true));
                }
            });
        });
    }

    group.bench_function("count_50_10k", |b| {
        b.iter(|| {
            for p in &points {
                black_box(index.count(*p, 50.0, |_| true));
            }
        });
    });

    group.bench_function("nearest_10k", |b| {
        b.iter(|| {
            for p in &points {
                black_box(index.nearest(*p, None, |_| true));
            }
        });
    });

    let sparse = populated_index(50);
    group.bench_function("nearest_sparse_50", |b| {
        b.iter(|| {
            for p in &points {
                black_box(sparse.nearest(*p, None, |_| true));
            }
        });
    });

    group.bench_function("move_entities_10k", |b| {
        b.iter_batched(
            || populated_index(ENTITIES),
            |mut index| {
                for i in 0..ENTITIES as u64 {
                    let id = EntityId(i + 1);
                    if let Some(pos) = index.position(id) {
                        index.upsert(id, pos + Vec2::new(3.0, -2.0));
                    }
                }
                black_box(index);
            },
            BatchSize::LargeInput,
        );
    });

    group.finish();
}

fn store_benchmark(c: &mut Criterion) {
    let mut rng = ChaCha8Rng::seed_from_u64(3);
    let mut store = EntityStore::new(ComponentRegistry::new(), 25.0);
    for _ in 0..ENTITIES {
        let id = store.create_entity();
        store
            .attach(id, Position::new(rng.gen_range(0.0..WORLD), rng.gen_range(0.0..WORLD)))
            .unwrap();
    }
    let points = query_points(256);

    let mut group = c.benchmark_group("store");
    group.bench_function("entities_in_radius_position_10k", |b| {
        b.iter(|| {
            for p in &points {
                black_box(store.entities_in_radius(*p, 50.0, &[Position::KIND]));
            }
        });
    });
    group.finish();
}

criterion_group!(benches, spatial_benchmark, store_benchmark);
criterion_main!(benches);
