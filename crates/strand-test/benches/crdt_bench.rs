//! Benchmarks for the CRDT collection model

use criterion::{black_box, criterion_group, criterion_main, BatchSize, Criterion};
use serde_json::json;

use strand_core::{Entity, EntityId, ModelEntry};
use strand_crdt::CrdtCollectionModel;

fn populated(n: usize) -> CrdtCollectionModel {
    let mut model = CrdtCollectionModel::new();
    for i in 0..n {
        let id = format!("e{}", i);
        model
            .add(EntityId::new(id.clone()), Entity::new(id, json!(i)), &[format!("k{}", i)])
            .unwrap();
    }
    model
}

fn bench_add_new(c: &mut Criterion) {
    c.bench_function("crdt_add_new", |b| {
        b.iter_batched(
            || populated(1000),
            |mut model| {
                let value = Entity::new("fresh", json!(1));
                black_box(model.add(EntityId::new("fresh"), value, &["kf".to_string()]))
            },
            BatchSize::SmallInput,
        )
    });
}

fn bench_add_duplicate(c: &mut Criterion) {
    let mut model = populated(1000);
    let id = EntityId::new("e500");
    let value = Entity::new("e500", json!(500));
    let keys = vec!["k500".to_string()];

    c.bench_function("crdt_add_duplicate", |b| {
        b.iter(|| black_box(model.add(id.clone(), value.clone(), black_box(&keys))))
    });
}

fn bench_remove(c: &mut Criterion) {
    c.bench_function("crdt_remove", |b| {
        b.iter_batched(
            || populated(1000),
            |mut model| black_box(model.remove(&EntityId::new("e500"), &["k500".to_string()])),
            BatchSize::SmallInput,
        )
    });
}

fn bench_from_entries(c: &mut Criterion) {
    let entries: Vec<ModelEntry> = populated(1000).to_entries();

    c.bench_function("crdt_from_entries_1000", |b| {
        b.iter(|| black_box(CrdtCollectionModel::from_entries(entries.clone())))
    });
}

fn bench_to_list(c: &mut Criterion) {
    let model = populated(1000);

    c.bench_function("crdt_to_list_1000", |b| b.iter(|| black_box(model.to_list())));
}

criterion_group!(
    benches,
    bench_add_new,
    bench_add_duplicate,
    bench_remove,
    bench_from_entries,
    bench_to_list
);
criterion_main!(benches);
