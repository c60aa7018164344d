//! Benchmarks for provider resolution and injector lookup.
//!
//! Run with: cargo bench -p viewcore-inject --bench injector_bench

use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use std::hint::black_box;
use viewcore_inject::{Dependency, Injector, ProviderEntry, provide};

/// `count` value providers plus a chain where each link depends on the previous.
fn chained_providers(count: usize) -> Vec<ProviderEntry> {
    let mut entries: Vec<ProviderEntry> = Vec::with_capacity(count);
    entries.push(provide("link0").use_value(0_usize).into());
    for i in 1..count {
        let previous = format!("link{}", i - 1);
        entries.push(
            provide(format!("link{i}").as_str())
                .use_factory(vec![Dependency::on(previous.as_str())], |deps| {
                    Ok(*deps.get::<usize>(0)? + 1)
                })
                .into(),
        );
    }
    entries
}

fn bench_resolve(c: &mut Criterion) {
    let mut group = c.benchmark_group("injector/resolve_and_create");
    for count in [5, 10, 11, 64] {
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            b.iter(|| black_box(Injector::resolve_and_create(chained_providers(count))))
        });
    }
    group.finish();
}

fn bench_cached_get(c: &mut Criterion) {
    let mut group = c.benchmark_group("injector/cached_get");
    // Straddles the inline/dynamic threshold.
    for count in [5, 10, 11, 64] {
        let injector = Injector::resolve_and_create(chained_providers(count)).unwrap();
        let last = format!("link{}", count - 1);
        injector.get(last.as_str()).unwrap();
        group.bench_with_input(BenchmarkId::from_parameter(count), &last, |b, last| {
            b.iter(|| black_box(injector.get(last.as_str())))
        });
    }
    group.finish();
}

fn bench_parent_walk(c: &mut Criterion) {
    let mut group = c.benchmark_group("injector/parent_walk");
    for depth in [1, 4, 16] {
        let root = Injector::resolve_and_create(chained_providers(1)).unwrap();
        let mut leaf = root.clone();
        for _ in 0..depth {
            leaf = leaf.resolve_and_create_child(Vec::new()).unwrap();
        }
        group.bench_with_input(BenchmarkId::from_parameter(depth), &leaf, |b, leaf| {
            b.iter(|| black_box(leaf.get("link0")))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_resolve, bench_cached_get, bench_parent_walk);
criterion_main!(benches);
