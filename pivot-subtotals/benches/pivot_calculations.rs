//! FILENAME: pivot-subtotals/benches/pivot_calculations.rs
//! Composition benchmarks over synthetic sales records.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use pivot_subtotals::{
    calculate_from_cache, calculate_pivot, AggregationType, CompositionStrategy, PivotCache, PivotDefinition,
    Record,
};

fn sales(rows: usize) -> Vec<Record> {
    let regions = ["East", "West", "North", "South"];
    (0..rows)
        .map(|i| {
            Record::new(Some((i % 97) as f64 * 1.5))
                .with("Category", format!("Category_{:02}", i % 12))
                .with("Product", format!("Product_{:03}", i % 150))
                .with("Region", regions[i % regions.len()])
                .with("Year", (2020 + (i % 5)) as i64)
        })
        .collect()
}

fn definition(strategy: CompositionStrategy) -> PivotDefinition {
    let mut def = PivotDefinition::from_names(&["Category", "Product"], &["Region", "Year"]);
    def.options.strategy = strategy;
    def
}

fn bench_compose(c: &mut Criterion) {
    let mut group = c.benchmark_group("compose");
    for rows in [1_000usize, 10_000, 50_000] {
        let records = sales(rows);
        for (name, strategy) in [
            ("merge_states", CompositionStrategy::MergeStates),
            ("recompute", CompositionStrategy::Recompute),
        ] {
            let def = definition(strategy);
            group.bench_with_input(BenchmarkId::new(name, rows), &records, |b, records| {
                b.iter(|| calculate_pivot(black_box(&def), black_box(records)).unwrap())
            });
        }
    }
    group.finish();
}

fn bench_cached_average(c: &mut Criterion) {
    let records = sales(10_000);
    let def = definition(CompositionStrategy::MergeStates).with_aggregation(AggregationType::Average);
    let cache = PivotCache::build(&def, &records).unwrap();
    c.bench_function("compose_from_cache_average", |b| {
        b.iter(|| calculate_from_cache(black_box(&def), black_box(&cache)).unwrap())
    });
}

criterion_group!(benches, bench_compose, bench_cached_average);
criterion_main!(benches);
