//! Canonical Hasher and Registry Benchmarks
//!
//! Measures the per-query cost on the recording hot path: hashing a search
//! node or pipeline, and bumping an existing record.

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion};
use pqs_tracker::config::{PersistenceConfig, TrackerConfig};
use pqs_tracker::hasher::{hash_aggs, hash_query};
use pqs_tracker::query::{
    AggregateFunction, DtypeValue, FilterOperator, LogicalOperator, MeasureAggregator,
    QueryAggregators, SearchNode, SearchQuery,
};
use pqs_tracker::PqsTracker;
use std::hint::black_box;

// =============================================================================
// Query Generators
// =============================================================================

/// AND of `n` equality and range filters plus one free-text match
fn search_node(n: usize) -> SearchNode {
    let mut queries: Vec<SearchQuery> = (0..n)
        .map(|i| {
            if i % 2 == 0 {
                SearchQuery::column_equals(&format!("col{}", i), DtypeValue::from(format!("v{}", i)))
            } else {
                SearchQuery::compare(
                    &format!("col{}", i),
                    FilterOperator::GreaterThan,
                    DtypeValue::from(i as i64),
                )
            }
        })
        .collect();
    queries.push(SearchQuery::match_words("message", &["error", "timeout"], LogicalOperator::Or));
    SearchNode::and_of(queries)
}

fn pipeline(n: usize) -> QueryAggregators {
    let columns: Vec<String> = (0..n).map(|i| format!("dim{}", i)).collect();
    let refs: Vec<&str> = columns.iter().map(String::as_str).collect();
    QueryAggregators::group_by(
        &refs,
        vec![
            MeasureAggregator::new("latency", AggregateFunction::Avg),
            MeasureAggregator::new("bytes", AggregateFunction::Sum),
        ],
    )
}

// =============================================================================
// Benchmarks
// =============================================================================

fn bench_hash_query(c: &mut Criterion) {
    let mut group = c.benchmark_group("hash_query");
    for size in [1, 8, 32] {
        let node = search_node(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &node, |b, node| {
            b.iter(|| hash_query(black_box(node)))
        });
    }
    group.finish();
}

fn bench_hash_aggs(c: &mut Criterion) {
    let mut group = c.benchmark_group("hash_aggs");
    for size in [1, 4, 16] {
        let aggs = pipeline(size);
        group.bench_with_input(BenchmarkId::from_parameter(size), &aggs, |b, aggs| {
            b.iter(|| hash_aggs(black_box(aggs)))
        });
    }
    group.finish();
}

fn bench_record_repeat(c: &mut Criterion) {
    let tracker = PqsTracker::new(TrackerConfig::default(), &PersistenceConfig::default());
    let tables = vec!["web".to_string()];
    let node = search_node(8);

    c.bench_function("record_search_repeat", |b| {
        b.iter(|| tracker.record_search(black_box(&tables), black_box(&node), "bench"))
    });
}

criterion_group!(benches, bench_hash_query, bench_hash_aggs, bench_record_repeat);
criterion_main!(benches);
