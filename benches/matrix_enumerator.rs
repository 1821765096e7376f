//! Sliding-window throughput of the matrix enumerator and the query engine.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use lantern_lib::core::config::QueryConfig;
use lantern_lib::metrics::{Labels, MatrixEnumerator, Sample, TimeSeries};
use lantern_lib::query::{EvalRange, QueryEngine};
use lantern_lib::storage::Storage;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::runtime::Runtime;
use tokio_util::sync::CancellationToken;

fn samples(count: i64) -> Vec<Sample> {
    (0..count).map(|i| Sample::new(i * 15, i as f64)).collect()
}

/// Walks a 5m window in 15s steps across the whole series.
fn bench_window_walk(c: &mut Criterion) {
    let mut group = c.benchmark_group("matrix_enumerator");

    for size in [1_000i64, 10_000, 100_000] {
        let data = samples(size);
        group.throughput(Throughput::Elements(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, data| {
            b.iter(|| {
                let mut enumerator = MatrixEnumerator::new(data);
                let mut buffer = VecDeque::new();
                let mut seen = 0usize;
                let end = size * 15;
                let mut t = 0;
                while t <= end {
                    let window = enumerator
                        .enumerate(t - 299, t, Some(&mut buffer))
                        .unwrap();
                    seen += window.len();
                    t += 15;
                }
                black_box(seen)
            });
        });
    }
    group.finish();
}

/// `sum by (job) (rate(...))` over many series.
fn bench_range_query(c: &mut Criterion) {
    let rt = Runtime::new().unwrap();
    let storage = Storage::in_memory();
    let cancel = CancellationToken::new();

    let series: Vec<TimeSeries> = (0..200)
        .map(|i| {
            let labels = Labels::from_pairs([
                ("__name__".to_string(), "requests_total".to_string()),
                ("job".to_string(), format!("job-{}", i % 10)),
                ("pod".to_string(), format!("pod-{}", i)),
            ]);
            TimeSeries::new(labels, samples(240))
        })
        .collect();
    rt.block_on(storage.series_writer.write(&series, &cancel)).unwrap();

    let engine = QueryEngine::new(
        Arc::clone(&storage.metric_reader),
        &QueryConfig::default(),
        10_000,
    );
    let range = EvalRange {
        start: 600,
        end: 3_600,
        step: 15,
    };

    c.bench_function("range_query_sum_rate_200_series", |b| {
        b.iter(|| {
            let result = rt
                .block_on(engine.range_query(
                    "sum by (job) (rate(requests_total[5m]))",
                    range,
                    &cancel,
                ))
                .unwrap();
            black_box(result.len())
        });
    });
}

criterion_group!(benches, bench_window_walk, bench_range_query);
criterion_main!(benches);
