use criterion::{
    black_box, criterion_group, criterion_main, AxisScale, BenchmarkId, Criterion,
    PlotConfiguration,
};

use urban_twin::analyzer::TrafficAnalyzer;

/// Generates (ns, ew) count pairs spread over all flow bands.
fn generate_count_pairs(batch_size: usize) -> Vec<(u64, u64)> {
    (0..batch_size)
        .map(|i| {
            let ns = (i % 300) as u64;
            let ew = ((i * 7) % 300) as u64;
            (ns, ew)
        })
        .collect()
}

/// Benchmarks traffic-type classification for different batch sizes and
/// temporal-window lengths.
fn bench_traffic_type_batches(c: &mut Criterion) {
    let batch_sizes = [100, 1000, 10_000];

    let mut group = c.benchmark_group("Traffic_Type_Classification");
    group.plot_config(PlotConfiguration::default().summary_scale(AxisScale::Linear));

    for &batch in batch_sizes.iter() {
        let pairs = generate_count_pairs(batch);

        for window_minutes in [5u32, 15, 30] {
            let analyzer = TrafficAnalyzer::with_defaults(window_minutes);
            group.bench_with_input(
                BenchmarkId::new(format!("traffic_type_{}min", window_minutes), batch),
                &batch,
                |b, &_batch| {
                    b.iter(|| {
                        for &(ns, ew) in &pairs {
                            black_box(analyzer.traffic_type(black_box(ns), black_box(ew)));
                        }
                    });
                },
            );
        }
    }
    group.finish();
}

criterion_group!(benches, bench_traffic_type_batches);
criterion_main!(benches);
