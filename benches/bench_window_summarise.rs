use criterion::{
    black_box, criterion_group, criterion_main, AxisScale, BenchmarkId, Criterion,
    PlotConfiguration,
};

use urban_twin::history::{ContextualHistory, SampleField};

/// Fills window 0 of a history with `lanes` inbound lanes, each carrying one
/// cycle's worth of per-tick samples on every field.
fn filled_history(lanes: usize) -> ContextualHistory {
    let lane_ids: Vec<String> = (0..lanes).map(|i| format!("in_{}_0", i)).collect();
    let mut history = ContextualHistory::new("c", lane_ids.clone(), 4);
    history.open_window(0, "p1").unwrap();
    for (i, lane) in lane_ids.iter().enumerate() {
        for tick in 0..90 {
            let value = (i + tick) as f64 * 0.01;
            for field in [
                SampleField::Occupancy,
                SampleField::Co2,
                SampleField::Co,
                SampleField::Hc,
                SampleField::Pmx,
                SampleField::Nox,
                SampleField::Noise,
            ] {
                history.append_lane_sample(0, lane, field, value).unwrap();
            }
        }
    }
    history
}

/// Benchmarks window summarisation for traffic lights with increasing lane
/// counts.
fn bench_summarise(c: &mut Criterion) {
    let batch_sizes = [4, 16, 64];

    let mut group = c.benchmark_group("Window_Summarise");
    group.plot_config(PlotConfiguration::default().summary_scale(AxisScale::Linear));

    for &batch in batch_sizes.iter() {
        let history = filled_history(batch);
        group.bench_with_input(BenchmarkId::new("summarise", batch), &batch, |b, &_batch| {
            b.iter(|| black_box(history.summarise(black_box(0)).unwrap()));
        });
    }
    group.finish();
}

criterion_group!(benches, bench_summarise);
criterion_main!(benches);
