use criterion::{
    black_box, criterion_group, criterion_main, AxisScale, BatchSize, BenchmarkId, Criterion,
    PlotConfiguration,
};

use urban_twin::kernel::{ScriptedKernel, SimulationKernel};
use urban_twin::topology::TopologyStore;
use urban_twin::turns::{TurnPatternTable, TurnRouter};

/// Crossroads with a traffic light at the centre and exits on all sides.
fn crossroads() -> TopologyStore {
    let junctions = "node_id;node_x;node_y;node_type
w;-100;0;priority
c;0;0;traffic_light
e;100;0;priority
n;0;100;priority
s;0;-100;priority
";
    let edges = "edge_id;edge_from;edge_to;edge_numLanes
w_c;w;c;1
c_e;c;e;1
c_n;c;n;1
c_s;c;s;1
";
    TopologyStore::load_topology(edges.as_bytes(), junctions.as_bytes()).unwrap()
}

fn mixed_pattern() -> TurnPatternTable {
    let csv = "timestep_begin;road;prob_right;prob_left;prob_forward\n\
               0;w_c;0.25;0.25;0.5\n";
    TurnPatternTable::from_reader(csv.as_bytes()).unwrap()
}

/// Builds a started kernel with `vehicles` cars queued on the approach road.
fn loaded_kernel(vehicles: usize) -> ScriptedKernel {
    let mut kernel = ScriptedKernel::new();
    kernel.start(&[]).unwrap();
    kernel.add_traffic_light("c", &["p1"], "p1");
    kernel.script_route("w_c", "c_e", &["w_c", "c_e"]);
    kernel.script_route("w_c", "c_n", &["w_c", "c_n"]);
    kernel.script_route("w_c", "c_s", &["w_c", "c_s"]);
    for i in 0..vehicles {
        let id = format!("veh_{}", i);
        kernel.add_vehicle(&id, "default", "w_c", &["w_c", "c_e"]);
    }
    kernel
}

/// Benchmarks one routing step over increasing numbers of vehicles waiting
/// at the same traffic light approach.
fn bench_process_step(c: &mut Criterion) {
    let batch_sizes = [50, 200, 1000];
    let topology = crossroads();

    let mut group = c.benchmark_group("Turn_Routing_Step");
    group.plot_config(PlotConfiguration::default().summary_scale(AxisScale::Linear));

    for &batch in batch_sizes.iter() {
        let kernel = loaded_kernel(batch);
        let mut router = TurnRouter::new(mixed_pattern(), false, 42);
        group.bench_with_input(BenchmarkId::new("process_step", batch), &batch, |b, &_batch| {
            b.iter_batched(
                || kernel.clone(),
                |mut kernel| {
                    let events = router
                        .process_step(&mut kernel, &topology, 0, |_, _| false)
                        .unwrap();
                    black_box(events)
                },
                BatchSize::SmallInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_process_step);
criterion_main!(benches);
