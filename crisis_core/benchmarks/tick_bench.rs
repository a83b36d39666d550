use crisis_core::{run_tick, try_build_headless_app, ScenarioDefinition, SimulationConfig};
use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};

fn bench_tick(c: &mut Criterion) {
    let scenario = ScenarioDefinition::builtin();
    let mut group = c.benchmark_group("tick");

    for size in [16u32, 32, 64, 96] {
        group.bench_with_input(BenchmarkId::new("grid", size), &size, |b, &size| {
            b.iter_batched(
                || {
                    let config = SimulationConfig {
                        grid_width: size,
                        grid_height: size,
                        level: "crisis_demo".to_string(),
                        ..SimulationConfig::default()
                    };
                    try_build_headless_app(config, &scenario).expect("builtin scenario builds")
                },
                |mut app| {
                    run_tick(&mut app);
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(tick_benches, bench_tick);
criterion_main!(tick_benches);
