use criterion::{criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion};
use winery_core::{
    winery_handlers, Building, BuildingRegistry, StaffRoster, TaskScheduler, TaskSpec,
    WineryState,
};
use winery_runtime::TaskActivity;

fn scheduler_with(tasks: usize, roster: &StaffRoster) -> TaskScheduler {
    let mut scheduler = TaskScheduler::new();
    let staff: Vec<_> = roster.members().iter().map(|m| m.id).collect();
    for n in 0..tasks {
        let assigned = [staff[n % staff.len()], staff[(n + 1) % staff.len()]];
        let spec = TaskSpec::new(TaskActivity::Maintenance, 1.0e9).staff(assigned);
        scheduler
            .add_task(spec, roster)
            .expect("tasks without hooks are always created");
    }
    scheduler
}

fn bench_tick(c: &mut Criterion) {
    let mut group = c.benchmark_group("process_tick");
    let roster = StaffRoster::with_seed(7, 24);

    for size in [16usize, 128, 1024] {
        group.bench_with_input(BenchmarkId::new("tasks", size), &size, |b, &size| {
            b.iter_batched(
                || {
                    (
                        scheduler_with(size, &roster),
                        BuildingRegistry::new(vec![Building::new("tool_shed", "Tool Shed", 4)]),
                        winery_handlers(),
                        WineryState::default(),
                    )
                },
                |(mut scheduler, mut buildings, mut handlers, mut state)| {
                    scheduler.process_tick(&roster, &mut buildings, &mut handlers, &mut state)
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(tick_benches, bench_tick);
criterion_main!(tick_benches);
