use std::hint::black_box;
use std::time::Instant;

use kiln_ecs::{ComponentStore, Record, Schedule, Update, system_fn};

fn make_store(entity_count: usize) -> ComponentStore<f32> {
    let mut store = ComponentStore::new();
    store.add_component("angle", None, Some(0.0)).unwrap();
    store.add_component("speed", None, Some(1.0)).unwrap();
    store.add_component("tag", None, None).unwrap();
    for i in 0..entity_count {
        if i % 2 == 0 {
            store.add_entity([("tag", 1.0)]);
        } else {
            store.add_entity([]);
        }
    }
    store
}

fn bench_noop(entity_count: usize, iterations: usize) {
    let mut store = make_store(entity_count);
    let mut schedule = Schedule::new();
    schedule.add_system(system_fn("noop", |_, _: &Record<f32>, _: &mut ()| None));

    let start = Instant::now();
    for _ in 0..iterations {
        black_box(store.run_systems(&mut schedule, &mut ()));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!(
        "  no-op pass ({entity_count} entities, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}"
    );
}

fn bench_chained(entity_count: usize, iterations: usize) {
    let mut store = make_store(entity_count);
    let mut schedule = Schedule::new();
    schedule.add_system(system_fn("advance", |_, row: &Record<f32>, dt: &mut f32| {
        Some(Update::new().set("angle", row["angle"] + row["speed"] * *dt))
    }));
    schedule.add_system(system_fn("tagged", |_, row: &Record<f32>, _: &mut f32| {
        row.contains_key("tag")
            .then(|| Update::new().set("speed", row["speed"] * 0.99))
    }));

    let mut dt = 1.0 / 60.0;
    let start = Instant::now();
    for _ in 0..iterations {
        black_box(store.run_systems(&mut schedule, black_box(&mut dt)));
    }
    let elapsed = start.elapsed();
    let per_iter = elapsed / iterations as u32;
    println!(
        "  chained pass ({entity_count} entities, {iterations} iters): {per_iter:?}/iter, total {elapsed:?}"
    );
}

fn main() {
    println!("=== Component Store Benchmarks ===\n");

    println!("No-op system:");
    bench_noop(100, 1000);
    bench_noop(1000, 100);
    bench_noop(10000, 10);

    println!("\nTwo chained systems:");
    bench_chained(100, 1000);
    bench_chained(1000, 100);
    bench_chained(10000, 10);

    println!("\n=== Done ===");
}
