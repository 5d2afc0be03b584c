mod fixtures;

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use criterion::{BatchSize, BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};

use respcast::config::FitConfig;
use respcast::events::{Event, SimEvent};
use respcast::los_fit::fit_los;
use respcast::monte_carlo::aggregate;
use respcast::simulation::Simulation;
use respcast::types::{AgeCohort, PatientId, SimTime};

use fixtures::{LARGE, MEDIUM, SMALL, config, los_sample, models, proportions, scenario};

// ── Group 1: single_run: one trajectory per outbreak size ──────────────────

fn bench_single_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("single_run");
    let models = models();
    let proportions = proportions();
    let config = config(1);
    for (name, outbreak) in [("small", &SMALL), ("medium", &MEDIUM), ("large", &LARGE)] {
        if name == "large" {
            group.sample_size(10);
        }
        let scenario = scenario(outbreak);
        group.throughput(Throughput::Elements(outbreak.expected_patients()));
        group.bench_function(BenchmarkId::from_parameter(name), |b| {
            b.iter_batched(
                || Simulation::new(&scenario, &models, &proportions, &config, 42).expect("valid inputs"),
                |mut sim| sim.run().expect("run completes"),
                BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

// ── Group 2: monte_carlo: run-count scaling ─────────────────────────────────

fn bench_monte_carlo(c: &mut Criterion) {
    let mut group = c.benchmark_group("monte_carlo");
    group.sample_size(10);
    let scenario = scenario(&MEDIUM);
    let models = models();
    let proportions = proportions();
    for &runs in &[1usize, 10, 30, 100] {
        group.throughput(Throughput::Elements(runs as u64));
        let config = config(runs);
        group.bench_with_input(BenchmarkId::from_parameter(runs), &runs, |b, _| {
            b.iter(|| aggregate(&scenario, &models, &proportions, &config).expect("forecast completes"))
        });
    }
    group.finish();
}

// ── Group 3: event_queue: BinaryHeap in isolation ───────────────────────────

fn bench_event_queue(c: &mut Criterion) {
    let mut group = c.benchmark_group("event_queue");
    for &count in &[1_000usize, 10_000, 100_000, 1_000_000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &n| {
            b.iter_batched(
                || {
                    (0..n)
                        .map(|i| {
                            let hour = if i % 2 == 0 { i } else { n - i };
                            let t = hour as f64 / 24.0;
                            Reverse(SimEvent {
                                time: SimTime(t),
                                seq: i as u64,
                                event: Event::PatientDischarged { patient: PatientId(i as u64) },
                            })
                        })
                        .collect::<Vec<_>>()
                },
                |items| {
                    let mut heap = BinaryHeap::with_capacity(items.len());
                    for item in items {
                        heap.push(item);
                    }
                    while let Some(v) = heap.pop() {
                        std::hint::black_box(v);
                    }
                },
                BatchSize::LargeInput,
            )
        });
    }
    group.finish();
}

// ── Group 4: los_fit: full family catalogue vs sample size ──────────────────

fn bench_los_fit(c: &mut Criterion) {
    let mut group = c.benchmark_group("los_fit");
    group.sample_size(10);
    let fit_config = FitConfig::default();
    for &n in &[200usize, 1_000, 5_000] {
        let sample = los_sample(n, 7);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::from_parameter(n), &sample, |b, s| {
            b.iter(|| fit_los(s, AgeCohort::Adult, &fit_config).expect("fit completes"))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_single_run, bench_monte_carlo, bench_event_queue, bench_los_fit);
criterion_main!(benches);
