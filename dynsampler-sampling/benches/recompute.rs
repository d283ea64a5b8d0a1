use std::collections::BTreeMap;

use criterion::{BatchSize, BenchmarkId, Criterion, criterion_group, criterion_main};
use dynsampler_sampling::{EmaConfig, EmaSampleRate, Sampler, calculate_sample_rates};

/// Traffic with a long tail: key `i` occurs roughly `100_000 / (i + 1)` times.
fn long_tail(keys: usize) -> Vec<(String, u64)> {
    (0..keys)
        .map(|i| (format!("key-{i:06}"), 100_000 / (i as u64 + 1)))
        .collect()
}

fn bench_calculate_sample_rates(c: &mut Criterion) {
    let mut group = c.benchmark_group("calculate_sample_rates");

    for keys in [10, 1_000, 100_000] {
        let averages: BTreeMap<String, f64> = long_tail(keys)
            .into_iter()
            .map(|(key, count)| (key, count as f64))
            .collect();

        group.bench_with_input(BenchmarkId::from_parameter(keys), &averages, |b, averages| {
            b.iter(|| calculate_sample_rates(20, averages));
        });
    }

    group.finish();
}

fn bench_recompute(c: &mut Criterion) {
    let mut group = c.benchmark_group("recompute");

    for keys in [10, 1_000, 100_000] {
        let traffic = long_tail(keys);

        group.bench_with_input(BenchmarkId::from_parameter(keys), &traffic, |b, traffic| {
            b.iter_batched(
                || {
                    let sampler = EmaSampleRate::new(EmaConfig {
                        goal_sample_rate: 20,
                        ..Default::default()
                    })
                    .unwrap();
                    for (key, count) in traffic {
                        sampler.get_sample_rate_multi(key, *count);
                    }
                    sampler
                },
                |sampler| sampler.recompute(),
                BatchSize::LargeInput,
            );
        });
    }

    group.finish();
}

fn bench_get_sample_rate(c: &mut Criterion) {
    let traffic = long_tail(1_000);
    let sampler = EmaSampleRate::new(EmaConfig::default()).unwrap();
    for (key, count) in &traffic {
        sampler.get_sample_rate_multi(key, *count);
    }
    sampler.recompute();

    c.bench_function("get_sample_rate", |b| {
        let mut keys = traffic.iter().cycle();
        b.iter(|| {
            let (key, _) = keys.next().unwrap();
            sampler.get_sample_rate(key)
        });
    });
}

criterion_group!(
    benches,
    bench_calculate_sample_rates,
    bench_recompute,
    bench_get_sample_rate
);
criterion_main!(benches);
