use criterion::{BenchmarkId, Criterion, criterion_group, criterion_main};
use cytonorm_rs::stats::{CurveFitter, Lowess, earth_movers_distance};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::hint::black_box;

/// Synthetic (reference, marker) pairs with a saturating dependency plus noise
fn generate_events(n_events: usize) -> (Vec<f64>, Vec<f64>) {
    let mut rng = StdRng::seed_from_u64(42);
    let reference: Vec<f64> = (0..n_events).map(|_| rng.random_range(1.0..500.0)).collect();
    let marker = reference
        .iter()
        .map(|r| 50.0 * r / (r + 100.0) + rng.random_range(-5.0..5.0))
        .collect();
    (reference, marker)
}

fn benchmark_lowess(c: &mut Criterion) {
    let mut group = c.benchmark_group("lowess_fit");
    group.sample_size(10);

    for n_events in [500, 2_000, 10_000] {
        let (reference, marker) = generate_events(n_events);

        group.bench_with_input(
            BenchmarkId::new("exact", n_events),
            &n_events,
            |b, _| {
                let lowess = Lowess::default();
                b.iter(|| lowess.fit(black_box(&reference), black_box(&marker)));
            },
        );

        // delta skipping, as used for large acquisitions
        group.bench_with_input(
            BenchmarkId::new("delta_1pct", n_events),
            &n_events,
            |b, _| {
                let lowess = Lowess {
                    delta: 0.01 * 500.0,
                    ..Default::default()
                };
                b.iter(|| lowess.fit(black_box(&reference), black_box(&marker)));
            },
        );
    }

    group.finish();
}

fn benchmark_emd(c: &mut Criterion) {
    let mut group = c.benchmark_group("earth_movers_distance");

    for n_events in [1_000, 10_000, 100_000] {
        let (from, _) = generate_events(n_events);
        let (_, to) = generate_events(n_events / 2);

        group.bench_with_input(BenchmarkId::from_parameter(n_events), &n_events, |b, _| {
            b.iter(|| earth_movers_distance(black_box(&from), black_box(&to)));
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_lowess, benchmark_emd);
criterion_main!(benches);
