//! Measurements of job generation and submission order shuffling.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use sweep_core::{JobShuffler, ParamValue, ParameterAxis, ParameterSpace};

criterion_group!(space, generate_jobs, shuffle_jobs);
criterion_main!(space);

/// Space of 10 000 jobs over four axes of mixed value kinds.
fn bench_space() -> ParameterSpace {
    ParameterSpace::new(vec![
        ParameterAxis::from_range("seed", 0, 100, 1).unwrap(),
        ParameterAxis::new(
            "rate",
            (1..=5).map(|n| ParamValue::Float(10f64.powi(-n))).collect(),
        ),
        ParameterAxis::new("algo", vec!["classical".into(), "gillespie".into()]),
        ParameterAxis::new(
            "dispersal",
            (0..10).map(|n| ParamValue::Int(n * 5)).collect(),
        ),
    ])
    .unwrap()
}

fn generate_jobs(c: &mut Criterion) {
    let space = bench_space();
    c.bench_function("generate_jobs_10000", |b| {
        b.iter(|| black_box(space.jobs()))
    });
}

fn shuffle_jobs(c: &mut Criterion) {
    let space = bench_space();
    let mut jobs = space.jobs();
    c.bench_function("shuffle_jobs_10000", |b| {
        b.iter(|| {
            let mut shuffler = JobShuffler::new(42);
            shuffler.shuffle(&mut jobs);
            black_box(&jobs);
        })
    });
}
