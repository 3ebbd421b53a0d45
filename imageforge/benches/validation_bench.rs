//! Benchmarks for request admission.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use imageforge::testing::{request, sample_catalog};
use imageforge::validation::{validate_output_name, validate_request, RequestLimits};

fn validation_benchmark(c: &mut Criterion) {
    let catalog = sample_catalog();
    let limits = RequestLimits::default();
    let valid = request(&["a", "b", "base"], Some("nightly build-42"));
    let traversal = request(&["a"], Some("%252e%252e%252fetc"));

    c.bench_function("validate_request/valid", |b| {
        b.iter(|| validate_request(black_box(&valid), &catalog, &limits))
    });

    c.bench_function("validate_request/encoded_traversal", |b| {
        b.iter(|| validate_request(black_box(&traversal), &catalog, &limits))
    });

    c.bench_function("validate_output_name/long", |b| {
        let name = "a".repeat(200);
        b.iter(|| validate_output_name(black_box(&name)))
    });
}

criterion_group!(benches, validation_benchmark);
criterion_main!(benches);
