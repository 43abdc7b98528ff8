//! Criterion benchmarks for the payload generators.
//!
//! Covers: address generation, each mutation operator, forged control frame
//! generation and IHAVE envelope encoding.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use rand::SeedableRng;
use rand::rngs::StdRng;

use filchaos_core::envelope::{ihave_envelope, Malformation};
use filchaos_core::{generate_address, generate_forged_control_frame, MutationOperator};

fn bench_generate_address(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(42);

    c.bench_function("generate_address", |b| {
        b.iter(|| generate_address(black_box(&mut rng)))
    });
}

fn bench_mutation_operators(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(7);
    let mut group = c.benchmark_group("mutation_operator");
    for op in MutationOperator::ALL {
        group.bench_function(format!("{op:?}"), |b| b.iter(|| op.apply(black_box(&mut rng))));
    }
    group.finish();
}

fn bench_forged_frames(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(1);

    c.bench_function("forged_frame_20", |b| {
        b.iter(|| generate_forged_control_frame(&mut rng, black_box("/fil/blocks/fuzz"), 20))
    });

    c.bench_function("forged_frame_50", |b| {
        b.iter(|| generate_forged_control_frame(&mut rng, black_box("/fil/blocks/fuzz"), 50))
    });
}

fn bench_envelopes(c: &mut Criterion) {
    let mut rng = StdRng::seed_from_u64(3);
    let frame = generate_forged_control_frame(&mut rng, "/fil/blocks/fuzz", 50);

    c.bench_function("ihave_envelope_50", |b| {
        b.iter(|| ihave_envelope(black_box(&frame)))
    });

    c.bench_function("malformed_nested_overflow", |b| {
        b.iter(|| Malformation::NestedOverflow.forge(&mut rng, black_box(&frame)))
    });
}

criterion_group!(
    benches,
    bench_generate_address,
    bench_mutation_operators,
    bench_forged_frames,
    bench_envelopes,
);
criterion_main!(benches);
