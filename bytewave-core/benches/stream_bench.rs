use bytewave_core::prelude::*;
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn pull_quantum(c: &mut Criterion) {
    let drone = mul(add(osc(120.1), mul(noise(3), 0.1)), 0.5);
    let gate = mul(
        noise(5),
        cycle(cat(cat(take(osc(1.0), seconds(0.5)), take(osc(4.0), seconds(0.5))), take(constant(0.0), seconds(0.5)))),
    );

    c.bench_function("drone_1600", |b| {
        let mut it = drone.iter();
        b.iter(|| {
            for _ in 0..1600 {
                black_box(it.next());
            }
        });
    });

    c.bench_function("gate_1600", |b| {
        let mut it = gate.iter();
        b.iter(|| {
            for _ in 0..1600 {
                black_box(it.next());
            }
        });
    });

    c.bench_function("instantiate_drone", |b| b.iter(|| black_box(drone.iter())));
}

criterion_group!(benches, pull_quantum);
criterion_main!(benches);
