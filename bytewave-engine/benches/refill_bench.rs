use bytewave_engine::{Engine, Expr, Patch, Signal, SignalSlot};
use criterion::{black_box, criterion_group, criterion_main, Criterion};

fn refill(c: &mut Criterion) {
    let mut buf = vec![0.0_f32; 1600];

    let expr = Expr::parse("t*(t>>5|t>>8)").unwrap_or(Expr::Time);
    let mut classic = Engine::new(SignalSlot::new(Signal::bytebeat(expr)), 48_000);
    c.bench_function("refill_bytebeat_1600", |b| b.iter(|| black_box(classic.fill(&mut buf))));

    let mut drone = Engine::new(SignalSlot::new(Patch::Drone.signal(48_000)), 48_000);
    c.bench_function("refill_drone_1600", |b| b.iter(|| black_box(drone.fill(&mut buf))));

    c.bench_function("parse_classic", |b| b.iter(|| black_box(Expr::parse(black_box("t*(t>>5|t>>8)&(t>>11)")))));
}

criterion_group!(benches, refill);
criterion_main!(benches);
