use criterion::{black_box, criterion_group, criterion_main, Criterion};
use proctimer::{to_clock_parts, Timer};

fn clock_parts(c: &mut Criterion) {
    c.bench_function("to_clock_parts", |b| {
        b.iter(|| to_clock_parts(black_box(90_061.75)))
    });
}

fn stopwatch_reads(c: &mut Criterion) {
    let mut timer = Timer::new();
    timer.start().unwrap();
    c.bench_function("timer_current_time", |b| {
        b.iter(|| black_box(&timer).current_time().unwrap())
    });
    timer.stop().unwrap();
}

criterion_group!(benches, clock_parts, stopwatch_reads);
criterion_main!(benches);
