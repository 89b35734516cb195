use criterion::{Criterion, criterion_group, criterion_main};
use fixedmath::{fixed16_div, fixed16_mul, reciprocal_fixed16};

fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("fixed16_mul", |b| {
        b.iter(|| fixed16_mul(std::hint::black_box(0x0001_8000), std::hint::black_box(0x0002_4000)));
    });

    c.bench_function("fixed16_div", |b| {
        b.iter(|| fixed16_div(std::hint::black_box(0x0001_8000), std::hint::black_box(0x0002_4000)));
    });

    c.bench_function("reciprocal_fixed16", |b| {
        b.iter(|| reciprocal_fixed16(std::hint::black_box(0x0002_4000)));
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
