use std::hint::black_box;
use criterion::{criterion_group, criterion_main, Criterion};
use exg_conn::{
    Band, BlockPair, CohereParams, ConnectivityOptions, FreqBands, Method, MetricEngine, SignalBlock,
};
use ndarray::Array2;
use rand::{rngs::StdRng, Rng, SeedableRng};

const SFREQ: f64 = 256.0;

/// 16 rows × 10 s of seeded noise.
fn block() -> BlockPair {
    let mut rng = StdRng::seed_from_u64(42);
    let data = Array2::from_shape_fn((16, 2560), |_| rng.gen_range(-1.0..1.0));
    BlockPair::same(SignalBlock::from_sfreq(data, SFREQ, 0.0).unwrap())
}

fn alpha(method: Method) -> ConnectivityOptions {
    ConnectivityOptions {
        freq_bands: FreqBands::Bands(vec![Band::new("alpha", 8.0, 12.0)]),
        ..ConnectivityOptions::for_method(method)
    }
}

fn bench_corr(c: &mut Criterion) {
    let pair = block();
    let engine = MetricEngine::default();
    let opts = ConnectivityOptions::default();
    c.bench_function("corr [16×2560]", |b| {
        b.iter(|| black_box(engine.compute(black_box(&pair), &opts).unwrap().raw.dim()))
    });
}

fn bench_cohere(c: &mut Criterion) {
    let pair = block();
    let engine = MetricEngine::default();
    let opts = ConnectivityOptions::for_method(Method::Cohere(CohereParams::default()));
    c.bench_function("mscohere 1 s windows [16×2560]", |b| {
        b.iter(|| black_box(engine.compute(black_box(&pair), &opts).unwrap().raw.dim()))
    });
}

fn bench_wpli(c: &mut Criterion) {
    let pair = block();
    let engine = MetricEngine::default();
    let opts = alpha(Method::Wpli);
    c.bench_function("wpli alpha [16×2560]", |b| {
        b.iter(|| black_box(engine.compute(black_box(&pair), &opts).unwrap().raw.dim()))
    });
}

fn bench_aec(c: &mut Criterion) {
    let pair = block();
    let engine = MetricEngine::default();
    let opts = alpha(Method::Aec(Default::default()));
    c.bench_function("aec alpha [16×2560]", |b| {
        b.iter(|| black_box(engine.compute(black_box(&pair), &opts).unwrap().raw.dim()))
    });
}

criterion_group!(benches, bench_corr, bench_cohere, bench_wpli, bench_aec);
criterion_main!(benches);
