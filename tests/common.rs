/// Shared signal generators for the integration tests.
use exg_conn::{MemoryLoader, SignalBlock, Values};
use ndarray::{Array2, Ix4};
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::f64::consts::PI;

pub const SFREQ: f64 = 256.0;

#[allow(unused)]
/// White noise in `[-1, 1)`, `[rows × n]`.
pub fn noise(rows: usize, n: usize, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array2::from_shape_fn((rows, n), |_| rng.gen_range(-1.0..1.0))
}

#[allow(unused)]
/// Sinusoids at `freq` Hz, one per phase offset, with a little noise.
pub fn sines(freq: f64, phases: &[f64], n: usize, sfreq: f64, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    Array2::from_shape_fn((phases.len(), n), |(r, t)| {
        (2.0 * PI * freq * t as f64 / sfreq + phases[r]).sin() + 0.05 * rng.gen_range(-1.0..1.0)
    })
}

#[allow(unused)]
/// Two rows: row 0 is white noise, row 1 follows it with a one-sample lag.
pub fn driven_pair(n: usize, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let x: Vec<f64> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let mut y = vec![0.0; n];
    for t in 1..n {
        y[t] = 0.5 * y[t - 1] + 0.8 * x[t - 1] + 0.2 * rng.gen_range(-1.0..1.0);
    }
    Array2::from_shape_fn((2, n), |(r, t)| if r == 0 { x[t] } else { y[t] })
}

#[allow(unused)]
pub fn block(data: Array2<f64>) -> SignalBlock {
    SignalBlock::from_sfreq(data, SFREQ, 0.0).expect("valid block")
}

#[allow(unused)]
/// `n` noisy trials registered as `trial0 … trial{n-1}`, commented `"Rest (#k)"`.
pub fn trial_loader(n: usize, rows: usize, samples: usize) -> (MemoryLoader, Vec<String>) {
    let mut loader = MemoryLoader::new();
    let mut files = Vec::with_capacity(n);
    for k in 0..n {
        let b = block(noise(rows, samples, 100 + k as u64)).with_comment(format!("Rest (#{})", k + 1));
        let name = format!("trial{k}");
        loader.insert(name.clone(), b);
        files.push(name);
    }
    (loader, files)
}

#[allow(unused)]
pub fn real(v: &Values<Ix4>) -> &ndarray::Array4<f64> {
    v.as_real().expect("real values")
}

#[allow(unused)]
/// Maximum absolute element-wise difference.
pub fn max_abs_diff(a: &ndarray::Array4<f64>, b: &ndarray::Array4<f64>) -> f64 {
    assert_eq!(a.shape(), b.shape(), "shape mismatch");
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).abs()).fold(0.0_f64, f64::max)
}
