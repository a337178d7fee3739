//! Overlap-add zero-phase FIR convolution.
//!
//! Matches MNE's `_overlap_add_filter` + `_1d_overlap_filter`.
//!
//! Zero-phase is achieved by shifting the output left by `(N-1)/2` samples,
//! NOT by running filtfilt. The signal is extended by `N-1` samples on each
//! side, either by odd reflection ([`Padding::Mirror`]) or with zeros.
use std::sync::Arc;

use ndarray::{Array2, ArrayView1};
use rustfft::{Fft, FftPlanner, num_complex::Complex64};

use crate::error::{ConnError, Result};

/// Edge extension applied before filtering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Padding {
    /// Zeros on both sides.
    #[default]
    Zero,
    /// Reflect-limited odd mirror (MNE's `_smart_pad`).
    Mirror,
}

/// Precomputed FFT of the kernel and the plans for one signal length.
struct OverlapAdd {
    h_fft: Vec<Complex64>,
    fwd: Arc<dyn Fft<f64>>,
    inv: Arc<dyn Fft<f64>>,
    n_fft: usize,
    n_h: usize,
}

impl OverlapAdd {
    fn new(h: &[f64], n_ext: usize) -> Self {
        let n_h = h.len();
        let n_fft = choose_fft_len(n_h, n_ext);
        let mut planner: FftPlanner<f64> = FftPlanner::new();
        let fwd = planner.plan_fft_forward(n_fft);
        let inv = planner.plan_fft_inverse(n_fft);
        let mut h_fft = zero_padded(h, n_fft);
        fwd.process(&mut h_fft);
        Self { h_fft, fwd, inv, n_fft, n_h }
    }

    fn run(&self, x_ext: &[f64]) -> Vec<f64> {
        let n_ext = x_ext.len();
        let shift = (self.n_h - 1) / 2;
        let n_seg = self.n_fft - self.n_h + 1;
        let n_segments = n_ext.div_ceil(n_seg);
        let inv_scale = 1.0 / self.n_fft as f64;
        let mut out = vec![0.0_f64; n_ext];

        for seg_idx in 0..n_segments {
            let start = seg_idx * n_seg;
            let stop = (start + n_seg).min(n_ext);

            let mut buf = zero_padded(&x_ext[start..stop], self.n_fft);
            self.fwd.process(&mut buf);
            for (b, &hf) in buf.iter_mut().zip(self.h_fft.iter()) {
                *b *= hf;
            }
            self.inv.process(&mut buf);

            // Accumulate with overlap-add (accounting for zero-phase shift).
            let out_start = start.saturating_sub(shift);
            let out_end = (out_start + self.n_fft).min(n_ext);
            let prod_start = shift.saturating_sub(start);

            for (o, p) in (out_start..out_end).zip(prod_start..) {
                if p < buf.len() {
                    out[o] += buf[p].re * inv_scale;
                }
            }
        }
        out
    }
}

/// Apply a zero-phase FIR filter to each row of `data` (`[rows × time]`) in place.
///
/// `h` must have odd length.
pub fn apply_fir_zero_phase(data: &mut Array2<f64>, h: &[f64], padding: Padding) -> Result<()> {
    check_kernel(h)?;
    let n_x = data.ncols();
    if n_x == 0 {
        return Ok(());
    }
    let n_edge = h.len() - 1;
    let ola = OverlapAdd::new(h, n_x + 2 * n_edge);
    for mut row in data.rows_mut() {
        let x: Vec<f64> = row.to_vec();
        let y = ola.run(&pad(&x, n_edge, padding));
        row.assign(&ArrayView1::from(&y[n_edge..n_edge + n_x]));
    }
    Ok(())
}

/// Filter a single 1-D signal with the overlap-add algorithm.
///
/// Returns a vector of the same length as `x`.
pub fn filter_1d(x: &[f64], h: &[f64], padding: Padding) -> Result<Vec<f64>> {
    check_kernel(h)?;
    let n_x = x.len();
    if n_x == 0 {
        return Ok(vec![]);
    }
    let n_edge = h.len() - 1;
    let x_ext = pad(x, n_edge, padding);
    let y = OverlapAdd::new(h, x_ext.len()).run(&x_ext);
    Ok(y[n_edge..n_edge + n_x].to_vec())
}

fn check_kernel(h: &[f64]) -> Result<()> {
    if h.len() % 2 == 0 {
        return Err(ConnError::Kernel(format!(
            "zero-phase FIR needs an odd number of taps, got {}",
            h.len()
        )));
    }
    Ok(())
}

// ── Helpers ──────────────────────────────────────────────────────────────────

fn pad(x: &[f64], n_edge: usize, padding: Padding) -> Vec<f64> {
    match padding {
        Padding::Mirror => reflect_limited_pad(x, n_edge, n_edge),
        Padding::Zero => {
            let mut out = vec![0.0; n_edge];
            out.extend_from_slice(x);
            out.resize(x.len() + 2 * n_edge, 0.0);
            out
        }
    }
}

/// Reflect-limited padding (matches MNE's `_smart_pad`).
///
/// Left:  `pad[i] = 2*x[0] - x[n_l-i]`  for i in 1..=n_l
/// Right: `pad[i] = 2*x[-1] - x[-(i+1)]` for i in 1..=n_r
fn reflect_limited_pad(x: &[f64], n_l: usize, n_r: usize) -> Vec<f64> {
    let n = x.len();
    let actual_l = n_l.min(n - 1);
    let actual_r = n_r.min(n - 1);

    // If requested padding exceeds signal, the remainder is zeros.
    let mut out = vec![0.0; n_l - actual_l];
    out.reserve(actual_l + n + n_r);

    // Left padding (reversed, odd reflection around x[0]).
    for i in (1..=actual_l).rev() {
        out.push(2.0 * x[0] - x[i]);
    }

    out.extend_from_slice(x);

    // Right padding (odd reflection around x[-1]).
    let last = x[n - 1];
    for i in 1..=actual_r {
        out.push(2.0 * last - x[n - 1 - i]);
    }
    out.resize(out.len() + (n_r - actual_r), 0.0);

    out
}

/// Choose the optimal FFT block size (power of 2 minimising operation count).
///
/// Matches MNE's cost function:
///   `cost = ceil(n_x / (N - n_h + 1)) * N * (log2(N) + 1) + 4e-5 * N * n_x`
fn choose_fft_len(n_h: usize, n_x: usize) -> usize {
    let min_fft = 2 * n_h - 1;

    let max_pow = (n_x.max(min_fft) as f64).log2().ceil() as u32 + 1;
    let min_pow = (min_fft as f64).log2().ceil() as u32;

    let mut best_n = 1_usize << max_pow;
    let mut best_cost = f64::INFINITY;

    for pow in min_pow..=max_pow {
        let n = 1_usize << pow;
        if n < min_fft {
            continue;
        }
        let n_seg = (n - n_h + 1) as f64;
        let cost = (n_x as f64 / n_seg).ceil() * n as f64 * (pow as f64 + 1.0)
            + 4e-5 * n as f64 * n_x as f64;
        if cost < best_cost {
            best_cost = cost;
            best_n = n;
        }
    }
    best_n
}

fn zero_padded(x: &[f64], n_fft: usize) -> Vec<Complex64> {
    x.iter()
        .map(|&v| Complex64::new(v, 0.0))
        .chain(std::iter::repeat(Complex64::default()))
        .take(n_fft)
        .collect()
}
