//! Windowed cross-spectral estimation (Welch).
//!
//! Each trial is cut into Hamming-windowed, mean-removed segments of `n_fft`
//! samples advancing by `n_fft − round(overlap · n_fft)`. The auto- and
//! cross-spectra of every segment of every trial are summed; coherency is
//! `Sab / √(Saa · Sbb)`.
//!
//! Blocks in kernel representation are transformed on the sensor rows and
//! projected through the kernel afterwards, which is exact because the FFT
//! is linear.
use std::sync::Arc;

use ndarray::{Array2, Array3, Axis};
use rustfft::{Fft, FftPlanner, num_complex::Complex64};
use tracing::debug;

use crate::error::{ConnError, Result};
use crate::filter::hamming;
use crate::signal::{BlockPair, SignalBlock};

/// Segmenting parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoherenceRequest {
    /// Segment length in samples.
    pub n_fft: usize,
    /// Fraction of a segment shared with the next, in `[0, 1)`.
    pub overlap: f64,
}

impl CoherenceRequest {
    fn step(&self) -> usize {
        let shared = (self.overlap * self.n_fft as f64).round() as usize;
        self.n_fft.saturating_sub(shared).max(1)
    }
}

/// Summed spectra over all segments of all trials.
#[derive(Debug, Clone)]
pub struct CrossSpectra {
    /// `[nA × nB × nFreq]`
    pub sab: Array3<Complex64>,
    /// `[nA × nFreq]`
    pub saa: Array2<f64>,
    /// `[nB × nFreq]`
    pub sbb: Array2<f64>,
    /// Sampling rate shared by every trial.
    pub sfreq: f64,
    pub n_windows: usize,
    pub n_trials: usize,
}

impl CrossSpectra {
    /// Bins `0 ..= n_fft/2`.
    pub fn n_freqs(&self) -> usize {
        self.sab.len_of(Axis(2))
    }

    /// Complex coherency `Sab / √(Saa · Sbb)`.
    pub fn coherency(&self) -> Array3<Complex64> {
        Array3::from_shape_fn(self.sab.dim(), |(i, j, f)| {
            self.sab[[i, j, f]] / (self.saa[[i, f]] * self.sbb[[j, f]]).sqrt()
        })
    }
}

/// Cross-spectral estimator over a sequence of trials.
pub trait CoherenceEstimator {
    /// Consume `trials` one at a time and sum their spectra.
    fn cross_spectra(
        &self,
        trials: &mut dyn Iterator<Item = Result<BlockPair>>,
        req: &CoherenceRequest,
    ) -> Result<CrossSpectra>;
}

/// Default Welch estimator.
#[derive(Debug, Clone, Copy, Default)]
pub struct WelchCoherence;

struct SegmentFft {
    fft: Arc<dyn Fft<f64>>,
    window: Vec<f64>,
    n_fft: usize,
}

impl SegmentFft {
    /// Spectra `[rows × (n_fft/2 + 1)]` of the segment starting at `start`.
    fn spectra(&self, block: &SignalBlock, start: usize) -> Array2<Complex64> {
        let n_freq = self.n_fft / 2 + 1;
        let raw = &block.data;
        let mut spec = Array2::zeros((raw.nrows(), n_freq));
        let mut buf = vec![Complex64::default(); self.n_fft];
        for (r, row) in raw.axis_iter(Axis(0)).enumerate() {
            let seg = row.slice(ndarray::s![start..start + self.n_fft]);
            let mean = seg.mean().unwrap_or(0.0);
            for ((b, &x), &w) in buf.iter_mut().zip(seg.iter()).zip(&self.window) {
                *b = Complex64::new((x - mean) * w, 0.0);
            }
            self.fft.process(&mut buf);
            for (f, v) in buf.iter().take(n_freq).enumerate() {
                spec[[r, f]] = *v;
            }
        }
        match &block.kernel {
            Some(k) => k.mapv(|v| Complex64::new(v, 0.0)).dot(&spec),
            None => spec,
        }
    }
}

impl CoherenceEstimator for WelchCoherence {
    fn cross_spectra(
        &self,
        trials: &mut dyn Iterator<Item = Result<BlockPair>>,
        req: &CoherenceRequest,
    ) -> Result<CrossSpectra> {
        let n_fft = req.n_fft;
        if n_fft < 2 {
            return Err(ConnError::config(format!("coherence window of {n_fft} sample(s)")));
        }
        let mut planner: FftPlanner<f64> = FftPlanner::new();
        let seg = SegmentFft { fft: planner.plan_fft_forward(n_fft), window: hamming(n_fft), n_fft };
        let n_freq = n_fft / 2 + 1;
        let step = req.step();

        let mut acc: Option<CrossSpectra> = None;
        for (k, pair) in trials.enumerate() {
            let pair = pair?;
            let (a, b) = (&pair.source, pair.target());
            let n_t = a.n_times();
            if b.n_times() != n_t {
                return Err(ConnError::shape(format!(
                    "trial {}: source has {n_t} samples, target has {}",
                    k + 1,
                    b.n_times()
                )));
            }
            if n_t < n_fft {
                return Err(ConnError::Degenerate(format!(
                    "trial {} has {n_t} samples, shorter than the {n_fft}-sample window",
                    k + 1
                )));
            }
            let sfreq = a.sfreq();
            let acc = acc.get_or_insert_with(|| CrossSpectra {
                sab: Array3::zeros((a.n_rows(), b.n_rows(), n_freq)),
                saa: Array2::zeros((a.n_rows(), n_freq)),
                sbb: Array2::zeros((b.n_rows(), n_freq)),
                sfreq,
                n_windows: 0,
                n_trials: 0,
            });
            if acc.sab.dim() != (a.n_rows(), b.n_rows(), n_freq) {
                return Err(ConnError::shape(format!(
                    "trial {} has {}×{} rows, expected {}×{}",
                    k + 1,
                    a.n_rows(),
                    b.n_rows(),
                    acc.sab.len_of(Axis(0)),
                    acc.sab.len_of(Axis(1))
                )));
            }
            if ((sfreq - acc.sfreq) / acc.sfreq).abs() > 1e-6 {
                return Err(ConnError::shape(format!(
                    "trial {} sampled at {sfreq} Hz, expected {} Hz",
                    k + 1,
                    acc.sfreq
                )));
            }

            let n_win = (n_t - n_fft) / step + 1;
            for w in 0..n_win {
                let start = w * step;
                let fa = seg.spectra(a, start);
                let fb = if pair.is_same() { fa.clone() } else { seg.spectra(b, start) };
                for ((i, f), &za) in fa.indexed_iter() {
                    acc.saa[[i, f]] += za.norm_sqr();
                    for j in 0..fb.nrows() {
                        acc.sab[[i, j, f]] += za * fb[[j, f]].conj();
                    }
                }
                for ((j, f), &zb) in fb.indexed_iter() {
                    acc.sbb[[j, f]] += zb.norm_sqr();
                }
            }
            acc.n_windows += n_win;
            acc.n_trials += 1;
            debug!(trial = k + 1, windows = n_win, "cross-spectra accumulated");
        }
        acc.ok_or_else(|| ConnError::Degenerate("no trials to estimate coherence from".into()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn block(rows: usize, n: usize, sfreq: f64) -> SignalBlock {
        let data = Array2::from_shape_fn((rows, n), |(r, t)| {
            let t = t as f64 / sfreq;
            (2.0 * PI * 10.0 * t + r as f64).sin() + 0.3 * (2.0 * PI * 23.0 * t * (r + 1) as f64).cos()
        });
        SignalBlock::from_sfreq(data, sfreq, 0.0).unwrap()
    }

    #[test]
    fn window_count_follows_overlap() {
        let req = CoherenceRequest { n_fft: 100, overlap: 0.5 };
        let mut trials = std::iter::once(Ok(BlockPair::same(block(2, 400, 100.0))));
        let cs = WelchCoherence.cross_spectra(&mut trials, &req).unwrap();
        // (400 − 100) / 50 + 1
        assert_eq!(cs.n_windows, 7);
        assert_eq!(cs.n_freqs(), 51);
    }

    #[test]
    fn self_coherency_is_one() {
        let req = CoherenceRequest { n_fft: 64, overlap: 0.5 };
        let mut trials = std::iter::once(Ok(BlockPair::same(block(2, 512, 128.0))));
        let c = WelchCoherence.cross_spectra(&mut trials, &req).unwrap().coherency();
        for f in 1..c.len_of(Axis(2)) {
            approx::assert_abs_diff_eq!(c[[1, 1, f]].norm(), 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn kernel_projection_matches_materialized() {
        let rec = block(2, 256, 128.0);
        let kernel = ndarray::array![[1.0, 0.5], [-0.3, 2.0], [0.7, 0.7]];
        let kb = rec.clone().with_kernel(kernel).unwrap();
        let full = kb.clone().materialize();
        let req = CoherenceRequest { n_fft: 64, overlap: 0.0 };
        let a = WelchCoherence
            .cross_spectra(&mut std::iter::once(Ok(BlockPair::same(kb))), &req)
            .unwrap();
        let b = WelchCoherence
            .cross_spectra(&mut std::iter::once(Ok(BlockPair::same(full))), &req)
            .unwrap();
        for (x, y) in a.sab.iter().zip(b.sab.iter()) {
            approx::assert_abs_diff_eq!(x.re, y.re, epsilon = 1e-8);
            approx::assert_abs_diff_eq!(x.im, y.im, epsilon = 1e-8);
        }
    }

    #[test]
    fn short_trial_is_degenerate() {
        let req = CoherenceRequest { n_fft: 128, overlap: 0.5 };
        let mut trials = std::iter::once(Ok(BlockPair::same(block(1, 100, 100.0))));
        let err = WelchCoherence.cross_spectra(&mut trials, &req).unwrap_err();
        assert!(matches!(err, ConnError::Degenerate(_)));
    }
}
