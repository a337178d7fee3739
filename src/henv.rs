//! Sliding-window envelope connectivity.
//!
//! Every band is band-passed and turned into analytic signals once; each
//! window of `win_length` seconds then yields one value per row pair:
//!   coh   |C|                      with C = Σ za·zb* / √(Σ|za|² Σ|zb|²)
//!   lcoh  |Im C| / √(1 − Re(C)²)
//!   penv  corr(|za|, |zb|)
//!   oenv  ½ [corr(|za|, |zb ⊥ za|) + corr(|zb|, |za ⊥ zb|)]
use ndarray::{Array2, Array4, ArrayView2, Axis, s};
use rustfft::num_complex::Complex64;
use tracing::debug;

use crate::config::{EnvelopeMeasure, HenvParams};
use crate::correlation::pearson;
use crate::error::{ConnError, Result};
use crate::filter::{Band, BandDecomposer, FilterOptions};
use crate::hilbert::{analytic_rows, orthogonal_envelope};

/// Everything the estimator needs besides the signals.
pub struct EnvelopeRequest<'a> {
    pub sfreq: f64,
    pub bands: &'a [Band],
    pub params: HenvParams,
    pub filter: FilterOptions,
    pub decomposer: &'a dyn BandDecomposer,
}

/// Windowed values and window centres.
#[derive(Debug, Clone)]
pub struct EnvelopeOutput {
    /// `[nA × nB × nWindows × nBands]`
    pub values: Array4<f64>,
    /// Window centres in seconds from the first sample.
    pub times: Vec<f64>,
}

/// Envelope connectivity primitive.
pub trait EnvelopeEstimator {
    /// `b = None` correlates the rows of `a` with themselves.
    fn compute(
        &self,
        a: &Array2<f64>,
        b: Option<&Array2<f64>>,
        req: &EnvelopeRequest<'_>,
    ) -> Result<EnvelopeOutput>;
}

/// Hilbert-transform envelope estimator.
#[derive(Debug, Clone, Copy, Default)]
pub struct HilbertEnvelope;

fn window_value(
    measure: EnvelopeMeasure,
    za: ArrayView2<'_, Complex64>,
    zb: ArrayView2<'_, Complex64>,
    i: usize,
    j: usize,
) -> f64 {
    let (a, b) = (za.row(i), zb.row(j));
    match measure {
        EnvelopeMeasure::Coh | EnvelopeMeasure::Lcoh => {
            let sab: Complex64 = a.iter().zip(b.iter()).map(|(x, y)| x * y.conj()).sum();
            let saa: f64 = a.iter().map(|x| x.norm_sqr()).sum();
            let sbb: f64 = b.iter().map(|y| y.norm_sqr()).sum();
            let c = sab / (saa * sbb).sqrt();
            if measure == EnvelopeMeasure::Coh {
                c.norm()
            } else {
                let re = c.re.clamp(-0.99999, 0.99999);
                c.im.abs() / (1.0 - re * re).sqrt()
            }
        }
        EnvelopeMeasure::Penv => pearson(a.mapv(|z| z.norm()).view(), b.mapv(|z| z.norm()).view()),
        EnvelopeMeasure::Oenv => {
            let ea = a.mapv(|z| z.norm());
            let eb = b.mapv(|z| z.norm());
            let r_ab = pearson(ea.view(), orthogonal_envelope(a, b).view());
            let r_ba = pearson(eb.view(), orthogonal_envelope(b, a).view());
            (r_ab + r_ba) / 2.0
        }
    }
}

impl EnvelopeEstimator for HilbertEnvelope {
    fn compute(
        &self,
        a: &Array2<f64>,
        b: Option<&Array2<f64>>,
        req: &EnvelopeRequest<'_>,
    ) -> Result<EnvelopeOutput> {
        let n_t = a.ncols();
        let p = req.params;
        let win = (p.win_length * req.sfreq).round() as usize;
        if win < 2 || win > n_t {
            return Err(ConnError::Degenerate(format!(
                "envelope window of {win} samples does not fit a {n_t}-sample signal"
            )));
        }
        let step = win.saturating_sub((p.overlap * win as f64).round() as usize).max(1);
        let n_win = (n_t - win) / step + 1;
        let times: Vec<f64> =
            (0..n_win).map(|w| (w * step) as f64 / req.sfreq + (win - 1) as f64 / (2.0 * req.sfreq)).collect();

        let n_a = a.nrows();
        let n_b = b.map_or(n_a, |b| b.nrows());
        let mut values = Array4::zeros((n_a, n_b, n_win, req.bands.len()));
        for (f, band) in req.bands.iter().enumerate() {
            let za = analytic_rows(&req.decomposer.bandpass(a, req.sfreq, band, &req.filter)?);
            let zb = match b {
                Some(b) => analytic_rows(&req.decomposer.bandpass(b, req.sfreq, band, &req.filter)?),
                None => za.clone(),
            };
            for w in 0..n_win {
                let start = w * step;
                let wa = za.slice(s![.., start..start + win]);
                let wb = zb.slice(s![.., start..start + win]);
                for i in 0..n_a {
                    for j in 0..n_b {
                        values[[i, j, w, f]] = window_value(p.measure, wa, wb, i, j);
                    }
                }
            }
            debug!(band = %band, windows = n_win, measure = p.measure.as_str(), "envelope band done");
        }
        Ok(EnvelopeOutput { values, times })
    }
}

impl EnvelopeOutput {
    pub fn n_windows(&self) -> usize {
        self.values.len_of(Axis(2))
    }
}
