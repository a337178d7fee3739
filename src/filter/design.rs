//! FIR band-pass design matching MNE / `scipy.signal.firwin`.
//!
//! For a pass band `[l_freq, h_freq]` Hz at sampling rate `sfreq`:
//!   • low transition  = min(max(0.25 · l_freq, 2.0), l_freq)
//!   • high transition = min(max(0.25 · h_freq, 2.0), nyquist − h_freq)
//!   • filter length N = ceil(3.3 / min(transitions) · sfreq), rounded to odd
//!   • band-pass = lowpass(h_cut) − lowpass(l_cut), windowed sinc
use std::f64::consts::PI;

use serde::{Deserialize, Serialize};

/// Taper applied to the sinc kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FirWindow {
    #[default]
    Hamming,
    Hann,
    Blackman,
}

/// Transition bandwidth below the pass band: `min(max(0.25 · l_freq, 2.0), l_freq)`.
pub fn auto_trans_bandwidth(l_freq: f64) -> f64 {
    (0.25 * l_freq).max(2.0).min(l_freq)
}

/// Transition bandwidth above the pass band, capped by the distance to Nyquist.
pub fn auto_trans_bandwidth_high(h_freq: f64, sfreq: f64) -> f64 {
    (0.25 * h_freq).max(2.0).min(sfreq / 2.0 - h_freq)
}

/// Number of FIR taps for a given transition bandwidth, rounded up to odd.
///
/// Formula: `ceil(3.3 / trans_bw * sfreq)`.
pub fn auto_filter_length(trans_bw: f64, sfreq: f64) -> usize {
    let n_raw = (3.3 / trans_bw * sfreq).ceil() as usize;
    if n_raw % 2 == 0 { n_raw + 1 } else { n_raw }
}

/// Design a zero-phase FIR filter.
///
/// `l_freq = None` gives a lowpass, `h_freq = None` a highpass, both a
/// band-pass. Returns the impulse response (odd length). Returns `None` when
/// neither edge is given or the transition bands collapse to zero width.
pub fn design_bandpass(
    l_freq: Option<f64>,
    h_freq: Option<f64>,
    sfreq: f64,
    window: FirWindow,
) -> Option<Vec<f64>> {
    let l_trans = l_freq.map(auto_trans_bandwidth);
    let h_trans = h_freq.map(|h| auto_trans_bandwidth_high(h, sfreq));
    let trans_bw = match (l_trans, h_trans) {
        (Some(l), Some(h)) => l.min(h),
        (Some(l), None) => l,
        (None, Some(h)) => h,
        (None, None) => return None,
    };
    if trans_bw <= 0.0 {
        return None;
    }
    let n = auto_filter_length(trans_bw, sfreq);

    // firwin cutoffs sit at the middle of each transition band.
    let lowpass_at = |f: f64| firwin(n, f, sfreq, true, window);
    let h = match (l_freq.zip(l_trans), h_freq.zip(h_trans)) {
        (Some((l, lt)), Some((h, ht))) => {
            let hi = lowpass_at(h + ht / 2.0);
            let lo = lowpass_at(l - lt / 2.0);
            hi.iter().zip(&lo).map(|(a, b)| a - b).collect()
        }
        (Some((l, lt)), None) => firwin(n, l - lt / 2.0, sfreq, false, window),
        (None, Some((h, ht))) => lowpass_at(h + ht / 2.0),
        (None, None) => return None,
    };
    Some(h)
}

/// Design a lowpass FIR filter with a windowed sinc.
///
/// `pass_zero=true` means the DC component passes (lowpass); `false`
/// spectrally inverts to a highpass. `cutoff_hz` is the -6 dB point.
pub fn firwin(n: usize, cutoff_hz: f64, sfreq: f64, pass_zero: bool, window: FirWindow) -> Vec<f64> {
    debug_assert!(n % 2 == 1, "firwin requires odd N for linear-phase filter");
    let alpha = (n - 1) as f64 / 2.0;
    let nyq = sfreq / 2.0;
    let fc = cutoff_hz / nyq; // normalised [0, 1]

    let win = taper(window, n);

    let mut h: Vec<f64> = (0..n)
        .map(|i| {
            let x = i as f64 - alpha;
            // f(x) = sin(π·fc·x) / (π·x);  lim_{x→0} f(x) = fc
            let sinc = if x == 0.0 { fc } else { (PI * fc * x).sin() / (PI * x) };
            sinc * win[i]
        })
        .collect();

    // Unit DC gain.
    let s: f64 = h.iter().sum();
    h.iter_mut().for_each(|v| *v /= s);

    if !pass_zero {
        h.iter_mut().for_each(|v| *v = -*v);
        h[n / 2] += 1.0;
    }

    h
}

/// Window of length `n`.
pub fn taper(kind: FirWindow, n: usize) -> Vec<f64> {
    match kind {
        FirWindow::Hamming => hamming(n),
        FirWindow::Hann => cosine_sum(n, &[0.5, 0.5]),
        FirWindow::Blackman => cosine_sum(n, &[0.42, 0.5, 0.08]),
    }
}

/// Hamming window of length `n`.
pub fn hamming(n: usize) -> Vec<f64> {
    cosine_sum(n, &[0.54, 0.46])
}

/// Symmetric generalized cosine window `Σ (−1)^k a_k cos(2πki/(n−1))`.
fn cosine_sum(n: usize, a: &[f64]) -> Vec<f64> {
    if n == 1 {
        return vec![1.0];
    }
    (0..n)
        .map(|i| {
            let x = 2.0 * PI * i as f64 / (n - 1) as f64;
            a.iter()
                .enumerate()
                .map(|(k, &ak)| {
                    let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
                    sign * ak * (k as f64 * x).cos()
                })
                .sum()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_length_is_odd() {
        for l_freq in [0.5_f64, 1.0, 2.0, 5.0] {
            let tb = auto_trans_bandwidth(l_freq);
            let n = auto_filter_length(tb, 256.0);
            assert!(n % 2 == 1, "N={n} is even for l_freq={l_freq}");
        }
    }

    #[test]
    fn highpass_known_length_256hz() {
        // At 256 Hz / 0.5 Hz MNE produces 1691 taps.
        let h = design_bandpass(Some(0.5), None, 256.0, FirWindow::Hamming).unwrap();
        assert_eq!(h.len(), 1691);
        let s: f64 = h.iter().sum();
        assert!(s.abs() < 1e-9, "highpass sum = {s}");
    }

    #[test]
    fn bandpass_is_symmetric_with_zero_dc() {
        let h = design_bandpass(Some(8.0), Some(12.0), 256.0, FirWindow::Hamming).unwrap();
        let n = h.len();
        for i in 0..n / 2 {
            approx::assert_abs_diff_eq!(h[i], h[n - 1 - i], epsilon = 1e-12);
        }
        let dc: f64 = h.iter().sum();
        approx::assert_abs_diff_eq!(dc, 0.0, epsilon = 1e-9);
    }

    #[test]
    fn lowpass_dc_gain_unity() {
        for w in [FirWindow::Hamming, FirWindow::Hann, FirWindow::Blackman] {
            let h = firwin(101, 10.0, 256.0, true, w);
            let dc: f64 = h.iter().sum();
            approx::assert_abs_diff_eq!(dc, 1.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn hamming_endpoints() {
        let w = hamming(11);
        approx::assert_abs_diff_eq!(w[0], 0.08, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(w[5], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn no_edges_no_filter() {
        assert!(design_bandpass(None, None, 256.0, FirWindow::Hann).is_none());
    }
}
