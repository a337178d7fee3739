mod common;
use common::SFREQ;
use exg_conn::filter::{
    apply_fir_zero_phase, design_bandpass, filter_1d, firwin, Band, BandDecomposer, FilterOptions,
    FirBandpass, FirWindow, FreqBands, Padding,
};
use exg_conn::ConnError;
use ndarray::Array2;
use std::f64::consts::PI;

fn sine(freq: f64, n: usize) -> Vec<f64> {
    (0..n).map(|t| (2.0 * PI * freq * t as f64 / SFREQ).sin()).collect()
}

/// RMS over the central half, away from the edge transients.
fn central_rms(x: &[f64]) -> f64 {
    let (a, b) = (x.len() / 4, 3 * x.len() / 4);
    (x[a..b].iter().map(|v| v * v).sum::<f64>() / (b - a) as f64).sqrt()
}

// ── Coefficient tests ─────────────────────────────────────────────────────────

#[test]
fn bandpass_coeffs_symmetric_with_zero_dc() {
    let h = design_bandpass(Some(8.0), Some(12.0), SFREQ, FirWindow::Hamming).unwrap();
    let n = h.len();
    assert_eq!(n % 2, 1, "band-pass must have odd length, got {n}");
    for i in 0..n / 2 {
        let diff = (h[i] - h[n - 1 - i]).abs();
        assert!(diff < 1e-12, "h[{i}]={} ≠ h[{}]={}", h[i], n - 1 - i, h[n - 1 - i]);
    }
    let s: f64 = h.iter().sum();
    assert!(s.abs() < 1e-9, "sum(h) = {s:.2e}, expected ≈ 0 for a band-pass");
}

#[test]
fn filter_length_follows_narrowest_transition() {
    // 8 Hz: max(0.25·8, 2) = 2 Hz transition → ceil(3.3 / 2 · 256) = 423 taps.
    let h = design_bandpass(Some(8.0), Some(12.0), SFREQ, FirWindow::Hamming).unwrap();
    assert_eq!(h.len(), 423);
}

#[test]
fn lowpass_has_unit_dc_gain() {
    for window in [FirWindow::Hamming, FirWindow::Hann, FirWindow::Blackman] {
        let h = firwin(101, 20.0, SFREQ, true, window);
        let s: f64 = h.iter().sum();
        assert!((s - 1.0).abs() < 1e-12, "{window:?}: DC gain {s}");
    }
}

#[test]
fn no_edges_means_no_filter() {
    assert!(design_bandpass(None, None, SFREQ, FirWindow::Hamming).is_none());
}

// ── Application tests ─────────────────────────────────────────────────────────

#[test]
fn alpha_band_passes_10hz_and_rejects_40hz() {
    let n = 4096;
    let h = design_bandpass(Some(8.0), Some(12.0), SFREQ, FirWindow::Hamming).unwrap();

    let pass = filter_1d(&sine(10.0, n), &h, Padding::Zero).unwrap();
    let rms = central_rms(&pass);
    assert!((rms - 0.5_f64.sqrt()).abs() < 0.03, "10 Hz RMS {rms:.4} (expected ≈ 0.707)");

    let stop = filter_1d(&sine(40.0, n), &h, Padding::Zero).unwrap();
    let rms = central_rms(&stop);
    assert!(rms < 0.01, "40 Hz leaked through with RMS {rms:.4}");
}

#[test]
fn zero_phase_keeps_peaks_in_place() {
    let n = 2048;
    let x = sine(10.0, n);
    let h = design_bandpass(Some(8.0), Some(12.0), SFREQ, FirWindow::Hamming).unwrap();
    let y = filter_1d(&x, &h, Padding::Mirror).unwrap();
    assert_eq!(y.len(), n);
    // Compare sign agreement in the centre; a phase shift would break it.
    let agree = (n / 4..3 * n / 4).filter(|&t| (x[t] > 0.1) == (y[t] > 0.1)).count();
    assert!(agree as f64 > 0.95 * (n / 2) as f64, "only {agree} samples in phase");
}

#[test]
fn rows_are_filtered_independently() {
    let n = 2048;
    let mut data = Array2::zeros((2, n));
    for (t, v) in sine(10.0, n).into_iter().enumerate() {
        data[[0, t]] = v;
    }
    let h = design_bandpass(Some(8.0), Some(12.0), SFREQ, FirWindow::Hamming).unwrap();
    apply_fir_zero_phase(&mut data, &h, Padding::Zero).unwrap();
    assert!(data.row(1).iter().all(|&v| v == 0.0), "silent row picked up signal");
    assert!(central_rms(data.row(0).as_slice().unwrap()) > 0.6);
}

// ── Band decomposer ───────────────────────────────────────────────────────────

#[test]
fn default_bands_fit_256hz() {
    let bands = FirBandpass.bounds(&FreqBands::default(), SFREQ).unwrap();
    let names: Vec<&str> = bands.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names, ["delta", "theta", "alpha", "beta", "gamma1", "gamma2"]);
}

#[test]
fn default_bands_exceed_nyquist_at_100hz() {
    let err = FirBandpass.bounds(&FreqBands::default(), 100.0).unwrap_err();
    assert!(matches!(err, ConnError::Config(_)), "unexpected {err}");
}

#[test]
fn broadband_band_returns_input_unchanged() {
    let data = common::noise(3, 512, 1);
    let band = Band::broadband(SFREQ);
    let out = FirBandpass.bandpass(&data, SFREQ, &band, &FilterOptions::default()).unwrap();
    assert_eq!(out, data);
}
