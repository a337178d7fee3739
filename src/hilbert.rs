//! Analytic signal via FFT (`scipy.signal.hilbert`).
//!
//! X = FFT(x);  X[k] *= h[k] with h = 1 at DC (and Nyquist for even n),
//! 2 for positive frequencies, 0 for negative ones;  z = IFFT(X).
//! Re(z) == x, |z| is the envelope, arg(z) the instantaneous phase.
use ndarray::{Array1, Array2, ArrayView1, Axis, Zip};
use rustfft::{FftPlanner, num_complex::Complex64};

/// Analytic signal of one real sequence.
pub fn analytic(x: ArrayView1<'_, f64>, planner: &mut FftPlanner<f64>) -> Vec<Complex64> {
    let n = x.len();
    if n == 0 {
        return Vec::new();
    }
    let mut buf: Vec<Complex64> = x.iter().map(|&v| Complex64::new(v, 0.0)).collect();
    planner.plan_fft_forward(n).process(&mut buf);

    let half = n / 2;
    for (k, b) in buf.iter_mut().enumerate() {
        let gain = if k == 0 || (n % 2 == 0 && k == half) {
            1.0
        } else if k <= (n - 1) / 2 {
            2.0
        } else {
            0.0
        };
        *b *= gain;
    }

    planner.plan_fft_inverse(n).process(&mut buf);
    let scale = 1.0 / n as f64;
    buf.iter_mut().for_each(|v| *v *= scale);
    buf
}

/// Analytic signal of every row of `data` (`[rows × time]`).
pub fn analytic_rows(data: &Array2<f64>) -> Array2<Complex64> {
    let (n_rows, n_t) = data.dim();
    let mut planner = FftPlanner::new();
    let mut out = Array2::zeros((n_rows, n_t));
    for (r, row) in data.axis_iter(Axis(0)).enumerate() {
        let z = analytic(row, &mut planner);
        out.row_mut(r).assign(&ArrayView1::from(&z));
    }
    out
}

/// Unit phase vectors `z / |z|`; zero-magnitude samples stay zero.
pub fn unit_phase(z: &Array2<Complex64>) -> Array2<Complex64> {
    z.mapv(|v| {
        let m = v.norm();
        if m > 0.0 { v / m } else { Complex64::default() }
    })
}

/// Envelope of `zb` orthogonalised against the phase of `za`:
/// `|Im(zb · conj(za) / |za|)|`.
///
/// The component of `zb` that is in phase (zero lag) with `za` is removed.
pub fn orthogonal_envelope(
    za: ArrayView1<'_, Complex64>,
    zb: ArrayView1<'_, Complex64>,
) -> Array1<f64> {
    Zip::from(&za).and(&zb).map_collect(|&a, &b| {
        let m = a.norm();
        if m > 0.0 { (b * a.conj() / m).im.abs() } else { 0.0 }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn in_phase_component_is_removed() {
        let za = Array1::from_shape_fn(8, |t| Complex64::from_polar(1.0 + t as f64, 0.3 * t as f64));
        let zb = za.mapv(|z| z * 2.5);
        let e = orthogonal_envelope(za.view(), zb.view());
        assert!(e.iter().all(|&v| v.abs() < 1e-12));
    }

    #[test]
    fn on_bin_cosine_becomes_complex_exponential() {
        let n = 128;
        let k = 5.0;
        let x = Array2::from_shape_fn((1, n), |(_, t)| (2.0 * PI * k * t as f64 / n as f64).cos());
        let z = analytic_rows(&x);
        for t in 0..n {
            let phi = 2.0 * PI * k * t as f64 / n as f64;
            approx::assert_abs_diff_eq!(z[[0, t]].re, phi.cos(), epsilon = 1e-10);
            approx::assert_abs_diff_eq!(z[[0, t]].im, phi.sin(), epsilon = 1e-10);
        }
    }

    #[test]
    fn real_part_is_input_for_odd_length() {
        let x = Array2::from_shape_fn((2, 33), |(r, t)| ((r + 1) * t) as f64 * 0.37);
        let z = analytic_rows(&x);
        for ((r, t), &v) in x.indexed_iter() {
            approx::assert_abs_diff_eq!(z[[r, t]].re, v, epsilon = 1e-9);
        }
    }

    #[test]
    fn unit_phase_has_unit_modulus() {
        let z = Array2::from_shape_fn((1, 3), |(_, t)| Complex64::new(t as f64, 1.0));
        let u = unit_phase(&z);
        for v in u.iter() {
            approx::assert_abs_diff_eq!(v.norm(), 1.0, epsilon = 1e-12);
        }
    }
}
