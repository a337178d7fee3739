//! Bivariate Granger causality from least-squares autoregressive fits.
//!
//! Time domain: for a sink `y` and a source `x`
//!   restricted  y_t = c + Σ_k a_k y_{t−k}                + e_r
//!   full        y_t = c + Σ_k a_k y_{t−k} + Σ_k b_k x_{t−k} + e_f
//!   GC(x → y) = ln(var(e_r) / var(e_f))
//!
//! Frequency domain (Geweke): a joint VAR on `[y, x]` with residual
//! covariance Σ and transfer function H(f) = (I − Σ_k A_k e^{−i2πfk/fs})⁻¹;
//!   S(f) = H Σ Hᴴ
//!   GC(x → y, f) = ln(S_yy / (S_yy − (Σ_xx − Σ_xy²/Σ_yy) |H_yx|²))
//!
//! Lags never reach across trial boundaries: the rows are split into
//! `n_trials` equal segments and each segment contributes its own
//! observations.
use std::f64::consts::PI;

use ndarray::{Array2, Array3, ArrayView1, s};
use rustfft::num_complex::Complex64;

use crate::error::{ConnError, Result};
use crate::normalize::zscore_rows_inplace;

/// Autoregressive Granger estimator.
pub trait GrangerEstimator {
    /// Time-domain GC from every source row to every sink row, `[nSink × nSource]`.
    fn time_domain(
        &self,
        sinks: &Array2<f64>,
        sources: &Array2<f64>,
        order: usize,
        n_trials: usize,
        standardize: bool,
    ) -> Result<Array2<f64>>;

    /// Spectral GC at `freqs` (Hz), `[nSink × nSource × nFreq]`.
    #[allow(clippy::too_many_arguments)]
    fn spectral(
        &self,
        sinks: &Array2<f64>,
        sources: &Array2<f64>,
        order: usize,
        n_trials: usize,
        standardize: bool,
        freqs: &[f64],
        sfreq: f64,
    ) -> Result<Array3<f64>>;
}

/// Ordinary least squares VAR fits, one sink/source pair at a time.
#[derive(Debug, Clone, Copy, Default)]
pub struct VarGranger;

/// Lagged design over trial segments.
struct Design {
    /// Regressors `[n_obs × n_reg]`, first column is the intercept.
    x: Array2<f64>,
    /// Responses `[n_obs × n_resp]`.
    y: Array2<f64>,
}

/// Stack lags `1..=order` of every series in `regressors` and the current
/// value of every series in `responses`.
fn design(
    responses: &[ArrayView1<'_, f64>],
    regressors: &[ArrayView1<'_, f64>],
    order: usize,
    n_trials: usize,
) -> Result<Design> {
    let n_t = responses[0].len();
    let seg = n_t / n_trials;
    let n_reg = 1 + order * regressors.len();
    if seg <= order + n_reg {
        return Err(ConnError::Degenerate(format!(
            "{seg} samples per trial cannot support a model of order {order}"
        )));
    }
    let per_trial = seg - order;
    let n_obs = per_trial * n_trials;
    let mut x = Array2::zeros((n_obs, n_reg));
    let mut y = Array2::zeros((n_obs, responses.len()));
    for tr in 0..n_trials {
        let off = tr * seg;
        for t in order..seg {
            let o = tr * per_trial + (t - order);
            x[[o, 0]] = 1.0;
            for (s_idx, series) in regressors.iter().enumerate() {
                for k in 1..=order {
                    x[[o, 1 + s_idx * order + (k - 1)]] = series[off + t - k];
                }
            }
            for (r_idx, series) in responses.iter().enumerate() {
                y[[o, r_idx]] = series[off + t];
            }
        }
    }
    Ok(Design { x, y })
}

/// Least-squares coefficients `[n_reg × n_resp]` and residuals
/// `[n_obs × n_resp]`. `None` when the normal equations are singular.
fn ols(d: &Design) -> Option<(Array2<f64>, Array2<f64>)> {
    let xtx = d.x.t().dot(&d.x);
    let xty = d.x.t().dot(&d.y);
    let beta = solve(xtx, xty)?;
    let resid = &d.y - &d.x.dot(&beta);
    Some((beta, resid))
}

/// Solve `a · X = b` by Gaussian elimination with partial pivoting.
pub(crate) fn solve(mut a: Array2<f64>, mut b: Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let scale = a.diag().iter().fold(0.0_f64, |m, v| m.max(v.abs()));
    let tol = scale.max(f64::MIN_POSITIVE) * 1e-12;
    for col in 0..n {
        let (piv, piv_val) = (col..n)
            .map(|r| (r, a[[r, col]].abs()))
            .fold((col, 0.0), |best, cur| if cur.1 > best.1 { cur } else { best });
        if piv_val <= tol {
            return None;
        }
        if piv != col {
            for c in 0..n {
                a.swap([col, c], [piv, c]);
            }
            for c in 0..b.ncols() {
                b.swap([col, c], [piv, c]);
            }
        }
        for r in col + 1..n {
            let f = a[[r, col]] / a[[col, col]];
            if f == 0.0 {
                continue;
            }
            for c in col..n {
                a[[r, c]] -= f * a[[col, c]];
            }
            for c in 0..b.ncols() {
                b[[r, c]] -= f * b[[col, c]];
            }
        }
    }
    for col in (0..n).rev() {
        for c in 0..b.ncols() {
            let mut v = b[[col, c]];
            for k in col + 1..n {
                v -= a[[col, k]] * b[[k, c]];
            }
            b[[col, c]] = v / a[[col, col]];
        }
    }
    Some(b)
}

fn column_variance(resid: &Array2<f64>, c: usize) -> f64 {
    let col = resid.column(c);
    col.dot(&col) / col.len() as f64
}

fn prepare(data: &Array2<f64>, standardize: bool) -> Array2<f64> {
    let mut d = data.clone();
    if standardize {
        zscore_rows_inplace(&mut d);
    }
    d
}

fn check_inputs(sinks: &Array2<f64>, sources: &Array2<f64>, n_trials: usize) -> Result<()> {
    if sinks.ncols() != sources.ncols() {
        return Err(ConnError::shape(format!(
            "sinks have {} samples, sources have {}",
            sinks.ncols(),
            sources.ncols()
        )));
    }
    if n_trials == 0 || sinks.ncols() % n_trials != 0 {
        return Err(ConnError::shape(format!(
            "{} samples cannot be split into {n_trials} equal trials",
            sinks.ncols()
        )));
    }
    Ok(())
}

impl GrangerEstimator for VarGranger {
    fn time_domain(
        &self,
        sinks: &Array2<f64>,
        sources: &Array2<f64>,
        order: usize,
        n_trials: usize,
        standardize: bool,
    ) -> Result<Array2<f64>> {
        check_inputs(sinks, sources, n_trials)?;
        let ys = prepare(sinks, standardize);
        let xs = prepare(sources, standardize);
        let mut out = Array2::zeros((ys.nrows(), xs.nrows()));
        for (i, y) in ys.rows().into_iter().enumerate() {
            let restricted = design(&[y], &[y], order, n_trials)?;
            let Some((_, r_res)) = ols(&restricted) else {
                out.row_mut(i).fill(f64::NAN);
                continue;
            };
            let var_r = column_variance(&r_res, 0);
            for (j, x) in xs.rows().into_iter().enumerate() {
                if x == y {
                    continue;
                }
                let full = design(&[y], &[y, x], order, n_trials)?;
                out[[i, j]] = match ols(&full) {
                    Some((_, f_res)) => (var_r / column_variance(&f_res, 0)).ln(),
                    None => f64::NAN,
                };
            }
        }
        Ok(out)
    }

    fn spectral(
        &self,
        sinks: &Array2<f64>,
        sources: &Array2<f64>,
        order: usize,
        n_trials: usize,
        standardize: bool,
        freqs: &[f64],
        sfreq: f64,
    ) -> Result<Array3<f64>> {
        check_inputs(sinks, sources, n_trials)?;
        let ys = prepare(sinks, standardize);
        let xs = prepare(sources, standardize);
        let mut out = Array3::zeros((ys.nrows(), xs.nrows(), freqs.len()));
        for (i, y) in ys.rows().into_iter().enumerate() {
            for (j, x) in xs.rows().into_iter().enumerate() {
                if x == y {
                    continue;
                }
                let d = design(&[y, x], &[y, x], order, n_trials)?;
                let Some((beta, resid)) = ols(&d) else {
                    out.slice_mut(s![i, j, ..]).fill(f64::NAN);
                    continue;
                };
                let n_obs = resid.nrows() as f64;
                let sigma = resid.t().dot(&resid) / n_obs;
                let (s_yy, s_xy, s_xx) = (sigma[[0, 0]], sigma[[0, 1]], sigma[[1, 1]]);
                let partial = s_xx - s_xy * s_xy / s_yy;
                for (fi, &f) in freqs.iter().enumerate() {
                    let h = transfer(&beta, order, f, sfreq);
                    let hyy = h[0][0];
                    let hyx = h[0][1];
                    // S_yy = H_yy Σ_yy H_yy* + 2 Re(H_yy Σ_xy H_yx*) + H_yx Σ_xx H_yx*
                    let s_total = hyy.norm_sqr() * s_yy
                        + 2.0 * (hyy * hyx.conj()).re * s_xy
                        + hyx.norm_sqr() * s_xx;
                    out[[i, j, fi]] = (s_total / (s_total - partial * hyx.norm_sqr())).ln();
                }
            }
        }
        Ok(out)
    }
}

/// Transfer matrix H(f) of a bivariate VAR whose coefficient matrix has the
/// layout of [`design`] with regressors `[y, x]`.
fn transfer(beta: &Array2<f64>, order: usize, f: f64, sfreq: f64) -> [[Complex64; 2]; 2] {
    // M = I − Σ_k A_k e^{−iωk}, with A_k[r][c] = beta[1 + c·order + k − 1, r].
    let mut m = [[Complex64::new(1.0, 0.0), Complex64::default()], [Complex64::default(), Complex64::new(1.0, 0.0)]];
    for k in 1..=order {
        let z = Complex64::from_polar(1.0, -2.0 * PI * f * k as f64 / sfreq);
        for (r, m_row) in m.iter_mut().enumerate() {
            for (c, m_rc) in m_row.iter_mut().enumerate() {
                *m_rc -= z * beta[[1 + c * order + k - 1, r]];
            }
        }
    }
    let det = m[0][0] * m[1][1] - m[0][1] * m[1][0];
    [[m[1][1] / det, -m[0][1] / det], [-m[1][0] / det, m[0][0] / det]]
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use rand::{Rng, SeedableRng, rngs::StdRng};

    /// x is white noise, y follows x with a one-sample lag.
    fn coupled(n: usize) -> (Array2<f64>, Array2<f64>) {
        let mut rng = StdRng::seed_from_u64(7);
        let x: Vec<f64> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let mut y = vec![0.0; n];
        for t in 1..n {
            y[t] = 0.5 * y[t - 1] + 0.8 * x[t - 1] + 0.2 * rng.gen_range(-1.0..1.0);
        }
        (
            Array2::from_shape_vec((1, n), x).unwrap(),
            Array2::from_shape_vec((1, n), y).unwrap(),
        )
    }

    #[test]
    fn solve_small_system() {
        let a = array![[2.0, 1.0], [1.0, 3.0]];
        let b = array![[3.0], [5.0]];
        let x = solve(a, b).unwrap();
        approx::assert_abs_diff_eq!(x[[0, 0]], 0.8, epsilon = 1e-12);
        approx::assert_abs_diff_eq!(x[[1, 0]], 1.4, epsilon = 1e-12);
    }

    #[test]
    fn singular_system_is_none() {
        let a = array![[1.0, 2.0], [2.0, 4.0]];
        assert!(solve(a, array![[1.0], [2.0]]).is_none());
    }

    #[test]
    fn detects_driving_direction() {
        let (x, y) = coupled(2000);
        let forward = VarGranger.time_domain(&y, &x, 3, 1, true).unwrap()[[0, 0]];
        let backward = VarGranger.time_domain(&x, &y, 3, 1, true).unwrap()[[0, 0]];
        assert!(forward > 0.5, "x → y = {forward}");
        assert!(backward < 0.05, "y → x = {backward}");
    }

    #[test]
    fn spectral_is_non_negative_and_directional() {
        let (x, y) = coupled(2000);
        let freqs = [5.0, 10.0, 20.0];
        let fwd = VarGranger.spectral(&y, &x, 3, 1, true, &freqs, 100.0).unwrap();
        let bwd = VarGranger.spectral(&x, &y, 3, 1, true, &freqs, 100.0).unwrap();
        for f in 0..freqs.len() {
            assert!(fwd[[0, 0, f]] >= 0.0);
            assert!(fwd[[0, 0, f]] > bwd[[0, 0, f]]);
        }
    }

    #[test]
    fn same_series_is_skipped() {
        let (x, _) = coupled(500);
        let gc = VarGranger.time_domain(&x, &x, 2, 1, true).unwrap();
        assert_eq!(gc[[0, 0]], 0.0);
    }

    #[test]
    fn trials_must_split_evenly() {
        let (x, y) = coupled(301);
        assert!(VarGranger.time_domain(&y, &x, 2, 2, true).is_err());
    }
}
