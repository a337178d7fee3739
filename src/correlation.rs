//! Row-by-row Pearson correlation.
use ndarray::{Array2, ArrayView1, Axis};

use crate::normalize::remove_row_mean_inplace;

/// Pearson correlation of two equally long sequences. NaN when either is
/// constant.
pub fn pearson(x: ArrayView1<'_, f64>, y: ArrayView1<'_, f64>) -> f64 {
    let n = x.len() as f64;
    let mx = x.sum() / n;
    let my = y.sum() / n;
    let (mut sxy, mut sxx, mut syy) = (0.0, 0.0, 0.0);
    for (&a, &b) in x.iter().zip(y.iter()) {
        let (da, db) = (a - mx, b - my);
        sxy += da * db;
        sxx += da * da;
        syy += db * db;
    }
    sxy / (sxx * syy).sqrt()
}

/// Correlation of every row of `x` (`[nA × T]`) with every row of `y`
/// (`[nB × T]`), returned as `[nA × nB]`.
///
/// With `remove_mean = false` the rows are used as they are (cosine
/// similarity of the raw signals). Rows with zero energy give NaN, which the
/// metric engine zeroes.
pub fn corr_rows(x: &Array2<f64>, y: &Array2<f64>, remove_mean: bool) -> Array2<f64> {
    let prep = |a: &Array2<f64>| {
        let mut a = a.clone();
        if remove_mean {
            remove_row_mean_inplace(&mut a);
        }
        let norms = a.map_axis(Axis(1), |r| r.dot(&r).sqrt());
        for (mut row, &n) in a.axis_iter_mut(Axis(0)).zip(norms.iter()) {
            row.mapv_inplace(|v| v / n);
        }
        a
    };
    let xa = prep(x);
    let ya = prep(y);
    xa.dot(&ya.t())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagonal_is_one() {
        let x = Array2::from_shape_fn((3, 200), |(c, t)| ((c + 1) as f64 * t as f64 * 0.05).sin() + c as f64);
        let r = corr_rows(&x, &x, true);
        for i in 0..3 {
            approx::assert_abs_diff_eq!(r[[i, i]], 1.0, epsilon = 1e-12);
        }
    }

    #[test]
    fn anticorrelated_rows() {
        let x = Array2::from_shape_fn((1, 50), |(_, t)| t as f64);
        let y = x.mapv(|v| 3.0 - 2.0 * v);
        approx::assert_abs_diff_eq!(corr_rows(&x, &y, true)[[0, 0]], -1.0, epsilon = 1e-12);
    }

    #[test]
    fn pearson_matches_rows() {
        let x = Array2::from_shape_fn((2, 64), |(c, t)| ((c + 2) as f64 * t as f64 * 0.11).cos());
        let r = corr_rows(&x, &x, true);
        approx::assert_abs_diff_eq!(pearson(x.row(0), x.row(1)), r[[0, 1]], epsilon = 1e-12);
    }

    #[test]
    fn constant_row_gives_nan() {
        let x = Array2::from_elem((1, 10), 2.0);
        assert!(corr_rows(&x, &x, true)[[0, 0]].is_nan());
    }
}
