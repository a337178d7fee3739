//! Per-row centring and standardisation.
//!
//! `remove_row_mean_inplace`: for each row: x[r, :] -= mean(x[r, :])
//!
//! `zscore_rows_inplace`: for each row: x[r, :] = (x[r, :] − μ_r) / σ_r,
//!   σ with ddof = 0. Constant rows are only centred.
use ndarray::{Array2, Axis};

/// Subtract each row's temporal mean.
pub fn remove_row_mean_inplace(data: &mut Array2<f64>) {
    for mut row in data.axis_iter_mut(Axis(0)) {
        let m = row.mean().unwrap_or(0.0);
        row.mapv_inplace(|v| v - m);
    }
}

/// Per-row z-score. Returns the (mean, std) of every row.
pub fn zscore_rows_inplace(data: &mut Array2<f64>) -> Vec<(f64, f64)> {
    data.axis_iter_mut(Axis(0))
        .map(|mut row| {
            let n = row.len() as f64;
            let mean = row.sum() / n;
            let var = row.iter().map(|&v| (v - mean) * (v - mean)).sum::<f64>() / n;
            let std = var.sqrt();
            if std > 0.0 {
                row.mapv_inplace(|v| (v - mean) / std);
            } else {
                row.mapv_inplace(|v| v - mean);
            }
            (mean, std)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zscore_mean_zero_std_one() {
        let mut data = Array2::from_shape_fn((8, 512), |(c, t)| {
            (c as f64 * 3.7 + t as f64 * 0.1).sin() * 50.0 + c as f64
        });
        let params = zscore_rows_inplace(&mut data);
        assert_eq!(params.len(), 8);

        for row in data.rows() {
            let m = row.mean().unwrap();
            let s = (row.mapv(|v| (v - m) * (v - m)).sum() / row.len() as f64).sqrt();
            approx::assert_abs_diff_eq!(m, 0.0, epsilon = 1e-10);
            approx::assert_abs_diff_eq!(s, 1.0, epsilon = 1e-10);
        }
    }

    #[test]
    fn zscore_constant_row_no_panic() {
        let mut data = Array2::from_elem((2, 64), 7.0_f64);
        let params = zscore_rows_inplace(&mut data);
        assert_eq!(params[0], (7.0, 0.0));
        assert!(data.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn row_mean_removed() {
        let mut data = Array2::from_shape_fn((3, 100), |(c, t)| c as f64 * 5.0 + t as f64);
        remove_row_mean_inplace(&mut data);
        for row in data.rows() {
            approx::assert_abs_diff_eq!(row.mean().unwrap(), 0.0, epsilon = 1e-9);
        }
    }
}
