//! Phase transfer entropy from binned instantaneous phases.
//!
//! Follows Lobier et al. (2014):
//!   • phase φ = arg(analytic(x)) per row
//!   • delay  = round(T · n_rows / #sign changes of φ)
//!   • bin width = 3.49 · mean(std(φ)) · T^(−1/3) (Scott's rule)
//!   • PTE(i → j) = H(φj⁺, φj) + H(φj, φi) − H(φj) − H(φj⁺, φj, φi)
//!     where φj⁺ is φj `delay` samples ahead
//!   • dPTE(i → j) = PTE(i → j) / (PTE(i → j) + PTE(j → i))
use std::collections::HashMap;
use std::f64::consts::PI;

use ndarray::{Array2, Axis};

use crate::error::{ConnError, Result};
use crate::hilbert::analytic_rows;

/// Phase transfer entropy primitive over the rows of one block.
pub trait PhaseTransferEntropy {
    /// Returns `(dPTE, PTE)`, both `[n × n]` with entry `[i, j]` the flow
    /// from row `i` to row `j`. Diagonals are zero.
    fn compute(&self, data: &Array2<f64>) -> Result<(Array2<f64>, Array2<f64>)>;
}

/// Histogram estimator.
#[derive(Debug, Clone, Copy, Default)]
pub struct BinnedPte;

fn entropy<K: std::hash::Hash + Eq>(keys: impl Iterator<Item = K>, n: f64) -> f64 {
    let mut counts: HashMap<K, usize> = HashMap::new();
    for k in keys {
        *counts.entry(k).or_default() += 1;
    }
    counts
        .values()
        .map(|&c| {
            let p = c as f64 / n;
            -p * p.ln()
        })
        .sum()
}

impl PhaseTransferEntropy for BinnedPte {
    fn compute(&self, data: &Array2<f64>) -> Result<(Array2<f64>, Array2<f64>)> {
        let (n_rows, n_t) = data.dim();
        // A flat row has no phase; round-off in its analytic signal would
        // still produce sign changes.
        for (r, row) in data.axis_iter(Axis(0)).enumerate() {
            let scale = row.iter().fold(0.0_f64, |m, v| m.max(v.abs()));
            if !(row.std(0.0) > 1e-12 * scale.max(f64::MIN_POSITIVE)) {
                return Err(ConnError::Degenerate(format!("row {r} is flat; its phase is undefined")));
            }
        }
        let phase = analytic_rows(data).mapv(|z| z.arg());

        let crossings: usize = phase
            .axis_iter(Axis(0))
            .map(|row| row.windows(2).into_iter().filter(|w| w[0] * w[1] < 0.0).count())
            .sum();
        if crossings == 0 {
            return Err(ConnError::Degenerate("phase never changes sign; no PTE delay".into()));
        }
        let delay = ((n_t * n_rows) as f64 / crossings as f64).round().max(1.0) as usize;
        if delay >= n_t {
            return Err(ConnError::Degenerate(format!(
                "PTE delay of {delay} samples exceeds the {n_t}-sample signal"
            )));
        }

        let mean_std = phase
            .axis_iter(Axis(0))
            .map(|row| row.std(0.0))
            .sum::<f64>()
            / n_rows as f64;
        let width = 3.49 * mean_std * (n_t as f64).powf(-1.0 / 3.0);
        if !(width > 0.0) {
            return Err(ConnError::Degenerate("constant phase; no PTE bins".into()));
        }
        let n_bins = ((2.0 * PI) / width).ceil() as usize;
        let bins = phase.mapv(|p| (((p + PI) / width).floor() as usize).min(n_bins - 1));

        let n = n_t - delay;
        let nf = n as f64;
        let mut pte = Array2::zeros((n_rows, n_rows));
        for j in 0..n_rows {
            let future = bins.row(j).slice(ndarray::s![delay..]).to_owned();
            let past = bins.row(j).slice(ndarray::s![..n]).to_owned();
            let h_past = entropy(past.iter().copied(), nf);
            let h_fut_past = entropy(future.iter().zip(past.iter()).map(|(&a, &b)| (a, b)), nf);
            for i in 0..n_rows {
                if i == j {
                    continue;
                }
                let src = bins.row(i).slice(ndarray::s![..n]).to_owned();
                let h_past_src = entropy(past.iter().zip(src.iter()).map(|(&a, &b)| (a, b)), nf);
                let h_all = entropy(
                    future.iter().zip(past.iter()).zip(src.iter()).map(|((&a, &b), &c)| (a, b, c)),
                    nf,
                );
                pte[[i, j]] = h_fut_past + h_past_src - h_past - h_all;
            }
        }

        let dpte = Array2::from_shape_fn((n_rows, n_rows), |(i, j)| {
            if i == j {
                0.0
            } else {
                pte[[i, j]] / (pte[[i, j]] + pte[[j, i]])
            }
        });
        Ok((dpte, pte))
    }
}
