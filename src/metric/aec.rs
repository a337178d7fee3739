//! `aec`: amplitude envelope correlation per band.
use ndarray::{Array2, Array4, s};
use rustfft::num_complex::Complex64;

use super::{Metric, MetricContext, MetricOutput, span_of};
use crate::config::AecParams;
use crate::correlation::{corr_rows, pearson};
use crate::error::Result;
use crate::hilbert::{analytic_rows, orthogonal_envelope};
use crate::package::FreqAxis;
use crate::signal::BlockPair;
use crate::tensor::RawTensor;

/// `corr(|za_i|, |zb_j ⊥ za_i|)` for every row pair.
fn orthogonalized(za: &Array2<Complex64>, zb: &Array2<Complex64>) -> Array2<f64> {
    let env_a = za.mapv(|z| z.norm());
    Array2::from_shape_fn((za.nrows(), zb.nrows()), |(i, j)| {
        pearson(env_a.row(i), orthogonal_envelope(za.row(i), zb.row(j)).view())
    })
}

impl Metric for AecParams {
    fn compute(&self, ctx: &MetricContext<'_>, pair: &BlockPair) -> Result<MetricOutput> {
        let sfreq = pair.source.sfreq();
        let bands = ctx.bands(sfreq)?;
        let a = pair.source.full_data();
        let n_a = a.nrows();
        let n_b = pair.target().n_rows();
        let mut values = Array4::zeros((n_a, n_b, 1, bands.len()));

        for (f, band) in bands.iter().enumerate() {
            let za = analytic_rows(&ctx.bandpass(&a, sfreq, band)?);
            let zb = if pair.is_same() {
                za.clone()
            } else {
                analytic_rows(&ctx.bandpass(&pair.target().full_data(), sfreq, band)?)
            };
            let r = if self.orthogonalize {
                let ab = orthogonalized(&za, &zb);
                if ctx.opts.symmetric {
                    let ba = orthogonalized(&zb, &za);
                    (ab + ba.t()) / 2.0
                } else {
                    ab
                }
            } else {
                corr_rows(&za.mapv(|z| z.norm()), &zb.mapv(|z| z.norm()), true)
            };
            values.slice_mut(s![.., .., 0, f]).assign(&r);
        }

        let comment = if self.orthogonalize { "AEC (orth)" } else { ctx.info.label };
        Ok(MetricOutput::new(
            RawTensor::Real(values),
            comment,
            FreqAxis::Bands(bands),
            span_of(&pair.source),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn zero_lag_copy_is_orthogonalized_away() {
        let n = 400;
        let za = Array2::from_shape_fn((1, n), |(_, t)| {
            let w = 2.0 * PI * 10.0 * t as f64 / 200.0;
            let env = 1.0 + 0.5 * (2.0 * PI * t as f64 / 200.0).sin();
            Complex64::new(env * w.cos(), env * w.sin())
        });
        let zb = za.mapv(|z| z * 2.0);
        let r = orthogonalized(&za, &zb);
        // The orthogonalised copy is identically zero; Pearson is undefined.
        assert!(r[[0, 0]].is_nan());
    }
}
