//! Phase-locking family: `plv`, `ciplv`, `wpli` and their time-resolved
//! forms `plvt`, `ciplvt`, `wplit`.
//!
//! Each band yields unit phase vectors `u = z/|z|` for every row, and the
//! per-sample cross term `x = u_a · conj(u_b) = e^{iΔφ}`.
//!
//! | method        | raw tensor                        | stored            |
//! |---------------|-----------------------------------|-------------------|
//! | plv / plvt    | complex `mean x`                  | `|·|` or complex  |
//! | ciplv/ciplvt  | complex `mean x`                  | corrected `Im`    |
//! | wpli / wplit  | ratio `mean Im x` / `mean |Im x|` | `|num| / den`     |
//!
//! Time-resolved forms skip the mean over samples, so averaging them across
//! trials gives the trial-wise measure at each sample.
use ndarray::{Array2, Array4};
use rustfft::num_complex::Complex64;

use super::{Metric, MetricContext, MetricOutput, MethodId, span_of};
use crate::config::{PhaseMeasure, PlvParams};
use crate::error::Result;
use crate::filter::Band;
use crate::hilbert::{analytic_rows, unit_phase};
use crate::package::{FreqAxis, TimeAxis};
use crate::signal::BlockPair;
use crate::tensor::{Finish, RawTensor};

/// `ciplv`, `ciplvt`, `wpli` and `wplit`, which carry no parameters.
#[derive(Debug, Clone, Copy, Default)]
pub struct PhaseLag;

#[derive(Clone, Copy, PartialEq, Eq)]
enum Accumulate {
    Complex,
    LagIndex,
}

fn unit_phases(
    ctx: &MetricContext<'_>,
    pair: &BlockPair,
) -> Result<(Vec<Band>, Vec<(Array2<Complex64>, Array2<Complex64>)>)> {
    let sfreq = pair.source.sfreq();
    let bands = ctx.bands(sfreq)?;
    let a = pair.source.full_data();
    let mut phases = Vec::with_capacity(bands.len());
    for band in &bands {
        let ua = unit_phase(&analytic_rows(&ctx.bandpass(&a, sfreq, band)?));
        let ub = if pair.is_same() {
            ua.clone()
        } else {
            unit_phase(&analytic_rows(&ctx.bandpass(&pair.target().full_data(), sfreq, band)?))
        };
        phases.push((ua, ub));
    }
    Ok((bands, phases))
}

fn phase_tensor(
    ctx: &MetricContext<'_>,
    pair: &BlockPair,
    acc: Accumulate,
) -> Result<(RawTensor, FreqAxis, TimeAxis)> {
    let (bands, phases) = unit_phases(ctx, pair)?;
    let n_a = pair.source.n_rows();
    let n_b = pair.target().n_rows();
    let n_t = pair.source.n_times();
    let resolved = ctx.info.time_resolved;
    let n_time = if resolved { n_t } else { 1 };
    let shape = (n_a, n_b, n_time, bands.len());

    let raw = match acc {
        Accumulate::Complex => {
            let mut out = Array4::<Complex64>::zeros(shape);
            for (f, (ua, ub)) in phases.iter().enumerate() {
                for i in 0..n_a {
                    for j in 0..n_b {
                        let (ra, rb) = (ua.row(i), ub.row(j));
                        let cross = ra.iter().zip(rb.iter()).map(|(x, y)| x * y.conj());
                        if resolved {
                            for (t, x) in cross.enumerate() {
                                out[[i, j, t, f]] = x;
                            }
                        } else {
                            out[[i, j, 0, f]] = cross.sum::<Complex64>() / n_t as f64;
                        }
                    }
                }
            }
            RawTensor::Complex(out)
        }
        Accumulate::LagIndex => {
            let mut num = Array4::<f64>::zeros(shape);
            let mut den = Array4::<f64>::zeros(shape);
            for (f, (ua, ub)) in phases.iter().enumerate() {
                for i in 0..n_a {
                    for j in 0..n_b {
                        let (ra, rb) = (ua.row(i), ub.row(j));
                        let lag = ra.iter().zip(rb.iter()).map(|(x, y)| (x * y.conj()).im);
                        if resolved {
                            for (t, s) in lag.enumerate() {
                                num[[i, j, t, f]] = s;
                                den[[i, j, t, f]] = s.abs();
                            }
                        } else {
                            let (sum, abs) = lag.fold((0.0, 0.0), |(n, d), s| (n + s, d + s.abs()));
                            num[[i, j, 0, f]] = sum / n_t as f64;
                            den[[i, j, 0, f]] = abs / n_t as f64;
                        }
                    }
                }
            }
            RawTensor::Ratio { num, den }
        }
    };

    let time = if resolved { TimeAxis::Samples(pair.target().time.clone()) } else { span_of(&pair.source) };
    Ok((raw, FreqAxis::Bands(bands), time))
}

impl Metric for PlvParams {
    fn compute(&self, ctx: &MetricContext<'_>, pair: &BlockPair) -> Result<MetricOutput> {
        let (raw, freqs, time) = phase_tensor(ctx, pair, Accumulate::Complex)?;
        let finish = match self.measure {
            PhaseMeasure::Magnitude => Finish::Magnitude,
            PhaseMeasure::None => Finish::AsIs,
        };
        Ok(MetricOutput::new(raw, ctx.info.label, freqs, time).with_finish(finish))
    }
}

impl Metric for PhaseLag {
    fn compute(&self, ctx: &MetricContext<'_>, pair: &BlockPair) -> Result<MetricOutput> {
        let (acc, finish) = match ctx.info.id {
            MethodId::Wpli | MethodId::Wplit => (Accumulate::LagIndex, Finish::AsIs),
            _ => (Accumulate::Complex, Finish::CorrectedImaginary),
        };
        let (raw, freqs, time) = phase_tensor(ctx, pair, acc)?;
        Ok(MetricOutput::new(raw, ctx.info.label, freqs, time).with_finish(finish))
    }
}
