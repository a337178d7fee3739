//! `granger` and `spgranger`.
//!
//! The estimator returns `[sink × source]`. Stored values are `[from × to]`:
//! with direction `out` (or several source rows) the sinks are the target
//! rows and the result is transposed; with direction `in` and a single
//! source row the source is the sink and nothing is transposed.
use std::borrow::Cow;

use ndarray::{Array2, Array4};

use super::{Metric, MetricContext, MetricOutput, as_tensor, positive_bins, span_of};
use crate::config::{GrangerDirection, GrangerParams, SpGrangerParams};
use crate::error::Result;
use crate::package::FreqAxis;
use crate::signal::BlockPair;
use crate::tensor::RawTensor;

struct Roles<'a> {
    sinks: Cow<'a, Array2<f64>>,
    sources: Cow<'a, Array2<f64>>,
    transpose: bool,
}

fn roles(pair: &BlockPair, direction: GrangerDirection) -> Roles<'_> {
    let a = pair.source.full_data();
    let b = pair.target().full_data();
    if direction == GrangerDirection::In && a.nrows() == 1 {
        Roles { sinks: a, sources: b, transpose: false }
    } else {
        Roles { sinks: b, sources: a, transpose: true }
    }
}

fn failed_fits<'a>(values: impl Iterator<Item = &'a f64>) -> Option<String> {
    let n = values.filter(|v| v.is_nan()).count();
    (n > 0).then(|| format!("{n} Granger model fit(s) were singular and set to 0"))
}

fn label(name: &str, order: usize, direction: GrangerDirection) -> String {
    match direction {
        GrangerDirection::Out => format!("{name}({order})"),
        GrangerDirection::In => format!("{name}({order},in)"),
    }
}

impl Metric for GrangerParams {
    fn compute(&self, ctx: &MetricContext<'_>, pair: &BlockPair) -> Result<MetricOutput> {
        let r = roles(pair, self.direction);
        let gc = ctx.engine.granger.time_domain(
            &r.sinks,
            &r.sources,
            self.order,
            pair.source.n_trials,
            true,
        )?;
        let warning = failed_fits(gc.iter());
        let m = if r.transpose { gc.reversed_axes() } else { gc };
        let mut out = MetricOutput::new(
            RawTensor::Real(as_tensor(m.as_standard_layout().into_owned())),
            label(ctx.info.label, self.order, self.direction),
            FreqAxis::Broadband,
            span_of(&pair.source),
        );
        out.warnings.extend(warning);
        Ok(out)
    }
}

impl Metric for SpGrangerParams {
    fn compute(&self, ctx: &MetricContext<'_>, pair: &BlockPair) -> Result<MetricOutput> {
        let sfreq = pair.source.sfreq();
        let n_bins = (sfreq / 2.0 / self.freq_res).floor() as usize + 1;
        let (_, freqs) = positive_bins(self.freq_res, n_bins, self.max_freq)?;

        let r = roles(pair, self.direction);
        let gc = ctx.engine.granger.spectral(
            &r.sinks,
            &r.sources,
            self.order,
            pair.source.n_trials,
            true,
            &freqs,
            sfreq,
        )?;
        let warning = failed_fits(gc.iter());
        let (n_sink, n_src, n_f) = gc.dim();
        let values = if r.transpose {
            Array4::from_shape_fn((n_src, n_sink, 1, n_f), |(i, j, _, f)| gc[[j, i, f]])
        } else {
            Array4::from_shape_fn((n_sink, n_src, 1, n_f), |(i, j, _, f)| gc[[i, j, f]])
        };
        let mut out = MetricOutput::new(
            RawTensor::Real(values),
            label(ctx.info.label, self.order, self.direction),
            FreqAxis::Bins(freqs),
            span_of(&pair.source),
        );
        out.warnings.extend(warning);
        Ok(out)
    }
}
