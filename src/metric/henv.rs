use super::{Metric, MetricContext, MetricOutput};
use crate::config::HenvParams;
use crate::error::Result;
use crate::henv::EnvelopeRequest;
use crate::package::{FreqAxis, TimeAxis};
use crate::signal::BlockPair;
use crate::tensor::RawTensor;

impl Metric for HenvParams {
    fn compute(&self, ctx: &MetricContext<'_>, pair: &BlockPair) -> Result<MetricOutput> {
        let sfreq = pair.source.sfreq();
        let bands = ctx.bands(sfreq)?;
        let req = EnvelopeRequest {
            sfreq,
            bands: &bands,
            params: *self,
            filter: ctx.opts.filter,
            decomposer: ctx.engine.decomposer.as_ref(),
        };
        let a = pair.source.full_data();
        let b = (!pair.is_same()).then(|| pair.target().full_data());
        let out = ctx.engine.envelope.compute(&a, b.as_deref(), &req)?;

        let t0 = pair.source.time.first().copied().unwrap_or(0.0);
        let times = out.times.iter().map(|t| t + t0).collect();
        Ok(MetricOutput::new(
            RawTensor::Real(out.values),
            format!("{}-{}", ctx.info.label, self.measure.as_str()),
            FreqAxis::Bands(bands),
            TimeAxis::Samples(times),
        ))
    }
}
