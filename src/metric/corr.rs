use super::{Metric, MetricContext, MetricOutput, as_tensor, span_of};
use crate::config::CorrParams;
use crate::correlation::corr_rows;
use crate::error::Result;
use crate::package::FreqAxis;
use crate::signal::BlockPair;
use crate::tensor::RawTensor;

impl Metric for CorrParams {
    fn compute(&self, ctx: &MetricContext<'_>, pair: &BlockPair) -> Result<MetricOutput> {
        let a = pair.source.full_data();
        let b = pair.target().full_data();
        let r = corr_rows(&a, &b, self.remove_mean);
        Ok(MetricOutput::new(
            RawTensor::Real(as_tensor(r)),
            ctx.info.label,
            FreqAxis::Broadband,
            span_of(&pair.source),
        ))
    }
}
