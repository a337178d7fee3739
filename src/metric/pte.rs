use ndarray::{Array4, s};

use super::{Metric, MetricContext, MetricOutput, span_of};
use crate::config::PteParams;
use crate::error::Result;
use crate::package::FreqAxis;
use crate::signal::BlockPair;
use crate::tensor::RawTensor;

impl Metric for PteParams {
    /// Only the source block is read; the result is square over its rows.
    fn compute(&self, ctx: &MetricContext<'_>, pair: &BlockPair) -> Result<MetricOutput> {
        let sfreq = pair.source.sfreq();
        let bands = ctx.bands(sfreq)?;
        let data = pair.source.full_data();
        let n = data.nrows();
        let mut values = Array4::zeros((n, n, 1, bands.len()));
        for (f, band) in bands.iter().enumerate() {
            let filtered = ctx.bandpass(&data, sfreq, band)?;
            let (dpte, pte) = ctx.engine.pte.compute(&filtered)?;
            let m = if self.normalized { dpte } else { pte };
            values.slice_mut(s![.., .., 0, f]).assign(&m);
        }
        let comment = if self.normalized { "dPTE" } else { ctx.info.label };
        let mut out =
            MetricOutput::new(RawTensor::Real(values), comment, FreqAxis::Bands(bands), span_of(&pair.source));
        out.target_is_source = true;
        Ok(out)
    }
}
