//! `cohere`: coherence measures from Welch cross-spectra.
use ndarray::Array4;

use super::{Metric, MetricContext, MetricEngine, MetricOutput, format_freq, positive_bins, span_of};
use crate::config::{CoherenceMeasure, CohereParams};
use crate::error::{ConnError, Result};
use crate::package::FreqAxis;
use crate::signal::{BlockPair, TrialSeq};
use crate::spectral::CoherenceRequest;
use crate::tensor::RawTensor;

impl CohereParams {
    /// Segment length in samples.
    pub fn n_fft(&self, sfreq: f64) -> Result<usize> {
        match (self.win_len, self.max_freq_res) {
            (Some(w), _) => Ok((w * sfreq).round() as usize),
            (None, Some(res)) if res > 0.0 => {
                let n = (sfreq / res).round().max(1.0);
                Ok(2_usize.pow(n.log2().ceil() as u32))
            }
            _ => Err(ConnError::config(
                "coherence needs a window length or a positive maximum frequency resolution",
            )),
        }
    }

    fn estimate(
        &self,
        ctx: &MetricContext<'_>,
        trials: &mut dyn Iterator<Item = Result<BlockPair>>,
    ) -> Result<MetricOutput> {
        let first = trials
            .next()
            .ok_or_else(|| ConnError::Degenerate("no trials to estimate coherence from".into()))??;
        let sfreq = first.source.sfreq();
        let time = span_of(&first.source);
        let n_fft = self.n_fft(sfreq)?;
        let req = CoherenceRequest { n_fft, overlap: self.overlap };

        let mut all = std::iter::once(Ok(first)).chain(trials);
        let cs = ctx.engine.coherence.cross_spectra(&mut all, &req)?;

        let step = sfreq / n_fft as f64;
        let (bins, freqs) = positive_bins(step, cs.n_freqs(), self.max_freq)?;
        let c = cs.coherency();
        let (n_a, n_b, _) = c.dim();
        let measure = self.measure;
        let values = Array4::from_shape_fn((n_a, n_b, 1, bins.len()), |(i, j, _, f)| {
            let z = c[[i, j, bins[f]]];
            match measure {
                CoherenceMeasure::Mscohere => z.norm_sqr(),
                CoherenceMeasure::Icohere => z.im * z.im / (1.0 - z.re * z.re),
                CoherenceMeasure::Icohere2019 => z.im.abs(),
                CoherenceMeasure::Lcohere2019 => z.im.abs() / (1.0 - z.re * z.re).sqrt(),
            }
        });

        let comment = format!("{}({}Hz)", measure.label(), format_freq(step));
        let mut out = MetricOutput::new(RawTensor::Real(values), comment, FreqAxis::Bins(freqs), time);
        if cs.n_windows < 2 {
            out.warnings.push(format!(
                "coherence estimated from a single {n_fft}-sample window; magnitude-squared values are trivially 1"
            ));
        }
        Ok(out)
    }
}

impl Metric for CohereParams {
    fn compute(&self, ctx: &MetricContext<'_>, pair: &BlockPair) -> Result<MetricOutput> {
        self.estimate(ctx, &mut std::iter::once(Ok(pair.clone())))
    }

    fn compute_trials(&self, ctx: &MetricContext<'_>, trials: TrialSeq<'_>) -> Result<MetricOutput> {
        let info = ctx.info;
        let mut checked = trials.map(|pair| {
            let pair = pair?;
            MetricEngine::check_pair(info, &pair)?;
            Ok(pair)
        });
        self.estimate(ctx, &mut checked)
    }
}
