//! Metric engine: method registry and dispatch.
//!
//! Every method id has one [`MethodInfo`] row in [`METHODS`] and one
//! [`Metric`] implementation, reached through [`Method::metric`]. The
//! [`MetricEngine`] validates the inputs, calls the metric and applies the
//! post-steps shared by all methods (non-finite values zeroed, canonical
//! `[nSrc × nTgt × nTime × nFreq]` shape checked).
use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use ndarray::{Array2, Array4, Axis};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::{ConnectivityOptions, Method};
use crate::error::{ConnError, Result};
use crate::filter::{Band, BandDecomposer, FirBandpass};
use crate::granger::{GrangerEstimator, VarGranger};
use crate::henv::{EnvelopeEstimator, HilbertEnvelope};
use crate::package::{FreqAxis, TimeAxis};
use crate::pte::{BinnedPte, PhaseTransferEntropy};
use crate::signal::{BlockPair, SignalBlock, TrialSeq, Trials};
use crate::spectral::{CoherenceEstimator, WelchCoherence};
use crate::tensor::{Finish, RawTensor};

mod aec;
mod cohere;
mod corr;
mod granger;
mod henv;
mod phase;
mod pte;

pub use phase::PhaseLag;

/// Connectivity method identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MethodId {
    Corr,
    Cohere,
    Granger,
    Spgranger,
    Aec,
    Plv,
    Plvt,
    Ciplv,
    Ciplvt,
    Wpli,
    Wplit,
    Pte,
    Henv,
}

/// Static properties of a method.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MethodInfo {
    pub id: MethodId,
    /// Identifier accepted on the command line and in JSON.
    pub name: &'static str,
    /// Short label used in result comments.
    pub label: &'static str,
    /// `value(i, j) == value(j, i)`; symmetric storage allowed.
    pub symmetric: bool,
    /// Computed per frequency band.
    pub band_limited: bool,
    /// One value per time sample (or window).
    pub time_resolved: bool,
    /// Phase-locking family: rejects unconstrained sources.
    pub phase_family: bool,
    /// Works on kernel-representation blocks without materialising them.
    pub kernel_capable: bool,
    /// Uses the target block. When unset only the source rows are read and
    /// the target's length and rate are not checked.
    pub reads_target: bool,
}

const fn info(
    id: MethodId,
    name: &'static str,
    label: &'static str,
    flags: [bool; 6],
) -> MethodInfo {
    let [symmetric, band_limited, time_resolved, phase_family, kernel_capable, reads_target] = flags;
    MethodInfo {
        id,
        name,
        label,
        symmetric,
        band_limited,
        time_resolved,
        phase_family,
        kernel_capable,
        reads_target,
    }
}

/// Registry, indexed by `MethodId as usize`.
///
/// Flags: symmetric, band-limited, time-resolved, phase family, kernel-capable,
/// reads target.
pub static METHODS: [MethodInfo; 13] = [
    info(MethodId::Corr, "corr", "Corr", [true, false, false, false, false, true]),
    info(MethodId::Cohere, "cohere", "Coh", [true, false, false, false, true, true]),
    info(MethodId::Granger, "granger", "Granger", [false, false, false, false, false, true]),
    info(MethodId::Spgranger, "spgranger", "SpGranger", [false, false, false, false, false, true]),
    info(MethodId::Aec, "aec", "AEC", [true, true, false, false, false, true]),
    info(MethodId::Plv, "plv", "PLV", [true, true, false, true, false, true]),
    info(MethodId::Plvt, "plvt", "PLVt", [true, true, true, true, false, true]),
    info(MethodId::Ciplv, "ciplv", "ciPLV", [true, true, false, true, false, true]),
    info(MethodId::Ciplvt, "ciplvt", "ciPLVt", [true, true, true, true, false, true]),
    info(MethodId::Wpli, "wpli", "wPLI", [true, true, false, true, false, true]),
    info(MethodId::Wplit, "wplit", "wPLIt", [true, true, true, true, false, true]),
    info(MethodId::Pte, "pte", "PTE", [false, true, false, false, false, false]),
    info(MethodId::Henv, "henv", "HENV", [true, true, true, false, false, true]),
];

impl MethodId {
    pub fn info(self) -> &'static MethodInfo {
        &METHODS[self as usize]
    }

    pub fn as_str(self) -> &'static str {
        self.info().name
    }
}

impl fmt::Display for MethodId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MethodId {
    type Err = ConnError;

    fn from_str(s: &str) -> Result<Self> {
        let wanted = s.trim().to_lowercase();
        METHODS.iter().find(|m| m.name == wanted).map(|m| m.id).ok_or_else(|| {
            ConnError::UnknownMethod {
                given: s.to_string(),
                expected: METHODS.iter().map(|m| m.name).collect::<Vec<_>>().join(", "),
            }
        })
    }
}

impl Method {
    /// The implementation behind this variant.
    pub fn metric(&self) -> &dyn Metric {
        match self {
            Self::Corr(p) => p,
            Self::Cohere(p) => p,
            Self::Granger(p) => p,
            Self::Spgranger(p) => p,
            Self::Aec(p) => p,
            Self::Plv(p) | Self::Plvt(p) => p,
            Self::Ciplv | Self::Ciplvt | Self::Wpli | Self::Wplit => &PhaseLag,
            Self::Pte(p) => p,
            Self::Henv(p) => p,
        }
    }
}

/// What a metric hands back to the engine.
#[derive(Debug, Clone)]
pub struct MetricOutput {
    /// `[nSrc × nTgt × nTime × nFreq]`
    pub raw: RawTensor,
    /// How `raw` becomes the stored measure.
    pub finish: Finish,
    /// Method description, e.g. `"MSCohere(0.5Hz)"`.
    pub comment: String,
    pub freqs: FreqAxis,
    pub time: TimeAxis,
    /// Non-fatal numeric warnings.
    pub warnings: Vec<String>,
    /// Target rows are the source rows (square output over the source).
    pub target_is_source: bool,
}

impl MetricOutput {
    pub fn new(raw: RawTensor, comment: impl Into<String>, freqs: FreqAxis, time: TimeAxis) -> Self {
        Self {
            raw,
            finish: Finish::AsIs,
            comment: comment.into(),
            freqs,
            time,
            warnings: Vec::new(),
            target_is_source: false,
        }
    }

    pub fn with_finish(mut self, finish: Finish) -> Self {
        self.finish = finish;
        self
    }
}

/// One connectivity estimator.
pub trait Metric {
    fn compute(&self, ctx: &MetricContext<'_>, pair: &BlockPair) -> Result<MetricOutput>;

    /// Estimate from a lazy list of trials without mixing them first.
    fn compute_trials(&self, ctx: &MetricContext<'_>, _trials: TrialSeq<'_>) -> Result<MetricOutput> {
        Err(ConnError::unsupported(format!(
            "'{}' cannot be estimated from a list of trials",
            ctx.info.name
        )))
    }
}

/// Per-call view handed to a [`Metric`].
pub struct MetricContext<'a> {
    pub opts: &'a ConnectivityOptions,
    pub info: &'static MethodInfo,
    pub engine: &'a MetricEngine,
}

impl MetricContext<'_> {
    pub fn bands(&self, sfreq: f64) -> Result<Vec<Band>> {
        self.engine.decomposer.bounds(&self.opts.freq_bands, sfreq)
    }

    pub fn bandpass(&self, data: &Array2<f64>, sfreq: f64, band: &Band) -> Result<Array2<f64>> {
        self.engine.decomposer.bandpass(data, sfreq, band, &self.opts.filter)
    }
}

/// Dispatches methods and owns the numeric collaborators.
pub struct MetricEngine {
    pub(crate) decomposer: Box<dyn BandDecomposer>,
    pub(crate) coherence: Box<dyn CoherenceEstimator>,
    pub(crate) granger: Box<dyn GrangerEstimator>,
    pub(crate) pte: Box<dyn PhaseTransferEntropy>,
    pub(crate) envelope: Box<dyn EnvelopeEstimator>,
}

impl Default for MetricEngine {
    fn default() -> Self {
        Self {
            decomposer: Box::new(FirBandpass),
            coherence: Box::new(WelchCoherence),
            granger: Box::new(VarGranger),
            pte: Box::new(BinnedPte),
            envelope: Box::new(HilbertEnvelope),
        }
    }
}

impl MetricEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_decomposer(mut self, d: impl BandDecomposer + 'static) -> Self {
        self.decomposer = Box::new(d);
        self
    }

    pub fn with_coherence(mut self, c: impl CoherenceEstimator + 'static) -> Self {
        self.coherence = Box::new(c);
        self
    }

    pub fn with_granger(mut self, g: impl GrangerEstimator + 'static) -> Self {
        self.granger = Box::new(g);
        self
    }

    pub fn with_pte(mut self, p: impl PhaseTransferEntropy + 'static) -> Self {
        self.pte = Box::new(p);
        self
    }

    pub fn with_envelope(mut self, e: impl EnvelopeEstimator + 'static) -> Self {
        self.envelope = Box::new(e);
        self
    }

    fn context<'a>(&'a self, opts: &'a ConnectivityOptions) -> MetricContext<'a> {
        MetricContext { opts, info: opts.method.info(), engine: self }
    }

    /// Check that `pair` can be fed to `info`'s method.
    pub fn check_pair(info: &MethodInfo, pair: &BlockPair) -> Result<()> {
        let (a, b) = (&pair.source, pair.target());
        a.validate()?;
        if !pair.is_same() {
            b.validate()?;
        }
        if info.phase_family && (a.is_unconstrained() || b.is_unconstrained()) {
            return Err(ConnError::unsupported(format!(
                "'{}' cannot be computed on unconstrained sources ({} orientations per location)",
                info.name,
                a.n_components.max(b.n_components)
            )));
        }
        if info.reads_target && !pair.is_same() {
            if a.n_times() != b.n_times() {
                return Err(ConnError::shape(format!(
                    "source has {} samples, target has {}",
                    a.n_times(),
                    b.n_times()
                )));
            }
            if ((a.sfreq() - b.sfreq()) / a.sfreq()).abs() > 1e-6 {
                return Err(ConnError::shape(format!(
                    "source sampled at {} Hz, target at {} Hz",
                    a.sfreq(),
                    b.sfreq()
                )));
            }
        }
        Ok(())
    }

    /// Connectivity of one source/target pair.
    pub fn compute(&self, pair: &BlockPair, opts: &ConnectivityOptions) -> Result<MetricOutput> {
        let ctx = self.context(opts);
        Self::check_pair(ctx.info, pair)?;
        let pair = if ctx.info.kernel_capable { Cow::Borrowed(pair) } else { materialize(pair) };

        let mut out = opts.method.metric().compute(&ctx, &pair)?;
        let n_src = pair.source.n_rows();
        let n_tgt = if out.target_is_source { n_src } else { pair.target().n_rows() };
        finish_output(&mut out, Some((n_src, n_tgt)))?;
        debug!(method = ctx.info.name, shape = ?out.raw.dim(), "metric computed");
        Ok(out)
    }

    /// Connectivity estimated jointly from a lazy list of trials.
    pub fn compute_trials(&self, trials: TrialSeq<'_>, opts: &ConnectivityOptions) -> Result<MetricOutput> {
        let ctx = self.context(opts);
        let mut out = opts.method.metric().compute_trials(&ctx, trials)?;
        finish_output(&mut out, None)?;
        Ok(out)
    }

    pub fn run(&self, trials: Trials<'_>, opts: &ConnectivityOptions) -> Result<MetricOutput> {
        match trials {
            Trials::Single(pair) => self.compute(&pair, opts),
            Trials::List(seq) => self.compute_trials(seq, opts),
        }
    }
}

fn materialize(pair: &BlockPair) -> Cow<'_, BlockPair> {
    let needs = pair.source.kernel.is_some() || pair.target.as_ref().is_some_and(|t| t.kernel.is_some());
    if !needs {
        return Cow::Borrowed(pair);
    }
    Cow::Owned(BlockPair {
        source: pair.source.clone().materialize(),
        target: pair.target.clone().map(SignalBlock::materialize),
    })
}

fn finish_output(out: &mut MetricOutput, rows: Option<(usize, usize)>) -> Result<()> {
    out.raw.zero_non_finite();
    let (s, t, n_time, n_freq) = out.raw.dim();
    let (es, et) = rows.unwrap_or((s, t));
    let expected = (es, et, out.time.len(), out.freqs.len());
    if (s, t, n_time, n_freq) != expected {
        return Err(ConnError::Kernel(format!(
            "metric produced a {:?} tensor, expected {expected:?}",
            out.raw.dim()
        )));
    }
    for w in &out.warnings {
        warn!("{w}");
    }
    Ok(())
}

/// `[nA × nB]` → `[nA × nB × 1 × 1]`.
pub(crate) fn as_tensor(m: Array2<f64>) -> Array4<f64> {
    m.insert_axis(Axis(2)).insert_axis(Axis(3))
}

/// Two-point span of a block's time axis.
pub(crate) fn span_of(block: &SignalBlock) -> TimeAxis {
    let t0 = block.time.first().copied().unwrap_or(0.0);
    let t1 = block.time.last().copied().unwrap_or(t0);
    TimeAxis::Span(t0, t1)
}

/// Frequency formatted with as many decimals as it needs (up to four).
pub(crate) fn format_freq(f: f64) -> String {
    for d in 0..4_usize {
        let s = 10f64.powi(d as i32);
        if ((f * s).round() - f * s).abs() < 1e-6 {
            return format!("{f:.d$}");
        }
    }
    format!("{f:.4}")
}

/// Positive frequencies `k · step` up to `nyquist` and `max_freq`; the zero
/// bin is never included. Returns the kept bin indices and frequencies.
pub(crate) fn positive_bins(
    step: f64,
    n_bins: usize,
    max_freq: Option<f64>,
) -> Result<(Vec<usize>, Vec<f64>)> {
    let (idx, freqs): (Vec<usize>, Vec<f64>) = (1..n_bins)
        .map(|k| (k, k as f64 * step))
        .filter(|&(_, f)| max_freq.map_or(true, |m| f <= m + 1e-9))
        .unzip();
    if idx.is_empty() {
        return Err(ConnError::Degenerate(format!(
            "no frequency bin left below {} Hz (resolution {} Hz)",
            max_freq.unwrap_or(0.0),
            format_freq(step)
        )));
    }
    Ok((idx, freqs))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_is_indexed_by_id() {
        for (i, m) in METHODS.iter().enumerate() {
            assert_eq!(m.id as usize, i, "{} out of place", m.name);
            assert_eq!(m.name.parse::<MethodId>().unwrap(), m.id);
        }
    }

    #[test]
    fn unknown_method_lists_accepted_names() {
        let err = "coherence".parse::<MethodId>().unwrap_err();
        match err {
            ConnError::UnknownMethod { given, expected } => {
                assert_eq!(given, "coherence");
                assert!(expected.contains("wplit"));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn frequency_labels() {
        assert_eq!(format_freq(1.0), "1");
        assert_eq!(format_freq(0.5), "0.5");
        assert_eq!(format_freq(0.25), "0.25");
    }

    #[test]
    fn only_pte_ignores_the_target() {
        let readers: Vec<&str> = METHODS.iter().filter(|m| !m.reads_target).map(|m| m.name).collect();
        assert_eq!(readers, ["pte"]);

        let a = SignalBlock::from_sfreq(Array2::zeros((2, 100)), 100.0, 0.0).unwrap();
        let b = SignalBlock::from_sfreq(Array2::zeros((2, 80)), 100.0, 0.0).unwrap();
        let pair = BlockPair::new(a, b);
        assert!(MetricEngine::check_pair(MethodId::Pte.info(), &pair).is_ok());
        assert!(matches!(
            MetricEngine::check_pair(MethodId::Corr.info(), &pair),
            Err(ConnError::ShapeMismatch(_))
        ));
    }

    #[test]
    fn zero_bin_is_dropped() {
        let (idx, freqs) = positive_bins(0.5, 5, None).unwrap();
        assert_eq!(idx, vec![1, 2, 3, 4]);
        assert_eq!(freqs[0], 0.5);
        let (_, freqs) = positive_bins(0.5, 5, Some(1.0)).unwrap();
        assert_eq!(freqs, vec![0.5, 1.0]);
        assert!(matches!(positive_bins(0.5, 5, Some(0.2)), Err(ConnError::Degenerate(_))));
    }
}
