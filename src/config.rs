//! Connectivity configuration.
//!
//! [`ConnectivityOptions`] holds every tunable parameter of a connectivity
//! run. [`Method`] selects the estimator and carries that estimator's own
//! parameters, so an option that does not apply to a method cannot be set.
use serde::{Deserialize, Serialize};

use crate::error::{ConnError, Result};
use crate::filter::{FilterOptions, FreqBands};
use crate::metric::{MethodId, MethodInfo};
use crate::scout::ScoutOptions;

/// How several input files are turned into outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// One output per input file.
    #[default]
    Input,
    /// One output: running mean of the per-trial connectivity.
    Avg,
    /// One output: connectivity of the time-concatenated trials.
    Concat,
    /// One output: coherence from cross-spectra accumulated over all trials.
    AvgCoh,
}

/// Coherence measure derived from the normalised cross-spectrum
/// `C = Sab / √(Saa·Sbb)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CoherenceMeasure {
    /// `|C|²`
    #[default]
    Mscohere,
    /// `Im(C)² / (1 − Re(C)²)` (legacy imaginary coherence).
    Icohere,
    /// `|Im C|`
    Icohere2019,
    /// `|Im C| / √(1 − Re(C)²)` (lagged coherence).
    Lcohere2019,
}

impl CoherenceMeasure {
    pub fn label(self) -> &'static str {
        match self {
            Self::Mscohere => "MSCohere",
            Self::Icohere => "ICohere",
            Self::Icohere2019 => "ICohere2019",
            Self::Lcohere2019 => "LCohere2019",
        }
    }
}

/// Parameters of `cohere`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CohereParams {
    pub measure: CoherenceMeasure,
    /// Estimator window length in seconds.
    ///
    /// Takes precedence over `max_freq_res`. Default: `1.0` s.
    pub win_len: Option<f64>,
    /// Fraction of each window shared with the next, in `[0, 1)`.
    ///
    /// Default: `0.5`.
    pub overlap: f64,
    /// Legacy: requested frequency resolution in Hz. The window becomes the
    /// next power of two above `sfreq / max_freq_res` samples.
    pub max_freq_res: Option<f64>,
    /// Highest frequency kept, in Hz.
    pub max_freq: Option<f64>,
}

impl Default for CohereParams {
    fn default() -> Self {
        Self {
            measure: CoherenceMeasure::Mscohere,
            win_len: Some(1.0),
            overlap: 0.5,
            max_freq_res: None,
            max_freq: None,
        }
    }
}

/// Which block plays the sink for a single-row source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrangerDirection {
    /// Influence of the source rows on the target rows.
    #[default]
    Out,
    /// Influence of the target rows on a single source row.
    In,
}

/// Parameters of `granger`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GrangerParams {
    /// Autoregressive model order in samples. Default: `10`.
    pub order: usize,
    pub direction: GrangerDirection,
}

impl Default for GrangerParams {
    fn default() -> Self {
        Self { order: 10, direction: GrangerDirection::Out }
    }
}

/// Parameters of `spgranger`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpGrangerParams {
    pub order: usize,
    pub direction: GrangerDirection,
    /// Spacing of the evaluated frequencies in Hz. Default: `1.0`.
    pub freq_res: f64,
    /// Highest frequency kept, in Hz.
    pub max_freq: Option<f64>,
}

impl Default for SpGrangerParams {
    fn default() -> Self {
        Self { order: 10, direction: GrangerDirection::Out, freq_res: 1.0, max_freq: None }
    }
}

/// Parameters of `aec`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AecParams {
    /// Orthogonalise the target envelope against the source phase.
    pub orthogonalize: bool,
}

/// What `plv` / `plvt` store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PhaseMeasure {
    /// `|PLV|`
    #[default]
    Magnitude,
    /// The complex PLV, phase included.
    None,
}

/// Parameters of `plv` and `plvt`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlvParams {
    pub measure: PhaseMeasure,
}

/// Parameters of `pte`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PteParams {
    /// Store the directed, normalised dPTE instead of the raw PTE.
    ///
    /// Default: `true`.
    pub normalized: bool,
}

impl Default for PteParams {
    fn default() -> Self {
        Self { normalized: true }
    }
}

/// Envelope connectivity measure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EnvelopeMeasure {
    /// Coherence of the analytic signals.
    #[default]
    Coh,
    /// Lagged coherence.
    Lcoh,
    /// Envelope correlation.
    Penv,
    /// Orthogonalised envelope correlation.
    Oenv,
}

impl EnvelopeMeasure {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Coh => "coh",
            Self::Lcoh => "lcoh",
            Self::Penv => "penv",
            Self::Oenv => "oenv",
        }
    }
}

/// Parameters of `henv`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HenvParams {
    pub measure: EnvelopeMeasure,
    /// Sliding window length in seconds. Default: `2.0` s.
    pub win_length: f64,
    /// Fraction of each window shared with the next, in `[0, 1)`.
    pub overlap: f64,
}

impl Default for HenvParams {
    fn default() -> Self {
        Self { measure: EnvelopeMeasure::Coh, win_length: 2.0, overlap: 0.5 }
    }
}

/// Connectivity method together with its parameters.
///
/// Serialised with a `name` tag, e.g.
/// `{"name": "cohere", "measure": "lcohere2019", "win_len": 2.0}`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "name", rename_all = "lowercase")]
pub enum Method {
    Corr(CorrParams),
    Cohere(CohereParams),
    Granger(GrangerParams),
    Spgranger(SpGrangerParams),
    Aec(AecParams),
    Plv(PlvParams),
    Plvt(PlvParams),
    Ciplv,
    Ciplvt,
    Wpli,
    Wplit,
    Pte(PteParams),
    Henv(HenvParams),
}

/// Parameters of `corr`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrParams {
    /// Centre every row before correlating. Default: `true`.
    pub remove_mean: bool,
}

impl Default for CorrParams {
    fn default() -> Self {
        Self { remove_mean: true }
    }
}

impl Default for Method {
    fn default() -> Self {
        Self::Corr(CorrParams::default())
    }
}

impl Method {
    /// The method with default parameters.
    pub fn from_id(id: MethodId) -> Self {
        match id {
            MethodId::Corr => Self::Corr(Default::default()),
            MethodId::Cohere => Self::Cohere(Default::default()),
            MethodId::Granger => Self::Granger(Default::default()),
            MethodId::Spgranger => Self::Spgranger(Default::default()),
            MethodId::Aec => Self::Aec(Default::default()),
            MethodId::Plv => Self::Plv(Default::default()),
            MethodId::Plvt => Self::Plvt(Default::default()),
            MethodId::Ciplv => Self::Ciplv,
            MethodId::Ciplvt => Self::Ciplvt,
            MethodId::Wpli => Self::Wpli,
            MethodId::Wplit => Self::Wplit,
            MethodId::Pte => Self::Pte(Default::default()),
            MethodId::Henv => Self::Henv(Default::default()),
        }
    }

    pub fn id(&self) -> MethodId {
        match self {
            Self::Corr(_) => MethodId::Corr,
            Self::Cohere(_) => MethodId::Cohere,
            Self::Granger(_) => MethodId::Granger,
            Self::Spgranger(_) => MethodId::Spgranger,
            Self::Aec(_) => MethodId::Aec,
            Self::Plv(_) => MethodId::Plv,
            Self::Plvt(_) => MethodId::Plvt,
            Self::Ciplv => MethodId::Ciplv,
            Self::Ciplvt => MethodId::Ciplvt,
            Self::Wpli => MethodId::Wpli,
            Self::Wplit => MethodId::Wplit,
            Self::Pte(_) => MethodId::Pte,
            Self::Henv(_) => MethodId::Henv,
        }
    }

    pub fn info(&self) -> &'static MethodInfo {
        self.id().info()
    }

    /// `true` when `plv`/`plvt` keep the complex value.
    pub fn keeps_phase(&self) -> bool {
        matches!(
            self,
            Self::Plv(PlvParams { measure: PhaseMeasure::None })
                | Self::Plvt(PlvParams { measure: PhaseMeasure::None })
        )
    }

    fn validate(&self) -> Result<()> {
        let fraction = |name: &str, v: f64| {
            if (0.0..1.0).contains(&v) {
                Ok(())
            } else {
                Err(ConnError::config(format!("{name} must be in [0, 1), got {v}")))
            }
        };
        let positive = |name: &str, v: Option<f64>| match v {
            Some(v) if !(v > 0.0) => Err(ConnError::config(format!("{name} must be positive, got {v}"))),
            _ => Ok(()),
        };
        match self {
            Self::Cohere(p) => {
                positive("win_len", p.win_len)?;
                positive("max_freq", p.max_freq)?;
                fraction("overlap", p.overlap)?;
                let has_res = p.max_freq_res.is_some_and(|r| r > 0.0);
                if p.win_len.is_none() && !has_res {
                    return Err(ConnError::config(
                        "coherence needs a window length or a positive maximum frequency resolution",
                    ));
                }
            }
            Self::Granger(p) if p.order == 0 => {
                return Err(ConnError::config("Granger model order must be at least 1"));
            }
            Self::Spgranger(p) => {
                if p.order == 0 {
                    return Err(ConnError::config("Granger model order must be at least 1"));
                }
                positive("freq_res", Some(p.freq_res))?;
                positive("max_freq", p.max_freq)?;
            }
            Self::Henv(p) => {
                positive("win_length", Some(p.win_length))?;
                fraction("overlap", p.overlap)?;
            }
            _ => {}
        }
        Ok(())
    }
}

/// Configuration of one connectivity run.
///
/// All fields are `pub` so you can construct one with struct-update syntax:
///
/// ```
/// use exg_conn::{ConnectivityOptions, Method, OutputMode};
///
/// let opts = ConnectivityOptions {
///     method: Method::Wpli,
///     output_mode: OutputMode::Avg,
///     ..ConnectivityOptions::default()
/// };
/// assert!(opts.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityOptions {
    /// Estimator and its parameters.
    ///
    /// Default: `corr` with mean removal.
    pub method: Method,

    /// Bands for band-limited methods (`aec`, the PLV family, `pte`, `henv`).
    ///
    /// [`FreqBands::Full`] runs them once on the unfiltered signals.
    ///
    /// Default: delta / theta / alpha / beta / gamma1 / gamma2.
    pub freq_bands: FreqBands,

    /// `[t0, t1]` in seconds; `None` uses the whole block.
    pub time_window: Option<[f64; 2]>,

    /// Default: [`OutputMode::Input`].
    pub output_mode: OutputMode,

    /// Subtract the cross-trial average from every trial first.
    pub remove_evoked: bool,

    /// Store only the lower triangle (diagonal included).
    ///
    /// Only legal for symmetric methods and identical source/target rows.
    pub symmetric: bool,

    /// Exclude rows flagged bad by the acquisition.
    pub ignore_bad: bool,

    /// Scout reduction when the targets are scouts.
    pub scout: Option<ScoutOptions>,

    /// Band-pass filter settings.
    pub filter: FilterOptions,
}

impl Default for ConnectivityOptions {
    fn default() -> Self {
        Self {
            method: Method::default(),
            freq_bands: FreqBands::default(),
            time_window: None,
            output_mode: OutputMode::Input,
            remove_evoked: false,
            symmetric: false,
            ignore_bad: false,
            scout: None,
            filter: FilterOptions::default(),
        }
    }
}

impl ConnectivityOptions {
    /// Options with default settings for `method`.
    pub fn for_method(method: Method) -> Self {
        Self { method, ..Self::default() }
    }

    /// Check every option that does not depend on the data.
    ///
    /// Called before anything is loaded.
    pub fn validate(&self) -> Result<()> {
        self.method.validate()?;
        let info = self.method.info();

        if self.output_mode == OutputMode::AvgCoh {
            if info.id != MethodId::Cohere {
                return Err(ConnError::unsupported(format!(
                    "averaged-coherence output is only available for 'cohere', not '{}'",
                    info.name
                )));
            }
            if self.remove_evoked {
                return Err(ConnError::config(
                    "evoked response removal cannot be combined with averaged-coherence output",
                ));
            }
        }
        if self.symmetric {
            if !info.symmetric {
                return Err(ConnError::config(format!(
                    "'{}' is directed; symmetric storage is not allowed",
                    info.name
                )));
            }
            if self.method.keeps_phase() {
                return Err(ConnError::config(
                    "complex PLV is not symmetric; use measure 'magnitude' with symmetric storage",
                ));
            }
        }
        if let Some([t0, t1]) = self.time_window {
            if !(t0 < t1) {
                return Err(ConnError::config(format!("empty time window [{t0}, {t1}]")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        assert!(ConnectivityOptions::default().validate().is_ok());
        for info in crate::metric::METHODS {
            let opts = ConnectivityOptions::for_method(Method::from_id(info.id));
            assert!(opts.validate().is_ok(), "{} defaults invalid", info.name);
        }
    }

    #[test]
    fn coherence_needs_window_or_resolution() {
        let method = Method::Cohere(CohereParams {
            win_len: None,
            max_freq_res: Some(0.0),
            ..Default::default()
        });
        let err = ConnectivityOptions::for_method(method).validate().unwrap_err();
        assert!(matches!(err, ConnError::Config(_)));

        let method = Method::Cohere(CohereParams {
            win_len: None,
            max_freq_res: Some(1.0),
            ..Default::default()
        });
        assert!(ConnectivityOptions::for_method(method).validate().is_ok());
    }

    #[test]
    fn avgcoh_only_for_cohere() {
        let opts = ConnectivityOptions { output_mode: OutputMode::AvgCoh, ..Default::default() };
        assert!(matches!(opts.validate(), Err(ConnError::Unsupported(_))));

        let opts = ConnectivityOptions {
            method: Method::Cohere(Default::default()),
            output_mode: OutputMode::AvgCoh,
            remove_evoked: true,
            ..Default::default()
        };
        assert!(matches!(opts.validate(), Err(ConnError::Config(_))));
    }

    #[test]
    fn directed_methods_refuse_symmetric_storage() {
        let opts = ConnectivityOptions {
            method: Method::Granger(Default::default()),
            symmetric: true,
            ..Default::default()
        };
        assert!(matches!(opts.validate(), Err(ConnError::Config(_))));

        let opts = ConnectivityOptions {
            method: Method::Plv(PlvParams { measure: PhaseMeasure::None }),
            symmetric: true,
            ..Default::default()
        };
        assert!(opts.validate().is_err());
    }

    #[test]
    fn json_round_trip() {
        let json = r#"{
            "method": {"name": "cohere", "measure": "lcohere2019", "win_len": 2.0},
            "freq_bands": "full",
            "output_mode": "avgcoh"
        }"#;
        let opts: ConnectivityOptions = serde_json::from_str(json).unwrap();
        match opts.method {
            Method::Cohere(p) => {
                assert_eq!(p.measure, CoherenceMeasure::Lcohere2019);
                assert_eq!(p.win_len, Some(2.0));
                assert_eq!(p.overlap, 0.5);
            }
            other => panic!("unexpected method {other:?}"),
        }
        assert_eq!(opts.freq_bands, FreqBands::Full);
        assert_eq!(opts.output_mode, OutputMode::AvgCoh);
        let back: ConnectivityOptions =
            serde_json::from_str(&serde_json::to_string(&opts).unwrap()).unwrap();
        assert_eq!(back, opts);
    }

    #[test]
    fn unit_method_from_json() {
        let m: Method = serde_json::from_str(r#"{"name": "wpli"}"#).unwrap();
        assert_eq!(m, Method::Wpli);
    }
}
