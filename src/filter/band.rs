//! Frequency bands and the band-pass decomposer used by band-limited metrics.
use std::fmt;
use std::str::FromStr;

use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::trace;

use super::apply::{Padding, apply_fir_zero_phase};
use super::design::{FirWindow, design_bandpass};
use crate::error::{ConnError, Result};

/// A named frequency band `[low, high]` Hz.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Band {
    pub name: String,
    pub low: f64,
    pub high: f64,
}

impl Band {
    pub fn new(name: impl Into<String>, low: f64, high: f64) -> Self {
        Self { name: name.into(), low, high }
    }

    /// The whole spectrum `[0, nyquist]`; never filtered.
    pub fn broadband(sfreq: f64) -> Self {
        Self::new("broadband", 0.0, sfreq / 2.0)
    }

    pub fn center(&self) -> f64 {
        (self.low + self.high) / 2.0
    }

    fn is_broadband(&self, sfreq: f64) -> bool {
        self.low <= 0.0 && self.high >= sfreq / 2.0
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {}, {}", self.name, self.low, self.high)
    }
}

/// Parses `"alpha / 8, 12"`; a trailing `/ function` field is ignored.
impl FromStr for Band {
    type Err = ConnError;

    fn from_str(s: &str) -> Result<Self> {
        let bad = || ConnError::config(format!("cannot parse band '{s}', expected 'name / low, high'"));
        let mut fields = s.split('/').map(str::trim);
        let name = fields.next().filter(|n| !n.is_empty()).ok_or_else(bad)?;
        let range = fields.next().ok_or_else(bad)?;
        let (low, high) = range.split_once(',').ok_or_else(bad)?;
        let low: f64 = low.trim().parse().map_err(|_| bad())?;
        let high: f64 = high.trim().parse().map_err(|_| bad())?;
        Ok(Self::new(name, low, high))
    }
}

/// Classic EEG bands.
pub fn default_bands() -> Vec<Band> {
    vec![
        Band::new("delta", 2.0, 4.0),
        Band::new("theta", 5.0, 7.0),
        Band::new("alpha", 8.0, 12.0),
        Band::new("beta", 15.0, 29.0),
        Band::new("gamma1", 30.0, 59.0),
        Band::new("gamma2", 60.0, 90.0),
    ]
}

/// Band specification for band-limited methods.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FreqBands {
    /// One band covering the whole spectrum, no filtering.
    Full,
    Bands(Vec<Band>),
}

impl Default for FreqBands {
    fn default() -> Self {
        Self::Bands(default_bands())
    }
}

/// Band-pass filter settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterOptions {
    pub window: FirWindow,
    /// Odd-mirror the edges instead of zero padding.
    pub mirror: bool,
}

impl FilterOptions {
    fn padding(&self) -> Padding {
        if self.mirror { Padding::Mirror } else { Padding::Zero }
    }
}

/// Maps a band specification to concrete bounds and band-passes signals.
pub trait BandDecomposer {
    /// Concrete bands for a sampling rate.
    fn bounds(&self, bands: &FreqBands, sfreq: f64) -> Result<Vec<Band>>;

    /// Band-pass every row of `data` (`[rows × time]`).
    fn bandpass(
        &self,
        data: &Array2<f64>,
        sfreq: f64,
        band: &Band,
        opts: &FilterOptions,
    ) -> Result<Array2<f64>>;
}

/// Windowed-sinc FIR band-pass, zero-phase overlap-add.
#[derive(Debug, Clone, Copy, Default)]
pub struct FirBandpass;

impl BandDecomposer for FirBandpass {
    fn bounds(&self, bands: &FreqBands, sfreq: f64) -> Result<Vec<Band>> {
        let nyq = sfreq / 2.0;
        match bands {
            FreqBands::Full => Ok(vec![Band::broadband(sfreq)]),
            FreqBands::Bands(list) if list.is_empty() => {
                Err(ConnError::config("empty frequency band list"))
            }
            FreqBands::Bands(list) => {
                for b in list {
                    if !(b.low >= 0.0 && b.low < b.high) {
                        return Err(ConnError::config(format!(
                            "band '{}' has invalid bounds [{}, {}] Hz",
                            b.name, b.low, b.high
                        )));
                    }
                    if b.high > nyq {
                        return Err(ConnError::config(format!(
                            "band '{}' [{}, {}] Hz exceeds the Nyquist frequency {nyq} Hz",
                            b.name, b.low, b.high
                        )));
                    }
                }
                Ok(list.clone())
            }
        }
    }

    fn bandpass(
        &self,
        data: &Array2<f64>,
        sfreq: f64,
        band: &Band,
        opts: &FilterOptions,
    ) -> Result<Array2<f64>> {
        if band.is_broadband(sfreq) {
            return Ok(data.clone());
        }
        let l_freq = (band.low > 0.0).then_some(band.low);
        let h_freq = (band.high < sfreq / 2.0).then_some(band.high);
        let h = design_bandpass(l_freq, h_freq, sfreq, opts.window).ok_or_else(|| {
            ConnError::Kernel(format!("cannot design a filter for band {band} at {sfreq} Hz"))
        })?;
        trace!(band = %band, taps = h.len(), "band-pass");
        let mut out = data.clone();
        apply_fir_zero_phase(&mut out, &h, opts.padding())?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    #[test]
    fn parse_band_string() {
        let b: Band = "alpha / 8, 12 / mean".parse().unwrap();
        assert_eq!(b, Band::new("alpha", 8.0, 12.0));
        assert!("alpha".parse::<Band>().is_err());
    }

    #[test]
    fn full_is_one_broadband_band() {
        let bands = FirBandpass.bounds(&FreqBands::Full, 200.0).unwrap();
        assert_eq!(bands.len(), 1);
        assert_eq!(bands[0].high, 100.0);
    }

    #[test]
    fn band_above_nyquist_is_rejected() {
        let spec = FreqBands::Bands(vec![Band::new("g", 60.0, 90.0)]);
        assert!(matches!(FirBandpass.bounds(&spec, 100.0), Err(ConnError::Config(_))));
    }

    #[test]
    fn bandpass_keeps_in_band_and_rejects_out_of_band() {
        let sfreq = 256.0;
        let n = 2048;
        let slow = Array2::from_shape_fn((1, n), |(_, t)| (2.0 * PI * 10.0 * t as f64 / sfreq).sin());
        let fast = Array2::from_shape_fn((1, n), |(_, t)| (2.0 * PI * 40.0 * t as f64 / sfreq).sin());
        let alpha = Band::new("alpha", 8.0, 12.0);
        let opts = FilterOptions { mirror: true, ..Default::default() };
        let kept = FirBandpass.bandpass(&slow, sfreq, &alpha, &opts).unwrap();
        let gone = FirBandpass.bandpass(&fast, sfreq, &alpha, &opts).unwrap();
        let rms = |a: &Array2<f64>| {
            let mid = a.slice(ndarray::s![.., 500..1500]);
            (mid.mapv(|v| v * v).mean().unwrap_or(0.0)).sqrt()
        };
        assert!(rms(&kept) > 0.6, "in-band rms {}", rms(&kept));
        assert!(rms(&gone) < 0.02, "out-of-band rms {}", rms(&gone));
    }
}
