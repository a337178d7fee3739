//! FIR filter design, application and band decomposition.
//!
//! - [`design`]: windowed-sinc band-pass design, matching
//!   `mne.filter.create_filter(phase='zero')`.
//! - [`apply`]: overlap-add zero-phase convolution, matching MNE's
//!   `_overlap_add_filter` / `_1d_overlap_filter`.
//! - [`band`]: band specifications and the [`BandDecomposer`] seam.

pub mod apply;
pub mod band;
pub mod design;

pub use apply::{Padding, apply_fir_zero_phase, filter_1d};
pub use band::{Band, BandDecomposer, FilterOptions, FirBandpass, FreqBands, default_bands};
pub use design::{FirWindow, design_bandpass, firwin, hamming};
