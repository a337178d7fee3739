//! # exg-conn: pairwise connectivity for EEG/MEG in pure Rust
//!
//! `exg-conn` computes connectivity between every row of a source signal
//! block and every row of a target block: sensors, source estimates, scouts
//! or any `[rows × time]` matrix. Results are tensors
//! `[nSource × nTarget × nTime × nFreq]`, packaged with their axes, names
//! and provenance.
//!
//! _No Python, no BLAS, no C libraries. Pure Rust + [ndarray](https://crates.io/crates/ndarray)
//! and [RustFFT](https://crates.io/crates/rustfft)._
//!
//! ## Methods
//!
//! | id          | measure                                         | axis      |
//! |-------------|-------------------------------------------------|-----------|
//! | `corr`      | Pearson correlation                             | broadband |
//! | `cohere`    | MS / imaginary / lagged coherence (Welch)       | bins      |
//! | `granger`   | time-domain Granger causality (VAR)             | broadband |
//! | `spgranger` | spectral Granger causality (Geweke)             | bins      |
//! | `aec`       | amplitude envelope correlation                  | bands     |
//! | `plv`       | phase-locking value                             | bands     |
//! | `ciplv`     | corrected imaginary PLV                         | bands     |
//! | `wpli`      | weighted phase-lag index                        | bands     |
//! | `plvt` `ciplvt` `wplit` | time-resolved PLV family            | bands × t |
//! | `pte`       | phase transfer entropy                          | bands     |
//! | `henv`      | sliding-window envelope connectivity            | bands × t |
//!
//! ## Pipeline overview
//!
//! ```text
//! files ─► SignalLoader ─► evoked removal ─► Trial Aggregator (input / avg / concat / avgcoh)
//!                                                │
//!   MetricEngine ◄───────────────────────────────┘
//!     ├─ BandDecomposer      FIR band-pass per band
//!     ├─ CoherenceEstimator  Welch cross-spectra
//!     ├─ GrangerEstimator    OLS VAR fits
//!     ├─ PhaseTransferEntropy
//!     └─ EnvelopeEstimator
//!        │
//!        └─► finalize ─► orientation reduction ─► scouts ─► ConnectivityResult ─► ResultSink
//! ```
//!
//! ## Quick start
//!
//! ```no_run
//! use exg_conn::{Connectivity, ConnectivityOptions, MemoryLoader, Method, Request, SignalBlock};
//! use ndarray::Array2;
//!
//! let data = Array2::<f64>::zeros((8, 2560)); // [rows, T]
//! let block = SignalBlock::from_sfreq(data, 256.0, 0.0).unwrap();
//! let loader = MemoryLoader::new().with("rest", block);
//!
//! let opts = ConnectivityOptions { symmetric: true, ..ConnectivityOptions::for_method(Method::Wpli) };
//! let results = Connectivity::new(loader)
//!     .run(&Request::new(vec!["rest".into()]), &opts)
//!     .unwrap();
//! println!("{} pairs × {} bands", results[0].n_pairs(), results[0].freqs.len());
//! ```
//!
//! ## Running individual steps
//!
//! ```no_run
//! use exg_conn::{BlockPair, ConnectivityOptions, MetricEngine, SignalBlock};
//! use exg_conn::filter::{FirBandpass, BandDecomposer, Band, FilterOptions};
//! use ndarray::Array2;
//!
//! let data = Array2::<f64>::zeros((4, 1024));
//! let alpha = FirBandpass
//!     .bandpass(&data, 256.0, &Band::new("alpha", 8.0, 12.0), &FilterOptions::default())
//!     .unwrap();
//!
//! let pair = BlockPair::same(SignalBlock::from_sfreq(data, 256.0, 0.0).unwrap());
//! let out = MetricEngine::default().compute(&pair, &ConnectivityOptions::default()).unwrap();
//! assert_eq!(out.raw.dim(), (4, 4, 1, 1));
//! ```

pub mod aggregate;
pub mod config;
pub mod correlation;
pub mod error;
pub mod filter;
pub mod granger;
pub mod henv;
pub mod hilbert;
pub mod io;
pub mod loader;
pub mod metric;
pub mod normalize;
pub mod orient;
pub mod package;
pub mod pipeline;
pub mod progress;
pub mod pte;
pub mod scout;
pub mod signal;
pub mod spectral;
pub mod tensor;

// ── Crate-root re-exports ─────────────────────────────────────────────────
//
// Everything a downstream user is likely to need is available directly as
// `exg_conn::Foo` without having to know the internal module layout.

// config
pub use config::{
    AecParams, CoherenceMeasure, CohereParams, ConnectivityOptions, CorrParams, EnvelopeMeasure,
    GrangerDirection, GrangerParams, HenvParams, Method, OutputMode, PhaseMeasure, PlvParams,
    PteParams, SpGrangerParams,
};

// errors
pub use error::{ConnError, Result};

// filter: bands and band-pass
pub use filter::{Band, BandDecomposer, FilterOptions, FirBandpass, FirWindow, FreqBands};

// signals and loading
pub use loader::{LoadOptions, MemoryLoader, SignalLoader, Target};
pub use signal::{BlockPair, DataKind, SignalBlock, TrialSeq, Trials};
pub use scout::{RowAggregator, Scout, ScoutAggregator, ScoutFunction, ScoutOptions, ScoutTime};

// estimators
pub use granger::{GrangerEstimator, VarGranger};
pub use henv::{EnvelopeEstimator, HilbertEnvelope};
pub use pte::{BinnedPte, PhaseTransferEntropy};
pub use spectral::{CoherenceEstimator, WelchCoherence};

// engine + results
pub use metric::{METHODS, MethodId, MethodInfo, Metric, MetricEngine, MetricOutput};
pub use orient::{OrientPolicy, reduce_orientations};
pub use package::{ConnectivityResult, FreqAxis, TimeAxis, compress_symmetric, expand_symmetric};
pub use tensor::{Finish, RawTensor, Values};

// pipeline
pub use pipeline::{Connectivity, MemorySink, Request, ResultSink};
pub use progress::{LogProgress, NoProgress, ProgressEvent, ProgressSink};
