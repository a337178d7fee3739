//! Error taxonomy for connectivity computation.
//!
//! Every fallible library entry point returns [`Result<T>`]. Only the I/O
//! helpers in [`crate::io`] and the binary use `anyhow`; their failures are
//! folded into [`ConnError::Load`] when they cross the [`crate::SignalLoader`]
//! seam.
use thiserror::Error;

/// Errors raised while configuring, loading or computing connectivity.
#[derive(Error, Debug)]
pub enum ConnError {
    /// Invalid or missing option; raised before any data is loaded.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The method identifier is not one of the supported estimators.
    #[error("unknown connectivity method '{given}' (expected one of: {expected})")]
    UnknownMethod {
        /// The offending identifier.
        given: String,
        /// Comma-separated list of accepted identifiers.
        expected: String,
    },

    /// Inconsistent channel counts, time lengths or kernels across inputs.
    #[error("shape mismatch: {0}")]
    ShapeMismatch(String),

    /// The estimator produced nothing usable (e.g. no frequency bin left).
    #[error("no usable result: {0}")]
    Degenerate(String),

    /// The method cannot be applied to this data representation.
    #[error("unsupported combination: {0}")]
    Unsupported(String),

    /// The signal loader could not produce a block.
    #[error("cannot load '{file}': {reason}")]
    Load {
        /// File reference handed to the loader.
        file: String,
        /// Loader-specific description.
        reason: String,
    },

    /// A result could not be written.
    #[error("cannot save '{path}': {reason}")]
    Save {
        path: String,
        reason: String,
    },

    /// A numeric primitive failed (FFT planning, singular system, …).
    #[error("numeric kernel failed: {0}")]
    Kernel(String),
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, ConnError>;

impl ConnError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub(crate) fn shape(msg: impl Into<String>) -> Self {
        Self::ShapeMismatch(msg.into())
    }

    pub(crate) fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub(crate) fn load(file: &str, reason: impl Into<String>) -> Self {
        Self::Load { file: file.to_string(), reason: reason.into() }
    }

    pub(crate) fn save(path: &std::path::Path, reason: impl Into<String>) -> Self {
        Self::Save { path: path.display().to_string(), reason: reason.into() }
    }
}
