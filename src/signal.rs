//! Loaded signal blocks and the trial containers fed to the metric engine.
use std::borrow::Cow;

use ndarray::{Array2, ArrayView1};
use serde::{Deserialize, Serialize};

use crate::error::{ConnError, Result};
use crate::scout::Scout;

/// What a block's rows represent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataKind {
    /// Sensor recordings (EEG/MEG channels).
    #[default]
    Recordings,
    /// Source estimates (one or three rows per location).
    Sources,
    /// Region signals already reduced from sources.
    Scouts,
    /// Any other row-by-time matrix.
    Matrix,
}

/// A multichannel time-series segment `[rows × time]` with its metadata.
///
/// When `kernel` is set the block is in *kernel representation*: `data`
/// holds sensor recordings `[sensors × time]` and the logical rows are
/// `kernel · data`. [`SignalBlock::full_data`] materializes them.
#[derive(Debug, Clone)]
pub struct SignalBlock {
    pub data: Array2<f64>,
    /// Sample times in seconds, one per column of `data`.
    pub time: Vec<f64>,
    pub kind: DataKind,
    /// Rows per location: 1 for scalar rows, 3 for unconstrained sources.
    pub n_components: usize,
    pub row_names: Vec<String>,
    /// Surface / atlas file the rows refer to.
    pub geometry: Option<String>,
    /// Rows flagged as bad by the acquisition.
    pub bad_rows: Vec<usize>,
    /// Free-text description, e.g. `"Trial (#3)"`.
    pub comment: String,
    /// Number of trials folded into this block (concatenation).
    pub n_trials: usize,
    /// Scouts retained for aggregation after connectivity.
    pub scouts: Vec<Scout>,
    /// Imaging kernel `[rows × sensors]`.
    pub kernel: Option<Array2<f64>>,
}

impl SignalBlock {
    /// Build a scalar recording block. Fails if the time axis does not match
    /// the data or has fewer than two samples.
    pub fn new(data: Array2<f64>, time: Vec<f64>) -> Result<Self> {
        if time.len() != data.ncols() {
            return Err(ConnError::shape(format!(
                "time axis has {} samples, data has {} columns",
                time.len(),
                data.ncols()
            )));
        }
        if time.len() < 2 {
            return Err(ConnError::shape("a signal block needs at least two time samples"));
        }
        let n = data.nrows();
        Ok(Self {
            data,
            time,
            kind: DataKind::Recordings,
            n_components: 1,
            row_names: (1..=n).map(|i| i.to_string()).collect(),
            geometry: None,
            bad_rows: Vec::new(),
            comment: String::new(),
            n_trials: 1,
            scouts: Vec::new(),
            kernel: None,
        })
    }

    /// Build a block from a sampling rate and a start time.
    pub fn from_sfreq(data: Array2<f64>, sfreq: f64, t0: f64) -> Result<Self> {
        let time = (0..data.ncols()).map(|i| t0 + i as f64 / sfreq).collect();
        Self::new(data, time)
    }

    pub fn with_kind(mut self, kind: DataKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_row_names(mut self, names: Vec<String>) -> Result<Self> {
        if names.len() != self.n_rows() {
            return Err(ConnError::shape(format!(
                "{} row names for {} rows",
                names.len(),
                self.n_rows()
            )));
        }
        self.row_names = names;
        Ok(self)
    }

    /// Declare `n` orientation components per location.
    pub fn with_components(mut self, n: usize) -> Result<Self> {
        if n == 0 || self.n_rows() % n != 0 {
            return Err(ConnError::shape(format!(
                "orientation count {n} does not divide {} rows",
                self.n_rows()
            )));
        }
        self.n_components = n;
        Ok(self)
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = comment.into();
        self
    }

    /// Attach an imaging kernel; `data` becomes the sensor recordings.
    pub fn with_kernel(mut self, kernel: Array2<f64>) -> Result<Self> {
        if kernel.ncols() != self.data.nrows() {
            return Err(ConnError::shape(format!(
                "kernel expects {} sensors, recordings have {}",
                kernel.ncols(),
                self.data.nrows()
            )));
        }
        let n = kernel.nrows();
        self.kernel = Some(kernel);
        self.n_components = 1;
        self.row_names = (1..=n).map(|i| i.to_string()).collect();
        Ok(self)
    }

    /// Logical row count (kernel rows in kernel representation).
    pub fn n_rows(&self) -> usize {
        match &self.kernel {
            Some(k) => k.nrows(),
            None => self.data.nrows(),
        }
    }

    pub fn n_times(&self) -> usize {
        self.time.len()
    }

    /// Sampling rate from the first time step.
    pub fn sfreq(&self) -> f64 {
        1.0 / (self.time[1] - self.time[0])
    }

    /// Number of locations (rows / orientation components).
    pub fn n_locations(&self) -> usize {
        self.n_rows() / self.n_components
    }

    pub fn is_unconstrained(&self) -> bool {
        self.n_components > 1
    }

    /// Logical rows as a matrix, multiplying out the kernel if any.
    pub fn full_data(&self) -> Cow<'_, Array2<f64>> {
        match &self.kernel {
            Some(k) => Cow::Owned(k.dot(&self.data)),
            None => Cow::Borrowed(&self.data),
        }
    }

    /// Drop the kernel representation.
    pub fn materialize(mut self) -> Self {
        if let Some(k) = self.kernel.take() {
            self.data = k.dot(&self.data);
        }
        self
    }

    pub fn row(&self, i: usize) -> ArrayView1<'_, f64> {
        self.data.row(i)
    }

    /// Check the invariants a hand-assembled block must hold.
    pub fn validate(&self) -> Result<()> {
        if self.time.len() != self.data.ncols() {
            return Err(ConnError::shape(format!(
                "time axis has {} samples, data has {} columns",
                self.time.len(),
                self.data.ncols()
            )));
        }
        if self.time.len() < 2 {
            return Err(ConnError::shape("a signal block needs at least two time samples"));
        }
        if self.n_components == 0 || self.n_rows() % self.n_components != 0 {
            return Err(ConnError::shape(format!(
                "orientation count {} does not divide {} rows",
                self.n_components,
                self.n_rows()
            )));
        }
        if self.row_names.len() != self.n_rows() {
            return Err(ConnError::shape(format!(
                "{} row names for {} rows",
                self.row_names.len(),
                self.n_rows()
            )));
        }
        Ok(())
    }
}

/// Source block plus an optional distinct target block.
///
/// `target == None` means the target rows are the source rows.
#[derive(Debug, Clone)]
pub struct BlockPair {
    pub source: SignalBlock,
    pub target: Option<SignalBlock>,
}

impl BlockPair {
    pub fn same(source: SignalBlock) -> Self {
        Self { source, target: None }
    }

    pub fn new(source: SignalBlock, target: SignalBlock) -> Self {
        Self { source, target: Some(target) }
    }

    pub fn target(&self) -> &SignalBlock {
        self.target.as_ref().unwrap_or(&self.source)
    }

    pub fn is_same(&self) -> bool {
        self.target.is_none()
    }
}

/// Finite, non-restartable lazy sequence of trials.
///
/// Each call to `next` loads one trial. Used when every trial must reach the
/// estimator un-mixed (averaged coherence).
pub struct TrialSeq<'a> {
    inner: Box<dyn Iterator<Item = Result<BlockPair>> + 'a>,
    len: usize,
}

impl<'a> TrialSeq<'a> {
    pub fn new<I>(len: usize, iter: I) -> Self
    where
        I: Iterator<Item = Result<BlockPair>> + 'a,
    {
        Self { inner: Box::new(iter.take(len)), len }
    }

    /// Wrap already-loaded trials.
    pub fn from_pairs(pairs: Vec<BlockPair>) -> Self {
        let len = pairs.len();
        Self::new(len, pairs.into_iter().map(Ok))
    }

    /// Number of trials the sequence was created with.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl Iterator for TrialSeq<'_> {
    type Item = Result<BlockPair>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next()
    }
}

/// What the aggregator hands to the engine: one analysis unit, or a lazy
/// list of trials.
pub enum Trials<'a> {
    Single(BlockPair),
    List(TrialSeq<'a>),
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn sfreq_from_time_axis() {
        let b = SignalBlock::from_sfreq(Array2::zeros((2, 10)), 250.0, -0.1).unwrap();
        approx::assert_abs_diff_eq!(b.sfreq(), 250.0, epsilon = 1e-9);
        approx::assert_abs_diff_eq!(b.time[0], -0.1, epsilon = 1e-12);
    }

    #[test]
    fn single_sample_is_rejected() {
        let err = SignalBlock::new(Array2::zeros((2, 1)), vec![0.0]).unwrap_err();
        assert!(matches!(err, ConnError::ShapeMismatch(_)));
    }

    #[test]
    fn components_must_divide_rows() {
        let b = SignalBlock::from_sfreq(Array2::zeros((4, 10)), 100.0, 0.0).unwrap();
        assert!(b.clone().with_components(3).is_err());
        assert_eq!(b.with_components(2).unwrap().n_locations(), 2);
    }

    #[test]
    fn kernel_rows_are_logical_rows() {
        let rec = Array2::from_shape_fn((2, 5), |(c, t)| (c + t) as f64);
        let kernel = Array2::from_shape_fn((3, 2), |(r, c)| if r == c { 1.0 } else { 0.5 });
        let b = SignalBlock::from_sfreq(rec, 100.0, 0.0).unwrap().with_kernel(kernel).unwrap();
        assert_eq!(b.n_rows(), 3);
        let full = b.full_data();
        assert_eq!(full.dim(), (3, 5));
        // row 2 = 0.5 * (rec0 + rec1)
        approx::assert_abs_diff_eq!(full[[2, 1]], 0.5 * (1.0 + 2.0), epsilon = 1e-12);
    }

    #[test]
    fn trial_seq_is_lazy_and_finite() {
        use std::cell::Cell;
        let loads = Cell::new(0);
        let seq = TrialSeq::new(
            3,
            (0..).map(|_| {
                loads.set(loads.get() + 1);
                SignalBlock::from_sfreq(Array2::zeros((1, 4)), 10.0, 0.0).map(BlockPair::same)
            }),
        );
        assert_eq!(loads.get(), 0);
        assert_eq!(seq.count(), 3);
        assert_eq!(loads.get(), 3);
    }
}
