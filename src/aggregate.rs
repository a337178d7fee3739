//! Trial aggregation: concatenation, running means, evoked-response removal
//! and comment reconciliation.
use ndarray::{Array2, Axis, concatenate};
use tracing::debug;

use crate::error::{ConnError, Result};
use crate::signal::SignalBlock;
use crate::tensor::RawTensor;

/// Join blocks end-to-end along time.
///
/// Rows (and kernels, for kernel-representation blocks) must agree. The
/// time axis is re-based to a contiguous one starting at the first block's
/// first sample, spaced by the first block's sampling interval. The result
/// records how many trials it holds.
pub fn concatenate_blocks(blocks: Vec<SignalBlock>, files: &[String]) -> Result<SignalBlock> {
    let mut iter = blocks.into_iter();
    let Some(mut first) = iter.next() else {
        return Err(ConnError::config("nothing to concatenate"));
    };
    let name = |i: usize| files.get(i).map(String::as_str).unwrap_or("?");
    let dt = first.time.get(1).map_or(1.0, |t1| t1 - first.time[0]);
    let t0 = first.time.first().copied().unwrap_or(0.0);

    let mut parts = vec![first.data.clone()];
    let mut n_trials = first.n_trials;
    for (k, b) in iter.enumerate() {
        let k = k + 1;
        if b.data.nrows() != first.data.nrows() || b.n_rows() != first.n_rows() {
            return Err(ConnError::shape(format!(
                "'{}' has {} rows, '{}' has {}",
                name(k),
                b.n_rows(),
                name(0),
                first.n_rows()
            )));
        }
        if b.kernel != first.kernel {
            return Err(ConnError::shape(format!(
                "'{}' uses a different imaging kernel than '{}'",
                name(k),
                name(0)
            )));
        }
        n_trials += b.n_trials;
        parts.push(b.data);
    }

    let views: Vec<_> = parts.iter().map(|p| p.view()).collect();
    first.data =
        concatenate(Axis(1), &views).map_err(|e| ConnError::Kernel(format!("concatenation: {e}")))?;
    first.time = (0..first.data.ncols()).map(|i| t0 + i as f64 * dt).collect();
    first.n_trials = n_trials;
    debug!(trials = n_trials, samples = first.data.ncols(), "blocks concatenated");
    Ok(first)
}

/// Running mean of per-trial raw tensors.
///
/// Every contribution is scaled by `1/n` as it is added, in order.
#[derive(Debug, Clone)]
pub struct RunningMean {
    n: usize,
    seen: usize,
    acc: Option<RawTensor>,
}

impl RunningMean {
    /// Mean over `n` expected contributions.
    pub fn new(n: usize) -> Self {
        Self { n: n.max(1), seen: 0, acc: None }
    }

    pub fn add(&mut self, mut t: RawTensor) -> Result<()> {
        let w = 1.0 / self.n as f64;
        match &mut self.acc {
            None => {
                t.scale(w);
                self.acc = Some(t);
            }
            Some(acc) => acc.scaled_add(w, &t)?,
        }
        self.seen += 1;
        Ok(())
    }

    pub fn count(&self) -> usize {
        self.seen
    }

    pub fn finish(self) -> Result<RawTensor> {
        if self.seen != self.n {
            return Err(ConnError::shape(format!(
                "averaged {} of {} expected trials",
                self.seen, self.n
            )));
        }
        self.acc.ok_or_else(|| ConnError::Degenerate("no trial to average".into()))
    }
}

/// Running sum of trial signals for evoked-response removal.
#[derive(Debug, Clone, Default)]
pub struct EvokedAccumulator {
    sum: Option<Array2<f64>>,
    n: usize,
}

impl EvokedAccumulator {
    pub fn add(&mut self, block: &SignalBlock) -> Result<()> {
        match &mut self.sum {
            None => self.sum = Some(block.data.clone()),
            Some(s) => {
                if s.dim() != block.data.dim() {
                    return Err(ConnError::shape(format!(
                        "trial of shape {:?} does not match {:?} for evoked removal",
                        block.data.dim(),
                        s.dim()
                    )));
                }
                *s += &block.data;
            }
        }
        self.n += 1;
        Ok(())
    }

    pub fn finish(self) -> Result<EvokedResponse> {
        let n = self.n as f64;
        let mean = self
            .sum
            .map(|s| s / n)
            .ok_or_else(|| ConnError::config("no trials to compute an evoked response from"))?;
        Ok(EvokedResponse { mean })
    }
}

/// Cross-trial average of the stored signals (kernel representation is
/// averaged on the sensor data).
#[derive(Debug, Clone)]
pub struct EvokedResponse {
    mean: Array2<f64>,
}

impl EvokedResponse {
    pub fn from_blocks<'a>(blocks: impl IntoIterator<Item = &'a SignalBlock>) -> Result<Self> {
        let mut acc = EvokedAccumulator::default();
        for b in blocks {
            acc.add(b)?;
        }
        acc.finish()
    }

    pub fn subtract(&self, block: &mut SignalBlock) -> Result<()> {
        if block.data.dim() != self.mean.dim() {
            return Err(ConnError::shape(format!(
                "trial of shape {:?} does not match evoked response {:?}",
                block.data.dim(),
                self.mean.dim()
            )));
        }
        block.data -= &self.mean;
        Ok(())
    }
}

/// Remove `"(#<digits>)"` trial tags.
pub fn strip_trial_tag(comment: &str) -> String {
    let mut out = String::with_capacity(comment.len());
    let mut rest = comment;
    while let Some(pos) = rest.find("(#") {
        let after = &rest[pos + 2..];
        let digits = after.chars().take_while(char::is_ascii_digit).count();
        if digits > 0 && after[digits..].starts_with(')') {
            out.push_str(&rest[..pos]);
            rest = &after[digits + 1..];
        } else {
            out.push_str(&rest[..pos + 2]);
            rest = after;
        }
    }
    out.push_str(rest);
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Common comment of a batch with trial tags stripped. When the stripped
/// comments disagree, the last trial's comment is returned unchanged.
pub fn reconcile_comments(comments: &[String]) -> String {
    let stripped: Vec<String> = comments.iter().map(|c| strip_trial_tag(c)).collect();
    match stripped.split_first() {
        None => String::new(),
        Some((first, rest)) if rest.iter().all(|c| c == first) => first.clone(),
        Some(_) => comments.last().cloned().unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::Array4;

    fn block(rows: usize, n: usize, t0: f64, fill: f64) -> SignalBlock {
        SignalBlock::from_sfreq(Array2::from_elem((rows, n), fill), 100.0, t0).unwrap()
    }

    #[test]
    fn concatenation_rebases_time() {
        let out = concatenate_blocks(
            vec![block(2, 10, 0.5, 1.0), block(2, 5, 3.0, 2.0)],
            &["a".into(), "b".into()],
        )
        .unwrap();
        assert_eq!(out.data.dim(), (2, 15));
        assert_eq!(out.n_trials, 2);
        assert_abs_diff_eq!(out.time[14], 0.5 + 14.0 * 0.01, epsilon = 1e-9);
        assert_abs_diff_eq!(out.data[[1, 12]], 2.0);
    }

    #[test]
    fn concatenation_names_the_offending_file() {
        let err = concatenate_blocks(
            vec![block(2, 10, 0.0, 1.0), block(3, 10, 0.0, 1.0)],
            &["a.safetensors".into(), "b.safetensors".into()],
        )
        .unwrap_err();
        assert!(err.to_string().contains("b.safetensors"));
    }

    #[test]
    fn running_mean_scales_each_trial() {
        let mut m = RunningMean::new(4);
        for k in 0..4 {
            m.add(RawTensor::Real(Array4::from_elem((1, 1, 1, 1), k as f64))).unwrap();
        }
        let RawTensor::Real(a) = m.finish().unwrap() else { panic!("real expected") };
        assert_abs_diff_eq!(a[[0, 0, 0, 0]], 1.5, epsilon = 1e-12);
    }

    #[test]
    fn evoked_removal_zeroes_identical_trials() {
        let trials = vec![block(2, 10, 0.0, 3.0), block(2, 10, 0.0, 3.0)];
        let evoked = EvokedResponse::from_blocks(&trials).unwrap();
        let mut t = trials[0].clone();
        evoked.subtract(&mut t).unwrap();
        assert!(t.data.iter().all(|&v| v.abs() < 1e-12));
    }

    #[test]
    fn comments_reconcile() {
        let same = vec!["Trial (#1)".to_string(), "Trial (#12)".to_string()];
        assert_eq!(reconcile_comments(&same), "Trial");
        let mixed = vec!["Left (#1)".to_string(), "Right (#2)".to_string()];
        assert_eq!(reconcile_comments(&mixed), "Right (#2)");
        assert_eq!(strip_trial_tag("Avg (#x) (#3) end"), "Avg (#x) end");
    }
}
