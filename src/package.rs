//! Result packaging: axes, flattening, symmetric storage and comments.
//!
//! A [`ConnectivityResult`] stores its values as `[nPairs × nTime × nFreq]`.
//! Pairs are flattened row-major, `(i, j) → i·nTgt + j`. Symmetric results
//! keep only the lower triangle including the diagonal,
//! `(0,0), (1,0), (1,1), (2,0), (2,1), (2,2), …`.
use ndarray::{Array3, Array4, Ix3, Ix4};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ConnectivityOptions;
use crate::error::{ConnError, Result};
use crate::filter::Band;
use crate::metric::MethodId;
use crate::scout::{Scout, ScoutFunction};
use crate::signal::DataKind;
use crate::tensor::Values;

/// Frequency axis of a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FreqAxis {
    /// One value for the whole spectrum.
    Broadband,
    /// Frequency bins in Hz.
    Bins(Vec<f64>),
    /// Named bands.
    Bands(Vec<Band>),
}

impl FreqAxis {
    pub fn len(&self) -> usize {
        match self {
            Self::Broadband => 1,
            Self::Bins(f) => f.len(),
            Self::Bands(b) => b.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// One representative frequency per entry (band centres for bands, 0
    /// for broadband).
    pub fn centers(&self) -> Vec<f64> {
        match self {
            Self::Broadband => vec![0.0],
            Self::Bins(f) => f.clone(),
            Self::Bands(b) => b.iter().map(Band::center).collect(),
        }
    }
}

/// Time axis of a result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeAxis {
    /// Static result computed over `[t0, t_end]`.
    Span(f64, f64),
    /// One value per listed time.
    Samples(Vec<f64>),
}

impl TimeAxis {
    pub fn len(&self) -> usize {
        match self {
            Self::Span(..) => 1,
            Self::Samples(t) => t.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn values(&self) -> Vec<f64> {
        match self {
            Self::Span(t0, t1) => vec![*t0, *t1],
            Self::Samples(t) => t.clone(),
        }
    }
}

/// Scouts a result was aggregated over.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoutSummary {
    pub function: ScoutFunction,
    pub source: Vec<Scout>,
    pub target: Vec<Scout>,
}

/// One packaged connectivity result.
#[derive(Debug, Clone)]
pub struct ConnectivityResult {
    /// `[nPairs × nTime × nFreq]`
    pub tf: Values<Ix3>,
    /// `tf` holds the packed lower triangle.
    pub is_symmetric: bool,
    pub method: MethodId,
    pub comment: String,
    pub source_names: Vec<String>,
    pub target_names: Vec<String>,
    pub time: TimeAxis,
    pub freqs: FreqAxis,
    /// Number of trials folded into the result.
    pub n_avg: usize,
    pub scouts: Option<ScoutSummary>,
    pub geometry: Option<String>,
    pub data_kind: DataKind,
    /// Options the result was computed with.
    pub options: ConnectivityOptions,
    /// Non-fatal messages gathered while computing.
    pub messages: Vec<String>,
}

impl ConnectivityResult {
    pub fn n_pairs(&self) -> usize {
        self.tf.shape()[0]
    }

    /// Values as `[nSrc × nTgt × nTime × nFreq]`, unpacking symmetric storage.
    pub fn matrix(&self) -> Result<Values<Ix4>> {
        if self.is_symmetric {
            expand_symmetric(&self.tf, self.source_names.len())
        } else {
            unflatten(&self.tf, self.source_names.len(), self.target_names.len())
        }
    }

    /// Value of pair `(i, j)` at `(t, f)`, real results only.
    pub fn get(&self, i: usize, j: usize, t: usize, f: usize) -> Option<f64> {
        let k = if self.is_symmetric {
            let (hi, lo) = if i >= j { (i, j) } else { (j, i) };
            tri_index(hi, lo)
        } else {
            i * self.target_names.len() + j
        };
        self.tf.as_real().and_then(|a| a.get([k, t, f]).copied())
    }
}

/// Position of `(i, j)`, `i >= j`, in the packed lower triangle.
fn tri_index(i: usize, j: usize) -> usize {
    i * (i + 1) / 2 + j
}

fn flatten_with<T: Clone>(a: &Array4<T>) -> Array3<T> {
    let (s, t, n_t, n_f) = a.dim();
    Array3::from_shape_fn((s * t, n_t, n_f), |(k, tt, f)| a[[k / t, k % t, tt, f]].clone())
}

fn pack_with<T: Clone>(a: &Array4<T>) -> Array3<T> {
    let (n, _, n_t, n_f) = a.dim();
    let pairs: Vec<(usize, usize)> = (0..n).flat_map(|i| (0..=i).map(move |j| (i, j))).collect();
    Array3::from_shape_fn((pairs.len(), n_t, n_f), |(k, tt, f)| {
        let (i, j) = pairs[k];
        a[[i, j, tt, f]].clone()
    })
}

/// `[nSrc × nTgt × nT × nF]` → `[nSrc·nTgt × nT × nF]`.
pub fn flatten(values: &Values<Ix4>) -> Values<Ix3> {
    match values {
        Values::Real(a) => Values::Real(flatten_with(a)),
        Values::Complex(a) => Values::Complex(flatten_with(a)),
    }
}

fn unflatten(tf: &Values<Ix3>, n_src: usize, n_tgt: usize) -> Result<Values<Ix4>> {
    let n_pairs = tf.shape()[0];
    if n_pairs != n_src * n_tgt {
        return Err(ConnError::shape(format!(
            "{n_pairs} pairs cannot be laid out as {n_src} × {n_tgt}"
        )));
    }
    let (n_t, n_f) = (tf.shape()[1], tf.shape()[2]);
    let shape = (n_src, n_tgt, n_t, n_f);
    Ok(match tf {
        Values::Real(a) => Values::Real(Array4::from_shape_fn(shape, |(i, j, t, f)| a[[i * n_tgt + j, t, f]])),
        Values::Complex(a) => {
            Values::Complex(Array4::from_shape_fn(shape, |(i, j, t, f)| a[[i * n_tgt + j, t, f]]))
        }
    })
}

/// Pack a square `[n × n × nT × nF]` tensor into its lower triangle
/// (diagonal included).
pub fn compress_symmetric(values: &Values<Ix4>) -> Result<Values<Ix3>> {
    let shape = values.shape();
    if shape[0] != shape[1] {
        return Err(ConnError::shape(format!(
            "symmetric storage needs a square matrix, got {} × {}",
            shape[0], shape[1]
        )));
    }
    Ok(match values {
        Values::Real(a) => Values::Real(pack_with(a)),
        Values::Complex(a) => Values::Complex(pack_with(a)),
    })
}

fn unpack_with<T: Clone>(a: &Array3<T>, n: usize) -> Array4<T> {
    let (_, n_t, n_f) = a.dim();
    Array4::from_shape_fn((n, n, n_t, n_f), |(i, j, t, f)| {
        let k = if i >= j { tri_index(i, j) } else { tri_index(j, i) };
        a[[k, t, f]].clone()
    })
}

/// Inverse of [`compress_symmetric`].
pub fn expand_symmetric(tf: &Values<Ix3>, n: usize) -> Result<Values<Ix4>> {
    let n_pairs = tf.shape()[0];
    if n_pairs != n * (n + 1) / 2 {
        return Err(ConnError::shape(format!(
            "{n_pairs} packed pairs do not form the lower triangle of a {n} × {n} matrix"
        )));
    }
    Ok(match tf {
        Values::Real(a) => Values::Real(unpack_with(a, n)),
        Values::Complex(a) => Values::Complex(unpack_with(a, n)),
    })
}

/// Everything the packager needs besides the values.
#[derive(Debug, Clone)]
pub struct ResultMeta {
    pub method_comment: String,
    /// Comment of the input block (already reconciled for batches).
    pub input_comment: String,
    pub freqs: FreqAxis,
    pub time: TimeAxis,
    pub source_names: Vec<String>,
    pub target_names: Vec<String>,
    pub n_avg: usize,
    pub scouts: Option<ScoutSummary>,
    pub geometry: Option<String>,
    pub data_kind: DataKind,
    pub messages: Vec<String>,
}

/// `"<method>: <input>"`, with `" (<n> trials)"` for batches of several
/// trials.
pub fn result_comment(method: &str, input: &str, n_trials: Option<usize>) -> String {
    let mut c = if input.is_empty() { method.to_string() } else { format!("{method}: {input}") };
    if let Some(n) = n_trials.filter(|&n| n > 1) {
        c.push_str(&format!(" ({n} trials)"));
    }
    c
}

/// Build the stored result from finalized `[nSrc × nTgt × nT × nF]` values.
pub fn package(
    values: Values<Ix4>,
    meta: ResultMeta,
    opts: &ConnectivityOptions,
    batch_trials: Option<usize>,
) -> Result<ConnectivityResult> {
    let shape = values.shape().to_vec();
    if shape[0] != meta.source_names.len() || shape[1] != meta.target_names.len() {
        return Err(ConnError::shape(format!(
            "values are {} × {} but there are {} source and {} target names",
            shape[0],
            shape[1],
            meta.source_names.len(),
            meta.target_names.len()
        )));
    }
    let tf = if opts.symmetric {
        if meta.source_names != meta.target_names {
            return Err(ConnError::config(
                "symmetric storage requires identical source and target rows",
            ));
        }
        compress_symmetric(&values)?
    } else {
        flatten(&values)
    };

    let comment = result_comment(&meta.method_comment, &meta.input_comment, batch_trials);
    debug!(pairs = tf.shape()[0], symmetric = opts.symmetric, %comment, "packaged result");
    Ok(ConnectivityResult {
        tf,
        is_symmetric: opts.symmetric,
        method: opts.method.id(),
        comment,
        source_names: meta.source_names,
        target_names: meta.target_names,
        time: meta.time,
        freqs: meta.freqs,
        n_avg: meta.n_avg,
        scouts: meta.scouts,
        geometry: meta.geometry,
        data_kind: meta.data_kind,
        options: opts.clone(),
        messages: meta.messages,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn symmetric(n: usize) -> Array4<f64> {
        Array4::from_shape_fn((n, n, 2, 1), |(i, j, t, _)| (i + j) as f64 + 10.0 * t as f64 + (i * j) as f64)
    }

    #[test]
    fn lower_triangle_order() {
        let a = Values::Real(symmetric(3));
        let packed = compress_symmetric(&a).unwrap();
        let p = packed.as_real().unwrap();
        assert_eq!(p.dim(), (6, 2, 1));
        // (0,0) (1,0) (1,1) (2,0) (2,1) (2,2)
        let expected = [0.0, 1.0, 3.0, 2.0, 5.0, 8.0];
        for (k, e) in expected.iter().enumerate() {
            assert_abs_diff_eq!(p[[k, 0, 0]], *e);
        }
    }

    #[test]
    fn expand_inverts_compress() {
        let a = Values::Real(symmetric(4));
        let back = expand_symmetric(&compress_symmetric(&a).unwrap(), 4).unwrap();
        assert_eq!(back, a);
    }

    #[test]
    fn wrong_pair_count_is_rejected() {
        let tf = Values::Real(Array3::zeros((5, 1, 1)));
        assert!(matches!(expand_symmetric(&tf, 3), Err(ConnError::ShapeMismatch(_))));
    }

    #[test]
    fn comments() {
        assert_eq!(result_comment("Corr", "Avg: rest", Some(4)), "Corr: Avg: rest (4 trials)");
        assert_eq!(result_comment("PLV", "", None), "PLV");
        assert_eq!(result_comment("PLV", "run", Some(1)), "PLV: run");
    }

    #[test]
    fn symmetric_needs_identical_labels() {
        let opts = ConnectivityOptions { symmetric: true, ..Default::default() };
        let meta = ResultMeta {
            method_comment: "Corr".into(),
            input_comment: String::new(),
            freqs: FreqAxis::Broadband,
            time: TimeAxis::Span(0.0, 1.0),
            source_names: vec!["a".into(), "b".into()],
            target_names: vec!["a".into(), "c".into()],
            n_avg: 1,
            scouts: None,
            geometry: None,
            data_kind: DataKind::default(),
            messages: Vec::new(),
        };
        let values = Values::Real(Array4::zeros((2, 2, 1, 1)));
        assert!(matches!(package(values, meta, &opts, None), Err(ConnError::Config(_))));
    }

    #[test]
    fn flattened_pairs_are_row_major() {
        let a = Array4::from_shape_fn((2, 3, 1, 1), |(i, j, _, _)| (10 * i + j) as f64);
        let tf = flatten(&Values::Real(a));
        let p = tf.as_real().unwrap();
        assert_abs_diff_eq!(p[[4, 0, 0]], 11.0);
    }
}
