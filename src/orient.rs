//! Orientation reduction for unconstrained sources.
//!
//! Unconstrained source blocks carry `n_comp` consecutive rows per location.
//! After connectivity every group of `n_comp` entries along the source (and
//! target) axis collapses to one value per location.
use ndarray::{Array4, ArrayView1, Axis, Ix4};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConnError, Result};
use crate::tensor::Values;

/// How a group of orientation components becomes one value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrientPolicy {
    /// Signed value of the component with the largest magnitude.
    AbsMax,
    /// Largest value.
    Max,
}

impl OrientPolicy {
    /// `AbsMax` when any value is negative, `Max` otherwise.
    pub fn for_values(values: &Array4<f64>) -> Self {
        if values.iter().any(|&v| v < 0.0) { Self::AbsMax } else { Self::Max }
    }

    fn reduce(self, lane: ArrayView1<'_, f64>) -> f64 {
        match self {
            Self::Max => lane.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            Self::AbsMax => lane
                .iter()
                .copied()
                .fold(0.0_f64, |best, v| if v.abs() > best.abs() { v } else { best }),
        }
    }
}

/// Collapse groups of `n_comp` consecutive entries along `axis`.
pub fn reduce_orientations(
    values: &Array4<f64>,
    axis: Axis,
    n_comp: usize,
    policy: OrientPolicy,
) -> Result<Array4<f64>> {
    if axis.index() > 1 {
        return Err(ConnError::Kernel(format!(
            "orientation reduction applies to the source or target axis, not axis {}",
            axis.index()
        )));
    }
    // Target axis: bring it to the front, reduce, put it back.
    if axis == Axis(1) {
        let swapped = values.view().permuted_axes([1, 0, 2, 3]).to_owned();
        let reduced = reduce_orientations(&swapped, Axis(0), n_comp, policy)?;
        return Ok(reduced.permuted_axes([1, 0, 2, 3]).as_standard_layout().into_owned());
    }
    let n = values.len_of(Axis(0));
    if n_comp == 0 || n % n_comp != 0 {
        return Err(ConnError::shape(format!(
            "{n} rows cannot be grouped by {n_comp} orientations"
        )));
    }
    if n_comp == 1 {
        return Ok(values.clone());
    }
    let (_, n_b, n_t, n_f) = values.dim();
    let mut out = Array4::zeros((n / n_comp, n_b, n_t, n_f));
    for (loc, mut dst) in out.axis_iter_mut(Axis(0)).enumerate() {
        let group = values.slice_axis(Axis(0), (loc * n_comp..(loc + 1) * n_comp).into());
        dst.assign(&group.map_axis(Axis(0), |lane| policy.reduce(lane)));
    }
    Ok(out)
}

/// First name of each orientation group.
pub fn reduce_names(names: &[String], n_comp: usize) -> Vec<String> {
    names.iter().step_by(n_comp.max(1)).cloned().collect()
}

/// Reduce source and target axes of finalized values.
///
/// Complex values never reach this point: the phase family rejects
/// unconstrained sources before computing.
pub fn reduce_values(values: Values<Ix4>, n_comp_src: usize, n_comp_tgt: usize) -> Result<Values<Ix4>> {
    if n_comp_src <= 1 && n_comp_tgt <= 1 {
        return Ok(values);
    }
    let Values::Real(mut v) = values else {
        return Err(ConnError::unsupported("complex values cannot be reduced over orientations"));
    };
    let policy = OrientPolicy::for_values(&v);
    if n_comp_src > 1 {
        v = reduce_orientations(&v, Axis(0), n_comp_src, policy)?;
    }
    if n_comp_tgt > 1 {
        v = reduce_orientations(&v, Axis(1), n_comp_tgt, policy)?;
    }
    debug!(?policy, shape = ?v.dim(), "orientations reduced");
    Ok(Values::Real(v))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn policy_depends_on_sign() {
        let pos = Array4::from_elem((3, 3, 1, 1), 0.5);
        assert_eq!(OrientPolicy::for_values(&pos), OrientPolicy::Max);
        let mut neg = pos.clone();
        neg[[1, 2, 0, 0]] = -0.1;
        assert_eq!(OrientPolicy::for_values(&neg), OrientPolicy::AbsMax);
    }

    #[test]
    fn abs_max_keeps_sign() {
        let v = Array4::from_shape_vec((3, 1, 1, 1), vec![0.2, -0.9, 0.5]).unwrap();
        let r = reduce_orientations(&v, Axis(0), 3, OrientPolicy::AbsMax).unwrap();
        assert_abs_diff_eq!(r[[0, 0, 0, 0]], -0.9);
    }

    #[test]
    fn target_axis_matches_transposed_source_axis() {
        let v = Array4::from_shape_fn((2, 6, 1, 2), |(i, j, _, f)| (i * 7 + j * 3 + f) as f64 % 5.0);
        let by_target = reduce_orientations(&v, Axis(1), 3, OrientPolicy::Max).unwrap();
        assert_eq!(by_target.dim(), (2, 2, 1, 2));
        let t = v.view().permuted_axes([1, 0, 2, 3]).to_owned();
        let by_source = reduce_orientations(&t, Axis(0), 3, OrientPolicy::Max).unwrap();
        for i in 0..2 {
            for j in 0..2 {
                for f in 0..2 {
                    assert_abs_diff_eq!(by_target[[i, j, 0, f]], by_source[[j, i, 0, f]]);
                }
            }
        }
    }

    #[test]
    fn names_take_first_of_group() {
        let names: Vec<String> = ["v1.x", "v1.y", "v1.z", "v2.x", "v2.y", "v2.z"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(reduce_names(&names, 3), vec!["v1.x".to_string(), "v2.x".to_string()]);
    }

    #[test]
    fn rows_must_group_evenly() {
        let v = Array4::zeros((4, 1, 1, 1));
        assert!(reduce_orientations(&v, Axis(0), 3, OrientPolicy::Max).is_err());
    }
}
