//! Scouts: named groups of locations reduced to one value per region.
//!
//! A scout lists *location* indices. For scalar data a location is a row;
//! for unconstrained sources location `l` spans rows
//! `l·n_comp .. (l+1)·n_comp`.
//!
//! Reduction happens either on the signals before connectivity
//! ([`reduce_signal_rows`], called by the loaders) or on the connectivity
//! values afterwards ([`ScoutAggregator`], called by the packager).
use ndarray::{Array, Array2, Array4, ArrayView1, ArrayView2, ArrayD, Axis, Dimension, RemoveAxis};
use serde::{Deserialize, Serialize};

use crate::error::{ConnError, Result};

/// A named region of interest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scout {
    pub label: String,
    /// Location indices (vertices for sources, rows for sensors).
    pub locations: Vec<usize>,
}

impl Scout {
    pub fn new(label: impl Into<String>, locations: Vec<usize>) -> Self {
        Self { label: label.into(), locations }
    }
}

/// How the member signals of a scout are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoutFunction {
    #[default]
    Mean,
    /// Signed value with the largest magnitude.
    Max,
    /// Sample standard deviation (n − 1).
    Std,
    /// No reduction: every member is kept as its own row.
    All,
}

impl ScoutFunction {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mean => "mean",
            Self::Max => "max",
            Self::Std => "std",
            Self::All => "all",
        }
    }

    fn reduce(self, lane: ArrayView1<'_, f64>) -> f64 {
        match self {
            Self::Mean | Self::All => lane.mean().unwrap_or(0.0),
            Self::Max => lane
                .iter()
                .copied()
                .fold(0.0_f64, |best, v| if v.abs() > best.abs() { v } else { best }),
            Self::Std => {
                let n = lane.len();
                if n < 2 {
                    return 0.0;
                }
                let m = lane.mean().unwrap_or(0.0);
                let ss: f64 = lane.iter().map(|&v| (v - m) * (v - m)).sum();
                (ss / (n - 1) as f64).sqrt()
            }
        }
    }
}

/// Whether scouts are reduced on the signals or on the connectivity values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScoutTime {
    #[default]
    Before,
    After,
}

/// Scout handling requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoutOptions {
    pub function: ScoutFunction,
    pub time: ScoutTime,
}

/// Rows of one output group along the reduced axis.
struct Group {
    label: String,
    rows: Vec<usize>,
    member_names: Vec<String>,
}

/// Expand scouts into row groups, one per scout (and per orientation
/// component when `n_comp > 1`).
fn groups_for(scouts: &[Scout], n_comp: usize, n_rows: usize) -> Result<Vec<Group>> {
    let mut groups = Vec::with_capacity(scouts.len() * n_comp);
    for scout in scouts {
        if scout.locations.is_empty() {
            return Err(ConnError::config(format!("scout '{}' has no locations", scout.label)));
        }
        for k in 0..n_comp {
            let rows: Vec<usize> = scout.locations.iter().map(|&l| l * n_comp + k).collect();
            if let Some(&bad) = rows.iter().find(|&&r| r >= n_rows) {
                return Err(ConnError::shape(format!(
                    "scout '{}' references row {bad}, block has {n_rows} rows",
                    scout.label
                )));
            }
            let member_names = scout
                .locations
                .iter()
                .map(|l| format!("{}.{l}", scout.label))
                .collect();
            groups.push(Group { label: scout.label.clone(), rows, member_names });
        }
    }
    Ok(groups)
}

fn reduce_groups<D>(
    arr: &Array<f64, D>,
    axis: Axis,
    groups: &[Group],
    function: ScoutFunction,
) -> Result<(Array<f64, D>, Vec<String>)>
where
    D: Dimension + RemoveAxis,
{
    let mut parts: Vec<ArrayD<f64>> = Vec::with_capacity(groups.len());
    let mut names = Vec::new();
    for g in groups {
        let sub = arr.select(axis, &g.rows);
        match function {
            ScoutFunction::All => {
                names.extend(g.member_names.iter().cloned());
                parts.push(sub.into_dyn());
            }
            f => {
                let reduced = sub.map_axis(axis, |lane| f.reduce(lane));
                names.push(g.label.clone());
                parts.push(reduced.insert_axis(axis).into_dyn());
            }
        }
    }
    let views: Vec<_> = parts.iter().map(|p| p.view()).collect();
    let joined = ndarray::concatenate(axis, &views)
        .map_err(|e| ConnError::Kernel(format!("scout concatenation: {e}")))?;
    let out = joined
        .into_dimensionality::<D>()
        .map_err(|e| ConnError::Kernel(format!("scout reshape: {e}")))?;
    Ok((out, names))
}

/// Reduce the rows of a `[rows × time]` signal to one row per scout (per
/// orientation component). Returns the reduced data and its row names.
pub fn reduce_signal_rows(
    data: ArrayView2<'_, f64>,
    scouts: &[Scout],
    n_comp: usize,
    function: ScoutFunction,
) -> Result<(Array2<f64>, Vec<String>)> {
    let groups = groups_for(scouts, n_comp, data.nrows())?;
    reduce_groups(&data.to_owned(), Axis(0), &groups, function)
}

/// Row indices (in scout order) covering every member of every scout,
/// expanded over orientation components. Used when reduction is deferred
/// until after connectivity.
pub fn member_rows(scouts: &[Scout], n_comp: usize) -> Vec<usize> {
    scouts
        .iter()
        .flat_map(|s| s.locations.iter())
        .flat_map(|&l| (0..n_comp).map(move |k| l * n_comp + k))
        .collect()
}

/// Re-index scouts onto a block that holds only their members, in scout
/// order (the layout produced by [`member_rows`]).
pub fn relabel_compact(scouts: &[Scout]) -> Vec<Scout> {
    let mut next = 0;
    scouts
        .iter()
        .map(|s| {
            let locations = (next..next + s.locations.len()).collect();
            next += s.locations.len();
            Scout::new(s.label.clone(), locations)
        })
        .collect()
}

/// Reduces connectivity rows to scouts after computation.
pub trait ScoutAggregator {
    /// Collapse `axis` (0 = source, 1 = target) of `values` by `scouts`.
    fn aggregate(
        &self,
        values: &Array4<f64>,
        axis: Axis,
        scouts: &[Scout],
        function: ScoutFunction,
    ) -> Result<(Array4<f64>, Vec<String>)>;
}

/// Default aggregator: applies the scout function across member rows.
#[derive(Debug, Clone, Copy, Default)]
pub struct RowAggregator;

impl ScoutAggregator for RowAggregator {
    fn aggregate(
        &self,
        values: &Array4<f64>,
        axis: Axis,
        scouts: &[Scout],
        function: ScoutFunction,
    ) -> Result<(Array4<f64>, Vec<String>)> {
        let groups = groups_for(scouts, 1, values.len_of(axis))?;
        reduce_groups(values, axis, &groups, function)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn mean_before_connectivity() {
        let data = array![[1.0, 2.0], [3.0, 4.0], [10.0, 10.0]];
        let scouts = [Scout::new("A", vec![0, 1]), Scout::new("B", vec![2])];
        let (out, names) =
            reduce_signal_rows(data.view(), &scouts, 1, ScoutFunction::Mean).unwrap();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(out, array![[2.0, 3.0], [10.0, 10.0]]);
    }

    #[test]
    fn max_keeps_sign_of_largest_magnitude() {
        let data = array![[1.0], [-5.0], [3.0]];
        let scouts = [Scout::new("A", vec![0, 1, 2])];
        let (out, _) = reduce_signal_rows(data.view(), &scouts, 1, ScoutFunction::Max).unwrap();
        assert_eq!(out[[0, 0]], -5.0);
    }

    #[test]
    fn unconstrained_scout_keeps_components() {
        // Two locations × 3 components.
        let data = Array2::from_shape_fn((6, 4), |(r, _)| r as f64);
        let scouts = [Scout::new("S", vec![0, 1])];
        let (out, names) =
            reduce_signal_rows(data.view(), &scouts, 3, ScoutFunction::Mean).unwrap();
        assert_eq!(out.nrows(), 3);
        assert_eq!(names, vec!["S", "S", "S"]);
        // component 0: rows 0 and 3.
        assert_eq!(out[[0, 0]], 1.5);
    }

    #[test]
    fn all_keeps_members() {
        let data = array![[1.0], [2.0], [3.0]];
        let scouts = [Scout::new("A", vec![2, 0])];
        let (out, names) = reduce_signal_rows(data.view(), &scouts, 1, ScoutFunction::All).unwrap();
        assert_eq!(out, array![[3.0], [1.0]]);
        assert_eq!(names, vec!["A.2", "A.0"]);
    }

    #[test]
    fn aggregate_target_axis() {
        let values = Array4::from_shape_fn((2, 4, 1, 1), |(_, j, _, _)| j as f64);
        let scouts = [Scout::new("L", vec![0, 1]), Scout::new("R", vec![2, 3])];
        let (out, names) = RowAggregator
            .aggregate(&values, Axis(1), &scouts, ScoutFunction::Mean)
            .unwrap();
        assert_eq!(out.dim(), (2, 2, 1, 1));
        assert_eq!(names, vec!["L", "R"]);
        assert_eq!(out[[1, 1, 0, 0]], 2.5);
    }

    #[test]
    fn out_of_range_location_is_a_shape_error() {
        let data = Array2::<f64>::zeros((2, 3));
        let scouts = [Scout::new("X", vec![5])];
        let err = reduce_signal_rows(data.view(), &scouts, 1, ScoutFunction::Mean).unwrap_err();
        assert!(matches!(err, ConnError::ShapeMismatch(_)));
    }

    #[test]
    fn compact_relabelling() {
        let scouts = [Scout::new("A", vec![7, 9]), Scout::new("B", vec![1])];
        assert_eq!(member_rows(&scouts, 1), vec![7, 9, 1]);
        let compact = relabel_compact(&scouts);
        assert_eq!(compact[0].locations, vec![0, 1]);
        assert_eq!(compact[1].locations, vec![2]);
    }
}
