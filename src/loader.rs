//! Signal loading contract and the in-memory loader.
//!
//! Every loader resolves a file reference to a stored block and then runs
//! [`select`], which applies the time window, bad-row exclusion, the target
//! selection (rows or scouts) and the full-vs-kernel choice the same way for
//! all storage back ends.
use std::collections::HashMap;

use ndarray::Axis;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConnError, Result};
use crate::scout::{self, Scout, ScoutFunction, ScoutOptions, ScoutTime};
use crate::signal::{DataKind, SignalBlock};

/// Which rows of a file to load.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Target {
    #[default]
    All,
    /// Rows by name (case-insensitive, spaces ignored).
    Rows(Vec<String>),
    Scouts(Vec<Scout>),
}

/// Loader switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LoadOptions {
    /// Exclude rows (or sensors, for kernel blocks) flagged bad.
    pub ignore_bad: bool,
    pub scout: ScoutOptions,
    /// Multiply out imaging kernels instead of keeping the kernel form.
    pub load_full: bool,
}

/// Resolves a file reference to a signal block.
pub trait SignalLoader {
    fn load(
        &self,
        file: &str,
        target: &Target,
        window: Option<[f64; 2]>,
        opts: &LoadOptions,
    ) -> Result<SignalBlock>;
}

impl<L: SignalLoader + ?Sized> SignalLoader for &L {
    fn load(
        &self,
        file: &str,
        target: &Target,
        window: Option<[f64; 2]>,
        opts: &LoadOptions,
    ) -> Result<SignalBlock> {
        (**self).load(file, target, window, opts)
    }
}

/// Loader over blocks kept in memory, keyed by file name.
#[derive(Debug, Clone, Default)]
pub struct MemoryLoader {
    blocks: HashMap<String, SignalBlock>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, file: impl Into<String>, block: SignalBlock) {
        self.blocks.insert(file.into(), block);
    }

    pub fn with(mut self, file: impl Into<String>, block: SignalBlock) -> Self {
        self.insert(file, block);
        self
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}

impl SignalLoader for MemoryLoader {
    fn load(
        &self,
        file: &str,
        target: &Target,
        window: Option<[f64; 2]>,
        opts: &LoadOptions,
    ) -> Result<SignalBlock> {
        let block = self
            .blocks
            .get(file)
            .cloned()
            .ok_or_else(|| ConnError::load(file, "no such file"))?;
        select(block, file, target, window, opts)
    }
}

fn normalize_name(s: &str) -> String {
    s.replace(' ', "").to_lowercase()
}

/// Apply window, bad rows, target selection and representation choice.
pub fn select(
    mut block: SignalBlock,
    file: &str,
    target: &Target,
    window: Option<[f64; 2]>,
    opts: &LoadOptions,
) -> Result<SignalBlock> {
    if let Some([t0, t1]) = window {
        crop_time(&mut block, file, t0, t1)?;
    }
    if opts.ignore_bad && !block.bad_rows.is_empty() {
        drop_bad(&mut block);
    }
    match target {
        Target::All => {}
        Target::Rows(names) => select_rows(&mut block, file, names)?,
        Target::Scouts(scouts) => block = apply_scouts(block, scouts, opts.scout)?,
    }
    if opts.load_full {
        block = block.materialize();
    }
    block.validate().map_err(|e| ConnError::load(file, e.to_string()))?;
    debug!(file, rows = block.n_rows(), times = block.n_times(), "loaded block");
    Ok(block)
}

fn crop_time(block: &mut SignalBlock, file: &str, t0: f64, t1: f64) -> Result<()> {
    // Half a sample of slack so windows given at sample times are inclusive.
    let tol = 0.5 / block.sfreq();
    let keep: Vec<usize> = block
        .time
        .iter()
        .enumerate()
        .filter(|&(_, &t)| t >= t0 - tol && t <= t1 + tol)
        .map(|(i, _)| i)
        .collect();
    if keep.len() < 2 {
        return Err(ConnError::load(
            file,
            format!(
                "time window [{t0}, {t1}] s holds {} sample(s), at least 2 are required",
                keep.len()
            ),
        ));
    }
    block.data = block.data.select(Axis(1), &keep);
    block.time = keep.iter().map(|&i| block.time[i]).collect();
    Ok(())
}

fn drop_bad(block: &mut SignalBlock) {
    if let Some(kernel) = block.kernel.take() {
        // Bad flags refer to sensors in kernel representation.
        let good: Vec<usize> =
            (0..block.data.nrows()).filter(|r| !block.bad_rows.contains(r)).collect();
        block.kernel = Some(kernel.select(Axis(1), &good));
        block.data = block.data.select(Axis(0), &good);
    } else {
        let good: Vec<usize> =
            (0..block.n_rows()).filter(|r| !block.bad_rows.contains(r)).collect();
        block.data = block.data.select(Axis(0), &good);
        block.row_names = good.iter().map(|&r| block.row_names[r].clone()).collect();
    }
    block.bad_rows.clear();
}

fn select_rows(block: &mut SignalBlock, file: &str, names: &[String]) -> Result<()> {
    let mut rows = Vec::new();
    for name in names {
        let wanted = normalize_name(name);
        let found: Vec<usize> = block
            .row_names
            .iter()
            .enumerate()
            .filter(|(_, n)| normalize_name(n) == wanted)
            .map(|(i, _)| i)
            .collect();
        if found.is_empty() {
            return Err(ConnError::load(file, format!("row '{name}' not found")));
        }
        rows.extend(found);
    }
    if rows.len() % block.n_components != 0 {
        return Err(ConnError::load(
            file,
            format!(
                "{} selected rows do not form whole locations of {} components",
                rows.len(),
                block.n_components
            ),
        ));
    }
    take_rows(block, &rows);
    block.row_names = rows.iter().map(|&r| block.row_names[r].clone()).collect();
    Ok(())
}

fn take_rows(block: &mut SignalBlock, rows: &[usize]) {
    if let Some(kernel) = block.kernel.take() {
        // Bad flags stay on the sensors.
        block.kernel = Some(kernel.select(Axis(0), rows));
    } else {
        block.data = block.data.select(Axis(0), rows);
        block.bad_rows = rows
            .iter()
            .enumerate()
            .filter(|(_, r)| block.bad_rows.contains(r))
            .map(|(i, _)| i)
            .collect();
    }
}

fn apply_scouts(block: SignalBlock, scouts: &[Scout], opts: ScoutOptions) -> Result<SignalBlock> {
    let n_comp = block.n_components;
    let members = scout::member_rows(scouts, n_comp);
    let member_names: Vec<String> = scouts
        .iter()
        .flat_map(|s| s.locations.iter().map(move |l| format!("{}.{l}", s.label)))
        .flat_map(|n| std::iter::repeat(n).take(n_comp))
        .collect();
    if let Some(&bad) = members.iter().find(|&&r| r >= block.n_rows()) {
        return Err(ConnError::shape(format!(
            "scout row {bad} out of range for {} rows",
            block.n_rows()
        )));
    }

    match (opts.time, opts.function) {
        (ScoutTime::After, _) | (ScoutTime::Before, ScoutFunction::All) => {
            let mut block = block;
            take_rows(&mut block, &members);
            block.row_names = member_names;
            if opts.time == ScoutTime::After {
                block.scouts = scout::relabel_compact(scouts);
            }
            Ok(block)
        }
        (ScoutTime::Before, function) => {
            // Averaging commutes with the kernel product; other functions do not.
            let mut block = if function == ScoutFunction::Mean { block } else { block.materialize() };
            let names;
            match block.kernel.take() {
                Some(kernel) => {
                    let (k, n) = scout::reduce_signal_rows(kernel.view(), scouts, n_comp, function)?;
                    block.kernel = Some(k);
                    names = n;
                }
                None => {
                    let (d, n) = scout::reduce_signal_rows(block.data.view(), scouts, n_comp, function)?;
                    block.data = d;
                    names = n;
                }
            }
            block.row_names = names;
            block.kind = DataKind::Scouts;
            block.bad_rows.clear();
            Ok(block)
        }
    }
}
