//! Batch orchestration.
//!
//! ```text
//! files ──► SignalLoader ──► evoked removal ──► Trial Aggregator
//!                                                  │
//!        ┌─────────────────────────────────────────┘
//!        ▼
//!   MetricEngine ──► finalize ──► orientation ──► scouts ──► package ──► ResultSink
//! ```
//!
//! Files are processed one at a time, in input order. Any load, shape or
//! numeric failure aborts the whole batch; nothing is handed to the sink
//! before every result of the batch has been computed.
use std::cell::RefCell;

use ndarray::Axis;
use tracing::info;

use crate::aggregate::{
    EvokedAccumulator, EvokedResponse, RunningMean, concatenate_blocks, reconcile_comments,
};
use crate::config::{ConnectivityOptions, OutputMode};
use crate::error::{ConnError, Result};
use crate::loader::{LoadOptions, SignalLoader, Target};
use crate::metric::{MetricEngine, MetricOutput};
use crate::orient::{reduce_names, reduce_values};
use crate::package::{ConnectivityResult, ResultMeta, ScoutSummary, package};
use crate::progress::{NoProgress, ProgressEvent, ProgressSink};
use crate::scout::{RowAggregator, Scout, ScoutAggregator, ScoutTime};
use crate::signal::{BlockPair, DataKind, SignalBlock, TrialSeq};
use crate::tensor::Values;

/// Which files and rows to connect.
///
/// Without target files every source file is connected with itself (1×N);
/// with target files, source file `i` is connected with target file `i`
/// (N×N).
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Request {
    pub files_a: Vec<String>,
    pub files_b: Option<Vec<String>>,
    pub target_a: Target,
    pub target_b: Target,
}

impl Request {
    pub fn new(files_a: Vec<String>) -> Self {
        Self { files_a, ..Self::default() }
    }

    pub fn with_target_files(mut self, files_b: Vec<String>) -> Self {
        self.files_b = Some(files_b);
        self
    }

    pub fn with_source_rows(mut self, target: Target) -> Self {
        self.target_a = target;
        self
    }

    pub fn with_target_rows(mut self, target: Target) -> Self {
        self.target_b = target;
        self
    }

    fn n_inputs(&self) -> usize {
        self.files_a.len()
    }

    /// Target file `i`, or `None` when the target is read from the source
    /// block itself.
    fn target_file(&self, i: usize) -> Option<&str> {
        match &self.files_b {
            Some(b) => Some(b[i].as_str()),
            None if self.target_b != self.target_a => Some(self.files_a[i].as_str()),
            None => None,
        }
    }

    fn check(&self) -> Result<()> {
        if self.files_a.is_empty() {
            return Err(ConnError::config("no input files"));
        }
        if let Some(b) = &self.files_b {
            if b.len() != self.files_a.len() {
                return Err(ConnError::config(format!(
                    "{} source files but {} target files",
                    self.files_a.len(),
                    b.len()
                )));
            }
        }
        Ok(())
    }
}

/// Where packaged results go.
pub trait ResultSink {
    fn save(&mut self, result: ConnectivityResult) -> Result<()>;
}

/// Keeps results in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    pub results: Vec<ConnectivityResult>,
}

impl ResultSink for MemorySink {
    fn save(&mut self, result: ConnectivityResult) -> Result<()> {
        self.results.push(result);
        Ok(())
    }
}

/// Row layout of one analysis unit, captured before the engine runs.
#[derive(Debug, Clone)]
struct Layout {
    source_names: Vec<String>,
    target_names: Vec<String>,
    source_comp: usize,
    target_comp: usize,
    source_scouts: Vec<Scout>,
    target_scouts: Vec<Scout>,
    geometry: Option<String>,
    kind: DataKind,
}

impl Layout {
    fn of(pair: &BlockPair, target_is_source: bool) -> Self {
        let a = &pair.source;
        let b = if target_is_source { a } else { pair.target() };
        Self {
            source_names: a.row_names.clone(),
            target_names: b.row_names.clone(),
            source_comp: a.n_components,
            target_comp: b.n_components,
            source_scouts: a.scouts.clone(),
            target_scouts: b.scouts.clone(),
            geometry: a.geometry.clone().or_else(|| b.geometry.clone()),
            kind: a.kind,
        }
    }
}

#[derive(Default)]
struct Evoked {
    source: Option<EvokedResponse>,
    target: Option<EvokedResponse>,
}

/// Connectivity pipeline over a signal loader.
pub struct Connectivity<L> {
    loader: L,
    engine: MetricEngine,
    scouts: Box<dyn ScoutAggregator>,
}

impl<L: SignalLoader> Connectivity<L> {
    pub fn new(loader: L) -> Self {
        Self { loader, engine: MetricEngine::default(), scouts: Box::new(RowAggregator) }
    }

    pub fn with_engine(mut self, engine: MetricEngine) -> Self {
        self.engine = engine;
        self
    }

    pub fn with_scout_aggregator(mut self, agg: impl ScoutAggregator + 'static) -> Self {
        self.scouts = Box::new(agg);
        self
    }

    pub fn engine(&self) -> &MetricEngine {
        &self.engine
    }

    /// Run a batch and return its results.
    pub fn run(&self, req: &Request, opts: &ConnectivityOptions) -> Result<Vec<ConnectivityResult>> {
        let mut sink = MemorySink::default();
        self.run_into(req, opts, &mut NoProgress, &mut sink)?;
        Ok(sink.results)
    }

    /// Run a batch, reporting progress, and hand the results to `sink`.
    /// Returns the number of results saved.
    pub fn run_into(
        &self,
        req: &Request,
        opts: &ConnectivityOptions,
        progress: &mut dyn ProgressSink,
        sink: &mut dyn ResultSink,
    ) -> Result<usize> {
        opts.validate()?;
        req.check()?;
        let n_outputs = if opts.output_mode == OutputMode::Input { req.n_inputs() } else { 1 };
        let method = opts.method.info().name;
        info!(method, inputs = req.n_inputs(), mode = ?opts.output_mode, "connectivity batch");
        progress.report(ProgressEvent::Started { method, n_outputs });

        let evoked = if opts.remove_evoked { self.evoked(req, opts, progress)? } else { Evoked::default() };
        let results = match opts.output_mode {
            OutputMode::Input => self.per_input(req, opts, &evoked, progress)?,
            OutputMode::Avg => vec![self.averaged(req, opts, &evoked, progress)?],
            OutputMode::Concat => vec![self.concatenated(req, opts, &evoked, progress)?],
            OutputMode::AvgCoh => vec![self.averaged_coherence(req, opts, progress)?],
        };

        let n = results.len();
        for r in results {
            sink.save(r)?;
        }
        progress.report(ProgressEvent::Finished { n_outputs: n });
        Ok(n)
    }

    fn load_options(opts: &ConnectivityOptions) -> LoadOptions {
        LoadOptions {
            ignore_bad: opts.ignore_bad,
            scout: opts.scout.unwrap_or_default(),
            load_full: !opts.method.info().kernel_capable,
        }
    }

    fn load(&self, file: &str, target: &Target, opts: &ConnectivityOptions) -> Result<SignalBlock> {
        self.loader.load(file, target, opts.time_window, &Self::load_options(opts))
    }

    /// Pass 1 of evoked removal: average every trial.
    fn evoked(
        &self,
        req: &Request,
        opts: &ConnectivityOptions,
        progress: &mut dyn ProgressSink,
    ) -> Result<Evoked> {
        let total = req.n_inputs();
        let mut source = EvokedAccumulator::default();
        let mut target = EvokedAccumulator::default();
        let mut distinct = false;
        for (i, file) in req.files_a.iter().enumerate() {
            progress.report(ProgressEvent::Loading { file, index: i, total });
            source.add(&self.load(file, &req.target_a, opts)?)?;
            if let Some(tf) = req.target_file(i) {
                distinct = true;
                target.add(&self.load(tf, &req.target_b, opts)?)?;
            }
        }
        Ok(Evoked {
            source: Some(source.finish()?),
            target: if distinct { Some(target.finish()?) } else { None },
        })
    }

    /// Load trial `i`, with the evoked response removed when requested.
    fn load_pair(
        &self,
        i: usize,
        req: &Request,
        opts: &ConnectivityOptions,
        evoked: &Evoked,
    ) -> Result<BlockPair> {
        let mut a = self.load(&req.files_a[i], &req.target_a, opts)?;
        if let Some(e) = &evoked.source {
            e.subtract(&mut a)?;
        }
        let b = match req.target_file(i) {
            Some(tf) => {
                let mut b = self.load(tf, &req.target_b, opts)?;
                if let Some(e) = &evoked.target {
                    e.subtract(&mut b)?;
                }
                Some(b)
            }
            None => None,
        };
        Ok(BlockPair { source: a, target: b })
    }

    fn report_warnings(out: &MetricOutput, progress: &mut dyn ProgressSink) {
        for w in &out.warnings {
            progress.report(ProgressEvent::Warning { message: w });
        }
    }

    fn per_input(
        &self,
        req: &Request,
        opts: &ConnectivityOptions,
        evoked: &Evoked,
        progress: &mut dyn ProgressSink,
    ) -> Result<Vec<ConnectivityResult>> {
        let total = req.n_inputs();
        let mut results = Vec::with_capacity(total);
        for i in 0..total {
            progress.report(ProgressEvent::Loading { file: &req.files_a[i], index: i, total });
            let pair = self.load_pair(i, req, opts, evoked)?;
            progress.report(ProgressEvent::Computing { index: i });
            let out = self.engine.compute(&pair, opts)?;
            Self::report_warnings(&out, progress);
            let layout = Layout::of(&pair, out.target_is_source);
            let comment = pair.source.comment.clone();
            results.push(self.finish(out, layout, opts, 1, comment, None)?);
        }
        Ok(results)
    }

    fn averaged(
        &self,
        req: &Request,
        opts: &ConnectivityOptions,
        evoked: &Evoked,
        progress: &mut dyn ProgressSink,
    ) -> Result<ConnectivityResult> {
        let total = req.n_inputs();
        let mut mean = RunningMean::new(total);
        let mut first: Option<(MetricOutput, Layout)> = None;
        let mut comments = Vec::with_capacity(total);
        let mut messages = Vec::new();
        for i in 0..total {
            progress.report(ProgressEvent::Loading { file: &req.files_a[i], index: i, total });
            let pair = self.load_pair(i, req, opts, evoked)?;
            progress.report(ProgressEvent::Computing { index: i });
            let out = self.engine.compute(&pair, opts).map_err(|e| name_file(e, &req.files_a[i]))?;
            Self::report_warnings(&out, progress);
            messages.extend(out.warnings.iter().cloned());
            comments.push(pair.source.comment.clone());
            mean.add(out.raw.clone()).map_err(|e| name_file(e, &req.files_a[i]))?;
            if first.is_none() {
                first = Some((out, Layout::of(&pair, false)));
            }
        }
        let (mut out, mut layout) =
            first.ok_or_else(|| ConnError::config("no input files"))?;
        if out.target_is_source {
            layout.target_names = layout.source_names.clone();
            layout.target_comp = layout.source_comp;
            layout.target_scouts = layout.source_scouts.clone();
        }
        out.raw = mean.finish()?;
        out.warnings = messages;
        self.finish(out, layout, opts, total, reconcile_comments(&comments), Some(total))
    }

    fn concatenated(
        &self,
        req: &Request,
        opts: &ConnectivityOptions,
        evoked: &Evoked,
        progress: &mut dyn ProgressSink,
    ) -> Result<ConnectivityResult> {
        let total = req.n_inputs();
        let mut sources = Vec::with_capacity(total);
        let mut targets = Vec::with_capacity(total);
        for i in 0..total {
            progress.report(ProgressEvent::Loading { file: &req.files_a[i], index: i, total });
            let pair = self.load_pair(i, req, opts, evoked)?;
            sources.push(pair.source);
            targets.extend(pair.target);
        }
        let comments: Vec<String> = sources.iter().map(|b| b.comment.clone()).collect();
        let source = concatenate_blocks(sources, &req.files_a)?;
        let target = if targets.is_empty() {
            None
        } else {
            let names: Vec<String> = (0..total).filter_map(|i| req.target_file(i).map(str::to_string)).collect();
            Some(concatenate_blocks(targets, &names)?)
        };
        let pair = BlockPair { source, target };
        progress.report(ProgressEvent::Computing { index: 0 });
        let out = self.engine.compute(&pair, opts)?;
        Self::report_warnings(&out, progress);
        let layout = Layout::of(&pair, out.target_is_source);
        self.finish(out, layout, opts, total, reconcile_comments(&comments), Some(total))
    }

    fn averaged_coherence(
        &self,
        req: &Request,
        opts: &ConnectivityOptions,
        progress: &mut dyn ProgressSink,
    ) -> Result<ConnectivityResult> {
        let total = req.n_inputs();
        let none = Evoked::default();
        progress.report(ProgressEvent::Loading { file: &req.files_a[0], index: 0, total });
        let first = self.load_pair(0, req, opts, &none)?;
        let layout = Layout::of(&first, false);
        let comments = RefCell::new(vec![first.source.comment.clone()]);

        let progress = RefCell::new(progress);
        let rest = (1..total).map(|i| {
            progress.borrow_mut().report(ProgressEvent::Loading { file: &req.files_a[i], index: i, total });
            let pair = self.load_pair(i, req, opts, &none).map_err(|e| name_file(e, &req.files_a[i]))?;
            comments.borrow_mut().push(pair.source.comment.clone());
            Ok(pair)
        });
        let seq = TrialSeq::new(total, std::iter::once(Ok(first)).chain(rest));
        let out = self.engine.compute_trials(seq, opts)?;
        let progress = progress.into_inner();
        Self::report_warnings(&out, progress);
        let comment = reconcile_comments(&comments.into_inner());
        self.finish(out, layout, opts, total, comment, Some(total))
    }

    /// Finalize, reduce orientations and scouts, and package.
    fn finish(
        &self,
        out: MetricOutput,
        layout: Layout,
        opts: &ConnectivityOptions,
        n_avg: usize,
        input_comment: String,
        batch_trials: Option<usize>,
    ) -> Result<ConnectivityResult> {
        let MetricOutput { raw, finish, comment, freqs, time, warnings, .. } = out;
        let values = raw.finalize(finish);
        let values = reduce_values(values, layout.source_comp, layout.target_comp)?;
        let mut source_names = reduce_names(&layout.source_names, layout.source_comp);
        let mut target_names = reduce_names(&layout.target_names, layout.target_comp);

        let after = opts.scout.is_some_and(|s| s.time == ScoutTime::After);
        let mut scouts = None;
        let values = if after && !(layout.source_scouts.is_empty() && layout.target_scouts.is_empty()) {
            let function = opts.scout.unwrap_or_default().function;
            let Values::Real(mut v) = values else {
                return Err(ConnError::unsupported("scouts cannot be applied to complex values"));
            };
            if !layout.source_scouts.is_empty() {
                let (r, names) = self.scouts.aggregate(&v, Axis(0), &layout.source_scouts, function)?;
                v = r;
                source_names = names;
            }
            if !layout.target_scouts.is_empty() {
                let (r, names) = self.scouts.aggregate(&v, Axis(1), &layout.target_scouts, function)?;
                v = r;
                target_names = names;
            }
            scouts = Some(ScoutSummary {
                function,
                source: layout.source_scouts,
                target: layout.target_scouts,
            });
            Values::Real(v)
        } else {
            values
        };

        let meta = ResultMeta {
            method_comment: comment,
            input_comment,
            freqs,
            time,
            source_names,
            target_names,
            n_avg,
            scouts,
            geometry: layout.geometry,
            data_kind: layout.kind,
            messages: warnings,
        };
        package(values, meta, opts, batch_trials)
    }
}

/// Prefix shape errors with the file they came from.
fn name_file(e: ConnError, file: &str) -> ConnError {
    match e {
        ConnError::ShapeMismatch(m) => ConnError::ShapeMismatch(format!("{file}: {m}")),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CohereParams, Method};
    use crate::loader::MemoryLoader;
    use ndarray::Array2;

    fn loader(n: usize) -> MemoryLoader {
        let mut l = MemoryLoader::new();
        for k in 0..n {
            let data = Array2::from_shape_fn((3, 256), |(r, t)| {
                ((t as f64) * 0.1 * (r + 1) as f64 + k as f64).sin() + 0.01 * (r * t % 7) as f64
            });
            let block = SignalBlock::from_sfreq(data, 128.0, 0.0)
                .unwrap()
                .with_comment(format!("Trial (#{})", k + 1));
            l.insert(format!("t{k}"), block);
        }
        l
    }

    fn files(n: usize) -> Vec<String> {
        (0..n).map(|k| format!("t{k}")).collect()
    }

    #[test]
    fn per_input_gives_one_result_per_file() {
        let conn = Connectivity::new(loader(3));
        let out = conn.run(&Request::new(files(3)), &ConnectivityOptions::default()).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out[0].n_pairs(), 9);
        assert_eq!(out[0].comment, "Corr: Trial (#1)");
    }

    #[test]
    fn averaged_batch_reconciles_comments() {
        let conn = Connectivity::new(loader(4));
        let opts = ConnectivityOptions { output_mode: OutputMode::Avg, ..Default::default() };
        let out = conn.run(&Request::new(files(4)), &opts).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].n_avg, 4);
        assert_eq!(out[0].comment, "Corr: Trial (4 trials)");
    }

    #[test]
    fn target_file_count_must_match() {
        let conn = Connectivity::new(loader(3));
        let req = Request::new(files(3)).with_target_files(files(2));
        let err = conn.run(&req, &ConnectivityOptions::default()).unwrap_err();
        assert!(matches!(err, ConnError::Config(_)));
    }

    #[test]
    fn invalid_options_fail_before_loading() {
        // Nothing is registered under these names: a load would fail with
        // a load error, not a configuration error.
        let conn = Connectivity::new(MemoryLoader::new());
        let opts = ConnectivityOptions::for_method(Method::Cohere(CohereParams {
            win_len: None,
            max_freq_res: Some(0.0),
            ..Default::default()
        }));
        let err = conn.run(&Request::new(vec!["missing".into()]), &opts).unwrap_err();
        assert!(matches!(err, ConnError::Config(_)));
    }

    #[test]
    fn averaged_coherence_streams_trials() {
        let conn = Connectivity::new(loader(3));
        let opts = ConnectivityOptions {
            method: Method::Cohere(CohereParams::default()),
            output_mode: OutputMode::AvgCoh,
            ..Default::default()
        };
        let out = conn.run(&Request::new(files(3)), &opts).unwrap();
        assert_eq!(out[0].n_avg, 3);
        assert!(out[0].comment.starts_with("MSCohere(1Hz): Trial"));
    }
}
