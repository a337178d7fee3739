//! Progress reporting for batch runs.
use tracing::{info, warn};

/// Something the pipeline wants the caller to know about.
#[derive(Debug, Clone, PartialEq)]
pub enum ProgressEvent<'a> {
    /// A batch of `n_outputs` results is starting.
    Started { method: &'a str, n_outputs: usize },
    /// Loading input `index` of `total`.
    Loading { file: &'a str, index: usize, total: usize },
    /// Running the estimator for output `index`.
    Computing { index: usize },
    /// Non-fatal numeric warning.
    Warning { message: &'a str },
    /// The batch is done.
    Finished { n_outputs: usize },
}

pub trait ProgressSink {
    fn report(&mut self, event: ProgressEvent<'_>);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&mut self, _event: ProgressEvent<'_>) {}
}

/// Forwards events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogProgress;

impl ProgressSink for LogProgress {
    fn report(&mut self, event: ProgressEvent<'_>) {
        match event {
            ProgressEvent::Started { method, n_outputs } => info!(method, n_outputs, "connectivity started"),
            ProgressEvent::Loading { file, index, total } => info!(file, "loading {}/{total}", index + 1),
            ProgressEvent::Computing { index } => info!(output = index, "computing"),
            ProgressEvent::Warning { message } => warn!("{message}"),
            ProgressEvent::Finished { n_outputs } => info!(n_outputs, "connectivity finished"),
        }
    }
}

/// Collects events as strings; handy in tests.
#[derive(Debug, Clone, Default)]
pub struct RecordProgress {
    pub events: Vec<String>,
}

impl ProgressSink for RecordProgress {
    fn report(&mut self, event: ProgressEvent<'_>) {
        self.events.push(format!("{event:?}"));
    }
}
