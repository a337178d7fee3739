//! Safetensors I/O: signal blocks in, connectivity results out.
//!
//! Input files hold
//!
//! | key            | dtype          | shape  |                               |
//! |----------------|----------------|--------|-------------------------------|
//! | `data`         | F32 / F64      | [R, T] | rows (or sensors with kernel) |
//! | `time`         | F32 / F64      | [T]    | or `sfreq` [1] + optional `t0` |
//! | `row_names`    | U8             | [n]    | newline-joined UTF-8          |
//! | `n_components` | I32 / F64      | [1]    | orientations per location     |
//! | `bad`          | I32 / F64      | [R]    | non-zero = bad row            |
//! | `kernel`       | F32 / F64      | [R, S] | imaging kernel                |
//!
//! and an optional `__metadata__` map with `comment` and `kind`.
//!
//! Result files hold `tf` (or `tf_re` / `tf_im`) `[nPairs, nTime, nFreq]`,
//! `freqs`, `time`, `n_avg`, and a `__metadata__` map describing the result.
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, bail};
use ndarray::{Array2, Ix3};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{ConnError, Result};
use crate::loader::{LoadOptions, SignalLoader, Target, select};
use crate::package::ConnectivityResult;
use crate::pipeline::ResultSink;
use crate::signal::{DataKind, SignalBlock};
use crate::tensor::Values;

// ── Low-level safetensors parser ──────────────────────────────────────────────

struct StFile {
    bytes: Vec<u8>,
    header: HashMap<String, Value>,
    data_start: usize,
}

impl StFile {
    fn open(path: &Path) -> anyhow::Result<Self> {
        let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        if bytes.len() < 8 {
            bail!("safetensors file too small");
        }
        let mut len = [0u8; 8];
        len.copy_from_slice(&bytes[..8]);
        let n = u64::from_le_bytes(len) as usize;
        let end = 8usize.checked_add(n).filter(|&e| e <= bytes.len()).context("truncated header")?;
        let header: HashMap<String, Value> =
            serde_json::from_slice(&bytes[8..end]).context("failed to parse safetensors header")?;
        Ok(Self { bytes, header, data_start: end })
    }

    fn entry(&self, key: &str) -> Option<&Value> {
        self.header.get(key)
    }

    fn metadata(&self, key: &str) -> Option<&str> {
        self.header.get("__metadata__")?.get(key)?.as_str()
    }

    fn shape(entry: &Value) -> anyhow::Result<Vec<usize>> {
        entry["shape"]
            .as_array()
            .context("tensor without shape")?
            .iter()
            .map(|v| v.as_u64().map(|d| d as usize).context("bad shape entry"))
            .collect()
    }

    fn raw(&self, entry: &Value) -> anyhow::Result<&[u8]> {
        let offsets = entry["data_offsets"].as_array().context("tensor without offsets")?;
        let s = offsets.first().and_then(Value::as_u64).context("bad offset")? as usize;
        let e = offsets.get(1).and_then(Value::as_u64).context("bad offset")? as usize;
        self.bytes
            .get(self.data_start + s..self.data_start + e)
            .context("tensor data out of bounds")
    }

    /// Any numeric tensor as f64.
    fn numbers(&self, key: &str) -> anyhow::Result<(Vec<f64>, Vec<usize>)> {
        let entry = self.entry(key).with_context(|| format!("missing '{key}' key"))?;
        let raw = self.raw(entry)?;
        let values = match entry["dtype"].as_str().unwrap_or_default() {
            "F64" => raw.chunks_exact(8).map(|b| f64::from_le_bytes(arr8(b))).collect(),
            "F32" => raw.chunks_exact(4).map(|b| f32::from_le_bytes(arr4(b)) as f64).collect(),
            "I64" => raw.chunks_exact(8).map(|b| i64::from_le_bytes(arr8(b)) as f64).collect(),
            "I32" => raw.chunks_exact(4).map(|b| i32::from_le_bytes(arr4(b)) as f64).collect(),
            other => bail!("'{key}' has unsupported dtype {other:?}"),
        };
        Ok((values, Self::shape(entry)?))
    }

    fn matrix(&self, key: &str) -> anyhow::Result<Array2<f64>> {
        let (v, shape) = self.numbers(key)?;
        let &[r, c] = shape.as_slice() else {
            bail!("'{key}' must be 2-D, has shape {shape:?}");
        };
        Ok(Array2::from_shape_vec((r, c), v)?)
    }

    fn text(&self, key: &str) -> anyhow::Result<Option<String>> {
        let Some(entry) = self.entry(key) else {
            return Ok(None);
        };
        let s = std::str::from_utf8(self.raw(entry)?).with_context(|| format!("'{key}' is not UTF-8"))?;
        Ok(Some(s.to_string()))
    }
}

fn arr4(b: &[u8]) -> [u8; 4] {
    [b[0], b[1], b[2], b[3]]
}

fn arr8(b: &[u8]) -> [u8; 8] {
    [b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7]]
}

/// Read a stored signal block.
pub fn read_block(path: &Path) -> anyhow::Result<SignalBlock> {
    let st = StFile::open(path)?;
    let data = st.matrix("data")?;
    let time = if st.entry("time").is_some() {
        st.numbers("time")?.0
    } else {
        let sfreq = *st.numbers("sfreq")?.0.first().context("empty 'sfreq'")?;
        let t0 = match st.entry("t0") {
            Some(_) => st.numbers("t0")?.0.first().copied().unwrap_or(0.0),
            None => 0.0,
        };
        (0..data.ncols()).map(|i| t0 + i as f64 / sfreq).collect()
    };

    let mut block = match st.entry("kernel") {
        Some(_) => SignalBlock::new(data, time)?.with_kernel(st.matrix("kernel")?)?,
        None => SignalBlock::new(data, time)?,
    };
    if let Some(names) = st.text("row_names")? {
        let names: Vec<String> = names.split('\n').filter(|s| !s.is_empty()).map(String::from).collect();
        block = block.with_row_names(names)?;
    }
    if st.entry("n_components").is_some() {
        let n = st.numbers("n_components")?.0.first().copied().unwrap_or(1.0);
        block = block.with_components(n as usize)?;
    }
    if st.entry("bad").is_some() {
        let flags = st.numbers("bad")?.0;
        block.bad_rows = flags.iter().enumerate().filter(|&(_, &v)| v != 0.0).map(|(i, _)| i).collect();
    }
    if let Some(c) = st.metadata("comment") {
        block.comment = c.to_string();
    }
    if let Some(k) = st.metadata("kind") {
        block.kind = serde_json::from_value(Value::String(k.to_string()))
            .with_context(|| format!("unknown data kind '{k}' in {}", path.display()))?;
    }
    debug!(path = %path.display(), rows = block.n_rows(), times = block.n_times(), "read block");
    Ok(block)
}

/// Write a signal block in the input layout.
pub fn write_block(block: &SignalBlock, path: &Path) -> anyhow::Result<()> {
    let mut w = StWriter::new();
    w.add_f64_arr2("data", &block.data);
    w.add_f64("time", &block.time, &[block.time.len()]);
    w.add_bytes("row_names", block.row_names.join("\n").as_bytes());
    w.add_i32("n_components", &[block.n_components as i32], &[1]);
    let bad: Vec<i32> = (0..block.data.nrows()).map(|r| block.bad_rows.contains(&r) as i32).collect();
    w.add_i32("bad", &bad, &[bad.len()]);
    if let Some(k) = &block.kernel {
        w.add_f64_arr2("kernel", k);
    }
    w.metadata("comment", &block.comment);
    w.metadata("kind", serde_json::to_value(block.kind)?.as_str().unwrap_or("recordings"));
    w.write(path)
}

/// Loads blocks from safetensors files under a root directory.
#[derive(Debug, Clone, Default)]
pub struct SafetensorsLoader {
    root: PathBuf,
}

impl SafetensorsLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, file: &str) -> PathBuf {
        let p = Path::new(file);
        if p.is_absolute() { p.to_path_buf() } else { self.root.join(p) }
    }
}

impl SignalLoader for SafetensorsLoader {
    fn load(
        &self,
        file: &str,
        target: &Target,
        window: Option<[f64; 2]>,
        opts: &LoadOptions,
    ) -> Result<SignalBlock> {
        let block = read_block(&self.resolve(file)).map_err(|e| ConnError::load(file, format!("{e:#}")))?;
        select(block, file, target, window, opts)
    }
}

// ── Generic safetensors builder ───────────────────────────────────────────────

/// Simple safetensors file writer for F64, I32 and byte tensors plus a
/// `__metadata__` string map.
///
/// ```rust,no_run
/// use exg_conn::io::StWriter;
/// use std::path::Path;
/// let mut w = StWriter::new();
/// w.add_f64("signal", &[1.0f64, 2.0, 3.0], &[1, 3]);
/// w.metadata("comment", "test");
/// w.write(Path::new("/tmp/out.safetensors")).unwrap();
/// ```
#[derive(Debug, Default)]
pub struct StWriter {
    entries: Vec<(String, Vec<u8>, &'static str, Vec<usize>)>,
    metadata: serde_json::Map<String, Value>,
}

impl StWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_f64(&mut self, name: &str, data: &[f64], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.push((name.to_string(), bytes, "F64", shape.to_vec()));
    }

    pub fn add_f64_arr2(&mut self, name: &str, arr: &Array2<f64>) {
        let data: Vec<f64> = arr.iter().copied().collect();
        self.add_f64(name, &data, &[arr.nrows(), arr.ncols()]);
    }

    pub fn add_i32(&mut self, name: &str, data: &[i32], shape: &[usize]) {
        let bytes: Vec<u8> = data.iter().flat_map(|v| v.to_le_bytes()).collect();
        self.entries.push((name.to_string(), bytes, "I32", shape.to_vec()));
    }

    pub fn add_bytes(&mut self, name: &str, data: &[u8]) {
        self.entries.push((name.to_string(), data.to_vec(), "U8", vec![data.len()]));
    }

    pub fn metadata(&mut self, key: &str, value: &str) {
        self.metadata.insert(key.to_string(), Value::String(value.to_string()));
    }

    pub fn write(&self, path: &Path) -> anyhow::Result<()> {
        let mut header_map = serde_json::Map::new();
        if !self.metadata.is_empty() {
            header_map.insert("__metadata__".into(), Value::Object(self.metadata.clone()));
        }
        let mut offset: usize = 0;
        for (name, data, dtype, shape) in &self.entries {
            header_map.insert(name.clone(), serde_json::json!({
                "dtype": dtype,
                "shape": shape,
                "data_offsets": [offset, offset + data.len()],
            }));
            offset += data.len();
        }
        let hdr_bytes = serde_json::to_vec(&header_map)?;
        let pad = (8 - hdr_bytes.len() % 8) % 8;
        let padded: Vec<u8> = hdr_bytes.into_iter()
            .chain(std::iter::repeat(b' ').take(pad))
            .collect();
        let mut f = std::fs::File::create(path).with_context(|| format!("creating {}", path.display()))?;
        f.write_all(&(padded.len() as u64).to_le_bytes())?;
        f.write_all(&padded)?;
        for (_, data, _, _) in &self.entries {
            f.write_all(data)?;
        }
        Ok(())
    }
}

// ── Result writer ─────────────────────────────────────────────────────────────

fn add_values(w: &mut StWriter, tf: &Values<Ix3>) {
    let shape = tf.shape().to_vec();
    match tf {
        Values::Real(a) => w.add_f64("tf", &a.iter().copied().collect::<Vec<_>>(), &shape),
        Values::Complex(a) => {
            w.add_f64("tf_re", &a.iter().map(|z| z.re).collect::<Vec<_>>(), &shape);
            w.add_f64("tf_im", &a.iter().map(|z| z.im).collect::<Vec<_>>(), &shape);
        }
    }
}

/// Write one result.
pub fn write_result(result: &ConnectivityResult, path: &Path) -> anyhow::Result<()> {
    let mut w = StWriter::new();
    add_values(&mut w, &result.tf);
    let freqs = result.freqs.centers();
    w.add_f64("freqs", &freqs, &[freqs.len()]);
    let time = result.time.values();
    w.add_f64("time", &time, &[time.len()]);
    w.add_i32("n_avg", &[result.n_avg as i32], &[1]);

    w.metadata("method", result.method.as_str());
    w.metadata("comment", &result.comment);
    w.metadata("is_symmetric", if result.is_symmetric { "true" } else { "false" });
    w.metadata("source_names", &serde_json::to_string(&result.source_names)?);
    w.metadata("target_names", &serde_json::to_string(&result.target_names)?);
    w.metadata("freq_axis", &serde_json::to_string(&result.freqs)?);
    w.metadata("time_axis", &serde_json::to_string(&result.time)?);
    w.metadata("options", &serde_json::to_string(&result.options)?);
    w.metadata("data_kind", serde_json::to_value(result.data_kind)?.as_str().unwrap_or_default());
    if let Some(g) = &result.geometry {
        w.metadata("geometry", g);
    }
    if let Some(s) = &result.scouts {
        w.metadata("scouts", &serde_json::to_string(s)?);
    }
    if !result.messages.is_empty() {
        w.metadata("messages", &serde_json::to_string(&result.messages)?);
    }
    w.write(path)
}

/// Writes every result to `<dir>/conn_<method>_<k>.safetensors`.
#[derive(Debug)]
pub struct SafetensorsSink {
    dir: PathBuf,
    pub written: Vec<PathBuf>,
}

impl SafetensorsSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into(), written: Vec::new() }
    }
}

impl ResultSink for SafetensorsSink {
    fn save(&mut self, result: ConnectivityResult) -> Result<()> {
        let path = self.dir.join(format!("conn_{}_{:03}.safetensors", result.method, self.written.len()));
        write_result(&result, &path).map_err(|e| ConnError::save(&path, format!("{e:#}")))?;
        info!(path = %path.display(), pairs = result.n_pairs(), "saved result");
        self.written.push(path);
        Ok(())
    }
}
