use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use exg_conn::io::{SafetensorsLoader, SafetensorsSink};
use exg_conn::{
    Connectivity, ConnectivityOptions, FreqBands, LogProgress, Method, MethodId, OutputMode, Request,
    Target,
};

#[derive(Parser, Debug)]
#[command(name = "exg-conn", version, about = "Pairwise connectivity between signal files")]
struct Args {
    /// Source signal files (.safetensors)
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Target files, one per input (N×N); omit to connect each input with itself
    #[arg(long, num_args = 1..)]
    targets: Vec<PathBuf>,

    /// corr, cohere, granger, spgranger, aec, plv, plvt, ciplv, ciplvt,
    /// wpli, wplit, pte or henv [default: corr, or the one in --options]
    #[arg(short, long)]
    method: Option<String>,

    /// Options as JSON (a `ConnectivityOptions` object); `--method` and
    /// `--mode` override the fields they name
    #[arg(long)]
    options: Option<PathBuf>,

    /// input, avg, concat or avgcoh [default: input, or the one in --options]
    #[arg(long)]
    mode: Option<String>,

    /// Source rows by name (comma-separated); default: all rows
    #[arg(long)]
    rows: Option<String>,

    /// Run band-limited methods on the unfiltered signals
    #[arg(long)]
    full_band: bool,

    /// Store only the lower triangle of symmetric results
    #[arg(long)]
    symmetric: bool,

    /// Output directory
    #[arg(short, long, default_value = ".")]
    out_dir: PathBuf,

    /// Logging verbosity level
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn parse_mode(s: &str) -> Result<OutputMode> {
    serde_json::from_value(serde_json::Value::String(s.to_lowercase()))
        .with_context(|| format!("unknown output mode '{s}' (expected input, avg, concat or avgcoh)"))
}

/// Options from `--options`, with the command-line flags overriding only
/// the fields they name.
fn options(args: &Args) -> Result<ConnectivityOptions> {
    let mut opts: ConnectivityOptions = match &args.options {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            serde_json::from_str(&text).with_context(|| format!("parsing {}", path.display()))?
        }
        None => ConnectivityOptions::default(),
    };
    if let Some(name) = &args.method {
        let id: MethodId = name.parse()?;
        if opts.method.id() != id {
            opts.method = Method::from_id(id);
        }
    }
    if let Some(mode) = &args.mode {
        opts.output_mode = parse_mode(mode)?;
    }
    opts.symmetric |= args.symmetric;
    if args.full_band {
        opts.freq_bands = FreqBands::Full;
    }
    Ok(opts)
}

fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = match args.log_level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let opts = options(&args)?;
    let id = opts.method.id();

    let files = |p: &[PathBuf]| p.iter().map(|f| f.display().to_string()).collect::<Vec<_>>();
    let mut req = Request::new(files(&args.inputs));
    if !args.targets.is_empty() {
        req = req.with_target_files(files(&args.targets));
    }
    if let Some(rows) = &args.rows {
        let names = rows.split(',').map(|s| s.trim().to_string()).collect();
        req = req.with_source_rows(Target::Rows(names));
    }

    std::fs::create_dir_all(&args.out_dir)
        .with_context(|| format!("creating {}", args.out_dir.display()))?;
    let conn = Connectivity::new(SafetensorsLoader::default());
    let mut sink = SafetensorsSink::new(&args.out_dir);
    let n = conn.run_into(&req, &opts, &mut LogProgress, &mut sink)?;

    for path in &sink.written {
        info!("written → {}", path.display());
    }
    info!("{n} result(s), method {id}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use exg_conn::{CohereParams, CoherenceMeasure};

    fn json_options(name: &str, opts: &ConnectivityOptions) -> PathBuf {
        let path = std::env::temp_dir().join(format!("exg_conn_cli_{}_{name}.json", std::process::id()));
        std::fs::write(&path, serde_json::to_string(opts).unwrap()).unwrap();
        path
    }

    fn lcohere_avg() -> ConnectivityOptions {
        ConnectivityOptions {
            method: Method::Cohere(CohereParams { measure: CoherenceMeasure::Lcohere2019, ..Default::default() }),
            output_mode: OutputMode::Avg,
            ..Default::default()
        }
    }

    #[test]
    fn json_options_survive_without_flags() {
        let path = json_options("keep", &lcohere_avg());
        let args = Args::parse_from(["exg-conn", "a.safetensors", "--options", path.to_str().unwrap()]);
        let opts = options(&args).unwrap();
        assert_eq!(opts, lcohere_avg());
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn flags_override_only_what_they_name() {
        let path = json_options("override", &lcohere_avg());
        let args = Args::parse_from([
            "exg-conn", "a.safetensors", "--options", path.to_str().unwrap(), "--mode", "concat",
        ]);
        let opts = options(&args).unwrap();
        assert_eq!(opts.method, lcohere_avg().method);
        assert_eq!(opts.output_mode, OutputMode::Concat);

        let args = Args::parse_from(["exg-conn", "a.safetensors", "--options", path.to_str().unwrap(), "-m", "wpli"]);
        let opts = options(&args).unwrap();
        assert_eq!(opts.method, Method::Wpli);
        assert_eq!(opts.output_mode, OutputMode::Avg);
        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn defaults_without_options_file() {
        let opts = options(&Args::parse_from(["exg-conn", "a.safetensors"])).unwrap();
        assert_eq!(opts.method.id(), MethodId::Corr);
        assert_eq!(opts.output_mode, OutputMode::Input);
    }
}
