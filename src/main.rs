use anyhow::{Context, bail};
use bulkload::config::BackendKind;
use bulkload::io::inspect_schema;
use bulkload::{FileStatus, Loader, LoaderConfig};
use clap::Parser;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::process::ExitCode;

/// Bulk-load Parquet trip files into a database.
#[derive(Parser, Debug)]
#[command(name = "bulkload", version)]
struct Args {
    /// XML configuration file.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Directory scanned recursively for `*.parquet` files.
    #[arg(long)]
    source: Option<PathBuf>,

    /// Parallel writer sessions.
    #[arg(long, short)]
    workers: Option<usize>,

    /// Records per batch.
    #[arg(long)]
    batch_size: Option<usize>,

    /// Maximum records per file; 0 loads everything.
    #[arg(long)]
    limit: Option<usize>,

    #[arg(long, value_enum)]
    backend: Option<BackendKind>,

    /// Load into memory only; nothing is written.
    #[arg(long)]
    dry_run: bool,

    /// Print the schema and first row of a Parquet file, then exit.
    #[arg(long, value_name = "FILE")]
    inspect: Option<PathBuf>,

    /// Write the run report as JSON.
    #[arg(long, value_name = "FILE")]
    report: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `bulkload=trace`; overrides RUST_LOG.
    #[arg(long)]
    log_level: Option<String>,
}

fn init_tracing(level: Option<&str>) {
    let ansi = std::io::stdout().is_terminal() && std::env::var_os("NO_COLOR").is_none();
    let filter = match level {
        Some(l) => tracing_subscriber::EnvFilter::new(l),
        None => tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "info".into()),
    };
    tracing_subscriber::fmt()
        .with_ansi(ansi)
        .with_env_filter(filter)
        .init();
}

fn build_config(args: &Args) -> anyhow::Result<LoaderConfig> {
    let mut cfg = match &args.config {
        Some(path) => LoaderConfig::from_xml_str(
            &std::fs::read_to_string(path)
                .with_context(|| format!("read config {}", path.display()))?,
        )?,
        None => LoaderConfig::default(),
    };
    if let Some(dir) = &args.source {
        cfg.source_dir.clone_from(dir);
    }
    if let Some(w) = args.workers {
        cfg.load.workers = w;
    }
    if let Some(b) = args.batch_size {
        cfg.load.batch_size = b;
    }
    if let Some(l) = args.limit {
        cfg.load.record_limit = l;
    }
    if let Some(b) = args.backend {
        cfg.backend = b;
    }
    if args.dry_run {
        cfg.backend = BackendKind::Memory;
    }
    cfg.validate().context("invalid configuration")?;
    Ok(cfg)
}

fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();
    init_tracing(args.log_level.as_deref());

    if let Some(file) = &args.inspect {
        inspect_schema(file)
            .with_context(|| format!("inspect {}", file.display()))?
            .print();
        return Ok(ExitCode::SUCCESS);
    }

    let cfg = build_config(&args)?;
    if cfg.source_dir.as_os_str().is_empty() {
        bail!("no source directory: set <source_dir> in the config or pass --source");
    }
    cfg.log_summary();

    let source = cfg.source_dir.clone();
    let loader = Loader::from_config(cfg).context("create loader")?;
    let run = loader
        .run_dir(&source)
        .with_context(|| format!("load {}", source.display()))?;

    run.print();
    if let Some(path) = &args.report {
        run.save_to_file(path)
            .with_context(|| format!("write report {}", path.display()))?;
        tracing::info!(report = %path.display(), "run report written");
    }

    if run.with_status(FileStatus::Failed).next().is_some()
        || run.with_status(FileStatus::Partial).next().is_some()
    {
        return Ok(ExitCode::from(2));
    }
    Ok(ExitCode::SUCCESS)
}
