//! nxingest CLI
//!
//! Loads NeXus event files into per-period workspaces and reports what was kept.

mod launcher;

use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use launcher::SubprocessLauncher;
use nxingest_core::{ExperimentMetadata, PeriodLog, PulseTime, PulseTimeIndex};
use nxingest_io::{
    EventSource, InstrumentDefinition, MemoryBank, NexusEventFile, NexusWriter, RunLogSource,
};
use nxingest_loader::{serve_job, Dispatch, DispatchKind, EventLoader, LoaderConfig};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;

/// Result type for CLI operations.
type Result<T> = std::result::Result<T, CliError>;

/// CLI error types.
#[derive(Error, Debug)]
enum CliError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    NxIo(#[from] nxingest_io::Error),

    #[error("Core error: {0}")]
    Core(#[from] nxingest_core::Error),

    #[error("Load error: {0}")]
    Loader(#[from] nxingest_loader::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum DispatchArg {
    /// Every bank on one thread
    Sequential,
    /// A rayon thread pool
    Threads,
    /// One worker process per bank
    Processes,
}

impl From<DispatchArg> for DispatchKind {
    fn from(arg: DispatchArg) -> Self {
        match arg {
            DispatchArg::Sequential => Self::Sequential,
            DispatchArg::Threads => Self::Threads,
            DispatchArg::Processes => Self::Processes,
        }
    }
}

/// Parallel event-data loader for NeXus files.
#[derive(Parser)]
#[command(name = "nxingest")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load every bank of a NeXus event file
    Load(LoadArgs),

    /// Show banks and run logs of a NeXus event file
    Info {
        /// Input NeXus file
        input: PathBuf,
    },

    /// Write a synthetic NeXus event file and its geometry
    Generate(GenerateArgs),

    /// Ingest one bank job read from stdin (used by process dispatch)
    #[command(hide = true)]
    Worker {
        /// NeXus file the job's bank lives in
        input: PathBuf,
    },
}

#[derive(Args)]
struct LoadArgs {
    /// Input NeXus file
    input: PathBuf,

    /// Instrument geometry (JSON)
    #[arg(short, long)]
    geometry: PathBuf,

    /// Loader configuration (JSON); flags below override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long, value_enum)]
    dispatch: Option<DispatchArg>,

    /// Worker threads or processes
    #[arg(short, long)]
    workers: Option<usize>,

    /// Keep events with MIN <= TOF <= MAX (microseconds)
    #[arg(long, num_args = 2, value_names = ["MIN", "MAX"])]
    tof_window: Option<Vec<f64>>,

    /// Count events per channel before ingesting
    #[arg(long)]
    precount: bool,

    /// Print the load report as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct GenerateArgs {
    /// Output NeXus file
    output: PathBuf,

    /// Output geometry file (JSON)
    #[arg(short, long)]
    geometry: PathBuf,

    #[arg(long, default_value = "2", value_parser = clap::value_parser!(u32).range(1..=64))]
    banks: u32,

    #[arg(long, default_value = "16", value_parser = clap::value_parser!(u32).range(1..=100_000))]
    detectors_per_bank: u32,

    #[arg(long, default_value = "100", value_parser = clap::value_parser!(u32).range(1..=1_000_000))]
    pulses: u32,

    #[arg(long, default_value = "10", value_parser = clap::value_parser!(u32).range(0..=10_000))]
    events_per_pulse: u32,

    /// Periods cycled pulse by pulse
    #[arg(long, default_value = "1", value_parser = clap::value_parser!(u32).range(1..=64))]
    periods: u32,
}

/// 60 Hz source.
const PULSE_PERIOD_NS: i64 = 16_666_667;
const FIRST_PULSE_NS: i64 = 1_000_000_000;

fn init_logging(verbosity: u8) {
    let level = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Commands::Load(args) => load(&args, cli.verbose),
        Commands::Info { input } => info(&input),
        Commands::Generate(args) => generate(&args),
        Commands::Worker { input } => {
            let file = NexusEventFile::open(&input)?;
            let mut stdout = std::io::stdout().lock();
            serve_job(&file, std::io::stdin().lock(), &mut stdout)?;
            stdout.flush()?;
            Ok(())
        }
    }
}

fn loader_config(args: &LoadArgs) -> Result<LoaderConfig> {
    let mut config = match &args.config {
        Some(path) => LoaderConfig::from_file(path)?,
        None => LoaderConfig::default(),
    };
    if let Some(dispatch) = args.dispatch {
        config = config.with_dispatch(dispatch.into());
    }
    if let Some(workers) = args.workers {
        config = config.try_with_workers(workers)?;
    }
    if let Some(&[min, max]) = args.tof_window.as_deref() {
        config = config.try_with_tof_window(min, max)?;
    }
    if args.precount {
        config = config.with_precount(true);
    }
    Ok(config)
}

fn load(args: &LoadArgs, verbosity: u8) -> Result<()> {
    let config = loader_config(args)?;
    let definition = InstrumentDefinition::from_file(&args.geometry)?;
    let file = NexusEventFile::open(&args.input)?;
    let title = args
        .input
        .file_stem()
        .map_or_else(|| "nxingest".to_string(), |s| s.to_string_lossy().into_owned());
    let metadata = Arc::new(ExperimentMetadata::new(
        title,
        Arc::clone(&definition.instrument),
    ));

    let loader = EventLoader::new(&file, Arc::clone(&definition.mapping), metadata)
        .with_run_log(&file)
        .with_config(config);
    let start = Instant::now();
    let result = match loader.config().dispatch {
        DispatchKind::Processes => {
            let launcher = SubprocessLauncher::new(&args.input, verbosity)?;
            loader.load_with(Dispatch::Processes(&launcher))?
        }
        DispatchKind::Sequential | DispatchKind::Threads => loader.load()?,
    };
    let elapsed = start.elapsed();

    let report = result.report.clone();
    let output = result.into_output()?;

    if args.json {
        let summary = serde_json::json!({
            "input": args.input.display().to_string(),
            "seconds": elapsed.as_secs_f64(),
            "n_periods": output.n_periods(),
            "events_read": report.events_read(),
            "events_kept": report.events_kept(),
            "events_discarded_unmapped": report.events_discarded_unmapped(),
            "events_discarded_by_filter": report.events_discarded_by_filter(),
            "suspicious_tof": report.suspicious_tof(),
            "events_per_period": report.events_per_period(),
            "period_warning": report.period_warning.as_ref().map(ToString::to_string),
            "banks": report.banks,
        });
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    println!(
        "Loaded {} bank(s) from {} in {:.2}s",
        report.banks.len(),
        args.input.display(),
        elapsed.as_secs_f64()
    );
    println!("Events read: {}", report.events_read());
    println!("Events kept: {}", report.events_kept());
    println!("Unmapped: {}", report.events_discarded_unmapped());
    println!("Filtered: {}", report.events_discarded_by_filter());
    if let Some((shortest, longest)) = report.tof_range() {
        println!("TOF range: {shortest} - {longest}");
    }
    if let Some(warning) = &report.period_warning {
        println!("Warning: {warning}");
    }
    println!("Periods: {}", output.n_periods());
    for period in 0..output.n_periods() {
        if let Some(workspace) = output.workspace(period) {
            println!(
                "  period {}: {} events in {} channels",
                period + 1,
                workspace.n_events(),
                workspace.n_channels()
            );
        }
    }
    Ok(())
}

fn info(input: &Path) -> Result<()> {
    let file = NexusEventFile::open(input)?;
    println!("File: {}", input.display());

    let names = file.bank_names()?;
    println!("Banks: {}", names.len());
    let mut total = 0usize;
    for name in &names {
        let reader = file.open_bank(name)?;
        total += reader.len();
        println!(
            "  {name}: {} events, {} pulses",
            reader.len(),
            reader.pulse_times().map_or(0, PulseTimeIndex::len)
        );
    }
    println!("Events: {total}");

    match file.declared_periods()? {
        Some(n) => println!("Declared periods: {n}"),
        None => println!("Declared periods: none"),
    }
    if let Some(log) = file.period_log()? {
        let distinct = log.distinct_periods();
        println!(
            "Period log: {} entries, periods {:?}",
            log.entries().len(),
            distinct
        );
    }
    match file.pulse_times()? {
        Some(pulses) => println!("Pulses: {}", pulses.len()),
        None => println!("Pulses: none"),
    }
    Ok(())
}

fn generate(args: &GenerateArgs) -> Result<()> {
    let pulses = PulseTimeIndex::new(
        (0..args.pulses)
            .map(|p| PulseTime(FIRST_PULSE_NS + i64::from(p) * PULSE_PERIOD_NS))
            .collect(),
    )?;

    let writer = NexusWriter::create(&args.output)?;
    let mut banks = Vec::with_capacity(args.banks as usize);
    for b in 0..args.banks {
        let name = format!("bank{}", b + 1);
        let first_id = (b + 1) * 100_000;
        let mut bank = MemoryBank::new(&name).with_pulse_times(pulses.clone());
        for p in 0..args.pulses {
            for k in 0..args.events_per_pulse {
                let id = first_id + (k * 7 + p * 3) % args.detectors_per_bank;
                let tof = 1000.0 + f64::from((k * 37 + p * 11 + b * 5) % 15_000);
                bank.push(id, tof, p);
            }
        }
        writer.write_bank(&bank)?;
        banks.push(serde_json::json!({
            "name": name,
            "first_id": first_id,
            "count": args.detectors_per_bank,
        }));
    }
    writer.write_pulse_times(&pulses)?;
    if args.periods > 1 {
        let entries = pulses
            .as_slice()
            .iter()
            .zip((0..args.periods).cycle())
            .map(|(&time, p)| (time, p + 1))
            .collect();
        writer.write_period_log(&PeriodLog::new(entries))?;
        writer.write_declared_periods(args.periods as usize)?;
    }
    drop(writer);

    let geometry = serde_json::json!({
        "instrument": {
            "name": "SYNTHETIC",
            "source_position": [0.0, 0.0, -15.0],
            "banks": banks,
        }
    });
    std::fs::write(&args.geometry, serde_json::to_string_pretty(&geometry)?)?;

    println!(
        "Wrote {} bank(s) x {} events to {}",
        args.banks,
        u64::from(args.pulses) * u64::from(args.events_per_pulse),
        args.output.display()
    );
    Ok(())
}
