//! CAN Stream Decoder CLI Application
//!
//! Command-line front end for the can-stream-decoder library. It reads
//! candump text logs (or live frames on stdin), pushes every frame through
//! the protocol registry and prints decoded messages as text or JSON lines:
//! - FTCAN 2.0 real-time telemetry
//! - OBD-II diagnostics over ISO-TP
//! - VW-group display/control unit streams

use anyhow::{Context, Result};
use clap::Parser;
use rayon::prelude::*;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use can_stream_decoder::{
    DecodeWorker, DecoderRegistry, DecoderStats, DetectionMode, ProtocolId,
    DEFAULT_QUEUE_CAPACITY,
};

mod config;
mod input;
mod output;

/// CAN Stream Decoder - decode multi-protocol CAN traffic
#[derive(Parser, Debug)]
#[command(name = "can-stream-cli")]
#[command(about = "Decode FTCAN, OBD-II and display traffic from candump logs", long_about = None)]
#[command(version)]
struct Args {
    /// candump text log to decode, or "-" for stdin (can be repeated)
    #[arg(short, long, value_name = "FILE")]
    log: Vec<PathBuf>,

    /// Path to configuration file (config.toml)
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Emit decoded messages as JSON lines
    #[arg(long)]
    json: bool,

    /// Let the display decoder claim unsegmented frames too
    #[arg(long)]
    aggressive_display: bool,

    /// Reassembly timeout in milliseconds
    #[arg(long, value_name = "MS")]
    timeout_ms: Option<u64>,

    /// Disable one protocol decoder: ftcan, obd or display (can be repeated)
    #[arg(long, value_name = "PROTO")]
    disable: Vec<String>,

    /// Maximum number of frames to decode per input (for testing)
    #[arg(long, value_name = "COUNT")]
    max_frames: Option<usize>,

    /// Verbosity level (can be repeated: -v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long)]
    quiet: bool,
}

fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Initialize logging
    init_logging(args.verbose, args.quiet);

    log::info!("CAN Stream Decoder CLI v{}", env!("CARGO_PKG_VERSION"));
    log::info!("Using decoder library v{}", can_stream_decoder::VERSION);

    let mut app = match &args.config {
        Some(path) => config::load_config(path)?,
        None => config::AppConfig::default(),
    };
    apply_overrides(&mut app, &args)?;
    app.engine.validate()?;

    // Inputs from the config file come first, --log arguments after
    let mut inputs = app.input.files.clone();
    inputs.extend(args.log.iter().cloned());

    if inputs.is_empty() {
        print_quick_start();
        return Ok(());
    }

    if inputs.iter().any(|path| path.as_os_str() == "-") {
        if inputs.len() > 1 {
            anyhow::bail!("Reading from stdin cannot be combined with other inputs");
        }
        return stream_stdin(&app, args.max_frames);
    }

    decode_files(&inputs, &app, args.max_frames)
}

/// Fold command-line switches into the loaded configuration
fn apply_overrides(app: &mut config::AppConfig, args: &Args) -> Result<()> {
    if let Some(timeout_ms) = args.timeout_ms {
        app.engine.stream_timeout_ms = timeout_ms;
    }
    if args.aggressive_display {
        app.engine.display.detection = DetectionMode::Aggressive;
    }
    if args.json {
        app.output.format = config::OutputFormat::Json;
    }
    for name in &args.disable {
        let protocol = protocol_by_name(name)
            .with_context(|| format!("Unknown protocol {:?} in --disable", name))?;
        app.engine = app.engine.clone().with_decoder_enabled(protocol, false);
    }
    Ok(())
}

fn protocol_by_name(name: &str) -> Option<ProtocolId> {
    match name {
        "ftcan" => Some(ProtocolId::Ftcan),
        "obd" => Some(ProtocolId::Obd),
        "display" => Some(ProtocolId::Display),
        _ => None,
    }
}

fn print_quick_start() {
    println!("CAN Stream Decoder - No input specified");
    println!("\nQuick Start:");
    println!("  can-stream-cli --log trace.log");
    println!("  candump -L can0 | can-stream-cli --log -");
    println!("\nFor decoder tuning and output options:");
    println!("  can-stream-cli --config config.toml");
    println!("\nUse --help for more options");
}

/// Decoded output of one input file
struct FileReport {
    path: PathBuf,
    lines: Vec<String>,
    stats: Vec<(ProtocolId, DecoderStats)>,
    frames_read: usize,
    lines_skipped: usize,
}

/// Decode a set of log files in parallel, printing results in input order
///
/// Every file gets its own registry, so the output for a file depends only
/// on that file's frames.
fn decode_files(
    files: &[PathBuf],
    app: &config::AppConfig,
    max_frames: Option<usize>,
) -> Result<()> {
    let reports: Vec<Result<FileReport>> = files
        .par_iter()
        .map(|path| decode_file(path, app, max_frames))
        .collect();

    let stdout = io::stdout();
    let mut out = stdout.lock();
    let mut failed = 0usize;
    for (path, report) in files.iter().zip(reports) {
        match report {
            Ok(report) => print_report(&mut out, &report, app, files.len() > 1)?,
            Err(e) => {
                failed += 1;
                log::error!("{:?}: {:#}", path, e);
            }
        }
    }

    if failed > 0 {
        anyhow::bail!("{} of {} inputs failed to decode", failed, files.len());
    }
    Ok(())
}

/// Decode one candump log with a fresh registry
fn decode_file(
    path: &Path,
    app: &config::AppConfig,
    max_frames: Option<usize>,
) -> Result<FileReport> {
    let file =
        File::open(path).with_context(|| format!("Failed to open log file: {:?}", path))?;
    let (frames, lines_skipped) = input::read_frames(BufReader::new(file), max_frames)
        .with_context(|| format!("Failed to read log file: {:?}", path))?;

    let mut registry = DecoderRegistry::from_config(&app.engine);
    let mut lines = Vec::new();
    for frame in &frames {
        for message in registry.dispatch(frame) {
            lines.push(output::render_message(&message, &app.output)?);
        }
    }

    // A terminal sweep so streams cut off by the end of the log are counted
    // as timed out instead of lingering as active
    if let Some(last) = frames.last() {
        let horizon = last
            .timestamp_ns
            .saturating_add(app.engine.stream_timeout_ns())
            .saturating_add(1);
        registry.sweep(horizon);
    }

    Ok(FileReport {
        path: path.to_path_buf(),
        lines,
        stats: registry.stats(),
        frames_read: frames.len(),
        lines_skipped,
    })
}

fn print_report<W: Write>(
    out: &mut W,
    report: &FileReport,
    app: &config::AppConfig,
    banner: bool,
) -> Result<()> {
    let json = app.output.format == config::OutputFormat::Json;

    if banner && !json {
        writeln!(out, "═══════════════════════════════════════════════")?;
        writeln!(out, "  {}", report.path.display())?;
        writeln!(out, "═══════════════════════════════════════════════")?;
    }

    for line in &report.lines {
        writeln!(out, "{}", line)?;
    }

    if app.output.stats {
        if json {
            writeln!(out, "{}", output::render_stats_json(&report.stats)?)?;
        } else {
            writeln!(out)?;
            writeln!(
                out,
                "📊 {} frames read, {} lines skipped",
                report.frames_read, report.lines_skipped
            )?;
            write!(out, "{}", output::render_stats(&report.stats))?;
        }
    }
    Ok(())
}

/// Stream frames from stdin through the bounded decode worker
///
/// Decoded messages are printed from the worker thread as they complete, so
/// a stalled terminal slows printing but never frame intake.
fn stream_stdin(app: &config::AppConfig, max_frames: Option<usize>) -> Result<()> {
    let registry = DecoderRegistry::from_config(&app.engine);
    let output_config = app.output.clone();
    let worker = DecodeWorker::spawn(registry, DEFAULT_QUEUE_CAPACITY, move |message| {
        match output::render_message(&message, &output_config) {
            Ok(line) => println!("{}", line),
            Err(e) => log::error!("Dropping unrenderable message: {:#}", e),
        }
    });

    let stdin = io::stdin();
    let mut offered = 0usize;
    let mut skipped = 0usize;
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read from stdin")?;
        match input::parse_line(&line) {
            input::ParsedLine::Frame(frame) => {
                worker.feed(frame)?;
                offered += 1;
                if let Some(max) = max_frames {
                    if offered >= max {
                        break;
                    }
                }
            }
            input::ParsedLine::Ignored => {}
            input::ParsedLine::Invalid(issue) => {
                skipped += 1;
                log::debug!("Skipping unparseable line {:?}: {}", line, issue);
            }
        }
    }

    let dropped = worker.dropped();
    let stats = worker.shutdown();

    if app.output.stats {
        match app.output.format {
            config::OutputFormat::Json => println!("{}", output::render_stats_json(&stats)?),
            config::OutputFormat::Text => {
                println!();
                println!(
                    "📊 {} frames offered, {} lines skipped, {} dropped",
                    offered, skipped, dropped
                );
                print!("{}", output::render_stats(&stats));
            }
        }
    }
    Ok(())
}

/// Initialize logging based on verbosity level
fn init_logging(verbose: u8, quiet: bool) {
    use env_logger::Builder;
    use log::LevelFilter;

    let level = if quiet {
        LevelFilter::Error
    } else {
        match verbose {
            0 => LevelFilter::Info,
            1 => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        }
    };

    Builder::new()
        .filter_level(level)
        .format(|buf, record| {
            writeln!(
                buf,
                "[{} {}] {}",
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
