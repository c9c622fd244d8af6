use std::io::Write;
use std::process::ExitCode;
use std::thread;

use camino::{Utf8Path, Utf8PathBuf};
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use tracing_subscriber::EnvFilter;

use tarkv::extract::{ExtractEngine, ExtractReport};
use tarkv::fs_util;
use tarkv::ingest::{IngestEngine, IngestReport};
use tarkv::kv::{KeyValueStore, RocksStore};
use tarkv::output::{JsonOutput, OutputMode};
use tarkv::progress::StderrProgress;

const FAILURE_SAMPLE: usize = 10;

#[derive(Parser)]
#[command(name = "tarkv")]
#[command(about = "Index tar archive members into an embedded key-value store and bulk-extract them by key")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Ingest every archive member into a key-value store")]
    Ingest(IngestArgs),
    #[command(about = "Extract a list of keys from a store into a directory")]
    Extract(ExtractArgs),
    #[command(about = "Print every key in a store in byte order")]
    Keys(KeysArgs),
}

#[derive(Args)]
struct IngestArgs {
    #[arg(long)]
    archive: Utf8PathBuf,

    #[arg(long)]
    store: Utf8PathBuf,

    #[arg(long)]
    workers: Option<usize>,
}

#[derive(Args)]
struct ExtractArgs {
    #[arg(long)]
    store: Utf8PathBuf,

    #[arg(long)]
    keys: Utf8PathBuf,

    #[arg(long)]
    out: Utf8PathBuf,

    #[arg(long)]
    workers: Option<usize>,
}

#[derive(Args)]
struct KeysArgs {
    #[arg(long)]
    store: Utf8PathBuf,
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.json {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    match cli.command {
        Commands::Ingest(args) => run_ingest(args, output_mode),
        Commands::Extract(args) => run_extract(args, output_mode),
        Commands::Keys(args) => run_keys(args),
    }
}

fn resolve_workers(requested: Option<usize>) -> usize {
    requested.filter(|count| *count > 0).unwrap_or_else(|| {
        thread::available_parallelism()
            .map(|count| count.get())
            .unwrap_or(1)
    })
}

fn run_ingest(args: IngestArgs, output_mode: OutputMode) -> miette::Result<()> {
    let workers = resolve_workers(args.workers);
    let store = RocksStore::open_for_write(args.store.as_std_path()).into_diagnostic()?;
    let engine = IngestEngine::new(store, workers);

    match output_mode {
        OutputMode::NonInteractive => {
            let report = engine.run(&args.archive, &JsonOutput).into_diagnostic()?;
            JsonOutput::print_ingest(&report).into_diagnostic()?;
        }
        OutputMode::Interactive => {
            let report = engine.run(&args.archive, &StderrProgress).into_diagnostic()?;
            print_ingest_summary(&args.archive, &report);
        }
    }
    Ok(())
}

fn run_extract(args: ExtractArgs, output_mode: OutputMode) -> miette::Result<()> {
    let workers = resolve_workers(args.workers);
    let keys = fs_util::read_key_list(&args.keys).into_diagnostic()?;
    let store = RocksStore::open_read_only(args.store.as_std_path()).into_diagnostic()?;
    let engine = ExtractEngine::new(store, workers);

    match output_mode {
        OutputMode::NonInteractive => {
            let report = engine.run(&keys, &args.out, &JsonOutput).into_diagnostic()?;
            JsonOutput::print_extract(&report).into_diagnostic()?;
        }
        OutputMode::Interactive => {
            let report = engine
                .run(&keys, &args.out, &StderrProgress)
                .into_diagnostic()?;
            print_extract_summary(&args.out, &report);
        }
    }
    Ok(())
}

fn run_keys(args: KeysArgs) -> miette::Result<()> {
    let store = RocksStore::open_read_only(args.store.as_std_path()).into_diagnostic()?;
    let keys = store.keys().into_diagnostic()?;
    let mut stdout = std::io::stdout().lock();
    for key in keys {
        stdout.write_all(&key).into_diagnostic()?;
        stdout.write_all(b"\n").into_diagnostic()?;
    }
    Ok(())
}

fn print_ingest_summary(archive: &Utf8Path, report: &IngestReport) {
    println!(
        "[+] Indexed {} of {} members from '{archive}'",
        report.succeeded, report.total
    );
    if report.failed.is_empty() {
        println!("[v] Ingest complete.");
    } else {
        println!("[!] {} members failed:", report.failed.len());
        for failure in report.failed.iter().take(FAILURE_SAMPLE) {
            println!("    {}: {}", failure.key, failure.error);
        }
        if report.failed.len() > FAILURE_SAMPLE {
            println!("    ... and {} more", report.failed.len() - FAILURE_SAMPLE);
        }
    }
}

fn print_extract_summary(out: &Utf8Path, report: &ExtractReport) {
    println!(
        "[+] Extracted {} of {} requested keys into '{out}'",
        report.extracted, report.requested
    );
    if !report.missing.is_empty() {
        println!("[!] {} keys not found in store:", report.missing.len());
        for key in report.missing.iter().take(FAILURE_SAMPLE) {
            println!("    {key}");
        }
        if report.missing.len() > FAILURE_SAMPLE {
            println!("    ... and {} more", report.missing.len() - FAILURE_SAMPLE);
        }
    }
    if !report.failed.is_empty() {
        println!("[!] {} keys failed:", report.failed.len());
        for failure in report.failed.iter().take(FAILURE_SAMPLE) {
            println!("    {}: {}", failure.key, failure.error);
        }
        if report.failed.len() > FAILURE_SAMPLE {
            println!("    ... and {} more", report.failed.len() - FAILURE_SAMPLE);
        }
    }
    if report.missing.is_empty() && report.failed.is_empty() {
        println!("[v] Extraction complete.");
    }
}
