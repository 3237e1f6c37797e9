//! FileIngest CLI
//!
//! Plans, executes and inspects balanced ingest jobs.

use clap::Parser;
use fileingest::config::{
    CliArgs, Commands, ConnectArgs, LogFormat, OutputFormat, SinkArgs, SinkConfig, SourceArgs,
    SourceConfig,
};
use fileingest::core::{balance, dispatch, CopyEngine, DispatchOptions, PlanSummary, WorkUnit};
use fileingest::error::Result;
use fileingest::fs::Scanner;
use fileingest::progress::ProgressReporter;
use fileingest::storage::DefaultConnector;
use fileingest::wire::{read_unit_file, write_plan};
use serde::Serialize;
use std::path::Path;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

fn main() {
    let args = CliArgs::parse();
    init_logging(&args);

    if let Err(e) = run(args) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

/// RUST_LOG wins; otherwise `-v` picks the level
fn init_logging(args: &CliArgs) {
    let level = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    match args.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

fn run(args: CliArgs) -> Result<()> {
    let format = args.output_format;
    let show_progress = !args.quiet && format == OutputFormat::Text;

    match &args.command {
        Commands::Plan {
            source,
            output,
            connect,
        } => cmd_plan(source, output, connect, format, args.quiet),
        Commands::Copy {
            unit,
            sink,
            connect,
        } => cmd_copy(unit, sink, connect, format, show_progress),
        Commands::Run {
            source,
            sink,
            threads,
            retries,
            connect,
        } => {
            let options = DispatchOptions {
                threads: *threads,
                retries: *retries,
            };
            cmd_run(source, sink, connect, options, format, show_progress)
        }
        Commands::Inspect { unit } => cmd_inspect(unit, format),
    }
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Discover the source and balance it into units
fn plan_units(source: &SourceConfig, connector: &DefaultConnector) -> Result<Vec<WorkUnit>> {
    let scanner = Scanner::new(connector, source.host.clone(), source.credentials.clone());
    let scan = scanner.discover(&source.roots, source.recursive)?;
    if scan.missing_roots.len() == source.roots.len() {
        tracing::warn!("None of the configured source roots exist");
    }
    balance(scan.into_entries(), source.max_entries_per_unit)
}

fn cmd_plan(
    source: &SourceArgs,
    output: &Path,
    connect: &ConnectArgs,
    format: OutputFormat,
    quiet: bool,
) -> Result<()> {
    let source = SourceConfig::from_args(source)?;
    let connector = DefaultConnector::new(connect.to_options());

    let units = plan_units(&source, &connector)?;
    let files = write_plan(output, &units)?;
    let summary = PlanSummary::from_units(&units);

    match format {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Text if !quiet => {
            summary.print_summary();
            println!();
            println!("Wrote {} unit files to {}", files.len(), output.display());
        }
        OutputFormat::Text => {}
    }
    Ok(())
}

fn cmd_copy(
    unit_file: &Path,
    sink: &SinkArgs,
    connect: &ConnectArgs,
    format: OutputFormat,
    show_progress: bool,
) -> Result<()> {
    let sink = SinkConfig::from_args(sink)?;
    let unit = read_unit_file(unit_file)?;
    let connector = DefaultConnector::new(connect.to_options());

    let progress = Arc::new(if show_progress {
        ProgressReporter::new()
    } else {
        ProgressReporter::disabled()
    });
    progress.set_plan(1, unit.len() as u64, unit.total_bytes());
    progress.set_status(&format!("Copying {}", unit_file.display()));

    let engine = CopyEngine::new(sink, &connector).with_progress(progress.clone());
    let report = match engine.execute(&unit) {
        Ok(report) => {
            progress.unit_done(true);
            progress.finish_success("Unit complete");
            report
        }
        Err(e) => {
            progress.unit_done(false);
            progress.finish_error("Unit failed");
            return Err(e);
        }
    };

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text if show_progress => report.print_summary(),
        OutputFormat::Text => {}
    }
    Ok(())
}

fn cmd_run(
    source: &SourceArgs,
    sink: &SinkArgs,
    connect: &ConnectArgs,
    options: DispatchOptions,
    format: OutputFormat,
    show_progress: bool,
) -> Result<()> {
    // Both sides are validated before discovery starts
    let source = SourceConfig::from_args(source)?;
    let sink = SinkConfig::from_args(sink)?;
    let connector = DefaultConnector::new(connect.to_options());

    let progress = Arc::new(if show_progress {
        ProgressReporter::new()
    } else {
        ProgressReporter::disabled()
    });
    progress.set_status("Discovering source entries...");

    let units = plan_units(&source, &connector)?;
    let plan = PlanSummary::from_units(&units);
    progress.set_plan(plan.units as u64, plan.entries as u64, plan.total_bytes);
    progress.set_status("Copying work units...");

    let engine = CopyEngine::new(sink, &connector).with_progress(progress.clone());
    let report = dispatch(&engine, &units, options)?;
    let summary = report.summary();

    if report.is_success() {
        progress.finish_success("Ingest complete");
    } else {
        progress.finish_error(&format!("{} of {} units failed", summary.failed, summary.units));
    }

    match format {
        OutputFormat::Json => print_json(&summary)?,
        OutputFormat::Text if show_progress => {
            plan.print_summary();
            println!();
            summary.print_summary();
        }
        OutputFormat::Text => {}
    }

    if !report.is_success() {
        std::process::exit(1);
    }
    Ok(())
}

fn cmd_inspect(unit_file: &Path, format: OutputFormat) -> Result<()> {
    let unit = read_unit_file(unit_file)?;

    if format == OutputFormat::Json {
        return print_json(&unit);
    }

    println!(
        "{}: {} entries, {} ({:?} credentials)",
        unit_file.display(),
        unit.len(),
        humansize::format_size(unit.total_bytes(), humansize::BINARY),
        unit.credential_kind()?
    );
    for entry in unit.entries() {
        println!(
            "{}{:04o} {:>8}:{:<8} {:>12}  {}{} -> {}",
            if entry.is_dir() { 'd' } else { '-' },
            entry.permission(),
            entry.owner(),
            entry.group(),
            entry.file_size(),
            entry.host_uri(),
            entry.full_path().trim_start_matches('/'),
            entry.relative_path()
        );
    }
    Ok(())
}
