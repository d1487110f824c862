use anyhow::{Context, Result};
use clap::Parser;
use converter::report::{build_report, delete_suspicious, DEFAULT_REPORT_PATTERN};
use std::path::PathBuf;
use log::info;

/// Audit a converted library for missing and suspiciously small MP4 files
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory to scan recursively
    path: PathBuf,

    /// Delete MP4 files smaller than two thirds of their original
    #[arg(short = 'd', long)]
    delete_suspiciously_small_files: bool,

    /// Originals to audit (repeatable)
    #[arg(long = "pattern", default_value = DEFAULT_REPORT_PATTERN)]
    patterns: Vec<String>,

    /// Print the report as JSON instead of text
    #[arg(long)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();

    let report = build_report(&args.path, &args.patterns)
        .with_context(|| format!("Failed to scan {}", args.path.display()))?;

    if args.delete_suspiciously_small_files {
        let deleted = delete_suspicious(&report);
        info!("Deleted {} of {} suspicious files", deleted.len(), report.suspicious.len());
    }

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.render(args.delete_suspiciously_small_files));
    }

    Ok(())
}
