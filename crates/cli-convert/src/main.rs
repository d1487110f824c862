use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use converter::{
    classifier::plan_jobs,
    config::{ConvertConfig, MAX_CRF},
    dispatcher::{self, default_concurrency},
    ffmpeg::FfmpegEncoder,
    lifecycle::{LifecycleGuard, ShutdownTrigger},
    process::SystemProcessTable,
    scan,
    executor::Executor,
};
use std::path::PathBuf;
use std::sync::Arc;
use log::{debug, error, info};
use tokio::signal;

/// Remux transport streams and transcode everything else to MP4
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory to scan recursively for files to convert
    path: Option<PathBuf>,

    /// Delete each original once its MP4 has been written
    #[arg(short = 'r', long)]
    remove_original_after_converting: bool,

    /// Convert again even when a non-empty MP4 already exists
    #[arg(short = 'o', long)]
    overwrite_existing: bool,

    /// x264 constant rate factor for transcodes (lower is better quality)
    #[arg(long, value_parser = clap::value_parser!(u8).range(0..=MAX_CRF as i64))]
    crf: Option<u8>,

    /// Number of conversions to run at once
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Path to configuration file (JSON or TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

/// What to do once the arguments are parsed
#[derive(Debug, PartialEq, Eq)]
enum Startup {
    Convert(PathBuf),
    /// Print `text` and exit with `code`
    Usage { code: i32, text: String },
}

fn startup(args: &Args) -> Startup {
    match &args.path {
        Some(root) => Startup::Convert(root.clone()),
        None => Startup::Usage {
            code: 1,
            text: Args::command().render_help().to_string(),
        },
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over --verbose
    let default_level = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
        .format_timestamp_secs()
        .init();

    let root = match startup(&args) {
        Startup::Convert(root) => root,
        Startup::Usage { code, text } => {
            print!("{}", text);
            std::process::exit(code);
        }
    };

    let cfg = ConvertConfig::load_config(args.config.as_deref())
        .context("Failed to load configuration")?;
    debug!("Configuration: {:?}", cfg);

    let inputs = scan::find_files_to_convert(&root, &cfg.input_patterns)
        .with_context(|| format!("Failed to scan {}", root.display()))?;
    let plan = plan_jobs(
        inputs,
        args.remove_original_after_converting,
        args.overwrite_existing,
        args.crf,
    );

    let encoder = FfmpegEncoder::new(&cfg);
    if !plan.queued.is_empty() {
        let version = encoder
            .detect_version()
            .await
            .with_context(|| format!("FFmpeg not usable at {}", cfg.ffmpeg_bin.display()))?;
        info!("Using FFmpeg {}", version);
    }

    let concurrency = args
        .jobs
        .or(cfg.jobs)
        .unwrap_or_else(|| default_concurrency(&plan));
    info!("Converting {} files, {} at a time", plan.queued.len(), concurrency.max(1));

    let guard = Arc::new(LifecycleGuard::new(
        cfg.encoder_process_name.clone(),
        Box::new(SystemProcessTable::new()),
    ));
    let executor = Arc::new(Executor::new(encoder, guard.clone(), cfg.default_crf));
    let already_converted = plan.skipped.len();

    let dispatch = dispatcher::run(plan.queued, concurrency, executor);
    tokio::pin!(dispatch);

    tokio::select! {
        mut summary = &mut dispatch => {
            summary.skipped_existing += already_converted;
            summary.log();
            shutdown(guard.clone(), ShutdownTrigger::Exit).await;
        }
        _ = shutdown_signal() => {
            // Kill children and delete outputs while the workers still exist
            shutdown(guard.clone(), ShutdownTrigger::Interrupt).await;
            // in-flight workers see the cancellation and remove their own outputs
            let mut summary = (&mut dispatch).await;
            summary.skipped_existing += already_converted;
            summary.log();
        }
    }

    Ok(())
}

/// Run the guard's cleanup off the async workers; it blocks on killed children
async fn shutdown(guard: Arc<LifecycleGuard>, trigger: ShutdownTrigger) {
    match tokio::task::spawn_blocking(move || guard.shutdown(trigger)).await {
        Ok(Some(report)) => debug!("Shutdown ({}) report: {:?}", trigger, report),
        Ok(None) => {}
        Err(e) => error!("Cleanup task failed: {}", e),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
