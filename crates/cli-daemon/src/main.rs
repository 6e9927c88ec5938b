//! CLI entry point for recast
//!
//! Parses command line arguments, initialises logging and either runs the
//! sweep daemon or inspects a single segment.

use clap::{Parser, Subcommand};
use recast::{Config, Daemon, DaemonError, Pipeline};
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Recast - convert finished recordings into a media library
#[derive(Parser, Debug)]
#[command(name = "recast")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (config.toml)
    #[arg(short, long, default_value = "config.toml", global = true)]
    config: PathBuf,

    /// Emit logs as JSON instead of plain text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sweep every configured segment, then idle and repeat
    Run {
        /// Perform a single sweep and exit
        #[arg(long)]
        once: bool,

        /// Skip startup checks (tool availability). For testing only.
        #[arg(long)]
        skip_checks: bool,
    },
    /// Print every pending recording in a segment as JSON lines
    Inspect {
        /// Segment name relative to the source root, e.g. "TV Shows/"
        segment: String,
    },
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run(config: PathBuf, once: bool, skip_checks: bool) -> ExitCode {
    let daemon_result = if skip_checks {
        warn!("skipping startup checks (--skip-checks enabled)");
        Config::load(&config)
            .map(Daemon::new_without_checks)
            .map_err(DaemonError::from)
    } else {
        Daemon::new(&config)
    };

    let daemon = match daemon_result {
        Ok(daemon) => daemon,
        Err(e) => {
            error!(error = %e, "failed to initialize daemon");
            return ExitCode::FAILURE;
        }
    };
    info!(config = %config.display(), "daemon initialized");

    let result = if once {
        daemon.run_once().await.map(|_| ())
    } else {
        daemon.run().await
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "daemon error");
            ExitCode::FAILURE
        }
    }
}

async fn inspect(config: PathBuf, segment: String) -> ExitCode {
    let config = match Config::load(&config) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "failed to load config");
            return ExitCode::FAILURE;
        }
    };
    let pipeline = Pipeline::with_process_runner(config);
    let segment = pipeline.segment(&segment);
    if !segment.source_root.is_dir() {
        error!(root = %segment.source_root.display(), "segment root does not exist");
        return ExitCode::FAILURE;
    }

    let records = pipeline.inspect_segment(&segment).await;
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for record in &records {
        if let Err(e) = record.write_json_line(&mut out) {
            error!(error = %e, "failed to write record");
            return ExitCode::FAILURE;
        }
    }
    if let Err(e) = out.flush() {
        error!(error = %e, "failed to flush output");
        return ExitCode::FAILURE;
    }
    info!(segment = %segment.name, records = records.len(), "inspection complete");
    ExitCode::SUCCESS
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.json);

    match args.command {
        Command::Run { once, skip_checks } => run(args.config, once, skip_checks).await,
        Command::Inspect { segment } => inspect(args.config, segment).await,
    }
}
