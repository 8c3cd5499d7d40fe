//! CLI entry point for vidsplit
//!
//! Parses command line arguments, installs logging and serves the API.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use vidsplit::{Config, Service};

/// vidsplit - split videos into segments and merge them back, over HTTP
#[derive(Parser, Debug)]
#[command(name = "vidsplit")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file (a missing file means defaults)
    #[arg(short, long, default_value = "vidsplit.toml")]
    config: PathBuf,

    /// Skip startup checks (ffmpeg, ffprobe, yt-dlp). For testing only.
    #[arg(long, default_value = "false")]
    skip_checks: bool,

    /// Emit logs as JSON lines
    #[arg(long, default_value = "false")]
    log_json: bool,
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.log_json);

    let config = match Config::load_or_default(&args.config) {
        Ok(config) => config,
        Err(e) => {
            error!(config = %args.config.display(), error = %e, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };
    info!(config = %args.config.display(), "vidsplit starting");

    let service = if args.skip_checks {
        warn!("skipping startup checks (--skip-checks enabled)");
        Service::new_without_checks(config)
    } else {
        Service::new(config).await
    };

    match service {
        Ok(service) => {
            if let Err(e) = service.run().await {
                error!(error = %e, "server error");
                return ExitCode::FAILURE;
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!(error = %e, "failed to initialize service");
            ExitCode::FAILURE
        }
    }
}
