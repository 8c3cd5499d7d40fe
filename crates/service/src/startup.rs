//! Startup checks module for vidsplit
//!
//! Provides preflight checks to verify system requirements before serving:
//! - ffmpeg and ffprobe availability (required)
//! - downloader availability (optional, warns only)
//! - upload, output and state directories exist

use crate::config::Config;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;
use tracing::{info, warn};

/// Error types for startup checks
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("{program} not available: {message}")]
    ToolUnavailable { program: String, message: String },

    #[error("failed to create directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// What the preflight checks found
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolReport {
    /// Major ffmpeg version, when the banner could be parsed
    pub ffmpeg_major: Option<u32>,
    /// Whether platform downloads can work
    pub downloader_available: bool,
}

/// Run `<program> <version_flag>` and return its stdout
pub fn check_tool_available(program: &str, version_flag: &str) -> Result<String, StartupError> {
    let output = Command::new(program)
        .arg(version_flag)
        .output()
        .map_err(|e| StartupError::ToolUnavailable {
            program: program.to_string(),
            message: format!("{} {} failed; is it installed and in PATH? Error: {}", program, version_flag, e),
        })?;

    if !output.status.success() {
        return Err(StartupError::ToolUnavailable {
            program: program.to_string(),
            message: format!("{} {} exited with {}", program, version_flag, output.status),
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Parse FFmpeg version string and extract major version number
///
/// Handles various FFmpeg version formats:
/// - Standard: "ffmpeg version 6.1 ..."
/// - N-prefixed: "ffmpeg version n6.1-... ..."
pub fn parse_ffmpeg_version(version_output: &str) -> Option<u32> {
    let version_line = version_output
        .lines()
        .find(|line| line.to_lowercase().contains("ffmpeg version"))?;

    let version_part = version_line
        .to_lowercase()
        .split("ffmpeg version")
        .nth(1)?
        .split_whitespace()
        .next()?
        .to_string();

    let version_str = version_part.trim_start_matches('n');
    let major_str = version_str.split(['.', '-']).next()?;

    major_str.parse().ok()
}

fn create_dir(path: &Path) -> Result<(), StartupError> {
    std::fs::create_dir_all(path).map_err(|source| StartupError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

/// Create the upload, output and state directories when missing
pub fn ensure_directories(cfg: &Config) -> Result<(), StartupError> {
    create_dir(&cfg.storage.upload_dir)?;
    create_dir(&cfg.storage.output_dir)?;
    if let Some(state_dir) = &cfg.storage.state_dir {
        create_dir(state_dir)?;
    }
    Ok(())
}

/// Run all startup checks in order
///
/// 1. ffmpeg (version logged)
/// 2. ffprobe
/// 3. downloader, a warning when absent
/// 4. directories
pub fn run_startup_checks(cfg: &Config) -> Result<ToolReport, StartupError> {
    let banner = check_tool_available(&cfg.encoder.ffmpeg_path, "-version")?;
    let ffmpeg_major = parse_ffmpeg_version(&banner);
    match ffmpeg_major {
        Some(major) => info!(ffmpeg = %cfg.encoder.ffmpeg_path, major, "ffmpeg found"),
        None => warn!(ffmpeg = %cfg.encoder.ffmpeg_path, "could not parse ffmpeg version"),
    }

    check_tool_available(&cfg.encoder.ffprobe_path, "-version")?;

    let downloader_available = match check_tool_available(&cfg.social.downloader_path, "--version") {
        Ok(_) => true,
        Err(e) => {
            warn!(error = %e, "platform downloads will fail until the downloader is installed");
            false
        }
    };

    ensure_directories(cfg)?;

    Ok(ToolReport {
        ffmpeg_major,
        downloader_available,
    })
}
