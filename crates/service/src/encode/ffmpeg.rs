//! ffmpeg encoder module for vidsplit
//!
//! Builds the segment and concatenation commands with fixed H.264/AAC
//! settings and runs them as child processes with a timeout.

use super::{EncodeError, EncoderSettings, MediaToolkit};
use crate::probe::{probe_media, MediaInfo};
use crate::segments::SegmentSpan;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::Duration;
use tracing::debug;

/// Number of trailing stderr lines kept in error messages
const STDERR_TAIL_LINES: usize = 5;

/// Format a timestamp in seconds for ffmpeg
fn format_secs(secs: f64) -> String {
    format!("{:.6}", secs)
}

/// Append the shared video/audio encoding flags
///
/// GOP length equals the frame rate and scene-cut keyframes are disabled, so
/// together with the forced keyframe expression every output second starts
/// on a keyframe.
fn push_encode_args(cmd: &mut Command, settings: &EncoderSettings) {
    let fps = settings.fps.to_string();
    cmd.arg("-r").arg(&fps);
    cmd.arg("-c:v").arg(&settings.video_codec);
    cmd.arg("-preset").arg(&settings.preset);
    cmd.arg("-crf").arg(settings.crf.to_string());
    cmd.arg("-g").arg(&fps);
    cmd.arg("-keyint_min").arg(&fps);
    cmd.arg("-sc_threshold").arg("0");
    cmd.arg("-force_key_frames").arg("expr:gte(t,n_forced*1)");
    cmd.arg("-c:a").arg(&settings.audio_codec);
    cmd.arg("-b:a").arg(&settings.audio_bitrate);
    cmd.arg("-movflags").arg("+faststart");
}

/// Build an ffmpeg command producing one segment
///
/// Always re-encodes: stream-copy cut points snap to keyframes and cannot be
/// frame exact. The frame count is pinned with `-frames:v` so the clip ends
/// exactly on the planned boundary.
pub fn build_segment_command(
    settings: &EncoderSettings,
    input: &Path,
    output: &Path,
    span: &SegmentSpan,
) -> Command {
    let mut cmd = Command::new(&settings.ffmpeg_path);
    cmd.arg("-y").arg("-v").arg("error");
    cmd.arg("-ss").arg(format_secs(span.start_secs()));
    cmd.arg("-i").arg(input);
    cmd.arg("-t").arg(format_secs(span.duration_secs()));
    cmd.arg("-frames:v").arg(span.frame_count.to_string());
    push_encode_args(&mut cmd, settings);
    cmd.arg(output);
    cmd
}

/// Build the stream-copy concat command (fast path)
pub fn build_concat_command(settings: &EncoderSettings, manifest: &Path, output: &Path) -> Command {
    let mut cmd = Command::new(&settings.ffmpeg_path);
    cmd.arg("-y").arg("-v").arg("error");
    cmd.arg("-f").arg("concat").arg("-safe").arg("0");
    cmd.arg("-i").arg(manifest);
    cmd.arg("-c").arg("copy");
    cmd.arg("-movflags").arg("+faststart");
    cmd.arg(output);
    cmd
}

/// Build the re-encoding concat command (fallback)
pub fn build_concat_reencode_command(
    settings: &EncoderSettings,
    manifest: &Path,
    output: &Path,
) -> Command {
    let mut cmd = Command::new(&settings.ffmpeg_path);
    cmd.arg("-y").arg("-v").arg("error");
    cmd.arg("-f").arg("concat").arg("-safe").arg("0");
    cmd.arg("-i").arg(manifest);
    push_encode_args(&mut cmd, settings);
    cmd.arg(output);
    cmd
}

/// One manifest line for the concat demuxer
pub fn manifest_line(path: &Path) -> String {
    let escaped = path.to_string_lossy().replace('\'', "'\\''");
    format!("file '{}'", escaped)
}

/// Resolve a manifest entry to an absolute path
async fn absolute_path(path: &Path) -> PathBuf {
    match tokio::fs::canonicalize(path).await {
        Ok(p) => p,
        Err(_) if path.is_relative() => std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}

/// Write the concat manifest listing `inputs` in order
pub async fn write_concat_manifest(inputs: &[PathBuf], manifest: &Path) -> Result<(), EncodeError> {
    let mut content = String::new();
    for input in inputs {
        content.push_str(&manifest_line(&absolute_path(input).await));
        content.push('\n');
    }
    tokio::fs::write(manifest, content).await?;
    Ok(())
}

/// Last few lines of a tool's stderr
fn stderr_tail(stderr: &[u8]) -> String {
    let text = String::from_utf8_lossy(stderr);
    let lines: Vec<&str> = text.lines().filter(|l| !l.trim().is_empty()).collect();
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

/// Execute a tool command, killing it if it outlives `timeout`
///
/// # Errors
/// Returns an error if:
/// - The process fails to start (IO error)
/// - The process exits with non-zero status
/// - The process is terminated by a signal
/// - The timeout elapses
pub async fn run_tool(cmd: Command, timeout: Duration) -> Result<(), EncodeError> {
    let tool = Path::new(cmd.get_program())
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| cmd.get_program().to_string_lossy().into_owned());
    debug!(command = ?cmd, "running {}", tool);

    let mut cmd = tokio::process::Command::from(cmd);
    cmd.stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn()?;
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result?,
        // Dropping the wait future drops the child, which kills it.
        Err(_) => return Err(EncodeError::Timeout { tool, timeout }),
    };

    if output.status.success() {
        Ok(())
    } else {
        match output.status.code() {
            Some(code) => Err(EncodeError::ToolFailed {
                tool,
                code,
                stderr: stderr_tail(&output.stderr),
            }),
            None => Err(EncodeError::Terminated(tool)),
        }
    }
}

/// Fail with `MissingOutput` unless `path` exists and is non-empty
pub async fn ensure_output(path: &Path) -> Result<(), EncodeError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() && meta.len() > 0 => Ok(()),
        _ => Err(EncodeError::MissingOutput(path.to_path_buf())),
    }
}

/// Production [`MediaToolkit`] backed by ffmpeg and ffprobe
#[derive(Debug, Clone)]
pub struct FfmpegToolkit {
    settings: EncoderSettings,
}

impl FfmpegToolkit {
    pub fn new(settings: EncoderSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &EncoderSettings {
        &self.settings
    }
}

#[async_trait]
impl MediaToolkit for FfmpegToolkit {
    async fn probe(&self, path: &Path) -> MediaInfo {
        probe_media(&self.settings.ffprobe_path, path, self.settings.probe_timeout).await
    }

    async fn encode_segment(
        &self,
        input: &Path,
        output: &Path,
        span: &SegmentSpan,
    ) -> Result<(), EncodeError> {
        let cmd = build_segment_command(&self.settings, input, output, span);
        run_tool(cmd, self.settings.segment_timeout).await?;
        ensure_output(output).await
    }

    async fn concat(
        &self,
        _inputs: &[PathBuf],
        manifest: &Path,
        output: &Path,
    ) -> Result<(), EncodeError> {
        let cmd = build_concat_command(&self.settings, manifest, output);
        run_tool(cmd, self.settings.concat_timeout).await?;
        ensure_output(output).await
    }

    async fn concat_reencode(
        &self,
        _inputs: &[PathBuf],
        manifest: &Path,
        output: &Path,
    ) -> Result<(), EncodeError> {
        let cmd = build_concat_reencode_command(&self.settings, manifest, output);
        run_tool(cmd, self.settings.reencode_timeout).await?;
        ensure_output(output).await
    }
}
