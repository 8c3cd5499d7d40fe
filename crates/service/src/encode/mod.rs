//! Encoding modules for vidsplit
//!
//! The orchestrator talks to the external encoder only through
//! [`MediaToolkit`], so jobs can be exercised without ffmpeg installed.

pub mod ffmpeg;

use crate::config::EncoderConfig;
use crate::probe::MediaInfo;
use crate::segments::SegmentSpan;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

pub use ffmpeg::{
    build_concat_command, build_concat_reencode_command, build_segment_command, run_tool,
    write_concat_manifest, FfmpegToolkit,
};

/// File name of the concat manifest inside a merge scratch directory.
pub const MANIFEST_FILE_NAME: &str = "concat_list.txt";

/// Error type for encoding operations
#[derive(Debug, Error)]
pub enum EncodeError {
    /// Tool exited with non-zero status
    #[error("{tool} failed with exit code {code}: {stderr}")]
    ToolFailed {
        tool: String,
        code: i32,
        stderr: String,
    },

    /// Tool was terminated by signal
    #[error("{0} process was terminated by signal")]
    Terminated(String),

    /// Tool outlived its timeout and was killed
    #[error("{tool} timed out after {timeout:?}")]
    Timeout { tool: String, timeout: Duration },

    /// Tool reported success but the expected file is absent or empty
    #[error("no output produced at {0}")]
    MissingOutput(PathBuf),

    /// IO error during encoding
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Fixed encoder parameters shared by segment and concat invocations.
#[derive(Debug, Clone, PartialEq)]
pub struct EncoderSettings {
    pub ffmpeg_path: String,
    pub ffprobe_path: String,
    pub fps: u32,
    pub video_codec: String,
    pub preset: String,
    pub crf: u8,
    pub audio_codec: String,
    pub audio_bitrate: String,
    pub segment_timeout: Duration,
    pub concat_timeout: Duration,
    pub reencode_timeout: Duration,
    pub probe_timeout: Duration,
}

impl EncoderSettings {
    pub fn from_config(cfg: &EncoderConfig) -> Self {
        Self {
            ffmpeg_path: cfg.ffmpeg_path.clone(),
            ffprobe_path: cfg.ffprobe_path.clone(),
            fps: cfg.fps.max(1),
            video_codec: cfg.video_codec.clone(),
            preset: cfg.preset.clone(),
            crf: cfg.crf,
            audio_codec: cfg.audio_codec.clone(),
            audio_bitrate: cfg.audio_bitrate.clone(),
            segment_timeout: Duration::from_secs(cfg.segment_timeout_secs),
            concat_timeout: Duration::from_secs(cfg.concat_timeout_secs),
            reencode_timeout: Duration::from_secs(cfg.reencode_timeout_secs),
            probe_timeout: Duration::from_secs(cfg.probe_timeout_secs),
        }
    }
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self::from_config(&EncoderConfig::default())
    }
}

/// External media capabilities used by jobs.
#[async_trait]
pub trait MediaToolkit: Send + Sync {
    /// Probe a file. Never fails; unknown metadata is left empty.
    async fn probe(&self, path: &Path) -> MediaInfo;

    /// Produce one frame-aligned clip of `input` at `output`.
    async fn encode_segment(
        &self,
        input: &Path,
        output: &Path,
        span: &SegmentSpan,
    ) -> Result<(), EncodeError>;

    /// Stream-copy concatenation of the inputs listed in `manifest`.
    async fn concat(
        &self,
        inputs: &[PathBuf],
        manifest: &Path,
        output: &Path,
    ) -> Result<(), EncodeError>;

    /// Re-encoding concatenation, used when the stream-copy path fails.
    async fn concat_reencode(
        &self,
        inputs: &[PathBuf],
        manifest: &Path,
        output: &Path,
    ) -> Result<(), EncodeError>;
}

/// Which concatenation strategy produced the merged file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcatStrategy {
    StreamCopy,
    Reencode,
}

/// Concatenate `inputs` into `output`, falling back to a full re-encode when
/// the stream-copy path fails. The manifest is written into `scratch_dir`.
pub async fn concat_with_fallback(
    toolkit: &dyn MediaToolkit,
    inputs: &[PathBuf],
    output: &Path,
    scratch_dir: &Path,
) -> Result<ConcatStrategy, EncodeError> {
    let manifest = scratch_dir.join(MANIFEST_FILE_NAME);
    write_concat_manifest(inputs, &manifest).await?;

    match toolkit.concat(inputs, &manifest, output).await {
        Ok(()) => Ok(ConcatStrategy::StreamCopy),
        Err(e) => {
            warn!(error = %e, output = %output.display(), "stream-copy concat failed, re-encoding");
            // A half-written file from the fast path must not satisfy the output check.
            let _ = tokio::fs::remove_file(output).await;
            toolkit.concat_reencode(inputs, &manifest, output).await?;
            Ok(ConcatStrategy::Reencode)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeToolkit;
    use tempfile::TempDir;

    async fn write_inputs(dir: &Path, toolkit: &FakeToolkit, durations: &[f64]) -> Vec<PathBuf> {
        let mut inputs = Vec::new();
        for (i, d) in durations.iter().enumerate() {
            let path = dir.join(format!("in_{}.mp4", i));
            toolkit.write_media(&path, *d).await;
            inputs.push(path);
        }
        inputs
    }

    #[tokio::test]
    async fn test_fast_path_used_when_it_succeeds() {
        let dir = TempDir::new().unwrap();
        let toolkit = FakeToolkit::new();
        let inputs = write_inputs(dir.path(), &toolkit, &[10.0, 20.0]).await;
        let output = dir.path().join("merged.mp4");

        let strategy = concat_with_fallback(&toolkit, &inputs, &output, dir.path())
            .await
            .unwrap();

        assert_eq!(strategy, ConcatStrategy::StreamCopy);
        assert_eq!(toolkit.probe(&output).await.duration_secs, 30.0);
        assert!(dir.path().join(MANIFEST_FILE_NAME).exists());
    }

    #[tokio::test]
    async fn test_falls_back_to_reencode() {
        let dir = TempDir::new().unwrap();
        let toolkit = FakeToolkit::new().failing_stream_copy();
        let inputs = write_inputs(dir.path(), &toolkit, &[4.0, 6.0]).await;
        let output = dir.path().join("merged.mp4");

        let strategy = concat_with_fallback(&toolkit, &inputs, &output, dir.path())
            .await
            .unwrap();

        assert_eq!(strategy, ConcatStrategy::Reencode);
        assert_eq!(toolkit.reencode_calls(), 1);
        assert_eq!(toolkit.probe(&output).await.duration_secs, 10.0);
    }

    #[tokio::test]
    async fn test_both_paths_failing_is_error() {
        let dir = TempDir::new().unwrap();
        let toolkit = FakeToolkit::new().failing_stream_copy().failing_reencode();
        let inputs = write_inputs(dir.path(), &toolkit, &[4.0, 6.0]).await;
        let output = dir.path().join("merged.mp4");

        let result = concat_with_fallback(&toolkit, &inputs, &output, dir.path()).await;
        assert!(result.is_err());
        assert!(!output.exists());
    }

    #[test]
    fn test_settings_from_default_config() {
        let settings = EncoderSettings::default();
        assert_eq!(settings.fps, 30);
        assert_eq!(settings.video_codec, "libx264");
        assert_eq!(settings.preset, "medium");
        assert_eq!(settings.crf, 23);
        assert_eq!(settings.segment_timeout, Duration::from_secs(600));
        assert_eq!(settings.reencode_timeout, Duration::from_secs(1200));
        assert_eq!(settings.probe_timeout, Duration::from_secs(30));
    }
}
