//! Media probe module.
//!
//! Runs ffprobe against a file and extracts the metadata the service records
//! for a video: duration, video codec, resolution and container bitrate.
//! Probing is best effort; callers get an empty [`MediaInfo`] when ffprobe
//! cannot tell us anything.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, warn};

/// Error type for probe operations.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// ffprobe command failed to execute.
    #[error("ffprobe failed: {0}")]
    FfprobeFailed(String),

    /// ffprobe did not finish within the timeout.
    #[error("ffprobe timed out after {0:?}")]
    Timeout(Duration),

    /// Failed to parse ffprobe JSON output.
    #[error("Failed to parse ffprobe output: {0}")]
    ParseError(String),

    /// IO error during probe.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Information about a video stream from ffprobe.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VideoStream {
    /// Codec name (e.g., "h264", "hevc").
    pub codec_name: String,
    /// Video width in pixels.
    pub width: u32,
    /// Video height in pixels.
    pub height: u32,
}

/// Format information from ffprobe.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct FormatInfo {
    /// Duration in seconds.
    pub duration_secs: f64,
    /// File size in bytes.
    pub size_bytes: u64,
    /// Container bitrate in bits per second.
    pub bit_rate: Option<u64>,
}

/// Result of probing a media file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ProbeResult {
    /// Video streams found in the file.
    pub video_streams: Vec<VideoStream>,
    /// Number of audio streams found in the file.
    pub audio_stream_count: usize,
    /// Format information.
    pub format: FormatInfo,
}

/// Metadata recorded on a [`crate::models::Video`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaInfo {
    pub duration_secs: f64,
    pub codec: Option<String>,
    /// `"WIDTHxHEIGHT"`, only when both dimensions are known.
    pub resolution: Option<String>,
    pub bitrate: Option<u64>,
    pub has_video: bool,
}

impl MediaInfo {
    /// Extract recorded metadata from a probe result.
    pub fn from_probe(probe: &ProbeResult) -> Self {
        let first_video = probe.video_streams.first();
        let codec = first_video
            .map(|v| v.codec_name.clone())
            .filter(|c| !c.is_empty());
        let resolution = first_video
            .filter(|v| v.width > 0 && v.height > 0)
            .map(|v| format!("{}x{}", v.width, v.height));

        Self {
            duration_secs: probe.format.duration_secs,
            codec,
            resolution,
            bitrate: probe.format.bit_rate,
            has_video: first_video.is_some(),
        }
    }
}

/// Raw ffprobe JSON structures for parsing.
mod ffprobe_json {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub streams: Option<Vec<Stream>>,
        pub format: Option<Format>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub codec_type: Option<String>,
        pub codec_name: Option<String>,
        pub width: Option<u32>,
        pub height: Option<u32>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub duration: Option<String>,
        pub size: Option<String>,
        pub bit_rate: Option<String>,
    }
}

/// Build the ffprobe invocation for a file.
pub fn build_probe_command(ffprobe: &str, path: &Path) -> std::process::Command {
    let mut cmd = std::process::Command::new(ffprobe);
    cmd.args([
        "-v",
        "quiet",
        "-print_format",
        "json",
        "-show_streams",
        "-show_format",
    ])
    .arg(path);
    cmd
}

/// Probes a media file using ffprobe to collect stream and format metadata.
///
/// The child is killed if it outlives `timeout`.
pub async fn probe_file(
    ffprobe: &str,
    path: &Path,
    timeout: Duration,
) -> Result<ProbeResult, ProbeError> {
    let mut cmd = Command::from(build_probe_command(ffprobe, path));
    cmd.stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let child = cmd.spawn()?;
    let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(result) => result?,
        Err(_) => return Err(ProbeError::Timeout(timeout)),
    };

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProbeError::FfprobeFailed(format!(
            "ffprobe exited with status {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_ffprobe_output(&stdout)
}

/// Probe a file, degrading to an empty [`MediaInfo`] on any failure.
pub async fn probe_media(ffprobe: &str, path: &Path, timeout: Duration) -> MediaInfo {
    match probe_file(ffprobe, path, timeout).await {
        Ok(probe) => {
            let info = MediaInfo::from_probe(&probe);
            debug!(path = %path.display(), duration = info.duration_secs, "probed media");
            info
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "probe failed, metadata unavailable");
            MediaInfo::default()
        }
    }
}

/// Parses ffprobe JSON output into a ProbeResult.
pub fn parse_ffprobe_output(json_str: &str) -> Result<ProbeResult, ProbeError> {
    let ffprobe: ffprobe_json::FfprobeOutput =
        serde_json::from_str(json_str).map_err(|e| ProbeError::ParseError(e.to_string()))?;

    let streams = ffprobe.streams.unwrap_or_default();
    let format = ffprobe.format.ok_or_else(|| {
        ProbeError::ParseError("Missing format information in ffprobe output".to_string())
    })?;

    let mut video_streams = Vec::new();
    let mut audio_stream_count = 0;

    for stream in streams {
        match stream.codec_type.as_deref().unwrap_or("") {
            "video" => video_streams.push(VideoStream {
                codec_name: stream.codec_name.unwrap_or_default(),
                width: stream.width.unwrap_or(0),
                height: stream.height.unwrap_or(0),
            }),
            "audio" => audio_stream_count += 1,
            _ => {}
        }
    }

    let duration_secs = format
        .duration
        .as_deref()
        .and_then(|d| d.parse::<f64>().ok())
        .filter(|d| d.is_finite() && *d >= 0.0)
        .unwrap_or(0.0);

    let size_bytes = format
        .size
        .as_deref()
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);

    let bit_rate = format.bit_rate.as_deref().and_then(|b| b.parse::<u64>().ok());

    Ok(ProbeResult {
        video_streams,
        audio_stream_count,
        format: FormatInfo {
            duration_secs,
            size_bytes,
            bit_rate,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SAMPLE: &str = r#"{
        "streams": [
            {"codec_type": "video", "codec_name": "h264", "width": 1920, "height": 1080},
            {"codec_type": "audio", "codec_name": "aac", "channels": 2},
            {"codec_type": "data"}
        ],
        "format": {"duration": "95.033333", "size": "1048576", "bit_rate": "4500000"}
    }"#;

    #[test]
    fn test_parse_sample_output() {
        let probe = parse_ffprobe_output(SAMPLE).unwrap();
        assert_eq!(probe.video_streams.len(), 1);
        assert_eq!(probe.audio_stream_count, 1);
        assert!((probe.format.duration_secs - 95.033333).abs() < 1e-9);
        assert_eq!(probe.format.size_bytes, 1_048_576);
        assert_eq!(probe.format.bit_rate, Some(4_500_000));
    }

    #[test]
    fn test_media_info_from_probe() {
        let info = MediaInfo::from_probe(&parse_ffprobe_output(SAMPLE).unwrap());
        assert_eq!(info.codec.as_deref(), Some("h264"));
        assert_eq!(info.resolution.as_deref(), Some("1920x1080"));
        assert_eq!(info.bitrate, Some(4_500_000));
        assert!(info.has_video);
    }

    #[test]
    fn test_resolution_requires_both_dimensions() {
        let json = r#"{"streams":[{"codec_type":"video","codec_name":"vp9","width":640}],"format":{}}"#;
        let info = MediaInfo::from_probe(&parse_ffprobe_output(json).unwrap());
        assert_eq!(info.codec.as_deref(), Some("vp9"));
        assert_eq!(info.resolution, None);
        assert_eq!(info.duration_secs, 0.0);
    }

    #[test]
    fn test_audio_only_file() {
        let json = r#"{"streams":[{"codec_type":"audio","codec_name":"mp3"}],"format":{"duration":"12.5"}}"#;
        let info = MediaInfo::from_probe(&parse_ffprobe_output(json).unwrap());
        assert!(!info.has_video);
        assert_eq!(info.codec, None);
        assert_eq!(info.duration_secs, 12.5);
    }

    #[test]
    fn test_missing_format_is_error() {
        let err = parse_ffprobe_output(r#"{"streams": []}"#).unwrap_err();
        assert!(matches!(err, ProbeError::ParseError(_)));
    }

    #[test]
    fn test_invalid_json_is_error() {
        assert!(matches!(
            parse_ffprobe_output("not json"),
            Err(ProbeError::ParseError(_))
        ));
    }

    #[test]
    fn test_probe_command_args() {
        let cmd = build_probe_command("ffprobe", Path::new("/videos/a.mp4"));
        let args: Vec<String> = cmd
            .get_args()
            .filter_map(|a| a.to_str().map(String::from))
            .collect();
        assert_eq!(args.last().map(String::as_str), Some("/videos/a.mp4"));
        assert!(args.windows(2).any(|p| p[0] == "-print_format" && p[1] == "json"));
        assert!(args.iter().any(|a| a == "-show_format"));
        assert!(args.iter().any(|a| a == "-show_streams"));
    }

    #[tokio::test]
    async fn test_probe_media_missing_tool_degrades() {
        let info = probe_media(
            "/nonexistent/ffprobe-binary",
            Path::new("/nonexistent/file.mp4"),
            Duration::from_secs(5),
        )
        .await;
        assert_eq!(info, MediaInfo::default());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_duration_parsed(duration in 0.0f64..100_000.0, width in 1u32..8000, height in 1u32..4500) {
            let json = format!(
                r#"{{"streams":[{{"codec_type":"video","codec_name":"h264","width":{},"height":{}}}],"format":{{"duration":"{}"}}}}"#,
                width, height, duration
            );
            let info = MediaInfo::from_probe(&parse_ffprobe_output(&json).unwrap());
            prop_assert!((info.duration_secs - duration).abs() < 1e-6);
            let expected = format!("{}x{}", width, height);
            prop_assert_eq!(info.resolution.as_deref(), Some(expected.as_str()));
        }
    }
}
