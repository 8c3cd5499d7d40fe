//! Test doubles for the external tools.
//!
//! `FakeToolkit` writes tiny text files of the form `duration=<secs>` in
//! place of real media, so probes, segment encodes and concatenation can be
//! checked by reading the files back.

use crate::encode::{EncodeError, MediaToolkit};
use crate::models::MediaKind;
use crate::probe::MediaInfo;
use crate::segments::SegmentSpan;
use crate::social::{media_kind_for, FetchError, FetchedMedia, MediaFetcher, Platform};
use async_trait::async_trait;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Default)]
pub struct FakeToolkit {
    failing_segments: HashSet<usize>,
    fail_stream_copy: bool,
    fail_reencode: bool,
    unprobeable_outputs: bool,
    audio_only: bool,
    segment_delay: Option<Duration>,
    segment_calls: AtomicUsize,
    reencode_calls: AtomicUsize,
    active_segments: AtomicUsize,
    peak_segments: AtomicUsize,
    scratch_dirs: Mutex<Vec<PathBuf>>,
}

fn tool_failure(message: &str) -> EncodeError {
    EncodeError::ToolFailed {
        tool: "ffmpeg".to_string(),
        code: 1,
        stderr: message.to_string(),
    }
}

impl FakeToolkit {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_segment(mut self, index: usize) -> Self {
        self.failing_segments.insert(index);
        self
    }

    pub fn failing_stream_copy(mut self) -> Self {
        self.fail_stream_copy = true;
        self
    }

    pub fn failing_reencode(mut self) -> Self {
        self.fail_reencode = true;
        self
    }

    /// Readable files probe as having no video stream.
    pub fn audio_only(mut self) -> Self {
        self.audio_only = true;
        self
    }

    /// Concat outputs carry no duration, as if ffprobe could not read them.
    pub fn unprobeable_outputs(mut self) -> Self {
        self.unprobeable_outputs = true;
        self
    }

    pub fn with_segment_delay(mut self, delay: Duration) -> Self {
        self.segment_delay = Some(delay);
        self
    }

    pub fn segment_calls(&self) -> usize {
        self.segment_calls.load(Ordering::SeqCst)
    }

    pub fn reencode_calls(&self) -> usize {
        self.reencode_calls.load(Ordering::SeqCst)
    }

    /// Highest number of segment encodes observed running at once.
    pub fn peak_concurrency(&self) -> usize {
        self.peak_segments.load(Ordering::SeqCst)
    }

    /// Directories that held a concat manifest, recorded at concat time.
    pub fn scratch_dirs(&self) -> Vec<PathBuf> {
        self.scratch_dirs.lock().map(|d| d.clone()).unwrap_or_default()
    }

    /// Write a fake media file of the given duration.
    pub async fn write_media(&self, path: &Path, duration: f64) {
        tokio::fs::write(path, format!("duration={}\n", duration))
            .await
            .unwrap();
    }

    async fn read_duration(path: &Path) -> Option<f64> {
        let content = tokio::fs::read_to_string(path).await.ok()?;
        content.trim().strip_prefix("duration=")?.parse().ok()
    }

    async fn sum_inputs(inputs: &[PathBuf]) -> Result<f64, EncodeError> {
        let mut total = 0.0;
        for input in inputs {
            total += Self::read_duration(input)
                .await
                .ok_or_else(|| tool_failure("unreadable input"))?;
        }
        Ok(total)
    }

    async fn write_concat(&self, inputs: &[PathBuf], manifest: &Path, output: &Path) -> Result<(), EncodeError> {
        if let Some(dir) = manifest.parent() {
            if let Ok(mut dirs) = self.scratch_dirs.lock() {
                dirs.push(dir.to_path_buf());
            }
        }
        let total = Self::sum_inputs(inputs).await?;
        if self.unprobeable_outputs {
            tokio::fs::write(output, b"opaque").await?;
        } else {
            tokio::fs::write(output, format!("duration={}\n", total)).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl MediaToolkit for FakeToolkit {
    async fn probe(&self, path: &Path) -> MediaInfo {
        match Self::read_duration(path).await {
            Some(duration_secs) => MediaInfo {
                duration_secs,
                codec: Some("h264".to_string()),
                resolution: Some("1280x720".to_string()),
                bitrate: Some(1_000_000),
                has_video: !self.audio_only,
            },
            None => MediaInfo::default(),
        }
    }

    async fn encode_segment(
        &self,
        input: &Path,
        output: &Path,
        span: &SegmentSpan,
    ) -> Result<(), EncodeError> {
        self.segment_calls.fetch_add(1, Ordering::SeqCst);
        let active = self.active_segments.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_segments.fetch_max(active, Ordering::SeqCst);

        if let Some(delay) = self.segment_delay {
            tokio::time::sleep(delay).await;
        }

        let result = if self.failing_segments.contains(&span.index) {
            Err(EncodeError::MissingOutput(output.to_path_buf()))
        } else if Self::read_duration(input).await.is_none() {
            Err(tool_failure("unreadable input"))
        } else {
            tokio::fs::write(output, format!("duration={}\n", span.duration_secs()))
                .await
                .map_err(EncodeError::from)
        };

        self.active_segments.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn concat(
        &self,
        inputs: &[PathBuf],
        manifest: &Path,
        output: &Path,
    ) -> Result<(), EncodeError> {
        if self.fail_stream_copy {
            // leave a partial file behind like a crashed ffmpeg would
            tokio::fs::write(output, b"partial").await?;
            return Err(tool_failure("Non-monotonous DTS"));
        }
        self.write_concat(inputs, manifest, output).await
    }

    async fn concat_reencode(
        &self,
        inputs: &[PathBuf],
        manifest: &Path,
        output: &Path,
    ) -> Result<(), EncodeError> {
        self.reencode_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_reencode {
            return Err(tool_failure("Invalid data found when processing input"));
        }
        self.write_concat(inputs, manifest, output).await
    }
}

/// Fetcher that writes a fixed-duration file instead of downloading.
#[derive(Debug)]
pub struct FakeFetcher {
    pub title: String,
    pub ext: String,
    pub duration: f64,
    pub fail: bool,
}

impl Default for FakeFetcher {
    fn default() -> Self {
        Self {
            title: "Funny Cat: Part 2".to_string(),
            ext: "mp4".to_string(),
            duration: 12.0,
            fail: false,
        }
    }
}

#[async_trait]
impl MediaFetcher for FakeFetcher {
    async fn fetch(
        &self,
        _url: &str,
        platform: Platform,
        output_dir: &Path,
    ) -> Result<FetchedMedia, FetchError> {
        if self.fail {
            return Err(FetchError::ToolFailed {
                program: "yt-dlp".to_string(),
                message: "ERROR: Video unavailable".to_string(),
            });
        }
        let filename = format!(
            "{}_abcd1234_{}.{}",
            platform.prefix(),
            crate::social::sanitize_title(&self.title),
            self.ext
        );
        let path = output_dir.join(&filename);
        tokio::fs::write(&path, format!("duration={}\n", self.duration)).await?;
        let media_type: MediaKind = media_kind_for(&path);
        Ok(FetchedMedia {
            filename,
            path,
            title: self.title.clone(),
            uploader: Some("someone".to_string()),
            duration: self.duration,
            view_count: Some(10),
            like_count: Some(2),
            platform,
            media_type,
        })
    }
}
