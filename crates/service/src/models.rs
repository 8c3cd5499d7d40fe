//! Record types shared by the store, the orchestrator and the HTTP layer.
//!
//! Every record serializes to camelCase JSON with Unix-millisecond timestamps.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// A stored video file, either uploaded or produced by a job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Video {
    pub id: String,
    /// Name of the file on disk.
    pub filename: String,
    /// Name supplied by the client (or derived from the job for outputs).
    pub original_name: String,
    pub size: u64,
    /// Duration in seconds, 0 when unknown.
    pub duration: f64,
    pub path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub codec: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolution: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bitrate: Option<u64>,
    pub created_at: i64,
    /// Temporary videos are hidden from listings.
    #[serde(default)]
    pub is_temporary: bool,
}

impl Video {
    /// Build a new video record with a fresh id.
    pub fn new(
        filename: impl Into<String>,
        original_name: impl Into<String>,
        path: PathBuf,
        size: u64,
        duration: f64,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            filename: filename.into(),
            original_name: original_name.into(),
            size,
            duration,
            path,
            codec: None,
            resolution: None,
            bitrate: None,
            created_at: current_timestamp_ms(),
            is_temporary: false,
        }
    }

    /// Mark the record as a job output hidden from listings.
    pub fn temporary(mut self) -> Self {
        self.is_temporary = true;
        self
    }
}

/// Kind of job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Split,
    Merge,
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobType::Split => write!(f, "split"),
            JobType::Merge => write!(f, "merge"),
        }
    }
}

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Accepted, waiting for background execution.
    Pending,
    /// Background execution has started.
    Processing,
    /// All outputs produced and recorded.
    Completed,
    /// Failed; `error` carries the message.
    Error,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Pending => write!(f, "pending"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Error => write!(f, "error"),
        }
    }
}

/// A split or merge job.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: JobType,
    pub status: JobStatus,
    /// Percentage in [0, 100]; 100 only once completed.
    pub progress: u8,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<i64>,
    /// Source video (split only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_id: Option<String>,
    /// Segment length in seconds (split only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment_duration: Option<u32>,
    /// Ordered source videos (merge only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_ids: Option<Vec<String>>,
    /// Ordered segment filenames (completed split only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Vec<String>>,
    /// Merged filename (completed merge only).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Job {
    fn new(kind: JobType) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            kind,
            status: JobStatus::Pending,
            progress: 0,
            created_at: current_timestamp_ms(),
            completed_at: None,
            video_id: None,
            segment_duration: None,
            video_ids: None,
            outputs: None,
            output: None,
            error: None,
        }
    }

    /// Create a pending split job.
    pub fn new_split(video_id: impl Into<String>, segment_duration: u32) -> Self {
        let mut job = Self::new(JobType::Split);
        job.video_id = Some(video_id.into());
        job.segment_duration = Some(segment_duration);
        job
    }

    /// Create a pending merge job over the ordered video ids.
    pub fn new_merge(video_ids: Vec<String>) -> Self {
        let mut job = Self::new(JobType::Merge);
        job.video_ids = Some(video_ids);
        job
    }

    /// Transition into `processing`.
    pub fn start(&mut self) {
        if !self.is_terminal() {
            self.status = JobStatus::Processing;
        }
    }

    /// Raise progress, never lowering it and never reaching 100 before completion.
    pub fn advance_progress(&mut self, progress: u8) {
        if self.is_terminal() {
            return;
        }
        self.progress = self.progress.max(progress.min(99));
    }

    /// Mark a split job completed with its ordered segment filenames.
    pub fn complete_split(&mut self, outputs: Vec<String>) {
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.outputs = Some(outputs);
        self.output = None;
        self.error = None;
        self.completed_at = Some(current_timestamp_ms());
    }

    /// Mark a merge job completed with its output filename.
    pub fn complete_merge(&mut self, output: impl Into<String>) {
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.output = Some(output.into());
        self.outputs = None;
        self.error = None;
        self.completed_at = Some(current_timestamp_ms());
    }

    /// Mark the job failed with a reason; any partial outputs are discarded.
    pub fn fail(&mut self, reason: &str) {
        self.status = JobStatus::Error;
        self.error = Some(reason.to_string());
        self.outputs = None;
        self.output = None;
        self.completed_at = Some(current_timestamp_ms());
    }

    /// Check if the job is in a terminal state (completed or error).
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Error)
    }

    /// Check if the job is active (pending or processing).
    pub fn is_active(&self) -> bool {
        matches!(self.status, JobStatus::Pending | JobStatus::Processing)
    }
}

/// Aggregate counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    #[serde(default)]
    pub total_videos_split: u64,
    #[serde(default)]
    pub total_segments_created: u64,
    #[serde(default)]
    pub total_videos_merged: u64,
    /// Sum of source durations processed, in seconds.
    #[serde(default)]
    pub total_time_saved: f64,
    #[serde(default)]
    pub total_downloads: u64,
}

impl Stats {
    /// Apply an additive delta.
    pub fn apply(&mut self, delta: &StatsDelta) {
        self.total_videos_split += delta.videos_split;
        self.total_segments_created += delta.segments_created;
        self.total_videos_merged += delta.videos_merged;
        self.total_time_saved += delta.time_saved;
        self.total_downloads += delta.downloads;
    }
}

/// Increment applied to [`Stats`] in a single store operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatsDelta {
    pub videos_split: u64,
    pub segments_created: u64,
    pub videos_merged: u64,
    pub time_saved: f64,
    pub downloads: u64,
}

impl StatsDelta {
    pub fn split(segments: usize, duration: f64) -> Self {
        Self {
            videos_split: 1,
            segments_created: segments as u64,
            time_saved: duration,
            ..Self::default()
        }
    }

    pub fn merge(duration: f64) -> Self {
        Self {
            videos_merged: 1,
            time_saved: duration,
            ..Self::default()
        }
    }

    pub fn download() -> Self {
        Self {
            downloads: 1,
            ..Self::default()
        }
    }
}

/// Kind of media retrieved from a platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MediaKind {
    Video,
    Image,
}

/// A file fetched from a social platform.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SocialDownload {
    pub id: String,
    pub url: String,
    pub filename: String,
    pub path: PathBuf,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uploader: Option<String>,
    #[serde(default)]
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub like_count: Option<u64>,
    pub platform: String,
    pub media_type: MediaKind,
    pub created_at: i64,
    /// Set once the file has been downloaded with delete-after-read.
    #[serde(default)]
    pub is_downloaded: bool,
}

/// Get current timestamp in milliseconds since Unix epoch.
pub fn current_timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
