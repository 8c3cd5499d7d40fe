//! Record store for videos, jobs, social downloads and aggregate stats.
//!
//! The store is the only mutable state shared between request handlers and
//! background jobs. Every read-modify-write (job transitions, stats
//! increments) happens under a single mutex inside the implementation, so
//! concurrent job completions never lose an update.

mod json;
mod memory;

pub use json::JsonFileStore;
pub use memory::MemoryStore;

use crate::models::{Job, JobStatus, SocialDownload, Stats, StatsDelta, Video};
use std::collections::HashMap;
use thiserror::Error;

/// Error type for store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A thread panicked while holding the store lock.
    #[error("record store lock poisoned")]
    Poisoned,

    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl<T> From<std::sync::PoisonError<T>> for StoreError {
    fn from(_: std::sync::PoisonError<T>) -> Self {
        StoreError::Poisoned
    }
}

/// CRUD plus atomic counter increments over the persisted records.
pub trait RecordStore: Send + Sync {
    fn insert_video(&self, video: Video) -> Result<(), StoreError>;
    fn get_video(&self, id: &str) -> Result<Option<Video>, StoreError>;
    /// Non-temporary videos, newest first.
    fn list_videos(&self) -> Result<Vec<Video>, StoreError>;
    /// Look up a video record by its on-disk filename.
    fn find_video_by_filename(&self, filename: &str) -> Result<Option<Video>, StoreError>;
    /// Remove a video record, returning it if it existed.
    fn delete_video(&self, id: &str) -> Result<Option<Video>, StoreError>;

    fn insert_job(&self, job: Job) -> Result<(), StoreError>;
    fn get_job(&self, id: &str) -> Result<Option<Job>, StoreError>;
    /// All jobs, newest first.
    fn list_jobs(&self) -> Result<Vec<Job>, StoreError>;
    /// Apply `mutate` to the current stored job and persist the result.
    fn update_job(&self, id: &str, mutate: &mut dyn FnMut(&mut Job)) -> Result<Job, StoreError>;
    /// Apply `complete` to a `processing` job and add `delta` to the stats
    /// as one step.
    ///
    /// Returns `None` and changes nothing when the job is gone or no longer
    /// `processing`.
    fn complete_job(
        &self,
        id: &str,
        complete: &mut dyn FnMut(&mut Job),
        delta: &StatsDelta,
    ) -> Result<Option<Job>, StoreError>;

    fn insert_download(&self, download: SocialDownload) -> Result<(), StoreError>;
    /// All downloads, newest first.
    fn list_downloads(&self) -> Result<Vec<SocialDownload>, StoreError>;
    /// Flag the download stored under `filename` as consumed.
    fn mark_download_consumed(&self, filename: &str) -> Result<bool, StoreError>;

    fn stats(&self) -> Result<Stats, StoreError>;
    /// Add `delta` to the stats and return the new totals.
    fn increment_stats(&self, delta: &StatsDelta) -> Result<Stats, StoreError>;

    /// Drop every video, job and download record. Stats are kept.
    fn clear_records(&self) -> Result<(), StoreError>;
    fn reset_stats(&self) -> Result<(), StoreError>;
}

/// A record tagged with its insertion order, used to break timestamp ties.
#[derive(Debug, Clone)]
struct Entry<T> {
    seq: u64,
    record: T,
}

/// In-memory state shared by both store implementations.
#[derive(Debug, Default)]
struct StoreState {
    next_seq: u64,
    videos: HashMap<String, Entry<Video>>,
    jobs: HashMap<String, Entry<Job>>,
    downloads: HashMap<String, Entry<SocialDownload>>,
    stats: Stats,
}

/// Newest first by `(created_at, seq)`.
fn newest_first<T: Clone>(
    map: &HashMap<String, Entry<T>>,
    created_at: impl Fn(&T) -> i64,
    keep: impl Fn(&T) -> bool,
) -> Vec<T> {
    let mut entries: Vec<&Entry<T>> = map.values().filter(|e| keep(&e.record)).collect();
    entries.sort_by(|a, b| {
        (created_at(&b.record), b.seq).cmp(&(created_at(&a.record), a.seq))
    });
    entries.into_iter().map(|e| e.record.clone()).collect()
}

impl StoreState {
    fn next_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn put_video(&mut self, video: Video) {
        let seq = self.next_seq();
        self.videos.insert(video.id.clone(), Entry { seq, record: video });
    }

    fn put_job(&mut self, job: Job) {
        let seq = self.next_seq();
        self.jobs.insert(job.id.clone(), Entry { seq, record: job });
    }

    fn put_download(&mut self, download: SocialDownload) {
        let seq = self.next_seq();
        self.downloads
            .insert(download.id.clone(), Entry { seq, record: download });
    }

    fn find_video(&self, filename: &str) -> Option<Video> {
        self.videos
            .values()
            .find(|e| e.record.filename == filename)
            .map(|e| e.record.clone())
    }

    fn list_videos(&self) -> Vec<Video> {
        newest_first(&self.videos, |v| v.created_at, |v| !v.is_temporary)
    }

    fn list_jobs(&self) -> Vec<Job> {
        newest_first(&self.jobs, |j| j.created_at, |_| true)
    }

    fn list_downloads(&self) -> Vec<SocialDownload> {
        newest_first(&self.downloads, |d| d.created_at, |_| true)
    }

    fn update_job(&mut self, id: &str, mutate: &mut dyn FnMut(&mut Job)) -> Result<Job, StoreError> {
        let entry = self.jobs.get_mut(id).ok_or_else(|| StoreError::NotFound {
            kind: "job",
            id: id.to_string(),
        })?;
        mutate(&mut entry.record);
        Ok(entry.record.clone())
    }

    /// Completed job and new stats for [`RecordStore::complete_job`], without
    /// applying them.
    fn completion(
        &self,
        id: &str,
        complete: &mut dyn FnMut(&mut Job),
        delta: &StatsDelta,
    ) -> Option<(Job, Stats)> {
        let entry = self.jobs.get(id)?;
        if entry.record.status != JobStatus::Processing {
            return None;
        }
        let mut job = entry.record.clone();
        complete(&mut job);
        let mut stats = self.stats.clone();
        stats.apply(delta);
        Some((job, stats))
    }

    fn commit_completion(&mut self, job: Job, stats: Stats) {
        if let Some(entry) = self.jobs.get_mut(&job.id) {
            entry.record = job;
        }
        self.stats = stats;
    }

    /// Mark the download for `filename` consumed, returning the updated record.
    fn consume_download(&mut self, filename: &str) -> Option<SocialDownload> {
        let entry = self
            .downloads
            .values_mut()
            .find(|e| e.record.filename == filename)?;
        entry.record.is_downloaded = true;
        Some(entry.record.clone())
    }

    fn clear_records(&mut self) {
        self.videos.clear();
        self.jobs.clear();
        self.downloads.clear();
    }
}
