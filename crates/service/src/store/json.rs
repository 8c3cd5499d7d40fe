//! Record store persisted as one JSON file per record.
//!
//! Layout under the state directory:
//!
//! ```text
//! videos/<id>.json
//! jobs/<id>.json
//! downloads/<id>.json
//! stats.json
//! ```
//!
//! The full state is also held in memory; every mutation is written through
//! while the store lock is held, so the files never disagree with the order
//! in which updates were applied. The one exception is job progress: an
//! update that leaves the status unchanged is kept in memory only, since an
//! active job is failed on reopen whatever its progress was.

use super::{RecordStore, StoreError, StoreState};
use crate::models::{Job, SocialDownload, Stats, StatsDelta, Video};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::{info, warn};

const VIDEOS_DIR: &str = "videos";
const JOBS_DIR: &str = "jobs";
const DOWNLOADS_DIR: &str = "downloads";
const STATS_FILE: &str = "stats.json";

/// Error message recorded on jobs interrupted by a restart.
pub const INTERRUPTED_REASON: &str = "interrupted by service restart";

#[derive(Debug)]
pub struct JsonFileStore {
    root: PathBuf,
    state: Mutex<StoreState>,
}

/// Write `value` to `path` via a temporary file and rename.
fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> Result<(), StoreError> {
    let json = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, json)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn remove_if_exists(path: &Path) -> Result<(), StoreError> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

fn load_record<T: DeserializeOwned>(path: &Path) -> Result<T, StoreError> {
    let content = fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

/// Loads all records from JSON files in `dir`.
///
/// Skips files that fail to parse and logs warnings.
fn load_dir<T: DeserializeOwned>(dir: &Path) -> Result<Vec<T>, StoreError> {
    let mut records = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        match load_record(&path) {
            Ok(record) => records.push(record),
            Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable record"),
        }
    }
    Ok(records)
}

/// Remove every `.json` file in `dir`.
fn clear_dir(dir: &Path) -> Result<(), StoreError> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_file() {
            remove_if_exists(&path)?;
        }
    }
    Ok(())
}

impl JsonFileStore {
    /// Open (or create) a store rooted at `root`.
    ///
    /// Jobs still `pending` or `processing` from a previous process can never
    /// finish, so they are failed here.
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        for dir in [VIDEOS_DIR, JOBS_DIR, DOWNLOADS_DIR] {
            fs::create_dir_all(root.join(dir))?;
        }

        let mut state = StoreState::default();

        let mut videos: Vec<Video> = load_dir(&root.join(VIDEOS_DIR))?;
        videos.sort_by_key(|v| v.created_at);
        for video in videos {
            state.put_video(video);
        }

        let mut jobs: Vec<Job> = load_dir(&root.join(JOBS_DIR))?;
        jobs.sort_by_key(|j| j.created_at);
        let mut interrupted = 0;
        for mut job in jobs {
            if job.is_active() {
                job.fail(INTERRUPTED_REASON);
                write_json_atomic(&root.join(JOBS_DIR).join(format!("{}.json", job.id)), &job)?;
                interrupted += 1;
            }
            state.put_job(job);
        }

        let mut downloads: Vec<SocialDownload> = load_dir(&root.join(DOWNLOADS_DIR))?;
        downloads.sort_by_key(|d| d.created_at);
        for download in downloads {
            state.put_download(download);
        }

        let stats_path = root.join(STATS_FILE);
        if stats_path.exists() {
            match load_record::<Stats>(&stats_path) {
                Ok(stats) => state.stats = stats,
                Err(e) => warn!(path = %stats_path.display(), error = %e, "stats unreadable, starting from zero"),
            }
        }

        info!(
            root = %root.display(),
            videos = state.videos.len(),
            jobs = state.jobs.len(),
            interrupted,
            "opened record store"
        );

        Ok(Self {
            root,
            state: Mutex::new(state),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, StoreError> {
        Ok(self.state.lock()?)
    }

    fn record_path(&self, dir: &str, id: &str) -> PathBuf {
        self.root.join(dir).join(format!("{}.json", id))
    }
}

impl RecordStore for JsonFileStore {
    fn insert_video(&self, video: Video) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        write_json_atomic(&self.record_path(VIDEOS_DIR, &video.id), &video)?;
        state.put_video(video);
        Ok(())
    }

    fn get_video(&self, id: &str) -> Result<Option<Video>, StoreError> {
        Ok(self.lock()?.videos.get(id).map(|e| e.record.clone()))
    }

    fn list_videos(&self) -> Result<Vec<Video>, StoreError> {
        Ok(self.lock()?.list_videos())
    }

    fn find_video_by_filename(&self, filename: &str) -> Result<Option<Video>, StoreError> {
        Ok(self.lock()?.find_video(filename))
    }

    fn delete_video(&self, id: &str) -> Result<Option<Video>, StoreError> {
        let mut state = self.lock()?;
        remove_if_exists(&self.record_path(VIDEOS_DIR, id))?;
        Ok(state.videos.remove(id).map(|e| e.record))
    }

    fn insert_job(&self, job: Job) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        write_json_atomic(&self.record_path(JOBS_DIR, &job.id), &job)?;
        state.put_job(job);
        Ok(())
    }

    fn get_job(&self, id: &str) -> Result<Option<Job>, StoreError> {
        Ok(self.lock()?.jobs.get(id).map(|e| e.record.clone()))
    }

    fn list_jobs(&self) -> Result<Vec<Job>, StoreError> {
        Ok(self.lock()?.list_jobs())
    }

    fn update_job(&self, id: &str, mutate: &mut dyn FnMut(&mut Job)) -> Result<Job, StoreError> {
        let mut state = self.lock()?;
        let before = state.jobs.get(id).map(|e| e.record.status);
        let job = state.update_job(id, mutate)?;
        if before != Some(job.status) {
            write_json_atomic(&self.record_path(JOBS_DIR, id), &job)?;
        }
        Ok(job)
    }

    fn complete_job(
        &self,
        id: &str,
        complete: &mut dyn FnMut(&mut Job),
        delta: &StatsDelta,
    ) -> Result<Option<Job>, StoreError> {
        let mut state = self.lock()?;
        let Some((job, stats)) = state.completion(id, complete, delta) else {
            return Ok(None);
        };
        let job_path = self.record_path(JOBS_DIR, id);
        write_json_atomic(&job_path, &job)?;
        if let Err(e) = write_json_atomic(&self.root.join(STATS_FILE), &stats) {
            // put the job file back to what memory still holds
            if let Some(entry) = state.jobs.get(id) {
                if let Err(restore) = write_json_atomic(&job_path, &entry.record) {
                    warn!(job_id = id, error = %restore, "could not restore job record");
                }
            }
            return Err(e);
        }
        state.commit_completion(job.clone(), stats);
        Ok(Some(job))
    }

    fn insert_download(&self, download: SocialDownload) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        write_json_atomic(&self.record_path(DOWNLOADS_DIR, &download.id), &download)?;
        state.put_download(download);
        Ok(())
    }

    fn list_downloads(&self) -> Result<Vec<SocialDownload>, StoreError> {
        Ok(self.lock()?.list_downloads())
    }

    fn mark_download_consumed(&self, filename: &str) -> Result<bool, StoreError> {
        let mut state = self.lock()?;
        match state.consume_download(filename) {
            Some(download) => {
                write_json_atomic(&self.record_path(DOWNLOADS_DIR, &download.id), &download)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn stats(&self) -> Result<Stats, StoreError> {
        Ok(self.lock()?.stats.clone())
    }

    fn increment_stats(&self, delta: &StatsDelta) -> Result<Stats, StoreError> {
        let mut state = self.lock()?;
        let mut stats = state.stats.clone();
        stats.apply(delta);
        write_json_atomic(&self.root.join(STATS_FILE), &stats)?;
        state.stats = stats.clone();
        Ok(stats)
    }

    fn clear_records(&self) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        for dir in [VIDEOS_DIR, JOBS_DIR, DOWNLOADS_DIR] {
            clear_dir(&self.root.join(dir))?;
        }
        state.clear_records();
        Ok(())
    }

    fn reset_stats(&self) -> Result<(), StoreError> {
        let mut state = self.lock()?;
        write_json_atomic(&self.root.join(STATS_FILE), &Stats::default())?;
        state.stats = Stats::default();
        Ok(())
    }
}
