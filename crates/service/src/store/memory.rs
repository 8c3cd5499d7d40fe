//! Mutex-guarded in-memory record store.

use super::{RecordStore, StoreError, StoreState};
use crate::models::{Job, SocialDownload, Stats, StatsDelta, Video};
use std::sync::{Mutex, MutexGuard};

/// Volatile store; everything is lost when the process exits.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, StoreError> {
        Ok(self.state.lock()?)
    }
}

impl RecordStore for MemoryStore {
    fn insert_video(&self, video: Video) -> Result<(), StoreError> {
        self.lock()?.put_video(video);
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
        Ok(self.lock()?.videos.remove(id).map(|e| e.record))
    }

    fn insert_job(&self, job: Job) -> Result<(), StoreError> {
        self.lock()?.put_job(job);
        Ok(())
    }

    fn get_job(&self, id: &str) -> Result<Option<Job>, StoreError> {
        Ok(self.lock()?.jobs.get(id).map(|e| e.record.clone()))
    }

    fn list_jobs(&self) -> Result<Vec<Job>, StoreError> {
        Ok(self.lock()?.list_jobs())
    }

    fn update_job(&self, id: &str, mutate: &mut dyn FnMut(&mut Job)) -> Result<Job, StoreError> {
        self.lock()?.update_job(id, mutate)
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
        state.commit_completion(job.clone(), stats);
        Ok(Some(job))
    }

    fn insert_download(&self, download: SocialDownload) -> Result<(), StoreError> {
        self.lock()?.put_download(download);
        Ok(())
    }

    fn list_downloads(&self) -> Result<Vec<SocialDownload>, StoreError> {
        Ok(self.lock()?.list_downloads())
    }

    fn mark_download_consumed(&self, filename: &str) -> Result<bool, StoreError> {
        Ok(self.lock()?.consume_download(filename).is_some())
    }

    fn stats(&self) -> Result<Stats, StoreError> {
        Ok(self.lock()?.stats.clone())
    }

    fn increment_stats(&self, delta: &StatsDelta) -> Result<Stats, StoreError> {
        let mut state = self.lock()?;
        state.stats.apply(delta);
        Ok(state.stats.clone())
    }

    fn clear_records(&self) -> Result<(), StoreError> {
        self.lock()?.clear_records();
        Ok(())
    }

    fn reset_stats(&self) -> Result<(), StoreError> {
        self.lock()?.stats = Stats::default();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::conformance;
    use std::sync::Arc;

    #[test]
    fn test_listing_order() {
        conformance::videos_listed_newest_first_without_temporary(&MemoryStore::new());
    }

    #[test]
    fn test_get_and_delete() {
        conformance::get_and_delete_video(&MemoryStore::new());
    }

    #[test]
    fn test_update_job() {
        conformance::update_job_applies_mutation(&MemoryStore::new());
    }

    #[test]
    fn test_complete_job() {
        conformance::complete_job_requires_processing(&MemoryStore::new());
        conformance::complete_job_after_clear_changes_nothing(&MemoryStore::new());
    }

    #[test]
    fn test_stats() {
        conformance::stats_increments_are_additive(&MemoryStore::new());
    }

    #[test]
    fn test_concurrent_increments() {
        conformance::concurrent_increments_do_not_lose_updates(Arc::new(MemoryStore::new()));
    }

    #[test]
    fn test_downloads() {
        conformance::downloads_marked_consumed(&MemoryStore::new());
    }

    #[test]
    fn test_clear_records() {
        conformance::clear_keeps_stats(&MemoryStore::new());
    }

    #[test]
    fn test_jobs_with_equal_timestamps_keep_insertion_order() {
        let store = MemoryStore::new();
        let mut first = Job::new_split("v", 1);
        let mut second = Job::new_split("v", 2);
        first.created_at = 5;
        second.created_at = 5;
        store.insert_job(first.clone()).unwrap();
        store.insert_job(second.clone()).unwrap();

        let ids: Vec<String> = store.list_jobs().unwrap().into_iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![second.id, first.id]);
    }
}
