//! Job orchestrator for vidsplit
//!
//! Accepts split and merge requests, validates them synchronously, records a
//! `pending` job and runs the work on a background task. Segment encodes fan
//! out over a semaphore-bounded set of tokio tasks; results land in slots
//! addressed by segment index so output order never depends on completion
//! order.
//!
//! The store is touched only for short reads and writes. No lock is held
//! while an encoder subprocess runs.

use crate::concurrency::WorkerPlan;
use crate::encode::{concat_with_fallback, EncodeError, MediaToolkit};
use crate::models::{Job, StatsDelta, Video};
use crate::segments::{plan_segments, validate_segment_duration, SegmentError, SegmentSpan};
use crate::store::{RecordStore, StoreError};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Directory under the output dir holding per-merge scratch directories
pub const SCRATCH_DIR: &str = ".scratch";

/// Container of every split segment
pub const SEGMENT_EXTENSION: &str = "mp4";

/// Request rejected before any job was created
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("Video not found: {0}")]
    VideoNotFound(String),

    #[error(transparent)]
    InvalidSegment(#[from] SegmentError),

    #[error("At least 2 different videos are required for merge")]
    TooFewVideos,

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure during background execution, recorded as the job's error message
#[derive(Debug, Error)]
pub enum JobError {
    #[error("video {0} no longer exists")]
    VideoMissing(String),

    #[error("video has no frames to split")]
    NoSegments,

    #[error("segment {} failed: {source}", .index + 1)]
    SegmentFailed {
        index: usize,
        #[source]
        source: EncodeError,
    },

    #[error("merge failed: {0}")]
    MergeFailed(#[source] EncodeError),

    #[error("record store error: {0}")]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("worker task failed: {0}")]
    TaskPanicked(String),
}

/// Files a job produced, with the stats they earn once the job completes
#[derive(Debug)]
struct JobOutput {
    videos: Vec<Video>,
    delta: StatsDelta,
}

impl JobOutput {
    fn filenames(&self) -> Vec<String> {
        self.videos.iter().map(|v| v.filename.clone()).collect()
    }
}

/// An accepted job and the task executing it
#[derive(Debug)]
pub struct JobHandle {
    /// Snapshot taken at submission (status `pending`)
    pub job: Job,
    task: JoinHandle<()>,
}

impl JobHandle {
    /// Wait for background execution to finish
    pub async fn join(self) -> Result<(), JoinError> {
        self.task.await
    }
}

/// Job orchestrator that owns the split/merge lifecycle
///
/// Segment concurrency comes from the worker plan. When the plan carries a
/// job limit, surplus jobs stay `pending` until a slot frees.
pub struct JobOrchestrator {
    store: Arc<dyn RecordStore>,
    toolkit: Arc<dyn MediaToolkit>,
    plan: WorkerPlan,
    output_dir: PathBuf,
    fps: u32,
    job_slots: Option<Arc<Semaphore>>,
}

impl JobOrchestrator {
    /// Create a new JobOrchestrator
    ///
    /// # Arguments
    /// * `store` - Record store shared with the request handlers
    /// * `toolkit` - External encoder capabilities
    /// * `plan` - Worker plan (segment workers, optional job limit)
    /// * `output_dir` - Directory receiving segments and merged files
    /// * `fps` - Output frame rate used for segment planning
    pub fn new(
        store: Arc<dyn RecordStore>,
        toolkit: Arc<dyn MediaToolkit>,
        plan: WorkerPlan,
        output_dir: PathBuf,
        fps: u32,
    ) -> Self {
        let job_slots = plan
            .max_concurrent_jobs
            .map(|n| Arc::new(Semaphore::new(n.max(1) as usize)));
        Self {
            store,
            toolkit,
            plan,
            output_dir,
            fps: fps.max(1),
            job_slots,
        }
    }

    pub fn plan(&self) -> &WorkerPlan {
        &self.plan
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Validate a split request, record it and start it in the background
    pub fn submit_split(
        self: &Arc<Self>,
        video_id: &str,
        segment_duration: u32,
    ) -> Result<JobHandle, SubmitError> {
        let video = self
            .store
            .get_video(video_id)?
            .ok_or_else(|| SubmitError::VideoNotFound(video_id.to_string()))?;
        validate_segment_duration(segment_duration, video.duration)?;

        let job = Job::new_split(video_id, segment_duration);
        self.store.insert_job(job.clone())?;
        info!(job_id = %job.id, video_id, segment_duration, "split job accepted");

        let this = Arc::clone(self);
        let job_id = job.id.clone();
        let video_id = video_id.to_string();
        let task = tokio::spawn(async move {
            this.run_split(job_id, video_id, segment_duration).await;
        });
        Ok(JobHandle { job, task })
    }

    /// Validate a merge request, record it and start it in the background
    ///
    /// Ids may repeat, but at least two distinct videos are required.
    pub fn submit_merge(self: &Arc<Self>, video_ids: &[String]) -> Result<JobHandle, SubmitError> {
        let distinct: HashSet<&String> = video_ids.iter().collect();
        if distinct.len() < 2 {
            return Err(SubmitError::TooFewVideos);
        }
        for id in video_ids {
            if self.store.get_video(id)?.is_none() {
                return Err(SubmitError::VideoNotFound(id.clone()));
            }
        }

        let job = Job::new_merge(video_ids.to_vec());
        self.store.insert_job(job.clone())?;
        info!(job_id = %job.id, inputs = video_ids.len(), "merge job accepted");

        let this = Arc::clone(self);
        let job_id = job.id.clone();
        let ids = video_ids.to_vec();
        let task = tokio::spawn(async move {
            this.run_merge(job_id, ids).await;
        });
        Ok(JobHandle { job, task })
    }

    /// Wait for a job slot when a job limit is configured
    async fn acquire_job_slot(&self) -> Option<OwnedSemaphorePermit> {
        match &self.job_slots {
            Some(slots) => Arc::clone(slots).acquire_owned().await.ok(),
            None => None,
        }
    }

    fn mark_processing(&self, job_id: &str) -> bool {
        match self.store.update_job(job_id, &mut |job| job.start()) {
            Ok(_) => true,
            Err(e) => {
                error!(job_id, error = %e, "could not mark job processing");
                false
            }
        }
    }

    fn fail_job(&self, job_id: &str, err: &JobError) {
        error!(job_id, error = %err, "job failed");
        let message = err.to_string();
        if let Err(e) = self.store.update_job(job_id, &mut |job| job.fail(&message)) {
            error!(job_id, error = %e, "could not record job failure");
        }
    }

    fn report_progress(&self, job_id: &str, progress: u8) {
        if let Err(e) = self
            .store
            .update_job(job_id, &mut |job| job.advance_progress(progress))
        {
            warn!(job_id, error = %e, "could not record progress");
        }
    }

    /// Complete the job and add its stats, then register its output videos.
    ///
    /// Returns false when the job was no longer `processing`; nothing is
    /// recorded in that case.
    fn publish(
        &self,
        job_id: &str,
        output: &JobOutput,
        mut complete: impl FnMut(&mut Job),
    ) -> Result<bool, JobError> {
        if self
            .store
            .complete_job(job_id, &mut complete, &output.delta)?
            .is_none()
        {
            return Ok(false);
        }
        for video in &output.videos {
            if let Err(e) = self.store.insert_video(video.clone()) {
                error!(job_id, filename = %video.filename, error = %e, "could not register output video");
            }
        }
        Ok(true)
    }

    /// Remove the files of a job whose completion was refused.
    async fn discard(&self, job_id: &str, output: &JobOutput) {
        warn!(job_id, "job no longer processing, discarding its outputs");
        for video in &output.videos {
            if let Err(e) = tokio::fs::remove_file(&video.path).await {
                debug!(path = %video.path.display(), error = %e, "could not remove discarded output");
            }
        }
    }

    async fn run_split(self: Arc<Self>, job_id: String, video_id: String, segment_duration: u32) {
        let _slot = self.acquire_job_slot().await;
        if !self.mark_processing(&job_id) {
            return;
        }
        info!(job_id = %job_id, "split job started");

        let output = match self.execute_split(&job_id, &video_id, segment_duration).await {
            Ok(output) => output,
            Err(e) => return self.fail_job(&job_id, &e),
        };
        let filenames = output.filenames();
        match self.publish(&job_id, &output, |job| job.complete_split(filenames.clone())) {
            Ok(true) => info!(job_id = %job_id, segments = filenames.len(), "split job completed"),
            Ok(false) => self.discard(&job_id, &output).await,
            Err(e) => self.fail_job(&job_id, &e),
        }
    }

    /// Encode every segment; the segments are not recorded yet
    async fn execute_split(
        &self,
        job_id: &str,
        video_id: &str,
        segment_duration: u32,
    ) -> Result<JobOutput, JobError> {
        let video = self
            .store
            .get_video(video_id)?
            .ok_or_else(|| JobError::VideoMissing(video_id.to_string()))?;

        let mut duration = video.duration;
        if duration <= 0.0 {
            duration = self.toolkit.probe(&video.path).await.duration_secs;
        }

        let spans = plan_segments(duration, segment_duration, self.fps);
        if spans.is_empty() {
            return Err(JobError::NoSegments);
        }
        let total = spans.len();

        let workers = Arc::new(Semaphore::new(self.plan.segment_workers.max(1) as usize));
        let mut slots: Vec<Option<(String, SegmentSpan)>> = vec![None; total];
        let mut tasks = JoinSet::new();

        for span in spans {
            // segments are always H.264/AAC, whatever the source container
            let filename = format!("split_{}_segment_{}.{}", job_id, span.index + 1, SEGMENT_EXTENSION);
            let output = self.output_dir.join(&filename);
            let input = video.path.clone();
            let toolkit = Arc::clone(&self.toolkit);
            let workers = Arc::clone(&workers);

            tasks.spawn(async move {
                let _permit = workers.acquire_owned().await.map_err(|e| {
                    (span.index, EncodeError::Io(std::io::Error::other(e)))
                })?;
                debug!(segment = span.index, start = span.start_secs(), "encoding segment");
                match toolkit.encode_segment(&input, &output, &span).await {
                    Ok(()) => Ok((span, filename)),
                    Err(e) => Err((span.index, e)),
                }
            });
        }

        let mut done = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok((span, filename))) => {
                    slots[span.index] = Some((filename, span));
                    done += 1;
                    self.report_progress(job_id, (100 * done / total) as u8);
                }
                Ok(Err((index, source))) => {
                    tasks.abort_all();
                    return Err(JobError::SegmentFailed { index, source });
                }
                Err(e) => {
                    tasks.abort_all();
                    return Err(JobError::TaskPanicked(e.to_string()));
                }
            }
        }

        let produced: Vec<(String, SegmentSpan)> = slots
            .into_iter()
            .collect::<Option<_>>()
            .ok_or_else(|| JobError::TaskPanicked("segment result missing".to_string()))?;

        let mut videos = Vec::with_capacity(produced.len());
        for (filename, span) in produced {
            let path = self.output_dir.join(&filename);
            let size = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
            videos.push(
                Video::new(filename.as_str(), filename.as_str(), path, size, span.duration_secs())
                    .temporary(),
            );
        }

        Ok(JobOutput {
            delta: StatsDelta::split(videos.len(), duration),
            videos,
        })
    }

    async fn run_merge(self: Arc<Self>, job_id: String, video_ids: Vec<String>) {
        let _slot = self.acquire_job_slot().await;
        if !self.mark_processing(&job_id) {
            return;
        }
        info!(job_id = %job_id, "merge job started");

        let output = match self.execute_merge(&job_id, &video_ids).await {
            Ok(output) => output,
            Err(e) => return self.fail_job(&job_id, &e),
        };
        let filename: String = output.filenames().into_iter().collect();
        match self.publish(&job_id, &output, |job| job.complete_merge(filename.clone())) {
            Ok(true) => info!(job_id = %job_id, output = %filename, "merge job completed"),
            Ok(false) => self.discard(&job_id, &output).await,
            Err(e) => self.fail_job(&job_id, &e),
        }
    }

    /// Concatenate the inputs; the merged video is not recorded yet
    async fn execute_merge(&self, job_id: &str, video_ids: &[String]) -> Result<JobOutput, JobError> {
        let mut inputs = Vec::with_capacity(video_ids.len());
        let mut total_duration = 0.0;
        for id in video_ids {
            let video = self
                .store
                .get_video(id)?
                .ok_or_else(|| JobError::VideoMissing(id.clone()))?;
            total_duration += video.duration;
            inputs.push(video.path);
        }

        let filename = format!("merged_{}.mp4", job_id);
        let output = self.output_dir.join(&filename);
        let short_id: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
        let scratch = self
            .output_dir
            .join(SCRATCH_DIR)
            .join(format!("merge_{}_{}", job_id, short_id));
        tokio::fs::create_dir_all(&scratch).await?;

        let result = concat_with_fallback(self.toolkit.as_ref(), &inputs, &output, &scratch).await;
        if let Err(e) = tokio::fs::remove_dir_all(&scratch).await {
            warn!(path = %scratch.display(), error = %e, "could not remove scratch directory");
        }
        let strategy = match result {
            Ok(strategy) => strategy,
            Err(e) => {
                let _ = tokio::fs::remove_file(&output).await;
                return Err(JobError::MergeFailed(e));
            }
        };
        debug!(job_id, ?strategy, "concatenation finished");
        self.report_progress(job_id, 50);

        let info = self.toolkit.probe(&output).await;
        let duration = if info.duration_secs > 0.0 {
            info.duration_secs
        } else {
            total_duration
        };
        let size = tokio::fs::metadata(&output).await.map(|m| m.len()).unwrap_or(0);

        let mut merged = Video::new(filename.as_str(), filename.as_str(), output, size, duration).temporary();
        merged.codec = info.codec;
        merged.resolution = info.resolution;
        merged.bitrate = info.bitrate;

        Ok(JobOutput {
            videos: vec![merged],
            delta: StatsDelta::merge(total_duration),
        })
    }
}
