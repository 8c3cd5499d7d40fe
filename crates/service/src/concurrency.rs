//! Concurrency planning module for vidsplit
//!
//! Derives the per-job segment worker count and the job-level admission limit
//! from CPU core count and configuration.

use crate::config::Config;

/// Upper bound on concurrent segment encodes for a single split job
pub const MAX_SEGMENT_WORKERS: u32 = 4;

/// Worker plan derived from configuration and system resources
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerPlan {
    /// Total logical CPU cores available
    pub total_cores: u32,
    /// Number of segment encodes a split job may run at once
    pub segment_workers: u32,
    /// Maximum number of jobs executing at once (None = unbounded)
    pub max_concurrent_jobs: Option<u32>,
}

impl WorkerPlan {
    /// Derive a worker plan from configuration
    ///
    /// Uses the following rules:
    /// - Detects CPU cores via num_cpus if not specified in config
    /// - segment_workers: explicit value if non-zero, otherwise min(cores, 4)
    /// - segment_workers is always clamped to [1, 4]
    /// - max_concurrent_jobs of 0 means no job-level limit
    pub fn derive(cfg: &Config) -> Self {
        let total_cores = cfg
            .workers
            .logical_cores
            .unwrap_or_else(|| num_cpus::get() as u32);

        let requested = if cfg.workers.segment_workers > 0 {
            cfg.workers.segment_workers
        } else {
            total_cores
        };
        let segment_workers = clamp_workers(requested);

        let max_concurrent_jobs = match cfg.workers.max_concurrent_jobs {
            0 => None,
            n => Some(n),
        };

        Self {
            total_cores,
            segment_workers,
            max_concurrent_jobs,
        }
    }
}

/// Clamp worker count to valid range [1, MAX_SEGMENT_WORKERS]
fn clamp_workers(workers: u32) -> u32 {
    workers.clamp(1, MAX_SEGMENT_WORKERS)
}

/// Public function to derive a worker plan from configuration
pub fn derive_plan(cfg: &Config) -> WorkerPlan {
    WorkerPlan::derive(cfg)
}
