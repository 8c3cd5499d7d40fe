//! vidsplit
//!
//! Web service that splits videos into fixed-length segments and merges
//! videos into one, running the ffmpeg work as background jobs.

pub mod api;
pub mod concurrency;
pub mod encode;
pub mod library;
pub mod models;
pub mod orchestrator;
pub mod probe;
pub mod segments;
pub mod service;
pub mod social;
pub mod startup;
pub mod store;

#[cfg(test)]
mod testing;

pub use vidsplit_config as config;
pub use vidsplit_config::Config;
pub use api::{create_router, ApiError, AppState, JobAccepted};
pub use concurrency::{derive_plan, WorkerPlan};
pub use encode::{ffmpeg::FfmpegToolkit, EncodeError, EncoderSettings, MediaToolkit};
pub use library::{LibraryError, MediaLibrary};
pub use models::{Job, JobStatus, JobType, SocialDownload, Stats, Video};
pub use orchestrator::{JobError, JobHandle, JobOrchestrator, SubmitError};
pub use service::{Service, ServiceError};
pub use startup::{check_tool_available, parse_ffmpeg_version, run_startup_checks, StartupError};
pub use store::{JsonFileStore, MemoryStore, RecordStore, StoreError};
