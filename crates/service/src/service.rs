//! Service assembly for vidsplit
//!
//! Wires configuration, record store, media toolkit, fetcher, job orchestrator
//! and media library together, then serves the HTTP API.

use crate::api::{create_router, AppState};
use crate::concurrency::{derive_plan, WorkerPlan};
use crate::config::{Config, ConfigError};
use crate::encode::{ffmpeg::FfmpegToolkit, EncoderSettings, MediaToolkit};
use crate::library::{LibrarySettings, MediaLibrary};
use crate::orchestrator::JobOrchestrator;
use crate::social::{MediaFetcher, YtDlpFetcher};
use crate::startup::{ensure_directories, run_startup_checks, StartupError};
use crate::store::{JsonFileStore, MemoryStore, RecordStore, StoreError};
use axum::Router;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Error type for service operations
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Startup check failed
    #[error("Startup check failed: {0}")]
    Startup(#[from] StartupError),

    /// Record store could not be opened
    #[error("Record store error: {0}")]
    Store(#[from] StoreError),

    /// Server error
    #[error("Server error: {0}")]
    Server(#[from] std::io::Error),
}

/// All runtime components of a running vidsplit instance
pub struct Service {
    /// Configuration loaded from file and environment
    pub config: Config,
    /// Derived worker plan
    pub plan: WorkerPlan,
    pub store: Arc<dyn RecordStore>,
    pub orchestrator: Arc<JobOrchestrator>,
    pub library: Arc<MediaLibrary>,
}

impl Service {
    /// Initialize the service, verifying external tools first
    ///
    /// 1. Run startup checks (ffmpeg, ffprobe, downloader, directories)
    /// 2. Assemble the components
    pub async fn new(config: Config) -> Result<Self, ServiceError> {
        let report = run_startup_checks(&config)?;
        info!(
            ffmpeg_major = ?report.ffmpeg_major,
            downloader = report.downloader_available,
            "startup checks passed"
        );
        Self::assemble(config)
    }

    /// Initialize the service without checking for external tools
    ///
    /// Directories are still created. Useful for testing when ffmpeg is not
    /// installed.
    pub fn new_without_checks(config: Config) -> Result<Self, ServiceError> {
        ensure_directories(&config)?;
        Self::assemble(config)
    }

    fn assemble(config: Config) -> Result<Self, ServiceError> {
        let plan = derive_plan(&config);

        let store: Arc<dyn RecordStore> = match &config.storage.state_dir {
            Some(dir) => Arc::new(JsonFileStore::open(dir.clone())?),
            None => Arc::new(MemoryStore::new()),
        };

        let settings = EncoderSettings::from_config(&config.encoder);
        let fps = settings.fps;
        let toolkit: Arc<dyn MediaToolkit> = Arc::new(FfmpegToolkit::new(settings));
        let fetcher: Arc<dyn MediaFetcher> = Arc::new(YtDlpFetcher::new(
            config.social.downloader_path.clone(),
            Duration::from_secs(config.social.download_timeout_secs),
        ));

        let orchestrator = Arc::new(JobOrchestrator::new(
            Arc::clone(&store),
            Arc::clone(&toolkit),
            plan.clone(),
            config.storage.output_dir.clone(),
            fps,
        ));
        let library = Arc::new(MediaLibrary::new(
            Arc::clone(&store),
            toolkit,
            fetcher,
            LibrarySettings {
                upload_dir: config.storage.upload_dir.clone(),
                output_dir: config.storage.output_dir.clone(),
                max_upload_bytes: config.storage.max_upload_bytes,
                state_dir: config.storage.state_dir.clone(),
            },
        ));

        info!(
            segment_workers = plan.segment_workers,
            max_concurrent_jobs = ?plan.max_concurrent_jobs,
            persistent = config.storage.state_dir.is_some(),
            "service assembled"
        );

        Ok(Self {
            config,
            plan,
            store,
            orchestrator,
            library,
        })
    }

    /// Build the HTTP router over this service's components
    pub fn router(&self) -> Router {
        create_router(AppState {
            store: Arc::clone(&self.store),
            orchestrator: Arc::clone(&self.orchestrator),
            library: Arc::clone(&self.library),
        })
    }

    /// Bind `server.addr:server.port` and serve until Ctrl-C
    pub async fn run(self) -> Result<(), ServiceError> {
        let addr = format!("{}:{}", self.config.server.addr, self.config.server.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;
        info!(addr = %listener.local_addr()?, "listening");

        axum::serve(listener, self.router())
            .with_graceful_shutdown(async {
                let _ = tokio::signal::ctrl_c().await;
                info!("shutdown requested");
            })
            .await?;
        Ok(())
    }
}
