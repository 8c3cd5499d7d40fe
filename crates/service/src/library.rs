//! Media library: uploads, downloads, platform fetches and cleanup.
//!
//! Everything the HTTP layer needs besides job submission lives here, so the
//! handlers stay thin and the behavior is testable without a server.

use crate::encode::MediaToolkit;
use crate::models::{SocialDownload, StatsDelta, Video};
use crate::social::{detect_platform, FetchError, MediaFetcher};
use crate::store::{RecordStore, StoreError};
use regex::Regex;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tracing::{info, warn};
use uuid::Uuid;

/// Accepted upload extensions.
pub const ALLOWED_EXTENSIONS: &[&str] = &["mp4", "mov", "avi", "mkv", "webm", "flv", "wmv", "m4v"];

/// Output files with these prefixes are deleted after a delete-after-read download.
pub const TRANSIENT_PREFIXES: &[&str] = &["tiktok_", "instagram_", "facebook_", "youtube_", "frame_"];

const COPY_BUFFER_BYTES: usize = 64 * 1024;

static UNSAFE_FILENAME_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9_.-]").expect("valid regex"));
static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));

#[derive(Debug, Error)]
pub enum LibraryError {
    #[error("No video file provided")]
    NoFile,

    #[error("Extension .{0} not allowed. Allowed: mp4, mov, avi, mkv, webm, flv, wmv, m4v")]
    InvalidExtension(String),

    #[error("File is empty")]
    EmptyFile,

    #[error("File too large. Maximum size: {}MB", .max_bytes / (1024 * 1024))]
    TooLarge { max_bytes: u64 },

    #[error("Video not found")]
    VideoNotFound(String),

    #[error("File not found")]
    FileNotFound(String),

    #[error("Invalid filename")]
    InvalidFilename,

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Directories and limits used by the library.
#[derive(Debug, Clone)]
pub struct LibrarySettings {
    pub upload_dir: PathBuf,
    pub output_dir: PathBuf,
    pub max_upload_bytes: u64,
    /// Record store directory, spared by cleanup when it lives in a media dir.
    pub state_dir: Option<PathBuf>,
}

/// Body of a file download.
#[derive(Debug)]
pub enum DownloadBody {
    /// Open handle to stream from.
    File { file: tokio::fs::File, len: u64 },
    /// Contents read before the file was deleted.
    Bytes(Vec<u8>),
}

/// A file ready to be sent to a client.
#[derive(Debug)]
pub struct Download {
    /// Name offered to the client.
    pub filename: String,
    pub body: DownloadBody,
}

/// Counts reported by [`MediaLibrary::cleanup`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub files_removed: usize,
    pub stats_reset: bool,
}

/// Lowercased extension of a client-supplied name.
fn extension_of(name: &str) -> Option<String> {
    let (_, ext) = name.rsplit_once('.')?;
    Some(ext.to_lowercase())
}

/// Reduce a client-supplied name to `[A-Za-z0-9_.-]`, without directories.
pub fn secure_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    let s = WHITESPACE_RUN.replace_all(base.trim(), "_");
    let s = UNSAFE_FILENAME_CHARS.replace_all(&s, "");
    s.trim_matches(|c| c == '.' || c == '_').to_string()
}

/// Whether `name` is a plain file name that cannot escape its directory.
fn is_plain_filename(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && !name.contains("..")
        && !name.contains('/')
        && !name.contains('\\')
        && !name.contains('\0')
}

pub fn is_transient(filename: &str) -> bool {
    TRANSIENT_PREFIXES.iter().any(|p| filename.starts_with(p))
}

pub struct MediaLibrary {
    store: Arc<dyn RecordStore>,
    toolkit: Arc<dyn MediaToolkit>,
    fetcher: Arc<dyn MediaFetcher>,
    settings: LibrarySettings,
}

impl MediaLibrary {
    pub fn new(
        store: Arc<dyn RecordStore>,
        toolkit: Arc<dyn MediaToolkit>,
        fetcher: Arc<dyn MediaFetcher>,
        settings: LibrarySettings,
    ) -> Self {
        Self {
            store,
            toolkit,
            fetcher,
            settings,
        }
    }

    pub fn settings(&self) -> &LibrarySettings {
        &self.settings
    }

    /// Store an upload read from `reader` and record it as a video.
    ///
    /// The extension is checked before any byte is written; the size limit is
    /// enforced while copying, and a rejected upload leaves no file behind.
    pub async fn store_upload<R>(&self, original_name: &str, reader: R) -> Result<Video, LibraryError>
    where
        R: AsyncRead + Unpin,
    {
        let original_name = original_name.trim();
        if original_name.is_empty() {
            return Err(LibraryError::NoFile);
        }
        let ext = extension_of(original_name).unwrap_or_default();
        if !ALLOWED_EXTENSIONS.contains(&ext.as_str()) {
            return Err(LibraryError::InvalidExtension(ext));
        }

        let mut safe_name = secure_filename(original_name);
        if extension_of(&safe_name).as_deref() != Some(ext.as_str()) {
            safe_name = format!("video.{}", ext);
        }
        let unique: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
        let filename = format!("{}_{}", unique, safe_name);
        let path = self.settings.upload_dir.join(&filename);

        let size = match self.copy_limited(reader, &path).await {
            Ok(size) => size,
            Err(e) => {
                let _ = tokio::fs::remove_file(&path).await;
                return Err(e);
            }
        };

        let info = self.toolkit.probe(&path).await;
        if info.duration_secs > 0.0 && !info.has_video {
            warn!(filename = %filename, "upload has no video stream");
        }
        let mut video = Video::new(filename.as_str(), original_name, path, size, info.duration_secs);
        video.codec = info.codec;
        video.resolution = info.resolution;
        video.bitrate = info.bitrate;
        self.store.insert_video(video.clone())?;

        info!(video_id = %video.id, filename = %filename, size, duration = video.duration, "video uploaded");
        Ok(video)
    }

    async fn copy_limited<R>(&self, mut reader: R, path: &Path) -> Result<u64, LibraryError>
    where
        R: AsyncRead + Unpin,
    {
        let max_bytes = self.settings.max_upload_bytes;
        let mut file = tokio::fs::File::create(path).await?;
        let mut buf = vec![0u8; COPY_BUFFER_BYTES];
        let mut written: u64 = 0;
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            written += n as u64;
            if written > max_bytes {
                return Err(LibraryError::TooLarge { max_bytes });
            }
            file.write_all(&buf[..n]).await?;
        }
        file.flush().await?;
        if written == 0 {
            return Err(LibraryError::EmptyFile);
        }
        Ok(written)
    }

    pub fn list_videos(&self) -> Result<Vec<Video>, LibraryError> {
        Ok(self.store.list_videos()?)
    }

    pub fn get_video(&self, id: &str) -> Result<Video, LibraryError> {
        self.store
            .get_video(id)?
            .ok_or_else(|| LibraryError::VideoNotFound(id.to_string()))
    }

    /// Delete a video record and its file.
    pub async fn delete_video(&self, id: &str) -> Result<Video, LibraryError> {
        let video = self
            .store
            .delete_video(id)?
            .ok_or_else(|| LibraryError::VideoNotFound(id.to_string()))?;
        match tokio::fs::remove_file(&video.path).await {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %video.path.display(), error = %e, "could not remove video file"),
        }
        info!(video_id = %id, "video deleted");
        Ok(video)
    }

    /// Open a video's file for download under its original name.
    pub async fn open_video(&self, id: &str) -> Result<Download, LibraryError> {
        let video = self.get_video(id)?;
        let file = tokio::fs::File::open(&video.path)
            .await
            .map_err(|_| LibraryError::FileNotFound(video.filename.clone()))?;
        let len = file.metadata().await?.len();
        Ok(Download {
            filename: video.original_name,
            body: DownloadBody::File { file, len },
        })
    }

    /// Open a file from the output directory.
    ///
    /// With `delete_after` set, transient files are read fully, removed, and
    /// their download record is marked consumed.
    pub async fn open_output(&self, filename: &str, delete_after: bool) -> Result<Download, LibraryError> {
        if !is_plain_filename(filename) {
            return Err(LibraryError::InvalidFilename);
        }
        let path = self.settings.output_dir.join(filename);
        let is_file = tokio::fs::metadata(&path)
            .await
            .map(|m| m.is_file())
            .unwrap_or(false);
        if !is_file {
            return Err(LibraryError::FileNotFound(filename.to_string()));
        }

        if delete_after && is_transient(filename) {
            let bytes = tokio::fs::read(&path).await?;
            tokio::fs::remove_file(&path).await?;
            self.store.mark_download_consumed(filename)?;
            if let Some(video) = self.store.find_video_by_filename(filename)? {
                self.store.delete_video(&video.id)?;
            }
            info!(filename, "transient file delivered and removed");
            return Ok(Download {
                filename: filename.to_string(),
                body: DownloadBody::Bytes(bytes),
            });
        }

        let file = tokio::fs::File::open(&path).await?;
        let len = file.metadata().await?.len();
        Ok(Download {
            filename: filename.to_string(),
            body: DownloadBody::File { file, len },
        })
    }

    /// Fetch media for `url` from its platform and record the download.
    pub async fn fetch_social(&self, url: &str) -> Result<SocialDownload, LibraryError> {
        let url = url.trim();
        if url.is_empty() {
            return Err(FetchError::EmptyUrl.into());
        }
        let platform = detect_platform(url).ok_or(FetchError::UnsupportedUrl)?;
        let fetched = self
            .fetcher
            .fetch(url, platform, &self.settings.output_dir)
            .await?;

        let download = SocialDownload {
            id: Uuid::new_v4().to_string(),
            url: url.to_string(),
            filename: fetched.filename,
            path: fetched.path,
            title: fetched.title,
            uploader: fetched.uploader,
            duration: fetched.duration,
            view_count: fetched.view_count,
            like_count: fetched.like_count,
            platform: platform.prefix().to_string(),
            media_type: fetched.media_type,
            created_at: crate::models::current_timestamp_ms(),
            is_downloaded: false,
        };
        self.store.insert_download(download.clone())?;
        self.store.increment_stats(&StatsDelta::download())?;
        Ok(download)
    }

    pub fn list_downloads(&self) -> Result<Vec<SocialDownload>, LibraryError> {
        Ok(self.store.list_downloads()?)
    }

    /// Drop all records and delete everything in the upload and output dirs.
    pub async fn cleanup(&self, reset_stats: bool) -> Result<CleanupReport, LibraryError> {
        self.store.clear_records()?;
        if reset_stats {
            self.store.reset_stats()?;
        }

        let mut files_removed = 0;
        for dir in [&self.settings.upload_dir, &self.settings.output_dir] {
            files_removed += self.empty_dir(dir).await?;
        }
        info!(files_removed, reset_stats, "cleanup finished");
        Ok(CleanupReport {
            files_removed,
            stats_reset: reset_stats,
        })
    }

    async fn empty_dir(&self, dir: &Path) -> Result<usize, LibraryError> {
        let mut entries = match tokio::fs::read_dir(dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if self.is_state_dir(&path) {
                continue;
            }
            let result = if entry.file_type().await?.is_dir() {
                tokio::fs::remove_dir_all(&path).await
            } else {
                tokio::fs::remove_file(&path).await
            };
            match result {
                Ok(()) => removed += 1,
                Err(e) => warn!(path = %path.display(), error = %e, "could not delete during cleanup"),
            }
        }
        Ok(removed)
    }

    fn is_state_dir(&self, path: &Path) -> bool {
        self.settings
            .state_dir
            .as_ref()
            .is_some_and(|state| state.starts_with(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MediaKind;
    use crate::orchestrator::SCRATCH_DIR;
    use crate::store::MemoryStore;
    use crate::testing::{FakeFetcher, FakeToolkit};
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        store: Arc<MemoryStore>,
        library: MediaLibrary,
        upload_dir: PathBuf,
        output_dir: PathBuf,
    }

    fn harness_with(fetcher: FakeFetcher, max_upload_bytes: u64) -> Harness {
        harness_with_toolkit(FakeToolkit::new(), fetcher, max_upload_bytes)
    }

    fn harness_with_toolkit(toolkit: FakeToolkit, fetcher: FakeFetcher, max_upload_bytes: u64) -> Harness {
        let dir = TempDir::new().unwrap();
        let upload_dir = dir.path().join("uploads");
        let output_dir = dir.path().join("outputs");
        std::fs::create_dir_all(&upload_dir).unwrap();
        std::fs::create_dir_all(&output_dir).unwrap();
        let store = Arc::new(MemoryStore::new());
        let library = MediaLibrary::new(
            store.clone(),
            Arc::new(toolkit),
            Arc::new(fetcher),
            LibrarySettings {
                upload_dir: upload_dir.clone(),
                output_dir: output_dir.clone(),
                max_upload_bytes,
                state_dir: None,
            },
        );
        Harness {
            _dir: dir,
            store,
            library,
            upload_dir,
            output_dir,
        }
    }

    fn harness() -> Harness {
        harness_with(FakeFetcher::default(), 1024)
    }

    #[test]
    fn test_secure_filename() {
        assert_eq!(secure_filename("My Holiday Clip.mp4"), "My_Holiday_Clip.mp4");
        assert_eq!(secure_filename("../../etc/passwd.mp4"), "passwd.mp4");
        assert_eq!(secure_filename("C:\\videos\\a b.mov"), "a_b.mov");
        assert_eq!(secure_filename("été.mp4"), "t.mp4");
        assert_eq!(secure_filename("..."), "");
    }

    #[test]
    fn test_is_transient() {
        assert!(is_transient("tiktok_abcd1234_clip.mp4"));
        assert!(is_transient("frame_0001.jpg"));
        assert!(!is_transient("merged_1.mp4"));
        assert!(!is_transient("split_1_segment_1.mp4"));
    }

    #[tokio::test]
    async fn test_upload_records_video() {
        let h = harness();
        let video = h
            .library
            .store_upload("My Clip.mp4", &b"duration=42.5\n"[..])
            .await
            .unwrap();

        assert_eq!(video.original_name, "My Clip.mp4");
        assert!(video.filename.ends_with("_My_Clip.mp4"));
        assert_eq!(video.filename.len(), "12345678_My_Clip.mp4".len());
        assert_eq!(video.duration, 42.5);
        assert_eq!(video.resolution.as_deref(), Some("1280x720"));
        assert_eq!(video.size, 14);
        assert!(video.path.starts_with(&h.upload_dir));
        assert!(video.path.exists());
        assert_eq!(h.library.list_videos().unwrap(), vec![video]);
    }

    #[tokio::test]
    async fn test_upload_rejections_leave_no_file() {
        let h = harness();

        assert!(matches!(
            h.library.store_upload("notes.txt", &b"duration=1"[..]).await,
            Err(LibraryError::InvalidExtension(ext)) if ext == "txt"
        ));
        assert!(matches!(
            h.library.store_upload("noext", &b"duration=1"[..]).await,
            Err(LibraryError::InvalidExtension(_))
        ));
        assert!(matches!(
            h.library.store_upload("empty.mp4", &b""[..]).await,
            Err(LibraryError::EmptyFile)
        ));
        let big = vec![0u8; 2048];
        assert!(matches!(
            h.library.store_upload("big.mp4", &big[..]).await,
            Err(LibraryError::TooLarge { max_bytes: 1024 })
        ));
        assert!(matches!(
            h.library.store_upload("  ", &b"x"[..]).await,
            Err(LibraryError::NoFile)
        ));

        assert_eq!(std::fs::read_dir(&h.upload_dir).unwrap().count(), 0);
        assert!(h.library.list_videos().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unprobeable_upload_is_accepted() {
        let h = harness();
        let video = h.library.store_upload("raw.MKV", &b"garbage"[..]).await.unwrap();
        assert_eq!(video.duration, 0.0);
        assert!(video.codec.is_none());
        assert!(video.filename.ends_with(".MKV"));
    }

    #[tokio::test]
    async fn test_upload_without_video_stream_is_accepted() {
        let h = harness_with_toolkit(FakeToolkit::new().audio_only(), FakeFetcher::default(), 1024);
        let video = h
            .library
            .store_upload("voice.mp4", &b"duration=12.5\n"[..])
            .await
            .unwrap();
        assert_eq!(video.duration, 12.5);
        assert_eq!(h.store.get_video(&video.id).unwrap(), Some(video));
    }

    #[tokio::test]
    async fn test_delete_video_removes_file() {
        let h = harness();
        let video = h.library.store_upload("a.mp4", &b"duration=1"[..]).await.unwrap();

        h.library.delete_video(&video.id).await.unwrap();

        assert!(!video.path.exists());
        assert!(matches!(
            h.library.delete_video(&video.id).await,
            Err(LibraryError::VideoNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_open_video_uses_original_name() {
        let h = harness();
        let video = h.library.store_upload("Trip.mov", &b"duration=3"[..]).await.unwrap();
        let download = h.library.open_video(&video.id).await.unwrap();
        assert_eq!(download.filename, "Trip.mov");
        assert!(matches!(download.body, DownloadBody::File { len: 10, .. }));
    }

    #[tokio::test]
    async fn test_open_output_refuses_traversal() {
        let h = harness();
        for name in ["../secret.mp4", "a/b.mp4", "..", "", "x\\y.mp4"] {
            assert!(matches!(
                h.library.open_output(name, false).await,
                Err(LibraryError::InvalidFilename)
            ), "name: {:?}", name);
        }
        assert!(matches!(
            h.library.open_output("missing.mp4", false).await,
            Err(LibraryError::FileNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_transient_download_deleted_after_read() {
        let h = harness();
        let download = h
            .library
            .fetch_social("https://www.tiktok.com/@cat/video/1")
            .await
            .unwrap();
        assert!(download.filename.starts_with("tiktok_"));

        let served = h.library.open_output(&download.filename, true).await.unwrap();
        match served.body {
            DownloadBody::Bytes(bytes) => assert_eq!(bytes, b"duration=12\n"),
            other => panic!("expected buffered body, got {:?}", other),
        }
        assert!(!h.output_dir.join(&download.filename).exists());
        assert!(h.library.list_downloads().unwrap()[0].is_downloaded);
    }

    #[tokio::test]
    async fn test_non_transient_output_kept_with_delete_flag() {
        let h = harness();
        std::fs::write(h.output_dir.join("merged_x.mp4"), b"duration=3").unwrap();

        let served = h.library.open_output("merged_x.mp4", true).await.unwrap();
        assert!(matches!(served.body, DownloadBody::File { .. }));
        assert!(h.output_dir.join("merged_x.mp4").exists());
    }

    #[tokio::test]
    async fn test_fetch_social_records_download_and_stats() {
        let h = harness();
        let download = h
            .library
            .fetch_social("  https://youtube.com/shorts/abc  ")
            .await
            .unwrap();

        assert_eq!(download.platform, "youtube");
        assert_eq!(download.url, "https://youtube.com/shorts/abc");
        assert_eq!(download.title, "Funny Cat: Part 2");
        assert_eq!(download.media_type, MediaKind::Video);
        assert!(!download.is_downloaded);
        assert_eq!(h.store.stats().unwrap().total_downloads, 1);
        assert_eq!(h.library.list_downloads().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_fetch_social_rejections() {
        let h = harness_with(FakeFetcher { fail: true, ..FakeFetcher::default() }, 1024);

        assert!(matches!(
            h.library.fetch_social("   ").await,
            Err(LibraryError::Fetch(FetchError::EmptyUrl))
        ));
        assert!(matches!(
            h.library.fetch_social("https://vimeo.com/1").await,
            Err(LibraryError::Fetch(FetchError::UnsupportedUrl))
        ));
        assert!(matches!(
            h.library.fetch_social("https://fb.watch/x").await,
            Err(LibraryError::Fetch(FetchError::ToolFailed { .. }))
        ));
        assert_eq!(h.store.stats().unwrap().total_downloads, 0);
    }

    #[tokio::test]
    async fn test_cleanup_removes_records_and_files() {
        let h = harness();
        h.library.store_upload("a.mp4", &b"duration=1"[..]).await.unwrap();
        h.library.fetch_social("https://fb.watch/x").await.unwrap();
        std::fs::create_dir_all(h.output_dir.join(SCRATCH_DIR).join("merge_x")).unwrap();

        let report = h.library.cleanup(false).await.unwrap();

        assert_eq!(report.files_removed, 3);
        assert!(!report.stats_reset);
        assert!(h.library.list_videos().unwrap().is_empty());
        assert!(h.library.list_downloads().unwrap().is_empty());
        assert_eq!(std::fs::read_dir(&h.upload_dir).unwrap().count(), 0);
        assert_eq!(std::fs::read_dir(&h.output_dir).unwrap().count(), 0);
        assert_eq!(h.store.stats().unwrap().total_downloads, 1);

        h.library.cleanup(true).await.unwrap();
        assert_eq!(h.store.stats().unwrap().total_downloads, 0);
    }

    #[tokio::test]
    async fn test_cleanup_spares_state_dir_inside_output() {
        let dir = TempDir::new().unwrap();
        let output_dir = dir.path().join("outputs");
        let state_dir = output_dir.join("state");
        std::fs::create_dir_all(&state_dir).unwrap();
        std::fs::write(output_dir.join("merged_1.mp4"), b"x").unwrap();
        let library = MediaLibrary::new(
            Arc::new(MemoryStore::new()),
            Arc::new(FakeToolkit::new()),
            Arc::new(FakeFetcher::default()),
            LibrarySettings {
                upload_dir: dir.path().join("uploads"),
                output_dir: output_dir.clone(),
                max_upload_bytes: 1024,
                state_dir: Some(state_dir.clone()),
            },
        );

        let report = library.cleanup(false).await.unwrap();
        assert_eq!(report.files_removed, 1);
        assert!(state_dir.exists());
    }
}
