//! Media fetch from social platforms through yt-dlp.
//!
//! The extraction tool is a black box: we hand it a URL and an output
//! template, and read back its info JSON. Every field of that JSON is
//! optional since its shape is not stable across versions.

use crate::models::MediaKind;
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::{debug, info};
use uuid::Uuid;

/// Maximum length of a sanitized title.
const MAX_TITLE_LEN: usize = 80;

/// Extensions treated as still images.
const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp"];

/// Error type for platform fetches.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("URL is required")]
    EmptyUrl,

    #[error("URL not supported. Supported platforms: TikTok, Instagram, Facebook, YouTube Shorts")]
    UnsupportedUrl,

    #[error("{program} failed: {message}")]
    ToolFailed { program: String, message: String },

    #[error("download timed out after {0:?}")]
    Timeout(Duration),

    #[error("could not read media info: {0}")]
    InvalidInfo(String),

    #[error("download failed - file not found")]
    FileNotFound,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Supported platforms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    TikTok,
    Instagram,
    Facebook,
    YouTube,
}

impl Platform {
    const ALL: [Platform; 4] = [
        Platform::TikTok,
        Platform::Instagram,
        Platform::Facebook,
        Platform::YouTube,
    ];

    /// Lowercase key, also used as the filename prefix.
    pub fn prefix(&self) -> &'static str {
        match self {
            Platform::TikTok => "tiktok",
            Platform::Instagram => "instagram",
            Platform::Facebook => "facebook",
            Platform::YouTube => "youtube",
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            Platform::TikTok => "TikTok",
            Platform::Instagram => "Instagram",
            Platform::Facebook => "Facebook",
            Platform::YouTube => "YouTube",
        }
    }

    fn url_patterns(&self) -> &'static [&'static str] {
        match self {
            Platform::TikTok => &["tiktok.com/", "vm.tiktok.com/", "vt.tiktok.com/"],
            Platform::Instagram => &["instagram.com/reel/", "instagram.com/p/", "instagram.com/tv/"],
            Platform::Facebook => &[
                "facebook.com/watch",
                "facebook.com/reel/",
                "fb.watch/",
                "facebook.com/video",
            ],
            Platform::YouTube => &["youtube.com/shorts/", "youtu.be/", "youtube.com/watch"],
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.prefix())
    }
}

/// Identify the platform a URL belongs to.
pub fn detect_platform(url: &str) -> Option<Platform> {
    let url = url.to_lowercase();
    Platform::ALL
        .into_iter()
        .find(|p| p.url_patterns().iter().any(|pattern| url.contains(pattern)))
}

static HOSTILE_CHARS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[<>:"/\\|?*#%&{}$!'`@^+=\[\]]"#).expect("valid regex"));
static WHITESPACE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").expect("valid regex"));
static DOT_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\.+").expect("valid regex"));
static UNDERSCORE_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"_+").expect("valid regex"));

/// Turn a media title into a filesystem-safe name fragment.
pub fn sanitize_title(title: &str) -> String {
    let s = HOSTILE_CHARS.replace_all(title, "");
    let s = WHITESPACE_RUN.replace_all(&s, "_");
    let s = DOT_RUN.replace_all(&s, ".");
    let s = UNDERSCORE_RUN.replace_all(&s, "_");
    let s = s.trim_matches(|c| c == '.' || c == '_');
    let truncated: String = s.chars().take(MAX_TITLE_LEN).collect();
    // Truncation can expose a trailing separator again.
    let truncated = truncated.trim_end_matches(|c| c == '.' || c == '_');
    if truncated.is_empty() {
        "video".to_string()
    } else {
        truncated.to_string()
    }
}

/// Media type implied by a file extension.
pub fn media_kind_for(path: &Path) -> MediaKind {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
        .unwrap_or_default();
    if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        MediaKind::Image
    } else {
        MediaKind::Video
    }
}

/// Info JSON emitted by yt-dlp with `--print-json`.
#[derive(Debug, Clone, Default, Deserialize, PartialEq)]
pub struct YtDlpInfo {
    pub id: Option<String>,
    pub title: Option<String>,
    pub uploader: Option<String>,
    pub channel: Option<String>,
    pub duration: Option<f64>,
    pub view_count: Option<u64>,
    pub like_count: Option<u64>,
    pub ext: Option<String>,
    #[serde(rename = "_filename")]
    pub filename: Option<String>,
}

impl YtDlpInfo {
    /// Parse the last JSON object line of yt-dlp's stdout.
    pub fn parse(stdout: &str) -> Result<Self, FetchError> {
        let line = stdout
            .lines()
            .rev()
            .map(str::trim)
            .find(|l| l.starts_with('{'))
            .ok_or_else(|| FetchError::InvalidInfo("no JSON object in output".to_string()))?;
        serde_json::from_str(line).map_err(|e| FetchError::InvalidInfo(e.to_string()))
    }

    pub fn uploader_name(&self) -> Option<String> {
        self.uploader.clone().or_else(|| self.channel.clone())
    }
}

/// A file retrieved and renamed into the output directory.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedMedia {
    pub filename: String,
    pub path: PathBuf,
    pub title: String,
    pub uploader: Option<String>,
    pub duration: f64,
    pub view_count: Option<u64>,
    pub like_count: Option<u64>,
    pub platform: Platform,
    pub media_type: MediaKind,
}

/// Capability to fetch media for a URL into a directory.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(
        &self,
        url: &str,
        platform: Platform,
        output_dir: &Path,
    ) -> Result<FetchedMedia, FetchError>;
}

/// Pick a name `<stem>.<ext>` in `dir`, appending `_N` until it is free.
pub async fn unique_name(dir: &Path, stem: &str, ext: &str) -> String {
    let mut candidate = format!("{}.{}", stem, ext);
    let mut counter = 1;
    while tokio::fs::try_exists(dir.join(&candidate)).await.unwrap_or(false) {
        candidate = format!("{}_{}.{}", stem, counter, ext);
        counter += 1;
    }
    candidate
}

/// [`MediaFetcher`] that shells out to yt-dlp.
#[derive(Debug, Clone)]
pub struct YtDlpFetcher {
    program: String,
    timeout: Duration,
}

impl YtDlpFetcher {
    pub fn new(program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            timeout,
        }
    }

    /// Build the download command writing to `<prefix>_<id>_temp.<ext>`.
    pub fn build_command(&self, url: &str, output_dir: &Path, temp_stem: &str) -> std::process::Command {
        let template = output_dir.join(format!("{}.%(ext)s", temp_stem));
        let mut cmd = std::process::Command::new(&self.program);
        cmd.arg("--no-warnings")
            .arg("--no-playlist")
            .arg("-f")
            .arg("best[ext=mp4]/best")
            .arg("-o")
            .arg(template)
            .arg("--print-json")
            .arg(url);
        cmd
    }

    /// Find the file yt-dlp wrote for `temp_stem`.
    async fn locate_download(
        info: &YtDlpInfo,
        output_dir: &Path,
        temp_stem: &str,
    ) -> Result<PathBuf, FetchError> {
        if let Some(reported) = info.filename.as_deref().map(PathBuf::from) {
            if tokio::fs::try_exists(&reported).await.unwrap_or(false) {
                return Ok(reported);
            }
        }
        let mut entries = tokio::fs::read_dir(output_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if name.starts_with(&format!("{}.", temp_stem)) && !name.ends_with(".part") {
                return Ok(entry.path());
            }
        }
        Err(FetchError::FileNotFound)
    }
}

#[async_trait]
impl MediaFetcher for YtDlpFetcher {
    async fn fetch(
        &self,
        url: &str,
        platform: Platform,
        output_dir: &Path,
    ) -> Result<FetchedMedia, FetchError> {
        let short_id: String = Uuid::new_v4().simple().to_string().chars().take(8).collect();
        let temp_stem = format!("{}_{}_temp", platform.prefix(), short_id);

        let cmd = self.build_command(url, output_dir, &temp_stem);
        debug!(command = ?cmd, "running downloader");
        let mut cmd = Command::from(cmd);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let child = cmd.spawn().map_err(|e| FetchError::ToolFailed {
            program: self.program.clone(),
            message: e.to_string(),
        })?;
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(result) => result?,
            Err(_) => return Err(FetchError::Timeout(self.timeout)),
        };
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(FetchError::ToolFailed {
                program: self.program.clone(),
                message: stderr.lines().last().unwrap_or("unknown error").trim().to_string(),
            });
        }

        let info = YtDlpInfo::parse(&String::from_utf8_lossy(&output.stdout))?;
        let temp_path = Self::locate_download(&info, output_dir, &temp_stem).await?;

        let ext = temp_path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_string)
            .or_else(|| info.ext.clone())
            .unwrap_or_else(|| "mp4".to_string());
        let title = info
            .title
            .clone()
            .unwrap_or_else(|| format!("{} Video", platform.display_name()));
        let stem = format!("{}_{}_{}", platform.prefix(), short_id, sanitize_title(&title));
        let filename = unique_name(output_dir, &stem, &ext).await;
        let path = output_dir.join(&filename);
        tokio::fs::rename(&temp_path, &path).await?;

        info!(%platform, filename = %filename, "downloaded media");

        Ok(FetchedMedia {
            media_type: media_kind_for(&path),
            filename,
            path,
            title,
            uploader: info.uploader_name(),
            duration: info.duration.unwrap_or(0.0),
            view_count: info.view_count,
            like_count: info.like_count,
            platform,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use tempfile::TempDir;

    #[test]
    fn test_detect_platform() {
        let cases = [
            ("https://www.tiktok.com/@user/video/123", Some(Platform::TikTok)),
            ("https://vm.tiktok.com/ZMabc/", Some(Platform::TikTok)),
            ("https://www.instagram.com/reel/Cxyz/", Some(Platform::Instagram)),
            ("https://instagram.com/p/abc", Some(Platform::Instagram)),
            ("https://fb.watch/abc/", Some(Platform::Facebook)),
            ("https://www.facebook.com/watch?v=1", Some(Platform::Facebook)),
            ("https://youtube.com/shorts/abc", Some(Platform::YouTube)),
            ("https://youtu.be/abc", Some(Platform::YouTube)),
            ("https://WWW.YOUTUBE.COM/watch?v=abc", Some(Platform::YouTube)),
            ("https://instagram.com/someuser", None),
            ("https://vimeo.com/123", None),
            ("", None),
        ];
        for (url, expected) in cases {
            assert_eq!(detect_platform(url), expected, "url: {}", url);
        }
    }

    #[test]
    fn test_sanitize_title() {
        assert_eq!(sanitize_title("My  Cool: Video?!"), "My_Cool_Video");
        assert_eq!(sanitize_title("a...b__c"), "a.b_c");
        assert_eq!(sanitize_title("  ._hello_. "), "hello");
        assert_eq!(sanitize_title("???"), "video");
        assert_eq!(sanitize_title(""), "video");
        assert_eq!(sanitize_title("#fyp @me [remix]"), "fyp_me_remix");
    }

    #[test]
    fn test_media_kind_for() {
        assert_eq!(media_kind_for(Path::new("a.JPG")), MediaKind::Image);
        assert_eq!(media_kind_for(Path::new("a.webp")), MediaKind::Image);
        assert_eq!(media_kind_for(Path::new("a.mp4")), MediaKind::Video);
        assert_eq!(media_kind_for(Path::new("noext")), MediaKind::Video);
    }

    #[test]
    fn test_parse_info_with_missing_fields() {
        let stdout = "[download] 100%\n{\"title\": \"Clip\", \"duration\": 12.5, \"channel\": \"chan\"}\n";
        let info = YtDlpInfo::parse(stdout).unwrap();
        assert_eq!(info.title.as_deref(), Some("Clip"));
        assert_eq!(info.duration, Some(12.5));
        assert_eq!(info.view_count, None);
        assert_eq!(info.uploader_name().as_deref(), Some("chan"));
    }

    #[test]
    fn test_parse_info_without_json() {
        assert!(matches!(
            YtDlpInfo::parse("ERROR: something"),
            Err(FetchError::InvalidInfo(_))
        ));
    }

    #[test]
    fn test_build_command() {
        let fetcher = YtDlpFetcher::new("yt-dlp", Duration::from_secs(10));
        let cmd = fetcher.build_command("https://youtu.be/x", Path::new("/out"), "youtube_abcd1234_temp");
        let args: Vec<String> = cmd
            .get_args()
            .filter_map(|a| a.to_str().map(String::from))
            .collect();
        assert!(args.windows(2).any(|p| p[0] == "-o" && p[1] == "/out/youtube_abcd1234_temp.%(ext)s"));
        assert!(args.windows(2).any(|p| p[0] == "-f" && p[1] == "best[ext=mp4]/best"));
        assert!(args.iter().any(|a| a == "--print-json"));
        assert_eq!(args.last().map(String::as_str), Some("https://youtu.be/x"));
    }

    #[tokio::test]
    async fn test_unique_name_appends_counter() {
        let dir = TempDir::new().unwrap();
        assert_eq!(unique_name(dir.path(), "clip", "mp4").await, "clip.mp4");
        tokio::fs::write(dir.path().join("clip.mp4"), b"x").await.unwrap();
        tokio::fs::write(dir.path().join("clip_1.mp4"), b"x").await.unwrap();
        assert_eq!(unique_name(dir.path(), "clip", "mp4").await, "clip_2.mp4");
    }

    #[tokio::test]
    async fn test_missing_downloader_reports_tool_failure() {
        let dir = TempDir::new().unwrap();
        let fetcher = YtDlpFetcher::new("/nonexistent/yt-dlp", Duration::from_secs(5));
        let err = fetcher
            .fetch("https://youtu.be/x", Platform::YouTube, dir.path())
            .await
            .unwrap_err();
        assert!(matches!(err, FetchError::ToolFailed { .. }));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        #[test]
        fn prop_sanitized_title_is_safe(title in "\\PC{0,200}") {
            let s = sanitize_title(&title);
            prop_assert!(!s.is_empty());
            prop_assert!(s.chars().count() <= MAX_TITLE_LEN);
            prop_assert!(!s.contains('/'));
            prop_assert!(!s.contains('\\'));
            prop_assert!(!s.chars().any(char::is_whitespace));
            prop_assert!(!s.starts_with('.') && !s.starts_with('_'));
        }
    }
}
