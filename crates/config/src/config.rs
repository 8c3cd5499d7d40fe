//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// HTTP listener configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_addr")]
    pub addr: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_addr() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    5000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: default_addr(),
            port: default_port(),
        }
    }
}

/// Where uploads, job outputs and persisted records live
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// Directory receiving uploaded source videos
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    /// Directory receiving segments, merged files and platform downloads
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Directory for JSON record files; records are kept in memory only when unset
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    /// Maximum accepted upload size in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: u64,
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("outputs")
}

fn default_max_upload_bytes() -> u64 {
    500 * 1024 * 1024
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            output_dir: default_output_dir(),
            state_dir: None,
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

/// Encoder (ffmpeg/ffprobe) configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncoderConfig {
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: String,
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: String,
    /// Fixed output frame rate used for every re-encode
    #[serde(default = "default_fps")]
    pub fps: u32,
    #[serde(default = "default_video_codec")]
    pub video_codec: String,
    #[serde(default = "default_preset")]
    pub preset: String,
    #[serde(default = "default_crf")]
    pub crf: u8,
    #[serde(default = "default_audio_codec")]
    pub audio_codec: String,
    #[serde(default = "default_audio_bitrate")]
    pub audio_bitrate: String,
    /// Timeout for a single segment encode
    #[serde(default = "default_segment_timeout_secs")]
    pub segment_timeout_secs: u64,
    /// Timeout for the stream-copy concatenation
    #[serde(default = "default_concat_timeout_secs")]
    pub concat_timeout_secs: u64,
    /// Timeout for the re-encoding concatenation fallback
    #[serde(default = "default_reencode_timeout_secs")]
    pub reencode_timeout_secs: u64,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

fn default_ffmpeg_path() -> String {
    "ffmpeg".to_string()
}

fn default_ffprobe_path() -> String {
    "ffprobe".to_string()
}

fn default_fps() -> u32 {
    30
}

fn default_video_codec() -> String {
    "libx264".to_string()
}

fn default_preset() -> String {
    "medium".to_string()
}

fn default_crf() -> u8 {
    23
}

fn default_audio_codec() -> String {
    "aac".to_string()
}

fn default_audio_bitrate() -> String {
    "192k".to_string()
}

fn default_segment_timeout_secs() -> u64 {
    600
}

fn default_concat_timeout_secs() -> u64 {
    600
}

fn default_reencode_timeout_secs() -> u64 {
    1200
}

fn default_probe_timeout_secs() -> u64 {
    30
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            fps: default_fps(),
            video_codec: default_video_codec(),
            preset: default_preset(),
            crf: default_crf(),
            audio_codec: default_audio_codec(),
            audio_bitrate: default_audio_bitrate(),
            segment_timeout_secs: default_segment_timeout_secs(),
            concat_timeout_secs: default_concat_timeout_secs(),
            reencode_timeout_secs: default_reencode_timeout_secs(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct WorkersConfig {
    /// Number of logical cores (auto-detected if None)
    pub logical_cores: Option<u32>,
    /// Concurrent segment encodes per split job (0 = auto-derive)
    #[serde(default)]
    pub segment_workers: u32,
    /// Jobs allowed to execute at once (0 = unbounded)
    #[serde(default)]
    pub max_concurrent_jobs: u32,
}

/// External platform downloader configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SocialConfig {
    #[serde(default = "default_downloader_path")]
    pub downloader_path: String,
    #[serde(default = "default_download_timeout_secs")]
    pub download_timeout_secs: u64,
}

fn default_downloader_path() -> String {
    "yt-dlp".to_string()
}

fn default_download_timeout_secs() -> u64 {
    300
}

impl Default for SocialConfig {
    fn default() -> Self {
        Self {
            downloader_path: default_downloader_path(),
            download_timeout_secs: default_download_timeout_secs(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub workers: WorkersConfig,
    #[serde(default)]
    pub social: SocialConfig,
}

/// Parse an environment variable into `target`, leaving it untouched when unset or invalid
fn override_parsed<T: std::str::FromStr>(name: &str, target: &mut T) {
    if let Ok(val) = env::var(name) {
        if let Ok(parsed) = val.parse::<T>() {
            *target = parsed;
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - VIDSPLIT_ADDR -> server.addr
    /// - VIDSPLIT_PORT -> server.port
    /// - VIDSPLIT_UPLOAD_DIR -> storage.upload_dir
    /// - VIDSPLIT_OUTPUT_DIR -> storage.output_dir
    /// - VIDSPLIT_STATE_DIR -> storage.state_dir
    /// - VIDSPLIT_FFMPEG -> encoder.ffmpeg_path
    /// - VIDSPLIT_FFPROBE -> encoder.ffprobe_path
    /// - VIDSPLIT_FPS -> encoder.fps
    /// - VIDSPLIT_SEGMENT_WORKERS -> workers.segment_workers
    /// - VIDSPLIT_MAX_CONCURRENT_JOBS -> workers.max_concurrent_jobs
    /// - VIDSPLIT_YTDLP -> social.downloader_path
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("VIDSPLIT_ADDR") {
            self.server.addr = val;
        }
        override_parsed("VIDSPLIT_PORT", &mut self.server.port);

        if let Ok(val) = env::var("VIDSPLIT_UPLOAD_DIR") {
            self.storage.upload_dir = PathBuf::from(val);
        }
        if let Ok(val) = env::var("VIDSPLIT_OUTPUT_DIR") {
            self.storage.output_dir = PathBuf::from(val);
        }
        if let Ok(val) = env::var("VIDSPLIT_STATE_DIR") {
            // An empty value switches back to the in-memory store
            self.storage.state_dir = if val.is_empty() {
                None
            } else {
                Some(PathBuf::from(val))
            };
        }

        if let Ok(val) = env::var("VIDSPLIT_FFMPEG") {
            self.encoder.ffmpeg_path = val;
        }
        if let Ok(val) = env::var("VIDSPLIT_FFPROBE") {
            self.encoder.ffprobe_path = val;
        }
        override_parsed("VIDSPLIT_FPS", &mut self.encoder.fps);

        override_parsed("VIDSPLIT_SEGMENT_WORKERS", &mut self.workers.segment_workers);
        override_parsed(
            "VIDSPLIT_MAX_CONCURRENT_JOBS",
            &mut self.workers.max_concurrent_jobs,
        );

        if let Ok(val) = env::var("VIDSPLIT_YTDLP") {
            self.social.downloader_path = val;
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file yields the defaults
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        match Self::load_from_file(path) {
            Ok(mut config) => {
                config.apply_env_overrides();
                Ok(config)
            }
            Err(ConfigError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                let mut config = Self::default();
                config.apply_env_overrides();
                Ok(config)
            }
            Err(e) => Err(e),
        }
    }
}
