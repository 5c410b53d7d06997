use facegate_core::{CaptureConfig, ChallengeWindow};
use facegate_hw::CameraOptions;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Client configuration: an optional TOML file overlaid with `FACEGATE_*`
/// environment variables.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub capture: CaptureSection,
    pub camera: CameraSection,
    pub voice: VoiceSection,
    pub location: LocationSection,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Attendance API root; endpoint paths are appended to it.
    pub base_url: String,
    pub timeout_secs: u64,
    /// Organization code sent with driver check-in/out.
    pub org_code: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8000/api/v1/attendance".to_string(),
            timeout_secs: 45,
            org_code: String::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CaptureSection {
    pub frame_count: usize,
    pub frame_interval_ms: u64,
    pub min_frames: usize,
    pub challenge_first: usize,
    pub challenge_last: usize,
    /// Defaults to the frame interval when unset; may not exceed it.
    pub grab_timeout_ms: Option<u64>,
}

impl Default for CaptureSection {
    fn default() -> Self {
        let defaults = CaptureConfig::default();
        Self {
            frame_count: defaults.frame_count,
            frame_interval_ms: defaults.frame_interval.as_millis() as u64,
            min_frames: defaults.min_frames,
            challenge_first: defaults.challenge_window.first,
            challenge_last: defaults.challenge_window.last,
            grab_timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CameraSection {
    /// V4L2 device path.
    pub device: String,
    pub width: u32,
    pub height: u32,
    pub jpeg_quality: u8,
    pub skip_dark: bool,
    /// Replay images from this directory instead of opening a camera.
    pub frames_dir: Option<PathBuf>,
}

impl Default for CameraSection {
    fn default() -> Self {
        let options = CameraOptions::default();
        Self {
            device: "/dev/video0".to_string(),
            width: options.width,
            height: options.height,
            jpeg_quality: options.jpeg_quality,
            skip_dark: options.skip_dark,
            frames_dir: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VoiceSection {
    pub locale: String,
    /// Text-to-speech command, e.g. `espeak-ng -v {locale}`. The prompt text
    /// is appended as the last argument. Prompts are only logged when unset.
    pub command: Option<String>,
}

impl Default for VoiceSection {
    fn default() -> Self {
        Self {
            locale: CaptureConfig::default().locale,
            command: None,
        }
    }
}

/// Fixed coordinates for a stationary kiosk.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub struct LocationSection {
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

impl Config {
    /// `$XDG_CONFIG_HOME/facegate/config.toml`, falling back to `~/.config`.
    pub fn default_path() -> PathBuf {
        std::env::var("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| {
                let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
                PathBuf::from(home).join(".config")
            })
            .join("facegate")
            .join("config.toml")
    }

    /// Load the file at `path` (which must exist), or the default file if it
    /// exists, then apply environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => {
                let path = Self::default_path();
                if path.exists() {
                    Self::from_file(&path)?
                } else {
                    tracing::debug!(path = %path.display(), "no config file; using defaults");
                    Self::default()
                }
            }
        };
        config.apply_env(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        tracing::info!(path = %path.display(), "loaded config");
        Ok(config)
    }

    /// Overlay `FACEGATE_*` variables. Unparseable values are ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup("FACEGATE_BASE_URL") {
            self.server.base_url = url;
        }
        if let Some(device) = lookup("FACEGATE_CAMERA_DEVICE") {
            self.camera.device = device;
        }
        if let Some(locale) = lookup("FACEGATE_LOCALE") {
            self.voice.locale = locale;
        }
        if let Some(command) = lookup("FACEGATE_VOICE_COMMAND") {
            self.voice.command = Some(command).filter(|c| !c.trim().is_empty());
        }
        self.server.timeout_secs = env_parse(&lookup, "FACEGATE_SUBMIT_TIMEOUT_SECS", self.server.timeout_secs);
        self.capture.frame_count = env_parse(&lookup, "FACEGATE_FRAME_COUNT", self.capture.frame_count);
        self.capture.frame_interval_ms =
            env_parse(&lookup, "FACEGATE_FRAME_INTERVAL_MS", self.capture.frame_interval_ms);
        self.capture.min_frames = env_parse(&lookup, "FACEGATE_MIN_FRAMES", self.capture.min_frames);
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.base_url.trim().is_empty() {
            return Err(ConfigError::Invalid("server.base_url is empty".into()));
        }
        if self.server.timeout_secs == 0 {
            return Err(ConfigError::Invalid("server.timeout_secs must be positive".into()));
        }
        if self.location.latitude.is_some() != self.location.longitude.is_some() {
            return Err(ConfigError::Invalid(
                "location.latitude and location.longitude must be set together".into(),
            ));
        }
        self.capture_config()
            .schedule()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        Ok(())
    }

    pub fn submit_timeout(&self) -> Duration {
        Duration::from_secs(self.server.timeout_secs)
    }

    pub fn capture_config(&self) -> CaptureConfig {
        let frame_interval = Duration::from_millis(self.capture.frame_interval_ms);
        let defaults = CaptureConfig::default();
        let mut prompts = defaults.prompts.clone();
        // Stretch the last prompt so the table covers longer bursts.
        let covered: u64 = prompts.iter().map(|p| p.duration_ms).sum();
        let window = self.capture.frame_interval_ms * self.capture.frame_count as u64;
        if let Some(last) = prompts.last_mut() {
            last.duration_ms += window.saturating_sub(covered);
        }

        CaptureConfig {
            frame_count: self.capture.frame_count,
            frame_interval,
            challenge_window: ChallengeWindow::new(self.capture.challenge_first, self.capture.challenge_last),
            min_frames: self.capture.min_frames,
            grab_timeout: self
                .capture
                .grab_timeout_ms
                .map(Duration::from_millis)
                .unwrap_or(frame_interval),
            prompts,
            locale: self.voice.locale.clone(),
            ..defaults
        }
    }

    pub fn camera_options(&self) -> CameraOptions {
        CameraOptions {
            width: self.camera.width,
            height: self.camera.height,
            jpeg_quality: self.camera.jpeg_quality,
            skip_dark: self.camera.skip_dark,
        }
    }
}

fn env_parse<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}
