use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::ConfigError;
use crate::types::Resolution;

/// Output file base name used when the caller leaves it blank.
pub const DEFAULT_OUTPUT_NAME: &str = "output";
pub const OUTPUT_EXTENSION: &str = "mp4";

// MARK: - RecorderSettings

/// Everything a recording can be tuned with, as read from a JSON settings
/// file. Missing keys fall back to [`Default`]. Command-line flags are layered
/// on top before [`RecorderSettings::into_session`] validates the result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecorderSettings {
    /// Program to run inside the display, split on whitespace.
    pub command: String,
    #[serde(alias = "auto")]
    pub auto_start: bool,
    /// `WIDTHxHEIGHT`.
    pub resolution: String,
    pub output_name: String,
    pub fps: u32,
    pub display: DisplaySettings,
    pub capture: CaptureSettings,
    pub encoder: EncoderSettings,
}

impl Default for RecorderSettings {
    fn default() -> Self {
        Self {
            command: String::new(),
            auto_start: false,
            resolution: Resolution::DEFAULT.to_string(),
            output_name: DEFAULT_OUTPUT_NAME.to_owned(),
            fps: 20,
            display: DisplaySettings::default(),
            capture: CaptureSettings::default(),
            encoder: EncoderSettings::default(),
        }
    }
}

impl RecorderSettings {
    /// Read settings from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let file_error = |reason: String| ConfigError::SettingsFile {
            path: path.display().to_string(),
            reason,
        };
        let text = std::fs::read_to_string(path).map_err(|e| file_error(e.to_string()))?;
        let settings: Self = serde_json::from_str(&text).map_err(|e| file_error(e.to_string()))?;
        debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Validate into a ready-to-run session description.
    pub fn into_session(self) -> Result<SessionConfig, ConfigError> {
        let mut session = SessionConfig::configure(
            &self.command,
            &self.resolution,
            self.auto_start,
            &self.output_name,
            self.fps,
        )?;
        session.display = self.display;
        session.capture = self.capture;
        session.encoder = self.encoder;
        Ok(session)
    }
}

// MARK: - Display / capture / encoder tuning

/// Which X server hosts the recorded program.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DisplayServer {
    /// Headless framebuffer.
    #[default]
    Xvfb,
    /// Nested server that also shows a window on the host desktop.
    Xephyr,
}

impl DisplayServer {
    pub fn program(self) -> &'static str {
        match self {
            Self::Xvfb => "Xvfb",
            Self::Xephyr => "Xephyr",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplaySettings {
    pub server: DisplayServer,
    /// First display number probed when looking for a free one.
    pub first_display: u32,
    /// How many display numbers to probe before giving up.
    pub search_span: u32,
    pub color_depth: u8,
    pub startup_timeout_ms: u64,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            server: DisplayServer::Xvfb,
            first_display: 100,
            search_span: 64,
            color_depth: 24,
            startup_timeout_ms: 5_000,
        }
    }
}

impl DisplaySettings {
    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureSettings {
    /// How long one grab may wait for the display to produce a bitmap.
    pub grab_timeout_ms: u64,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self { grab_timeout_ms: 500 }
    }
}

impl CaptureSettings {
    pub fn grab_timeout(&self) -> Duration {
        Duration::from_millis(self.grab_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncoderSettings {
    pub bitrate_kbps: u32,
    /// x264 `speed-preset`; ignored by the other encoders.
    pub speed_preset: String,
}

impl Default for EncoderSettings {
    fn default() -> Self {
        Self {
            bitrate_kbps: 4_000,
            speed_preset: "veryfast".to_owned(),
        }
    }
}

// MARK: - SessionConfig

/// Validated parameters of one recording session.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    pub command:     Vec<String>,
    pub resolution:  Resolution,
    pub auto_start:  bool,
    pub output_path: PathBuf,
    pub frame_rate:  u32,
    pub display:     DisplaySettings,
    pub capture:     CaptureSettings,
    pub encoder:     EncoderSettings,
}

impl SessionConfig {
    /// Check the user-facing session parameters.
    ///
    /// `output_name` is the base name; `.mp4` is appended and a blank name
    /// becomes `output.mp4`.
    pub fn configure(
        command: &str,
        resolution: &str,
        auto_start: bool,
        output_name: &str,
        frame_rate: u32,
    ) -> Result<Self, ConfigError> {
        let resolution: Resolution = resolution.parse()?;
        let command = split_command(command)?;
        if frame_rate == 0 {
            return Err(ConfigError::InvalidFrameRate { value: frame_rate });
        }

        Ok(Self {
            command,
            resolution,
            auto_start,
            output_path: resolve_output_path(output_name),
            frame_rate,
            display: DisplaySettings::default(),
            capture: CaptureSettings::default(),
            encoder: EncoderSettings::default(),
        })
    }

    /// Interval between two grabs.
    pub fn frame_interval(&self) -> Duration {
        Duration::from_micros(1_000_000 / self.frame_rate as u64)
    }
}

/// Split a command line on whitespace into argv.
pub fn split_command(command: &str) -> Result<Vec<String>, ConfigError> {
    let argv: Vec<String> = command.split_whitespace().map(str::to_owned).collect();
    if argv.is_empty() {
        return Err(ConfigError::EmptyCommand);
    }
    Ok(argv)
}

/// `<name>.mp4`, with a blank name replaced by [`DEFAULT_OUTPUT_NAME`].
pub fn resolve_output_path(output_name: &str) -> PathBuf {
    let name = if output_name.trim().is_empty() { DEFAULT_OUTPUT_NAME } else { output_name };
    PathBuf::from(format!("{name}.{OUTPUT_EXTENSION}"))
}
