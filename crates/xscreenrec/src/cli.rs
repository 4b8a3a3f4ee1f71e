use std::path::PathBuf;

use clap::ArgAction;
use xscreenrec_core::config::DisplayServer;
use xscreenrec_core::{ConfigError, RecorderSettings};

/// Record a program running inside a virtual X display to an MP4 file.
#[derive(clap::Parser, Debug)]
#[command(name = "xscreenrec", version, about, long_about = None)]
pub(super) struct Cli {
    /// Command to run inside the display, e.g. "xclock -digital".
    #[arg(short = 'c', long = "cmd", required_unless_present = "config")]
    pub(super) cmd: Option<String>,

    /// Start recording as soon as the program is up, without waiting for Enter [default: false]
    #[arg(short = 'a', long = "auto", action = ArgAction::Set, value_name = "BOOL")]
    pub(super) auto: Option<bool>,

    /// Display size as WIDTHxHEIGHT [default: 800x800]
    #[arg(short = 'r', long = "resolution", value_name = "WxH")]
    pub(super) resolution: Option<String>,

    /// Output file name without extension; ".mp4" is appended [default: output]
    #[arg(short = 'o', long = "output_name", value_name = "NAME")]
    pub(super) output_name: Option<String>,

    /// Frames per second of the recording [default: 20]
    #[arg(short = 'f', long = "fps")]
    pub(super) fps: Option<u32>,

    /// JSON settings file; flags given on the command line win over it.
    #[arg(long, value_name = "PATH")]
    pub(super) config: Option<PathBuf>,

    /// Use a visible Xephyr window instead of a headless Xvfb display.
    #[arg(long)]
    pub(super) visible: bool,
}

impl Cli {
    /// Settings file (or defaults) with the command-line flags layered on top.
    pub(super) fn settings(&self) -> Result<RecorderSettings, ConfigError> {
        let mut settings = match &self.config {
            Some(path) => RecorderSettings::load(path)?,
            None => RecorderSettings::default(),
        };

        if let Some(cmd) = &self.cmd {
            settings.command = cmd.clone();
        }
        if let Some(auto) = self.auto {
            settings.auto_start = auto;
        }
        if let Some(resolution) = &self.resolution {
            settings.resolution = resolution.clone();
        }
        if let Some(output_name) = &self.output_name {
            settings.output_name = output_name.clone();
        }
        if let Some(fps) = self.fps {
            settings.fps = fps;
        }
        if self.visible {
            settings.display.server = DisplayServer::Xephyr;
        }
        Ok(settings)
    }
}
