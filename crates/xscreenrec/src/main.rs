//! xscreenrec — record a program running inside a virtual X display.
//!
//! ```text
//! xscreenrec -c "xclock -digital" -r 640x480 -f 10 -o clock
//!
//! Xvfb :N ─────────► xclock (DISPLAY=:N)
//!   │
//!   ▼
//! ximagesrc grab ──► RGBx→BGRx ──► x264enc ──► mp4mux ──► clock.mp4
//! ```
//!
//! Without `--auto true` the recording starts on Enter; typing `s` stops it
//! and finalizes the file. Use `RUST_LOG=debug` to see pipeline strings and the
//! recorded program's output, `GST_DEBUG=3` for GStreamer itself.

use anyhow::Result;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

mod backend;
mod cli;
mod console;
mod encoder;
mod session;

use backend::X11Backend;
use session::RecordingSession;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let cli = cli::Cli::parse();
    info!("xscreenrec v{}", env!("CARGO_PKG_VERSION"));

    let config = cli.settings()?.into_session()?;
    info!(
        "Recording {:?} on a {} {} display at {} fps into {}",
        config.command.join(" "),
        config.resolution,
        config.display.server.program(),
        config.frame_rate,
        config.output_path.display()
    );

    let session = RecordingSession::new(config, X11Backend);
    match session.run(console::spawn_line_reader()).await {
        Ok(report) => {
            match (&report.output, report.frame_size) {
                (Some(path), Some((w, h))) => info!(
                    "Saved {} ({} frames, {}x{})",
                    path.display(),
                    report.frames_written,
                    w,
                    h
                ),
                _ => info!("No frames were captured; no file written"),
            }
            Ok(())
        }
        Err(e) => {
            error!("Fatal error: {:#}", e);
            Err(e.into())
        }
    }
}
