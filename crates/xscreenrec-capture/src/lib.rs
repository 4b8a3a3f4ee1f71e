//! xscreenrec-capture — the three collaborators a recording needs on Linux.
//!
//! | Piece | Backed by |
//! |-------|-----------|
//! | [`VirtualDisplay`] | `Xvfb` (headless) or `Xephyr` (nested window) |
//! | [`AppProcess`] | `std::process::Child` with `DISPLAY=:N` |
//! | [`FrameGrabber`] | GStreamer `ximagesrc` → `appsink` |
//!
//! # Usage
//!
//! ```rust,no_run
//! # fn example() -> Result<(), xscreenrec_core::ResourceError> {
//! use std::time::Duration;
//! use xscreenrec_capture::{AppProcess, FrameGrabber, VirtualDisplay};
//! use xscreenrec_core::{config::DisplaySettings, Resolution};
//!
//! let display = VirtualDisplay::start(Resolution::new(640, 480), &DisplaySettings::default())?;
//! let _app = AppProcess::spawn(&["xclock".to_owned()], &display.name())?;
//! let mut grabber = FrameGrabber::open(&display.name(), 20, Duration::from_millis(500))?;
//! grabber.start()?;
//! if let Some(_frame) = grabber.grab()? {
//!     // frame.data: RGBx, 4 bytes/px, rows tightly packed
//! }
//! # Ok(())
//! # }
//! ```
//!
//! All three release their OS resources on drop.

mod display;
mod grabber;
mod process;

pub use display::VirtualDisplay;
pub use grabber::FrameGrabber;
pub use process::AppProcess;
