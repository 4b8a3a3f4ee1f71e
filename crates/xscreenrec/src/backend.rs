//! The real collaborators: Xvfb/Xephyr, the recorded program, `ximagesrc`,
//! and the MP4 encoder.

use tracing::warn;
use xscreenrec_capture::{AppProcess, FrameGrabber, VirtualDisplay};
use xscreenrec_core::{EncodingError, Frame, ResourceError, SessionConfig};

use crate::encoder::{EncoderSpec, Mp4Encoder};
use crate::session::{CaptureBackend, FrameSource};

#[derive(Debug, Default)]
pub struct X11Backend;

impl CaptureBackend for X11Backend {
    type Source = X11Source;
    type Sink = Mp4Encoder;

    fn acquire(&mut self, config: &SessionConfig) -> Result<X11Source, ResourceError> {
        let display = VirtualDisplay::start(config.resolution, &config.display)?;
        let app = AppProcess::spawn(&config.command, &display.name())?;
        let grabber = FrameGrabber::open(
            &display.name(),
            config.frame_rate,
            config.capture.grab_timeout(),
        )?;
        Ok(X11Source { grabber, app, display, app_exited: false })
    }

    fn open_sink(&mut self, spec: &EncoderSpec) -> Result<Mp4Encoder, EncodingError> {
        Mp4Encoder::create(spec)
    }
}

/// Display, program, and grabber of one session.
///
/// Fields drop in declaration order: grabber, then program, then display.
pub struct X11Source {
    grabber:    FrameGrabber,
    app:        AppProcess,
    display:    VirtualDisplay,
    app_exited: bool,
}

impl FrameSource for X11Source {
    fn start(&mut self) -> Result<(), ResourceError> {
        self.grabber.start()
    }

    fn grab(&mut self) -> Result<Option<Frame>, ResourceError> {
        if !self.app_exited {
            if let Some(status) = self.app.try_exit_status() {
                warn!(
                    "{} (pid {}) exited with {}; still recording {}",
                    self.app.program(),
                    self.app.pid(),
                    status,
                    self.display.name()
                );
                self.app_exited = true;
            }
        }
        self.grabber.grab()
    }
}
