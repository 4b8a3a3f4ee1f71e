//! Virtual X server lifecycle (Xvfb or Xephyr).

use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};
use xscreenrec_core::config::{DisplayServer, DisplaySettings};
use xscreenrec_core::{Resolution, ResourceError};

const READY_POLL: Duration = Duration::from_millis(50);

/// A running X server on a private display number.
///
/// The server process is killed and reaped on drop.
pub struct VirtualDisplay {
    number: u32,
    server: DisplayServer,
    child:  Child,
}

impl VirtualDisplay {
    /// Start a server of `resolution` and wait until it accepts connections.
    pub fn start(resolution: Resolution, settings: &DisplaySettings) -> Result<Self, ResourceError> {
        let number = find_free_display(settings.first_display, settings.search_span, display_in_use)?;
        let program = settings.server.program();
        let args = server_args(settings.server, number, resolution, settings.color_depth);
        debug!("Starting {} {}", program, args.join(" "));

        let child = Command::new(program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| ResourceError::DisplayStart {
                program: program.to_owned(),
                reason: e.to_string(),
            })?;

        let mut display = Self { number, server: settings.server, child };
        display.wait_ready(settings.startup_timeout())?;
        info!("{} ready on :{} ({})", program, number, resolution);
        Ok(display)
    }

    /// Value for the `DISPLAY` environment variable, e.g. `:100`.
    pub fn name(&self) -> String {
        format!(":{}", self.number)
    }

    fn wait_ready(&mut self, timeout: Duration) -> Result<(), ResourceError> {
        let socket = socket_path(self.number);
        let program = self.server.program();
        let started = Instant::now();
        loop {
            match self.child.try_wait() {
                Ok(Some(status)) => {
                    return Err(ResourceError::DisplayStart {
                        program: program.to_owned(),
                        reason: format!("exited during startup ({status})"),
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    return Err(ResourceError::DisplayStart {
                        program: program.to_owned(),
                        reason: e.to_string(),
                    });
                }
            }
            if socket.exists() {
                return Ok(());
            }
            if started.elapsed() >= timeout {
                return Err(ResourceError::DisplayTimeout {
                    display: self.name(),
                    waited_ms: timeout.as_millis() as u64,
                });
            }
            thread::sleep(READY_POLL);
        }
    }
}

impl Drop for VirtualDisplay {
    fn drop(&mut self) {
        if let Err(e) = self.child.kill() {
            warn!("Display :{} kill: {}", self.number, e);
        }
        let _ = self.child.wait();
        info!("{} on :{} stopped", self.server.program(), self.number);
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

fn server_args(server: DisplayServer, number: u32, res: Resolution, depth: u8) -> Vec<String> {
    let display = format!(":{number}");
    let geometry = format!("{}x{}x{}", res.width, res.height, depth);
    match server {
        DisplayServer::Xvfb => vec![
            display,
            "-screen".into(),
            "0".into(),
            geometry,
            "-nolisten".into(),
            "tcp".into(),
        ],
        DisplayServer::Xephyr => vec![
            display,
            "-ac".into(),
            "-screen".into(),
            geometry,
            "-nolisten".into(),
            "tcp".into(),
        ],
    }
}

fn socket_path(number: u32) -> PathBuf {
    PathBuf::from(format!("/tmp/.X11-unix/X{number}"))
}

fn lock_path(number: u32) -> PathBuf {
    PathBuf::from(format!("/tmp/.X{number}-lock"))
}

fn display_in_use(number: u32) -> bool {
    lock_path(number).exists() || socket_path(number).exists()
}

/// First display number in `first..first + span` that `in_use` rejects.
fn find_free_display(
    first: u32,
    span: u32,
    in_use: impl Fn(u32) -> bool,
) -> Result<u32, ResourceError> {
    let last = first.saturating_add(span);
    (first..last)
        .find(|n| !in_use(*n))
        .ok_or(ResourceError::NoFreeDisplay { first, last })
}
