//! The recorded program, attached to a virtual display.

use std::io::{BufRead, BufReader, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;

use tracing::{debug, info, warn};
use xscreenrec_core::ResourceError;

/// Child process running with `DISPLAY` pointed at the virtual display.
///
/// Its stdout and stderr are forwarded to the log line by line. The process
/// is killed on drop if it is still alive.
pub struct AppProcess {
    program: String,
    child:   Child,
    exited:  Option<ExitStatus>,
}

impl AppProcess {
    pub fn spawn(argv: &[String], display: &str) -> Result<Self, ResourceError> {
        let (program, args) = argv.split_first().ok_or_else(|| ResourceError::ProcessSpawn {
            program: String::new(),
            reason: "empty command line".to_owned(),
        })?;

        let mut child = Command::new(program)
            .args(args)
            .env("DISPLAY", display)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| ResourceError::ProcessSpawn {
                program: program.clone(),
                reason: e.to_string(),
            })?;

        if let Some(stdout) = child.stdout.take() {
            forward_lines(program, "stdout", stdout);
        }
        if let Some(stderr) = child.stderr.take() {
            forward_lines(program, "stderr", stderr);
        }

        let display_name = display;
        info!("Launched {} (pid {}) on DISPLAY={}", program, child.id(), display_name);
        Ok(Self { program: program.clone(), child, exited: None })
    }

    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    /// Non-blocking exit check. Returns the status once the child has exited.
    pub fn try_exit_status(&mut self) -> Option<ExitStatus> {
        if self.exited.is_none() {
            match self.child.try_wait() {
                Ok(status) => self.exited = status,
                Err(e) => warn!("{} try_wait: {}", self.program, e),
            }
        }
        self.exited
    }
}

impl Drop for AppProcess {
    fn drop(&mut self) {
        if self.try_exit_status().is_none() {
            if let Err(e) = self.child.kill() {
                warn!("{} kill: {}", self.program, e);
            }
        }
        let _ = self.child.wait();
        info!("{} (pid {}) terminated", self.program, self.child.id());
    }
}

/// Pump one output stream into the log on a detached thread. The thread ends
/// when the pipe closes.
fn forward_lines<R: Read + Send + 'static>(program: &str, stream: &'static str, reader: R) {
    let program = program.to_owned();
    let spawned = thread::Builder::new()
        .name(format!("{program}-{stream}"))
        .spawn(move || {
            for line in BufReader::new(reader).lines().map_while(Result::ok) {
                debug!(target: "xscreenrec::app", "{} {}: {}", program, stream, line);
            }
        });
    if let Err(e) = spawned {
        warn!("Could not forward {}: {}", stream, e);
    }
}
