//! Terminal side of the session: prompts out, lines in.

use std::io::{BufRead, Write};
use std::thread;

use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Read stdin lines on a detached thread.
///
/// A blocking read cannot be cancelled, so it must not live on the runtime:
/// the thread is left behind at exit instead of holding up shutdown. The
/// channel closes on EOF.
pub fn spawn_line_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(8);
    let spawned = thread::Builder::new()
        .name("console-input".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
            debug!("Console input closed");
        });
    if let Err(e) = spawned {
        warn!("Console reader unavailable: {}", e);
    }
    rx
}

/// Print without a newline and flush.
pub fn prompt(text: &str) {
    let mut out = std::io::stdout().lock();
    let _ = write!(out, "{text}");
    let _ = out.flush();
}

pub fn say(text: &str) {
    println!("{text}");
}
