//! Console spinner for long-running external calls.

use colored::Colorize;
use scanledger_model::{ProgressEvent, ProgressKind, ProgressObserver};
use std::io::Write;

const FRAMES: [char; 4] = ['-', '\\', '|', '/'];

/// Draws a one-line spinner on stderr. Only registered when stderr is a terminal.
pub struct ConsoleSpinner;

impl ProgressObserver for ConsoleSpinner {
    fn on_event(&self, event: &ProgressEvent) {
        let mut err = std::io::stderr().lock();
        let _ = match &event.kind {
            ProgressKind::Started => write!(err, "\r{} {}", event.task, FRAMES[0]),
            ProgressKind::Heartbeat { elapsed } => {
                let secs = elapsed.as_secs();
                write!(
                    err,
                    "\r{} {} {}s",
                    event.task,
                    FRAMES[(secs % FRAMES.len() as u64) as usize],
                    secs
                )
            }
            ProgressKind::Finished { elapsed, success } => {
                let mark = if *success {
                    "ok".green().bold()
                } else {
                    "failed".red().bold()
                };
                writeln!(
                    err,
                    "\r{} {} ({}s){}",
                    event.task,
                    mark,
                    elapsed.as_secs(),
                    " ".repeat(8)
                )
            }
        };
        let _ = err.flush();
    }
}
