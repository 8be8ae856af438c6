//! External command execution with an optional timeout.
//!
//! Output streams are drained on their own threads so a chatty child never
//! blocks on a full pipe while we poll it. Progress is reported to the
//! registered observers as `Started`, a `Heartbeat` about once a second, and
//! `Finished`.
//!
//! On Unix the child leads its own process group and a timeout kills the whole
//! group, so tools started by a wrapper script die with it. The flip side is
//! that a terminal Ctrl-C no longer reaches the child directly.

use anyhow::{Context, Result};
use scanledger_model::{Observers, ProgressEvent};
use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

const POLL_INTERVAL: Duration = Duration::from_millis(50);
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);
/// After a kill, grandchildren may still hold our pipes open.
const DRAIN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// `None` when the process was killed (timeout or signal).
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub timed_out: bool,
    pub elapsed: Duration,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        !self.timed_out && self.code == Some(0)
    }
}

#[derive(Clone, Copy)]
enum Stream {
    Stdout,
    Stderr,
}

fn spawn_reader<R: Read + Send + 'static>(
    source: Option<R>,
    stream: Stream,
    tx: mpsc::Sender<(Stream, Vec<u8>)>,
) {
    let Some(mut source) = source else {
        let _ = tx.send((stream, Vec::new()));
        return;
    };
    thread::spawn(move || {
        let mut buf = Vec::new();
        let _ = source.read_to_end(&mut buf);
        let _ = tx.send((stream, buf));
    });
}

#[cfg(unix)]
fn isolate_process_group(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn isolate_process_group(_cmd: &mut Command) {}

/// Kill the child and, on Unix, every process in its group.
fn kill_process_tree(child: &mut Child) {
    #[cfg(unix)]
    if let Ok(pgid) = libc::pid_t::try_from(child.id()) {
        // SAFETY: plain syscall on a group id we created; no memory is shared.
        let rc = unsafe { libc::kill(-pgid, libc::SIGKILL) };
        if rc != 0 {
            tracing::debug!(pgid, error = %std::io::Error::last_os_error(), "group kill failed");
        }
    }
    let _ = child.kill();
}

/// Run `cmd` to completion, or kill it once `timeout` elapses.
///
/// A child that cannot be spawned is an error; a child that runs and fails
/// (or times out) is reported through the returned `CommandOutput`.
pub fn run_with_timeout(
    mut cmd: Command,
    timeout: Option<Duration>,
    task: &str,
    observers: &Observers,
) -> Result<CommandOutput> {
    cmd.stdin(Stdio::null());
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    isolate_process_group(&mut cmd);
    let mut child = cmd
        .spawn()
        .with_context(|| format!("{task}: failed to spawn"))?;
    observers.emit(ProgressEvent::started(task));

    let (tx, rx) = mpsc::channel();
    spawn_reader(child.stdout.take(), Stream::Stdout, tx.clone());
    spawn_reader(child.stderr.take(), Stream::Stderr, tx);

    let start = Instant::now();
    let mut last_beat = start;
    let mut timed_out = false;
    let status = loop {
        if let Some(status) = child
            .try_wait()
            .with_context(|| format!("{task}: failed to poll child status"))?
        {
            break Some(status);
        }
        if timeout.is_some_and(|t| start.elapsed() > t) {
            kill_process_tree(&mut child);
            let _ = child.wait();
            timed_out = true;
            break None;
        }
        if last_beat.elapsed() >= HEARTBEAT_INTERVAL {
            observers.emit(ProgressEvent::heartbeat(task, start.elapsed()));
            last_beat = Instant::now();
        }
        thread::sleep(POLL_INTERVAL);
    };

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    for _ in 0..2 {
        let received = if timed_out {
            rx.recv_timeout(DRAIN_GRACE).ok()
        } else {
            rx.recv().ok()
        };
        match received {
            Some((Stream::Stdout, bytes)) => stdout = bytes,
            Some((Stream::Stderr, bytes)) => stderr = bytes,
            None => break,
        }
    }

    let elapsed = start.elapsed();
    let output = CommandOutput {
        code: status.and_then(|s| s.code()),
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        timed_out,
        elapsed,
    };
    observers.emit(ProgressEvent::finished(task, elapsed, output.success()));
    Ok(output)
}
