//! Progress events for long-running external calls.
//!
//! Callers report `Started`, periodic `Heartbeat`s and `Finished` to whatever
//! observers are registered. Core logic never assumes a console exists.

use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum ProgressKind {
    Started,
    Heartbeat { elapsed: Duration },
    Finished { elapsed: Duration, success: bool },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    /// Short label of the running task (`qc 1001`, `bids validator`).
    pub task: String,
    pub kind: ProgressKind,
}

impl ProgressEvent {
    pub fn started(task: &str) -> Self {
        Self {
            task: task.to_string(),
            kind: ProgressKind::Started,
        }
    }

    pub fn heartbeat(task: &str, elapsed: Duration) -> Self {
        Self {
            task: task.to_string(),
            kind: ProgressKind::Heartbeat { elapsed },
        }
    }

    pub fn finished(task: &str, elapsed: Duration, success: bool) -> Self {
        Self {
            task: task.to_string(),
            kind: ProgressKind::Finished { elapsed, success },
        }
    }
}

pub trait ProgressObserver: Send + Sync {
    fn on_event(&self, event: &ProgressEvent);
}

pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_event(&self, _event: &ProgressEvent) {}
}

/// Logs every event through `tracing`.
pub struct TracingObserver;

impl ProgressObserver for TracingObserver {
    fn on_event(&self, event: &ProgressEvent) {
        match &event.kind {
            ProgressKind::Started => tracing::info!(task = %event.task, "started"),
            ProgressKind::Heartbeat { elapsed } => {
                tracing::debug!(task = %event.task, elapsed_secs = elapsed.as_secs(), "running")
            }
            ProgressKind::Finished { elapsed, success } => tracing::info!(
                task = %event.task,
                elapsed_secs = elapsed.as_secs(),
                success = *success,
                "finished"
            ),
        }
    }
}

/// Fan-out to every registered observer.
#[derive(Clone, Default)]
pub struct Observers(Vec<Arc<dyn ProgressObserver>>);

impl Observers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, observer: Arc<dyn ProgressObserver>) {
        self.0.push(observer);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn emit(&self, event: ProgressEvent) {
        for observer in &self.0 {
            observer.on_event(&event);
        }
    }
}
