//! Per-task structured log capture.
//!
//! Each audit task owns a [`TaskLogger`]: a small append-only buffer plus a thin logging
//! facade. Every call both appends a formatted line to the buffer (flushed once, in full, to
//! `<task_dir>/audit_log` on task completion) and emits the matching `tracing` event, so the
//! process-wide stderr sink sees it too. This mirrors the "per-task buffer, single flush"
//! shape of the structured log sink without requiring a custom `tracing_subscriber::Layer`
//! to route events by span identity.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

static SPAM: AtomicBool = AtomicBool::new(false);

/// Controls whether task-scoped log records are also mirrored to stderr. Non-task records
/// (emitted directly via `tracing`, not through a [`TaskLogger`]) are always visible; set via
/// `--spam` once at start-up, before any task runs.
pub fn set_spam(enabled: bool) {
    SPAM.store(enabled, Ordering::Relaxed);
}

/// The append-only log of one audit task.
#[derive(Debug, Clone, Default)]
pub struct TaskLogger {
    mbid: Arc<str>,
    lines: Arc<Mutex<Vec<String>>>,
}

impl TaskLogger {
    pub fn new(mbid: impl Into<Arc<str>>) -> Self {
        Self {
            mbid: mbid.into(),
            lines: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn info(&self, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        if SPAM.load(Ordering::Relaxed) {
            tracing::info!(mbid = %self.mbid, "{msg}");
        }
        self.push("INFO", msg);
    }

    pub fn error(&self, msg: impl AsRef<str>) {
        let msg = msg.as_ref();
        if SPAM.load(Ordering::Relaxed) {
            tracing::error!(mbid = %self.mbid, "{msg}");
        }
        self.push("ERROR", msg);
    }

    fn push(&self, level: &str, msg: &str) {
        self.lines
            .lock()
            .expect("poisoned")
            .push(format!("[{level}] {msg}"));
    }

    /// Renders the buffer as it should be written to `audit_log`: one line per record.
    pub fn render(&self) -> String {
        self.lines.lock().expect("poisoned").join("\n")
    }
}
