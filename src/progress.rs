//! Live progress reporting: a single `indicatif` bar plus per-stage occupancy counters.
//!
//! All methods are synchronous and cheap; the reporter is shared across workers behind
//! `Arc<Mutex<..>>` rather than a dedicated actor, since single-threaded cooperative
//! scheduling already rules out real contention on the small amount of state here.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use indicatif::{ProgressBar, ProgressStyle};

/// The seven stages of one task, in the fixed order the reporter displays them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Preprocess,
    Fetch,
    Meta,
    Files,
    Index,
    Report,
    Postprocess,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Preprocess,
        Stage::Fetch,
        Stage::Meta,
        Stage::Files,
        Stage::Index,
        Stage::Report,
        Stage::Postprocess,
    ];

    pub const fn as_str(self) -> &'static str {
        match self {
            Stage::Preprocess => "preprocess",
            Stage::Fetch => "fetch",
            Stage::Meta => "meta",
            Stage::Files => "files",
            Stage::Index => "index",
            Stage::Report => "report",
            Stage::Postprocess => "postprocess",
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    enqueued: u64,
    running: u64,
    success: u64,
    failed: u64,
    skipped: u64,
    occupancy: HashMap<&'static str, u64>,
}

impl Counters {
    fn finished(&self) -> u64 {
        self.success + self.failed + self.skipped
    }

    fn status_line(&self) -> String {
        let stages = Stage::ALL
            .iter()
            .map(|s| format!("{}={}", s.as_str(), self.occupancy.get(s.as_str()).copied().unwrap_or(0)))
            .collect::<Vec<_>>()
            .join(" ");
        format!(
            "todo={} queued={} pending={} finished={} success={} failed={} skipped={} {stages}",
            self.enqueued.saturating_sub(self.finished()),
            self.enqueued,
            self.running,
            self.finished(),
            self.success,
            self.failed,
            self.skipped,
        )
    }
}

/// Shared handle to the live progress bar and its counters.
#[derive(Clone)]
pub struct ProgressReporter {
    bar: ProgressBar,
    counters: Arc<Mutex<Counters>>,
}

impl ProgressReporter {
    pub fn new(total: u64) -> Self {
        let bar = ProgressBar::new(total);
        bar.set_style(
            ProgressStyle::with_template("{bar:40.cyan/blue} {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar()),
        );
        Self {
            bar,
            counters: Arc::new(Mutex::new(Counters::default())),
        }
    }

    fn refresh(&self, counters: &Counters) {
        self.bar.set_position(counters.finished());
        self.bar.set_message(counters.status_line());
    }

    pub fn task_enqueued(&self) {
        let mut c = self.counters.lock().expect("poisoned");
        c.enqueued += 1;
        self.refresh(&c);
    }

    pub fn task_running(&self) {
        let mut c = self.counters.lock().expect("poisoned");
        c.running += 1;
        self.refresh(&c);
    }

    pub fn task_success(&self) {
        let mut c = self.counters.lock().expect("poisoned");
        c.running = c.running.saturating_sub(1);
        c.success += 1;
        self.refresh(&c);
    }

    pub fn task_failed(&self) {
        let mut c = self.counters.lock().expect("poisoned");
        c.running = c.running.saturating_sub(1);
        c.failed += 1;
        self.refresh(&c);
    }

    pub fn task_skipped(&self) {
        let mut c = self.counters.lock().expect("poisoned");
        c.running = c.running.saturating_sub(1);
        c.skipped += 1;
        self.refresh(&c);
    }

    pub fn enter_stage(&self, stage: Stage) {
        let mut c = self.counters.lock().expect("poisoned");
        *c.occupancy.entry(stage.as_str()).or_default() += 1;
        self.refresh(&c);
    }

    pub fn exit_stage(&self, stage: Stage) {
        let mut c = self.counters.lock().expect("poisoned");
        if let Some(n) = c.occupancy.get_mut(stage.as_str()) {
            *n = n.saturating_sub(1);
        }
        self.refresh(&c);
    }

    pub fn finish(&self) {
        self.bar.finish_and_clear();
    }

    /// Enters `stage` and returns a guard that exits it on drop, so early returns and `?`
    /// still balance the enter/exit pair.
    pub fn stage_scope(&self, stage: Stage) -> StageGuard<'_> {
        self.enter_stage(stage);
        StageGuard { reporter: self, stage }
    }
}

/// RAII guard pairing one `enter_stage`/`exit_stage` call.
pub struct StageGuard<'a> {
    reporter: &'a ProgressReporter,
    stage: Stage,
}

impl Drop for StageGuard<'_> {
    fn drop(&mut self) {
        self.reporter.exit_stage(self.stage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stage_guard_balances_on_early_return() {
        let reporter = ProgressReporter::new(1);
        fn inner(reporter: &ProgressReporter) -> Option<()> {
            let _guard = reporter.stage_scope(Stage::Meta);
            None?;
            Some(())
        }
        inner(&reporter);
        let counters = reporter.counters.lock().unwrap();
        assert_eq!(counters.occupancy.get("meta").copied().unwrap_or(0), 0);
    }
}
