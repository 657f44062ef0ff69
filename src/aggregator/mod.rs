//! Result aggregator and report writers: spools check results to a compressed on-disk
//! journal, and later streams that journal into the triage logs, CSV, and tabular summaries.

mod reports;

pub use reports::{write_reports, ReportOptions};

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as SyncMutex};

use flate2::write::GzEncoder;
use flate2::Compression;
use tokio::sync::Notify;

use crate::model::{CheckResult, CheckState};
use crate::progress::ProgressReporter;

/// The threshold past which a run is considered runaway: too many infrastructure faults to
/// trust the rest of the data set.
pub const MAX_INTERNAL_ERRORS: usize = 10;

/// Running totals for one check description, accumulated while streaming the journal.
#[derive(Debug, Default, Clone)]
pub struct ReasonCounter {
    pub passed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub failed_mbids: std::collections::HashSet<String>,
    pub all_mbids: std::collections::HashSet<String>,
}

impl ReasonCounter {
    fn observe(&mut self, mbid: &str, state: CheckState) {
        self.all_mbids.insert(mbid.to_string());
        match state {
            CheckState::Passed => self.passed += 1,
            CheckState::Failed => {
                self.failed += 1;
                self.failed_mbids.insert(mbid.to_string());
            }
            CheckState::ItemSkipped => self.skipped += 1,
        }
    }
}

/// One parsed line of the journal.
pub struct JournalRow {
    pub mbid: String,
    pub description: String,
    pub state: CheckState,
}

fn parse_state(s: &str) -> Option<CheckState> {
    match s {
        "PASSED" => Some(CheckState::Passed),
        "FAILED" => Some(CheckState::Failed),
        "ITEM SKIPPED" => Some(CheckState::ItemSkipped),
        _ => None,
    }
}

/// Receives per-task result batches, appends them to the gzip journal, and keeps the
/// internal-error and progress-coupling bookkeeping the component design calls for.
pub struct Aggregator {
    journal_path: PathBuf,
    writer: Arc<SyncMutex<Option<GzEncoder<File>>>>,
    internal_errors: AtomicUsize,
    fatal: AtomicBool,
    /// Best-effort wakeup for anyone polling [`Aggregator::is_fatal`] in a sleep loop; dropping
    /// a `notify_waiters` call here is harmless since the poll always catches up on its own.
    abort_signal: Arc<Notify>,
}

impl Aggregator {
    pub fn new(output_root: &Path, abort_signal: Arc<Notify>) -> crate::Result<Self> {
        let journal_path = output_root.join("results_cache.gz");
        let file = File::create(&journal_path)?;
        Ok(Self {
            journal_path,
            writer: Arc::new(SyncMutex::new(Some(GzEncoder::new(file, Compression::default())))),
            internal_errors: AtomicUsize::new(0),
            fatal: AtomicBool::new(false),
            abort_signal,
        })
    }

    pub fn is_fatal(&self) -> bool {
        self.fatal.load(Ordering::SeqCst)
    }

    pub fn journal_path(&self) -> &Path {
        &self.journal_path
    }

    /// Appends one task's results to the journal, signals exactly one progress transition
    /// (skip > fail > pass precedence over the batch), and raises the runaway guard if the
    /// internal-error budget has been exceeded across the run.
    pub async fn put(&self, batch: Vec<CheckResult>, progress: &ProgressReporter) {
        if batch.is_empty() {
            return;
        }

        let lines: Vec<String> = batch
            .iter()
            .map(|r| format!("{}\t{}\t{}", r.mbid(), r.description(), r.state()))
            .collect();
        let internal_error_count = batch
            .iter()
            .filter(|r| r.description().starts_with(crate::model::check::INTERNAL_ERROR_PREFIX))
            .count();

        {
            let writer = Arc::clone(&self.writer);
            let payload = lines.join("\n") + "\n";
            let result = tokio::task::spawn_blocking(move || {
                let mut guard = writer.lock().expect("poisoned");
                let encoder = guard.as_mut().expect("journal already finished");
                encoder.write_all(payload.as_bytes())?;
                encoder.flush()
            })
            .await;
            match result {
                Ok(Ok(())) => {}
                Ok(Err(err)) => tracing::error!(%err, "failed to append to results journal"),
                Err(err) => tracing::error!(%err, "journal writer task panicked"),
            }
        }

        if internal_error_count > 0
            && self.internal_errors.fetch_add(internal_error_count, Ordering::SeqCst) + internal_error_count
                > MAX_INTERNAL_ERRORS
        {
            self.fatal.store(true, Ordering::SeqCst);
            self.abort_signal.notify_waiters();
        }

        let has_skip = batch.iter().any(|r| matches!(r, CheckResult::Skipped { .. }));
        let has_fail = batch.iter().any(|r| matches!(r, CheckResult::Failed { .. }));
        if has_skip {
            progress.task_skipped();
        } else if has_fail {
            progress.task_failed();
        } else {
            progress.task_success();
        }
    }

    /// Writes the gzip trailer and flushes the underlying file. Must be called once, after the
    /// last `put`, before the journal is handed to [`read_journal`] — `flush` alone leaves the
    /// stream's footer unwritten and the file truncated from a decoder's point of view.
    pub async fn finish(&self) -> crate::Result<()> {
        let writer = Arc::clone(&self.writer);
        tokio::task::spawn_blocking(move || -> crate::Result<()> {
            let mut guard = writer.lock().expect("poisoned");
            if let Some(encoder) = guard.take() {
                encoder.finish()?;
            }
            Ok(())
        })
        .await??;
        Ok(())
    }
}

/// Streams a (closed) journal file into the per-description reason-counter map that every
/// report writer consumes. Used both at the end of a live run and by the standalone
/// `generate-output` entry point, so both paths build byte-identical report inputs.
pub fn read_journal(path: &Path) -> crate::Result<(HashMap<String, ReasonCounter>, Vec<JournalRow>)> {
    let file = File::open(path)?;
    let reader = BufReader::new(flate2::read::GzDecoder::new(file));

    let mut counters: HashMap<String, ReasonCounter> = HashMap::new();
    let mut rows = Vec::new();

    for line in reader.lines() {
        let line = line?;
        if line.is_empty() {
            continue;
        }
        let mut parts = line.splitn(3, '\t');
        let (Some(mbid), Some(description), Some(state)) = (parts.next(), parts.next(), parts.next()) else {
            continue;
        };
        let Some(state) = parse_state(state) else { continue };

        counters.entry(description.to_string()).or_default().observe(mbid, state);
        rows.push(JournalRow {
            mbid: mbid.to_string(),
            description: description.to_string(),
            state,
        });
    }

    Ok((counters, rows))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressReporter;

    #[tokio::test]
    async fn put_then_read_journal_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let abort_signal = Arc::new(Notify::new());
        let aggregator = Aggregator::new(dir.path(), abort_signal).unwrap();
        let progress = ProgressReporter::new(1);

        aggregator
            .put(
                vec![
                    CheckResult::passed("mbid-1", "Item::Metadata::title correct"),
                    CheckResult::failed("mbid-1", "Item::Metadata::date correct"),
                    CheckResult::skipped("mbid-2", "Item::has pending tasks"),
                ],
                &progress,
            )
            .await;
        aggregator.finish().await.unwrap();

        let journal_path = dir.path().join("results_cache.gz");
        let (counters, rows) = read_journal(&journal_path).unwrap();

        assert_eq!(rows.len(), 3);
        let title = &counters["Item::Metadata::title correct"];
        assert_eq!(title.passed, 1);
        assert_eq!(title.failed, 0);
        let date = &counters["Item::Metadata::date correct"];
        assert_eq!(date.failed, 1);
        assert!(date.failed_mbids.contains("mbid-1"));
    }

    #[tokio::test]
    async fn runaway_internal_errors_trip_the_fatal_flag() {
        let dir = tempfile::tempdir().unwrap();
        let abort_signal = Arc::new(Notify::new());
        let aggregator = Aggregator::new(dir.path(), abort_signal).unwrap();
        let progress = ProgressReporter::new(1);

        for i in 0..=MAX_INTERNAL_ERRORS {
            aggregator
                .put(
                    vec![CheckResult::skipped(format!("mbid-{i}"), "InternalError::RemoteFault")],
                    &progress,
                )
                .await;
        }

        assert!(aggregator.is_fatal());
    }
}
