//! Task stream & dispatcher: reads the input JSONL stream, feeds a bounded queue, and runs a
//! fixed pool of workers that each fetch, compare, and report one identifier at a time.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rand::Rng;
use reqwest::Client;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, Mutex, Notify};

use crate::aggregator::Aggregator;
use crate::client::RemoteItem;
use crate::engine::AuditEngine;
use crate::logsink::TaskLogger;
use crate::model::{CheckResult, MetaRecord, TaskRecord};
use crate::progress::{ProgressReporter, Stage};
use crate::{Error, Result};

/// One unit of dispatch: a parsed task record plus the directory it will work under.
struct QueuedTask {
    record: TaskRecord,
    task_dir: PathBuf,
    log: TaskLogger,
}

/// Runs the full stream → queue → worker-pool pipeline to completion. `abort_signal` is the
/// same `Notify` the aggregator holds for its runaway-error guard; this loop doesn't wait on
/// it directly (see the drain loop below), but accepting it here keeps one `Notify` per run
/// rather than constructing an unused second one.
pub async fn run(
    input_path: &Path,
    output_root: &Path,
    concurrency: usize,
    client: Client,
    progress: ProgressReporter,
    aggregator: Arc<Aggregator>,
    _abort_signal: Arc<Notify>,
) -> Result<()> {
    let max_last_modified = read_meta_record(input_path).await?.max_last_modified;

    let (tx, rx) = mpsc::channel::<QueuedTask>(2 * concurrency);
    let rx = Arc::new(Mutex::new(rx));
    let pending = Arc::new(AtomicUsize::new(0));

    let queuer = tokio::spawn(queue_tasks(
        input_path.to_path_buf(),
        output_root.to_path_buf(),
        tx,
        progress.clone(),
        Arc::clone(&pending),
        Arc::clone(&aggregator),
    ));

    let mut workers = Vec::with_capacity(concurrency);
    for _ in 0..concurrency {
        workers.push(tokio::spawn(worker_loop(
            Arc::clone(&rx),
            client.clone(),
            progress.clone(),
            Arc::clone(&aggregator),
            Arc::clone(&pending),
            max_last_modified,
        )));
    }

    queuer.await??;

    // Polled rather than purely event-driven: `Notify::notify_waiters` only reaches tasks
    // already waiting, so a wakeup racing the check below could otherwise be lost.
    while pending.load(Ordering::SeqCst) > 0 && !aggregator.is_fatal() {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    for worker in workers {
        worker.abort();
    }

    Ok(())
}

async fn read_meta_record(input_path: &Path) -> Result<MetaRecord> {
    let file = tokio::fs::File::open(input_path).await?;
    let mut lines = BufReader::new(file).lines();
    let Some(first) = lines.next_line().await? else {
        return Err(Error::MissingMetaRecord);
    };
    let value: serde_json::Value = serde_json::from_str(&first)?;
    if value.get("state").and_then(serde_json::Value::as_str) != Some("meta") {
        return Err(Error::MissingMetaRecord);
    }
    Ok(serde_json::from_value(value)?)
}

async fn queue_tasks(
    input_path: PathBuf,
    output_root: PathBuf,
    tx: mpsc::Sender<QueuedTask>,
    progress: ProgressReporter,
    pending: Arc<AtomicUsize>,
    aggregator: Arc<Aggregator>,
) -> Result<()> {
    let file = tokio::fs::File::open(&input_path).await?;
    let mut lines = BufReader::new(file).lines();
    lines.next_line().await?; // meta record, already validated by read_meta_record

    while let Some(line) = lines.next_line().await? {
        if aggregator.is_fatal() {
            break;
        }
        if line.trim().is_empty() {
            continue;
        }
        let record: TaskRecord = serde_json::from_str(&line)?;
        let task_dir = fanout_path(&output_root, &record.id);
        let log = TaskLogger::new(record.id.clone());

        pending.fetch_add(1, Ordering::SeqCst);
        progress.task_enqueued();
        if tx.send(QueuedTask { record, task_dir, log }).await.is_err() {
            break;
        }
    }

    Ok(())
}

/// `<output>/<m>/<b>/<i>/<MBID>`, fanned out on the MBID's first three characters.
fn fanout_path(output_root: &Path, mbid: &str) -> PathBuf {
    let mut chars = mbid.chars();
    let m = chars.next().map(String::from).unwrap_or_default();
    let b = chars.next().map(String::from).unwrap_or_default();
    let i = chars.next().map(String::from).unwrap_or_default();
    output_root.join(m).join(b).join(i).join(mbid)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fanout_path_splits_on_first_three_characters() {
        let root = Path::new("/out");
        let path = fanout_path(root, "abcdef-1234");
        assert_eq!(path, Path::new("/out/a/b/c/abcdef-1234"));
    }

    #[test]
    fn fanout_path_handles_short_mbids() {
        let root = Path::new("/out");
        let path = fanout_path(root, "ab");
        assert_eq!(path, Path::new("/out/a/b/ab"));
    }
}

async fn worker_loop(
    rx: Arc<Mutex<mpsc::Receiver<QueuedTask>>>,
    client: Client,
    progress: ProgressReporter,
    aggregator: Arc<Aggregator>,
    pending: Arc<AtomicUsize>,
    max_last_modified: i64,
) {
    let jitter = rand::thread_rng().gen_range(0.0..1.0);
    tokio::time::sleep(std::time::Duration::from_secs_f64(jitter)).await;

    loop {
        let queued = {
            let mut rx = rx.lock().await;
            rx.recv().await
        };
        let Some(queued) = queued else {
            return;
        };

        progress.task_running();
        process_task(queued, &client, &progress, &aggregator, max_last_modified).await;

        pending.fetch_sub(1, Ordering::SeqCst);
    }
}

async fn process_task(
    queued: QueuedTask,
    client: &Client,
    progress: &ProgressReporter,
    aggregator: &Aggregator,
    max_last_modified: i64,
) {
    let QueuedTask { record, task_dir, log } = queued;
    let mbid = record.id.clone();

    {
        let _stage = progress.stage_scope(Stage::Preprocess);
        if let Err(err) = tokio::fs::create_dir_all(&task_dir).await {
            log.error(format!("failed to create task directory: {err}"));
        }
    }

    let remote = RemoteItem::new(client.clone(), mbid.clone(), task_dir.clone());
    let engine = AuditEngine::new(
        record,
        max_last_modified,
        remote,
        log.clone(),
        progress.clone(),
        task_dir.clone(),
    );

    let results = match engine.run().await {
        Ok(results) => results,
        Err(err) => {
            log.error(format!("task failed with an internal error: {err}"));
            vec![CheckResult::skipped(mbid, format!("InternalError::{}", err.kind()))]
        }
    };

    {
        let _stage = progress.stage_scope(Stage::Report);
        aggregator.put(results, progress).await;
    }

    {
        let _stage = progress.stage_scope(Stage::Postprocess);
        let log_path = task_dir.join("audit_log");
        if let Err(err) = tokio::fs::write(&log_path, log.render()).await {
            tracing::error!(%mbid, %err, "failed to flush task log");
        }
    }
}
