//! The audit engine: the single-task orchestrator. [`AuditEngine::run`] fetches metadata,
//! checks preconditions, runs the staged comparisons, then writes the failures log — with any
//! uncaught fault converted into a single `InternalError` skip by the caller.

mod active;
mod deleted;

use std::path::PathBuf;
use std::time::Instant;

use tokio::io::AsyncWriteExt;

use crate::client::{ClientError, RemoteItem};
use crate::logsink::TaskLogger;
use crate::model::{CatalogView, CheckRecorder, CheckResult, IaState, InputState, TaskRecord};
use crate::progress::{ProgressReporter, Stage};

#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// The `<ErrorKind>` segment of the `InternalError::<ErrorKind>` description this fault
    /// becomes once it reaches the dispatcher.
    pub fn kind(&self) -> &'static str {
        match self {
            EngineError::Client(_) => "RemoteFault",
            EngineError::Io(_) => "Io",
        }
    }
}

/// Bundles one task record with the collaborators it needs to audit itself.
pub struct AuditEngine {
    task: TaskRecord,
    max_last_modified: i64,
    remote: RemoteItem,
    log: TaskLogger,
    progress: ProgressReporter,
    task_dir: PathBuf,
}

impl AuditEngine {
    pub fn new(
        task: TaskRecord,
        max_last_modified: i64,
        remote: RemoteItem,
        log: TaskLogger,
        progress: ProgressReporter,
        task_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            task,
            max_last_modified,
            remote,
            log,
            progress,
            task_dir: task_dir.into(),
        }
    }

    /// Runs the full per-task sequence and returns the check results it produced. Only
    /// infrastructure faults (transport give-ups, on-disk write failures) surface as `Err`;
    /// every other outcome, including precondition aborts, is a normal `Ok` result set.
    pub async fn run(&self) -> Result<Vec<CheckResult>, EngineError> {
        let started = Instant::now();
        self.log.info(format!("starting audit of {}", self.task.id));

        let base = self.task.state.base_category();
        let mut recorder = CheckRecorder::new(base, self.task.id.clone());

        let state = {
            let _stage = self.progress.stage_scope(Stage::Fetch);
            self.run_preconditions(&mut recorder).await?
        };

        if let Some(state) = state {
            match self.task.state {
                InputState::Active | InputState::Empty => {
                    let catalog = self.task.data.clone().map(CatalogView::from_raw);
                    active::run(
                        &mut recorder,
                        &state,
                        catalog.as_ref(),
                        &self.remote,
                        &self.log,
                        &self.progress,
                    )
                    .await?;
                }
                InputState::PossiblyDeleted | InputState::Merged => {
                    let _stage = self.progress.stage_scope(Stage::Files);
                    deleted::run(&mut recorder, &state, self.task.state, &self.task.id).await?;
                }
            }
        }

        let results = recorder.into_results();
        self.write_failures_log(&results).await?;
        self.log.info(format!(
            "finished audit of {} in {:?}: {} results",
            self.task.id,
            started.elapsed(),
            results.len()
        ));
        Ok(results)
    }

    /// S1: fetch + parse metadata, then the four precondition checks. Returns `None` if any
    /// precondition check failed and later stages must be skipped.
    async fn run_preconditions(&self, recorder: &mut CheckRecorder) -> Result<Option<IaState>, EngineError> {
        let metadata = self.remote.metadata(&self.log).await?;
        let exists = !metadata.as_object().map(|o| o.is_empty()).unwrap_or(true);
        if !recorder.check("exists", exists, "metadata endpoint returned no item") {
            return Ok(None);
        }

        let state = IaState::from_value(&metadata);

        let has_pending = self.remote.has_pending_tasks(&self.log).await?;
        if !recorder.check_or_skip("has pending tasks", !has_pending, "item has pending administrative tasks") {
            return Ok(None);
        }

        if !recorder.check_or_skip("darkened", !state.is_dark, "item is darkened") {
            return Ok(None);
        }

        let own_files_xml = format!("{}_files.xml", self.task.id);
        let ia_modified = state.last_modified < self.max_last_modified
            || !state.files.has_any_original(|f| {
                f.mtime > self.max_last_modified && f.name != "__ia_thumb.jpg" && f.name != own_files_xml
            });
        if !recorder.check_or_skip("ia modified", ia_modified, "item was modified after catalog extraction") {
            return Ok(None);
        }

        Ok(Some(state))
    }

    async fn write_failures_log(&self, results: &[CheckResult]) -> Result<(), EngineError> {
        let path = self.task_dir.join("failures.log");
        let mut file = tokio::fs::File::create(&path).await?;
        for result in results {
            if matches!(result, CheckResult::Failed { .. }) {
                file.write_all(result.to_string().as_bytes()).await?;
                file.write_all(b"\n").await?;
            }
        }
        file.flush().await?;
        Ok(())
    }
}
