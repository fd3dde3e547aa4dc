//! Pipeline coordinator
//!
//! Drives one run through its stages:
//! 1. Check: the local source file exists
//! 2. Upload: push it under a fresh artifact key and record the key for handoff
//! 3. Load: download, verify, flatten, write to the sink, then clean up
//!
//! Upload and load are separate entry points so an external scheduler can run
//! and retry them as independent units, possibly in different processes.

use orgflow_common::checksum::sha256_hex;
use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use super::archive::archive_source;
use super::handoff::{HandoffChannel, HandoffEntry};
use super::keys::artifact_key;
use super::state::{PipelineRun, RunState};
use crate::config::PipelineConfig;
use crate::error::{PipelineError, Result};
use crate::sink::{RelationalSink, TableSpec};
use crate::storage::ObjectStore;
use crate::transform::flatten_bytes;

/// Stage a failure is attributed to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Check,
    Upload,
    Download,
    Transform,
    Load,
    Cleanup,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Check => "check",
            Stage::Upload => "upload",
            Stage::Download => "download",
            Stage::Transform => "transform",
            Stage::Load => "load",
            Stage::Cleanup => "cleanup",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed stage, with enough context for the scheduler to retry it
#[derive(Debug, Error)]
#[error("{stage} stage failed: {error}")]
pub struct StageFailure {
    pub stage: Stage,
    /// Artifact left in the object store, if one was uploaded
    pub artifact: Option<String>,
    #[source]
    pub error: PipelineError,
}

impl StageFailure {
    pub fn is_retryable(&self) -> bool {
        self.error.is_retryable()
    }
}

pub type StageResult<T> = std::result::Result<T, StageFailure>;

/// Abort the run and attribute the error to `stage`
fn fail(run: &mut PipelineRun, stage: Stage, error: PipelineError) -> StageFailure {
    run.abort(&error);
    error!(
        run_id = %run.run_id(),
        stage = %stage,
        artifact = ?run.artifact_key(),
        error_kind = error.kind(),
        retryable = error.is_retryable(),
        "Stage failed: {}",
        error
    );

    StageFailure {
        stage,
        artifact: run.artifact_key().map(str::to_string),
        error,
    }
}

/// Outcome of a load invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub run_id: String,
    pub artifact_key: String,
    pub state: RunState,
    pub rows_transformed: usize,
    pub rows_loaded: u64,
    /// The document had no employees, so the sink was never written
    pub load_skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub verified_row_count: Option<i64>,
    /// Non-fatal cleanup problems (artifact delete, archive)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cleanup_warning: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archived: Option<PathBuf>,
    /// An earlier invocation already finished this run; nothing was done
    pub already_complete: bool,
}

impl RunReport {
    fn new(run_id: &str, artifact_key: &str) -> Self {
        Self {
            run_id: run_id.to_string(),
            artifact_key: artifact_key.to_string(),
            state: RunState::Uploaded,
            rows_transformed: 0,
            rows_loaded: 0,
            load_skipped: false,
            verified_row_count: None,
            cleanup_warning: None,
            archived: None,
            already_complete: false,
        }
    }

    fn add_cleanup_warning(&mut self, message: String) {
        self.cleanup_warning = Some(match self.cleanup_warning.take() {
            Some(existing) => format!("{}; {}", existing, message),
            None => message,
        });
    }
}

/// Coordinates pipeline runs.
///
/// The object store and handoff channel hold no per-run state and are shared across
/// runs. A sink is passed in per run and closed when the run's load stage ends.
pub struct Coordinator {
    store: Arc<dyn ObjectStore>,
    handoff: Arc<dyn HandoffChannel>,
    source: PathBuf,
    key_prefix: String,
    archive_dir: Option<PathBuf>,
    table: TableSpec,
}

impl Coordinator {
    pub fn new(
        config: &PipelineConfig,
        store: Arc<dyn ObjectStore>,
        handoff: Arc<dyn HandoffChannel>,
    ) -> Result<Self> {
        config.local.validate()?;
        let table = TableSpec::employees(&config.database.schema, &config.database.table)?;

        Ok(Self {
            store,
            handoff,
            source: config.local.json_file_path.clone(),
            key_prefix: config.aws.s3_key_prefix.clone(),
            archive_dir: config.local.archive_dir.clone(),
            table,
        })
    }

    /// Leave the source file in place after a successful run
    pub fn without_archive(mut self) -> Self {
        self.archive_dir = None;
        self
    }

    pub fn table(&self) -> &TableSpec {
        &self.table
    }

    /// PENDING -> LOCAL_VERIFIED
    #[instrument(skip_all, fields(run_id = %run.run_id(), stage = "check"))]
    pub async fn check_source(&self, run: &mut PipelineRun) -> StageResult<()> {
        match tokio::fs::metadata(&self.source).await {
            Ok(metadata) if metadata.is_file() => {
                info!(path = %self.source.display(), size = metadata.len(), "Source file found");
                run.advance(RunState::LocalVerified)
                    .map_err(|e| fail(run, Stage::Check, e))
            },
            _ => Err(fail(
                run,
                Stage::Check,
                PipelineError::SourceNotFound(self.source.clone()),
            )),
        }
    }

    /// LOCAL_VERIFIED -> UPLOADED
    ///
    /// Every attempt uses a fresh key. The source file is only read.
    #[instrument(skip_all, fields(run_id = %run.run_id(), stage = "upload"))]
    pub async fn upload(&self, run: &mut PipelineRun) -> StageResult<HandoffEntry> {
        if !run.state().can_transition_to(RunState::Uploaded) {
            let state = run.state();
            return Err(fail(
                run,
                Stage::Upload,
                PipelineError::handoff(format!("cannot upload from state {}", state)),
            ));
        }

        let key = artifact_key(&self.key_prefix);
        let receipt = self
            .store
            .upload(&self.source, &key)
            .await
            .map_err(|e| fail(run, Stage::Upload, e))?;
        run.set_artifact_key(&receipt.key);

        match self.handoff.fetch(run.run_id()).await {
            Ok(Some(previous)) if !previous.consumed => warn!(
                previous = %previous.artifact_key,
                "Replacing an unconsumed artifact reference; {} stays in the store",
                self.store.describe(&previous.artifact_key)
            ),
            Ok(_) => {},
            Err(e) => warn!(error = %e, "Could not inspect earlier handoff entry"),
        }

        let entry = HandoffEntry::from_receipt(&receipt);
        self.handoff
            .record(run.run_id(), &entry)
            .await
            .map_err(|e| fail(run, Stage::Upload, e))?;

        run.advance(RunState::Uploaded)
            .map_err(|e| fail(run, Stage::Upload, e))?;

        info!(
            artifact = %entry.artifact_key,
            size = entry.size,
            "Artifact uploaded to {}",
            self.store.describe(&entry.artifact_key)
        );
        Ok(entry)
    }

    /// UPLOADED -> CLEANED, for a run whose artifact was recorded by [`upload`].
    ///
    /// The sink is closed before returning, whatever the outcome.
    ///
    /// [`upload`]: Coordinator::upload
    #[instrument(skip_all, fields(run_id = %run_id, stage = "load"))]
    pub async fn load(&self, run_id: &str, sink: &dyn RelationalSink) -> StageResult<RunReport> {
        let result = self.load_inner(run_id, sink).await;
        sink.close().await;
        result
    }

    /// Every stage in one process
    pub async fn run(&self, run_id: &str, sink: &dyn RelationalSink) -> StageResult<RunReport> {
        let mut run = PipelineRun::new(run_id);

        let staged = match self.check_source(&mut run).await {
            Ok(()) => self.upload(&mut run).await.map(|_| ()),
            Err(e) => Err(e),
        };
        if let Err(e) = staged {
            sink.close().await;
            return Err(e);
        }

        self.load(run_id, sink).await
    }

    async fn load_inner(&self, run_id: &str, sink: &dyn RelationalSink) -> StageResult<RunReport> {
        let mut run = PipelineRun::new(run_id);

        let entry = match self.handoff.fetch(run_id).await {
            Ok(Some(entry)) => entry,
            Ok(None) => {
                let e = PipelineError::handoff(format!("no artifact recorded for run {}", run_id));
                return Err(fail(&mut run, Stage::Download, e));
            },
            Err(e) => return Err(fail(&mut run, Stage::Download, e)),
        };

        let mut report = RunReport::new(run_id, &entry.artifact_key);
        if entry.consumed {
            info!(
                artifact = %entry.artifact_key,
                "Run already loaded and cleaned up; nothing to do"
            );
            report.state = RunState::Cleaned;
            report.already_complete = true;
            return Ok(report);
        }

        let mut run = PipelineRun::resume(run_id, &entry.artifact_key);
        let key = entry.artifact_key.as_str();

        // UPLOADED -> DOWNLOADED
        let bytes = self
            .store
            .download(key)
            .await
            .map_err(|e| fail(&mut run, Stage::Download, e))?;

        let checksum = sha256_hex(&bytes);
        if checksum != entry.checksum {
            let e = PipelineError::transfer(
                key,
                format!("checksum mismatch: expected {}, got {}", entry.checksum, checksum),
            );
            return Err(fail(&mut run, Stage::Download, e));
        }
        run.advance(RunState::Downloaded)
            .map_err(|e| fail(&mut run, Stage::Download, e))?;

        // DOWNLOADED -> TRANSFORMED
        let rows = flatten_bytes(&bytes).map_err(|e| fail(&mut run, Stage::Transform, e))?;
        report.rows_transformed = rows.len();
        run.advance(RunState::Transformed)
            .map_err(|e| fail(&mut run, Stage::Transform, e))?;

        // TRANSFORMED -> LOADED, unless there is nothing to load
        if rows.is_empty() {
            warn!(
                artifact = %key,
                "Document has no employees; skipping load into {}",
                self.table
            );
            report.load_skipped = true;
        } else {
            report.rows_loaded = sink
                .load(&self.table, &rows)
                .await
                .map_err(|e| fail(&mut run, Stage::Load, e))?;
            run.advance(RunState::Loaded)
                .map_err(|e| fail(&mut run, Stage::Load, e))?;

            match sink.row_count(&self.table).await {
                Ok(count) => {
                    info!(
                        rows_loaded = report.rows_loaded,
                        table_rows = count,
                        "Verified {}",
                        self.table
                    );
                    report.verified_row_count = Some(count);
                },
                Err(e) => warn!(error = %e, "Row count verification failed"),
            }
        }

        // -> CLEANED
        self.handoff
            .mark_consumed(run_id)
            .await
            .map_err(|e| fail(&mut run, Stage::Cleanup, e))?;

        if let Err(e) = self.store.delete(key).await {
            warn!(
                error = %e,
                "Could not delete {}; leaving it behind",
                self.store.describe(key)
            );
            report.add_cleanup_warning(format!("artifact delete failed: {}", e));
        }

        if let Some(archive_dir) = &self.archive_dir {
            match archive_source(&self.source, archive_dir).await {
                Ok(path) => {
                    info!(archived = %path.display(), "Source file archived");
                    report.archived = Some(path);
                },
                Err(e) => {
                    warn!(
                        error = %e,
                        source = %self.source.display(),
                        "Could not archive source file"
                    );
                    report.add_cleanup_warning(format!("archive failed: {}", e));
                },
            }
        }

        run.advance(RunState::Cleaned)
            .map_err(|e| fail(&mut run, Stage::Cleanup, e))?;
        report.state = run.state();

        info!(
            rows_transformed = report.rows_transformed,
            rows_loaded = report.rows_loaded,
            load_skipped = report.load_skipped,
            "Run complete"
        );
        Ok(report)
    }
}
