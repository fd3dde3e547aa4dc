//! Stage handoff channel
//!
//! The upload and load stages may run in different processes. The artifact key
//! produced by upload reaches load only through this channel, keyed by run id, so
//! both stages always agree on which object they are working with.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock, Mutex, MutexGuard};
use tracing::debug;
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::storage::UploadReceipt;

static RUN_ID: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"^[A-Za-z0-9._:+-]+$").unwrap_or_else(|_| unreachable!()));

/// New scheduler-independent run id
pub fn new_run_id() -> String {
    Uuid::new_v4().to_string()
}

/// Run ids double as file names, so they are restricted to a safe alphabet
pub fn validate_run_id(run_id: &str) -> Result<()> {
    if run_id.len() > 128 || !RUN_ID.is_match(run_id) || run_id == "." || run_id == ".." {
        return Err(PipelineError::handoff(format!(
            "invalid run id '{}': expected 1-128 characters from [A-Za-z0-9._:+-]",
            run_id
        )));
    }
    Ok(())
}

/// What the upload stage hands to the load stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandoffEntry {
    pub artifact_key: String,
    /// Hex SHA-256 of the uploaded bytes
    pub checksum: String,
    pub size: u64,
    pub uploaded_at: DateTime<Utc>,
    #[serde(default)]
    pub consumed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub consumed_at: Option<DateTime<Utc>>,
}

impl HandoffEntry {
    pub fn from_receipt(receipt: &UploadReceipt) -> Self {
        Self {
            artifact_key: receipt.key.clone(),
            checksum: receipt.checksum.clone(),
            size: receipt.size,
            uploaded_at: Utc::now(),
            consumed: false,
            consumed_at: None,
        }
    }
}

/// Run-scoped key-value exchange between stages
#[async_trait]
pub trait HandoffChannel: Send + Sync {
    /// Store the entry for `run_id`, replacing any earlier one
    async fn record(&self, run_id: &str, entry: &HandoffEntry) -> Result<()>;

    /// Entry for `run_id`, if one was recorded
    async fn fetch(&self, run_id: &str) -> Result<Option<HandoffEntry>>;

    /// Flag the run's artifact as loaded and cleaned up
    async fn mark_consumed(&self, run_id: &str) -> Result<()>;
}

/// One JSON document per run under a state directory
#[derive(Debug, Clone)]
pub struct FileHandoff {
    dir: PathBuf,
}

impl FileHandoff {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, run_id: &str) -> Result<PathBuf> {
        validate_run_id(run_id)?;
        Ok(self.dir.join(format!("{}.json", run_id)))
    }

    async fn write_entry(&self, path: &Path, entry: &HandoffEntry) -> Result<()> {
        let content = serde_json::to_vec_pretty(entry)
            .map_err(|e| PipelineError::handoff(format!("cannot encode handoff entry: {}", e)))?;

        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            PipelineError::handoff(format!(
                "cannot create state directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        // Write-then-rename so a crash never leaves a half-written entry behind
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, &content)
            .await
            .map_err(|e| PipelineError::handoff(format!("cannot write {}: {}", tmp.display(), e)))?;
        tokio::fs::rename(&tmp, path)
            .await
            .map_err(|e| PipelineError::handoff(format!("cannot replace {}: {}", path.display(), e)))?;

        debug!(path = %path.display(), "Handoff entry written");
        Ok(())
    }
}

#[async_trait]
impl HandoffChannel for FileHandoff {
    async fn record(&self, run_id: &str, entry: &HandoffEntry) -> Result<()> {
        let path = self.entry_path(run_id)?;
        self.write_entry(&path, entry).await
    }

    async fn fetch(&self, run_id: &str) -> Result<Option<HandoffEntry>> {
        let path = self.entry_path(run_id)?;

        let content = match tokio::fs::read(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(PipelineError::handoff(format!(
                    "cannot read {}: {}",
                    path.display(),
                    e
                )))
            },
        };

        serde_json::from_slice(&content)
            .map(Some)
            .map_err(|e| PipelineError::handoff(format!("corrupt handoff entry {}: {}", path.display(), e)))
    }

    async fn mark_consumed(&self, run_id: &str) -> Result<()> {
        let path = self.entry_path(run_id)?;
        let mut entry = self
            .fetch(run_id)
            .await?
            .ok_or_else(|| PipelineError::handoff(format!("no handoff entry for run {}", run_id)))?;

        entry.consumed = true;
        entry.consumed_at = Some(Utc::now());
        self.write_entry(&path, &entry).await
    }
}

/// In-process channel; clones share entries
#[derive(Debug, Clone, Default)]
pub struct MemoryHandoff {
    entries: Arc<Mutex<HashMap<String, HandoffEntry>>>,
}

impl MemoryHandoff {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, HandoffEntry>> {
        self.entries.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl HandoffChannel for MemoryHandoff {
    async fn record(&self, run_id: &str, entry: &HandoffEntry) -> Result<()> {
        validate_run_id(run_id)?;
        self.lock().insert(run_id.to_string(), entry.clone());
        Ok(())
    }

    async fn fetch(&self, run_id: &str) -> Result<Option<HandoffEntry>> {
        validate_run_id(run_id)?;
        Ok(self.lock().get(run_id).cloned())
    }

    async fn mark_consumed(&self, run_id: &str) -> Result<()> {
        validate_run_id(run_id)?;
        let mut entries = self.lock();
        let entry = entries
            .get_mut(run_id)
            .ok_or_else(|| PipelineError::handoff(format!("no handoff entry for run {}", run_id)))?;

        entry.consumed = true;
        entry.consumed_at = Some(Utc::now());
        Ok(())
    }
}
