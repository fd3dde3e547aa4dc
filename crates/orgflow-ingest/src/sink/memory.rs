//! In-process relational sink for dry runs and tests

use async_trait::async_trait;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use super::{RelationalSink, TablePolicy, TableSpec};
use crate::error::{PipelineError, Result};
use crate::transform::FlatRow;

#[derive(Debug, Default)]
struct Inner {
    tables: BTreeMap<String, Vec<FlatRow>>,
    fail_loads: usize,
    unique_employee_id: bool,
    close_calls: usize,
}

/// Clones share state, so a test can inspect what the coordinator wrote through
/// its own handle.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    policy: TablePolicy,
    inner: Arc<Mutex<Inner>>,
}

impl MemorySink {
    pub fn new(policy: TablePolicy) -> Self {
        Self {
            policy,
            inner: Arc::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Reject duplicate `employee_id`s within a table, like a primary key would
    pub fn with_unique_employee_id(self) -> Self {
        self.lock().unique_employee_id = true;
        self
    }

    /// Make the next `n` loads fail before anything is written
    pub fn fail_next_loads(&self, n: usize) {
        self.lock().fail_loads = n;
    }

    /// Rows currently in `table`, or `None` if the table was never created
    pub fn rows(&self, table: &TableSpec) -> Option<Vec<FlatRow>> {
        self.lock().tables.get(&table.to_string()).cloned()
    }

    pub fn close_calls(&self) -> usize {
        self.lock().close_calls
    }
}

impl Inner {
    fn prepare(&mut self, table: &TableSpec, policy: TablePolicy) {
        let existing = self.tables.entry(table.to_string()).or_default();
        if policy == TablePolicy::Destructive {
            existing.clear();
        }
    }

    fn check_unique(&self, table: &TableSpec, current: &[FlatRow], rows: &[FlatRow]) -> Result<()> {
        if !self.unique_employee_id {
            return Ok(());
        }

        let mut seen: HashSet<&str> = current.iter().map(|r| r.employee_id.as_str()).collect();
        for row in rows {
            if !seen.insert(row.employee_id.as_str()) {
                return Err(PipelineError::load(
                    table.to_string(),
                    format!(
                        "duplicate key value violates unique constraint: employee_id={}",
                        row.employee_id
                    ),
                ));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl RelationalSink for MemorySink {
    async fn ensure_table(&self, table: &TableSpec) -> Result<()> {
        self.lock().prepare(table, self.policy);
        Ok(())
    }

    async fn append(&self, table: &TableSpec, rows: &[FlatRow]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }

        let mut inner = self.lock();
        let current = inner
            .tables
            .get(&table.to_string())
            .ok_or_else(|| PipelineError::load(table.to_string(), "relation does not exist"))?;
        inner.check_unique(table, current, rows)?;

        inner
            .tables
            .entry(table.to_string())
            .or_default()
            .extend_from_slice(rows);
        Ok(rows.len() as u64)
    }

    async fn load(&self, table: &TableSpec, rows: &[FlatRow]) -> Result<u64> {
        let mut inner = self.lock();

        if inner.fail_loads > 0 {
            inner.fail_loads -= 1;
            return Err(PipelineError::load(table.to_string(), "simulated load failure"));
        }

        // Validate against the table as it would look after preparation, so a
        // failed load leaves the previous contents untouched
        let current: &[FlatRow] = match (self.policy, inner.tables.get(&table.to_string())) {
            (TablePolicy::Additive, Some(rows)) => rows.as_slice(),
            _ => &[],
        };
        inner.check_unique(table, current, rows)?;

        inner.prepare(table, self.policy);
        inner
            .tables
            .entry(table.to_string())
            .or_default()
            .extend_from_slice(rows);

        debug!(rows = rows.len(), "Loaded rows into memory table {}", table);
        Ok(rows.len() as u64)
    }

    async fn row_count(&self, table: &TableSpec) -> Result<i64> {
        self.lock()
            .tables
            .get(&table.to_string())
            .map(|rows| rows.len() as i64)
            .ok_or_else(|| PipelineError::load(table.to_string(), "relation does not exist"))
    }

    async fn close(&self) {
        self.lock().close_calls += 1;
    }
}
