//! Relational Sink
//!
//! Owns the destination-table side of a run: preparing the table, bulk-appending
//! rows, and answering verification queries. One sink instance belongs to one run
//! and is closed by the coordinator when the run's load stage ends.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

use crate::error::{PipelineError, Result};
use crate::transform::FlatRow;

pub mod memory;
pub mod postgres;

pub use memory::MemorySink;
pub use postgres::PgSink;

static IDENTIFIER: LazyLock<regex::Regex> = LazyLock::new(|| {
    regex::Regex::new(r"^[A-Za-z_][A-Za-z0-9_]{0,62}$").unwrap_or_else(|_| unreachable!())
});

/// Whether `name` is a plain, unquoted-safe SQL identifier
pub fn is_valid_identifier(name: &str) -> bool {
    IDENTIFIER.is_match(name)
}

/// How the destination table is prepared before each load.
///
/// Chosen once per pipeline in configuration, never per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TablePolicy {
    /// Drop and recreate: every load starts from an empty table
    #[default]
    #[serde(alias = "drop_create")]
    Destructive,
    /// Create if absent: rows accumulate across runs
    #[serde(alias = "create_if_absent")]
    Additive,
}

impl fmt::Display for TablePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TablePolicy::Destructive => write!(f, "destructive"),
            TablePolicy::Additive => write!(f, "additive"),
        }
    }
}

/// Schema-qualified destination table with its fixed text columns
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSpec {
    schema: String,
    name: String,
    columns: &'static [&'static str],
}

impl TableSpec {
    /// Table holding [`FlatRow`]s
    pub fn employees(schema: impl Into<String>, name: impl Into<String>) -> Result<Self> {
        Self::new(schema, name, &FlatRow::COLUMNS)
    }

    pub fn new(
        schema: impl Into<String>,
        name: impl Into<String>,
        columns: &'static [&'static str],
    ) -> Result<Self> {
        let schema = schema.into();
        let name = name.into();

        for identifier in std::iter::once(&schema)
            .chain(std::iter::once(&name))
            .map(String::as_str)
            .chain(columns.iter().copied())
        {
            if !is_valid_identifier(identifier) {
                return Err(PipelineError::config(format!(
                    "'{}' is not a valid SQL identifier",
                    identifier
                )));
            }
        }

        Ok(Self {
            schema,
            name,
            columns,
        })
    }

    pub fn schema(&self) -> &str {
        &self.schema
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[&'static str] {
        self.columns
    }

    /// `"schema"."table"`, safe to splice into SQL
    pub fn quoted(&self) -> String {
        format!("\"{}\".\"{}\"", self.schema, self.name)
    }

    /// `"company" TEXT, "location" TEXT, ...`
    pub fn column_definitions(&self) -> String {
        self.columns
            .iter()
            .map(|c| format!("\"{}\" TEXT", c))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// `"company", "location", ...`
    pub fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| format!("\"{}\"", c))
            .collect::<Vec<_>>()
            .join(", ")
    }
}

impl fmt::Display for TableSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.schema, self.name)
    }
}

/// Destination database for flattened rows
#[async_trait]
pub trait RelationalSink: Send + Sync {
    /// Prepare the table according to the sink's [`TablePolicy`]
    async fn ensure_table(&self, table: &TableSpec) -> Result<()>;

    /// Bulk-insert rows in batches. Empty input writes nothing and returns 0.
    async fn append(&self, table: &TableSpec, rows: &[FlatRow]) -> Result<u64>;

    /// Prepare the table and append as one unit: on failure, neither the table
    /// preparation nor any batch is kept.
    async fn load(&self, table: &TableSpec, rows: &[FlatRow]) -> Result<u64>;

    /// Verification query for post-load sanity checks
    async fn row_count(&self, table: &TableSpec) -> Result<i64>;

    /// Release the connection. Safe to call more than once.
    async fn close(&self);
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_identifier_validation() {
        assert!(is_valid_identifier("employee_details"));
        assert!(is_valid_identifier("_staging2"));
        assert!(!is_valid_identifier("2fast"));
        assert!(!is_valid_identifier("public.employee_details"));
        assert!(!is_valid_identifier("x\"; DROP TABLE y; --"));
        assert!(!is_valid_identifier(""));
        assert!(!is_valid_identifier(&"a".repeat(64)));
    }

    #[test]
    fn test_employee_table_sql_fragments() {
        let table = TableSpec::employees("public", "employee_details").unwrap();
        assert_eq!(table.quoted(), "\"public\".\"employee_details\"");
        assert_eq!(table.to_string(), "public.employee_details");
        assert_eq!(table.columns().len(), 8);
        assert!(table
            .column_definitions()
            .starts_with("\"company\" TEXT, \"location\" TEXT"));
        assert!(table.column_list().ends_with("\"skills\", \"campaigns\""));
    }

    #[test]
    fn test_table_spec_rejects_bad_names() {
        assert!(TableSpec::employees("public; --", "t").is_err());
        assert!(TableSpec::employees("public", "t t").is_err());
    }

    #[test]
    fn test_policy_display() {
        assert_eq!(TablePolicy::default(), TablePolicy::Destructive);
        assert_eq!(TablePolicy::Additive.to_string(), "additive");
    }
}
