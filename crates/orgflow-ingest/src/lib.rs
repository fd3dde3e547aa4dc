//! orgflow Ingest Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Moves a company organization document from local disk, through an object
//! store, into a relational table.
//!
//! # Overview
//!
//! - **Transform**: flattens the nested document into one row per employee
//! - **Storage**: key-based upload/download/delete over an S3 bucket
//! - **Sink**: prepares the destination table and bulk-inserts rows into PostgreSQL
//! - **Pipeline**: the run state machine and the coordinator driving it
//! - **Configuration**: one explicit config value, file plus environment overrides
//!
//! # Stages
//!
//! ```text
//! check ──> upload ──(handoff: artifact key)──> load = download, transform, insert, cleanup
//! ```
//!
//! The upload and load stages may run in different processes. The artifact key is
//! passed between them through a [`pipeline::HandoffChannel`], never re-derived.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use orgflow_ingest::{
//!     config::PipelineConfig,
//!     pipeline::{new_run_id, Coordinator, FileHandoff},
//!     sink::PgSink,
//!     storage::S3ObjectStore,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = PipelineConfig::load("resources/config.ini")?;
//! config.validate()?;
//!
//! let store = Arc::new(S3ObjectStore::new(&config.aws).await?);
//! let handoff = Arc::new(FileHandoff::new(&config.local.state_dir));
//! let coordinator = Coordinator::new(&config, store, handoff)?;
//!
//! let sink = PgSink::new(&config.database)?;
//! let report = coordinator.run(&new_run_id(), &sink).await?;
//! println!("{} rows loaded", report.rows_loaded);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod pipeline;
pub mod sink;
pub mod storage;
pub mod transform;

pub use error::{PipelineError, Result};
