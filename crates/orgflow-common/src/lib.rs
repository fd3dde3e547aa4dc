//! orgflow Common Library
#![deny(clippy::unwrap_used, clippy::expect_used)]
//!
//! Shared utilities for the orgflow workspace members.
//!
//! # Overview
//!
//! - **Logging**: one place to configure `tracing` output for every binary
//! - **Secrets**: credential wrapper that never prints its contents
//! - **Checksums**: SHA-256 helpers used to verify artifacts in transit
//!
//! # Example
//!
//! ```no_run
//! use orgflow_common::logging::{init_logging, LogConfig};
//! use orgflow_common::checksum::sha256_hex;
//!
//! fn main() -> anyhow::Result<()> {
//!     let _guard = init_logging(&LogConfig::from_env()?)?;
//!     tracing::info!(checksum = %sha256_hex(b"{}"), "ready");
//!     Ok(())
//! }
//! ```

pub mod checksum;
pub mod logging;
pub mod secret;

pub use secret::Secret;
