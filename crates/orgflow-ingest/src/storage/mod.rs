//! Object Store Gateway
//!
//! Thin key-based put/get/delete over a bucket. The gateway never invents keys:
//! the coordinator generates the artifact key and passes it in, so there is one
//! source of truth for the current artifact reference.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;

pub mod memory;
pub mod s3;

pub use memory::MemoryObjectStore;
pub use s3::S3ObjectStore;

/// What the store holds after a successful upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    pub key: String,
    pub size: u64,
    /// Hex SHA-256 of the uploaded bytes
    pub checksum: String,
}

/// Key-based object store. Implementations hold no per-run state and may be
/// shared across concurrent runs.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Upload a local file under `key`.
    ///
    /// Fails with `Transfer` on network or auth failure, or when the local file
    /// cannot be read.
    async fn upload(&self, local_path: &Path, key: &str) -> Result<UploadReceipt>;

    /// Fetch the object at `key`. `NotFound` if absent, `Transfer` otherwise.
    async fn download(&self, key: &str) -> Result<Vec<u8>>;

    /// Remove the object at `key`. Deleting an absent key succeeds.
    async fn delete(&self, key: &str) -> Result<()>;

    /// Human-readable location for logs, e.g. `s3://bucket/key`
    fn describe(&self, key: &str) -> String;
}
