//! In-process object store
//!
//! Backs dry runs and tests. Clones share the same objects, so a test can keep a
//! handle while the coordinator owns another. Failures can be armed per operation
//! to exercise the coordinator's retry paths.

use async_trait::async_trait;
use orgflow_common::checksum::sha256_hex;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

use super::{ObjectStore, UploadReceipt};
use crate::error::{PipelineError, Result};

#[derive(Debug, Default)]
struct Inner {
    objects: BTreeMap<String, Vec<u8>>,
    fail_uploads: usize,
    fail_downloads: usize,
    fail_deletes: usize,
    delete_calls: usize,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryObjectStore {
    bucket: String,
    inner: Arc<Mutex<Inner>>,
}

impl MemoryObjectStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            inner: Arc::default(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Make the next `n` uploads fail with a transfer error
    pub fn fail_next_uploads(&self, n: usize) {
        self.lock().fail_uploads = n;
    }

    /// Make the next `n` downloads fail with a transfer error
    pub fn fail_next_downloads(&self, n: usize) {
        self.lock().fail_downloads = n;
    }

    /// Make the next `n` deletes fail with a transfer error
    pub fn fail_next_deletes(&self, n: usize) {
        self.lock().fail_deletes = n;
    }

    /// Place an object directly, bypassing upload
    pub fn insert(&self, key: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.lock().objects.insert(key.into(), data.into());
    }

    pub fn contains(&self, key: &str) -> bool {
        self.lock().objects.contains_key(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.lock().objects.keys().cloned().collect()
    }

    pub fn delete_calls(&self) -> usize {
        self.lock().delete_calls
    }
}

fn take_failure(counter: &mut usize) -> bool {
    if *counter > 0 {
        *counter -= 1;
        true
    } else {
        false
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn upload(&self, local_path: &Path, key: &str) -> Result<UploadReceipt> {
        if take_failure(&mut self.lock().fail_uploads) {
            return Err(PipelineError::transfer(key, "simulated upload failure"));
        }

        let data = tokio::fs::read(local_path).await.map_err(|e| {
            PipelineError::transfer(
                key,
                format!("cannot read local file {}: {}", local_path.display(), e),
            )
        })?;

        let receipt = UploadReceipt {
            key: key.to_string(),
            size: data.len() as u64,
            checksum: sha256_hex(&data),
        };
        self.lock().objects.insert(key.to_string(), data);

        debug!(size = receipt.size, "Stored {}", self.describe(key));
        Ok(receipt)
    }

    async fn download(&self, key: &str) -> Result<Vec<u8>> {
        let mut inner = self.lock();
        if take_failure(&mut inner.fail_downloads) {
            return Err(PipelineError::transfer(key, "simulated download failure"));
        }

        inner
            .objects
            .get(key)
            .cloned()
            .ok_or_else(|| PipelineError::NotFound(key.to_string()))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let mut inner = self.lock();
        inner.delete_calls += 1;
        if take_failure(&mut inner.fail_deletes) {
            return Err(PipelineError::transfer(key, "simulated delete failure"));
        }

        inner.objects.remove(key);
        Ok(())
    }

    fn describe(&self, key: &str) -> String {
        format!("memory://{}/{}", self.bucket, key)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::io::Write;

    fn local_file(contents: &[u8]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents).unwrap();
        file
    }

    #[tokio::test]
    async fn test_upload_download_delete() {
        let store = MemoryObjectStore::new("bucket");
        let file = local_file(b"{\"company\":\"Acme\"}");

        let receipt = store.upload(file.path(), "k1").await.unwrap();
        assert_eq!(receipt.size, 18);
        assert_eq!(receipt.checksum, sha256_hex(b"{\"company\":\"Acme\"}"));

        assert_eq!(store.download("k1").await.unwrap(), b"{\"company\":\"Acme\"}");

        store.delete("k1").await.unwrap();
        assert!(!store.contains("k1"));
    }

    #[tokio::test]
    async fn test_download_missing_key_is_not_found() {
        let store = MemoryObjectStore::new("bucket");
        let err = store.download("missing").await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound(ref k) if k == "missing"));
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let store = MemoryObjectStore::new("bucket");
        store.insert("k1", b"data".to_vec());

        store.delete("k1").await.unwrap();
        store.delete("k1").await.unwrap();
        assert_eq!(store.delete_calls(), 2);
    }

    #[tokio::test]
    async fn test_armed_failures_are_consumed() {
        let store = MemoryObjectStore::new("bucket");
        let file = local_file(b"{}");
        store.fail_next_uploads(1);

        assert!(matches!(
            store.upload(file.path(), "k1").await,
            Err(PipelineError::Transfer { .. })
        ));
        assert!(!store.contains("k1"));
        store.upload(file.path(), "k1").await.unwrap();
    }

    #[test]
    fn test_clones_share_objects() {
        let store = MemoryObjectStore::new("bucket");
        let handle = store.clone();
        store.insert("k1", b"x".to_vec());
        assert_eq!(handle.keys(), vec!["k1".to_string()]);
        assert_eq!(handle.describe("k1"), "memory://bucket/k1");
    }
}
