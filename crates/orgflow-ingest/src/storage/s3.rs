//! S3-backed object store

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::Region,
    error::{DisplayErrorContext, SdkError},
    primitives::ByteStream,
    Client,
};
use orgflow_common::checksum::sha256_hex;
use std::path::Path;
use tracing::{debug, info, instrument};

use super::{ObjectStore, UploadReceipt};
use crate::config::AwsConfig;
use crate::error::{PipelineError, Result};

const JSON_CONTENT_TYPE: &str = "application/json";

/// Object store over one S3 (or S3-compatible) bucket
#[derive(Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    /// Build a client from configuration.
    ///
    /// Static credentials are used when configured; otherwise the default AWS
    /// provider chain (environment, profile, instance role) applies.
    pub async fn new(config: &AwsConfig) -> Result<Self> {
        config.validate()?;

        let region = Region::new(config.region_name.clone());

        let mut builder = if config.has_static_credentials() {
            let credentials = Credentials::new(
                config.aws_access_key_id.expose(),
                config.aws_secret_access_key.expose(),
                None,
                None,
                "orgflow-config",
            );
            aws_sdk_s3::Config::builder()
                .credentials_provider(credentials)
                .region(region)
        } else {
            let shared = aws_config::defaults(BehaviorVersion::latest())
                .region(region)
                .load()
                .await;
            aws_sdk_s3::config::Builder::from(&shared)
        };

        builder = builder.force_path_style(config.force_path_style);

        if let Some(endpoint) = &config.endpoint_url {
            builder = builder.endpoint_url(endpoint);
        }

        info!(
            bucket = %config.bucket_name,
            region = %config.region_name,
            endpoint = ?config.endpoint_url,
            "Object store client initialized"
        );

        Ok(Self::from_client(builder.build(), &config.bucket_name))
    }

    /// Wrap an already-configured SDK client
    pub fn from_client(config: aws_sdk_s3::Config, bucket: impl Into<String>) -> Self {
        Self {
            client: Client::from_conf(config),
            bucket: bucket.into(),
        }
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    #[instrument(skip(self, local_path), fields(bucket = %self.bucket))]
    async fn upload(&self, local_path: &Path, key: &str) -> Result<UploadReceipt> {
        let data = tokio::fs::read(local_path).await.map_err(|e| {
            PipelineError::transfer(
                key,
                format!("cannot read local file {}: {}", local_path.display(), e),
            )
        })?;

        let checksum = sha256_hex(&data);
        let size = data.len() as u64;

        debug!("Uploading {} bytes to {}", size, self.describe(key));

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(JSON_CONTENT_TYPE)
            .metadata("sha256", &checksum)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| PipelineError::transfer(key, DisplayErrorContext(&e)))?;

        info!(size, "Uploaded {}", self.describe(key));

        Ok(UploadReceipt {
            key: key.to_string(),
            size,
            checksum,
        })
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn download(&self, key: &str) -> Result<Vec<u8>> {
        debug!("Downloading {}", self.describe(key));

        let response = match self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(response) => response,
            Err(SdkError::ServiceError(err))
                if err.err().is_no_such_key() || err.raw().status().as_u16() == 404 =>
            {
                return Err(PipelineError::NotFound(key.to_string()));
            },
            Err(e) => return Err(PipelineError::transfer(key, DisplayErrorContext(&e))),
        };

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| PipelineError::transfer(key, format!("failed to read body: {}", e)))?
            .into_bytes()
            .to_vec();

        debug!("Downloaded {} bytes from {}", data.len(), self.describe(key));

        Ok(data)
    }

    #[instrument(skip(self), fields(bucket = %self.bucket))]
    async fn delete(&self, key: &str) -> Result<()> {
        debug!("Deleting {}", self.describe(key));

        match self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(_) => info!("Deleted {}", self.describe(key)),
            Err(SdkError::ServiceError(err)) if err.raw().status().as_u16() == 404 => {
                debug!("{} already absent", self.describe(key));
            },
            Err(e) => return Err(PipelineError::transfer(key, DisplayErrorContext(&e))),
        }

        Ok(())
    }

    fn describe(&self, key: &str) -> String {
        format!("s3://{}/{}", self.bucket, key)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn offline_store() -> S3ObjectStore {
        let config = aws_sdk_s3::Config::builder()
            .region(Region::new("us-east-1"))
            .build();
        S3ObjectStore::from_client(config, "test-bucket")
    }

    #[test]
    fn test_describe() {
        let store = offline_store();
        assert_eq!(
            store.describe("incoming/data_20250101_000000_ab12cd34.json"),
            "s3://test-bucket/incoming/data_20250101_000000_ab12cd34.json"
        );
        assert_eq!(store.bucket(), "test-bucket");
    }

    #[tokio::test]
    async fn test_upload_missing_local_file_is_transfer_error() {
        let store = offline_store();
        let err = store
            .upload(Path::new("/nonexistent/data.json"), "incoming/data.json")
            .await
            .unwrap_err();

        assert!(matches!(err, PipelineError::Transfer { ref key, .. } if key == "incoming/data.json"));
    }

    #[tokio::test]
    async fn test_new_rejects_invalid_config() {
        let config = AwsConfig::default();
        assert!(matches!(
            S3ObjectStore::new(&config).await,
            Err(PipelineError::Config(_))
        ));
    }
}
