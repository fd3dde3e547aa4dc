//! Shared fixtures for orgflow-ingest integration tests
//!
//! - Source documents and on-disk configuration for in-memory pipeline tests
//! - PostgreSQL and MinIO containers for the Docker-backed tests
//!
//! Container helpers need a running Docker daemon; the tests using them are
//! `#[ignore]`d by default and run with `cargo test -- --ignored`.

#![allow(dead_code)]

use anyhow::{Context, Result};
use orgflow_ingest::config::{AwsConfig, DatabaseConfig, PipelineConfig};
use std::path::{Path, PathBuf};
use testcontainers::{
    core::{IntoContainerPort, WaitFor},
    runners::AsyncRunner,
    ContainerAsync, GenericImage, ImageExt,
};
use testcontainers_modules::postgres::Postgres;
use tracing::{debug, info};

pub const ACME_DOCUMENT: &str = r#"{"company":"Acme","location":"NY","departments":{"Eng":{"employees":{"E1":{"name":"Jo","role":"Dev","skills":["Go","SQL"]}}}}}"#;

/// Two departments, one employee with projects and one with campaigns
pub const MIXED_DOCUMENT: &str = r#"{
  "company": "Globex",
  "location": "Springfield",
  "departments": {
    "Engineering": {
      "employees": {
        "G-100": {"name": "Hank", "role": "Lead", "skills": ["Rust"], "projects": [{"name": "Alpha", "status": "done"}]},
        "G-101": {"name": "Frank", "role": "Engineer", "skills": []}
      }
    },
    "Marketing": {
      "employees": {
        "G-200": {"name": "Lisa", "role": "Manager", "skills": ["SEO", "Copy"], "campaigns": {"Q1": "active", "Q2": "planned"}}
      }
    }
  }
}"#;

pub const DEFAULT_TEST_BUCKET: &str = "orgflow-test";

pub const MINIO_ACCESS_KEY: &str = "minioadmin";
pub const MINIO_SECRET_KEY: &str = "minioadmin";

/// Temporary working directory holding a source document and pipeline state
pub struct Workspace {
    dir: tempfile::TempDir,
}

impl Workspace {
    pub fn new(document: &str) -> Result<Self> {
        let dir = tempfile::tempdir().context("Failed to create temp dir")?;
        std::fs::write(dir.path().join("data.json"), document)
            .context("Failed to write source document")?;
        Ok(Self { dir })
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn source(&self) -> PathBuf {
        self.dir.path().join("data.json")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.dir.path().join("archive")
    }

    pub fn state_dir(&self) -> PathBuf {
        self.dir.path().join("state")
    }

    /// Config pointing at this workspace; object store and database left at defaults
    pub fn config(&self, archive: bool) -> PipelineConfig {
        PipelineConfig {
            local: orgflow_ingest::config::LocalConfig {
                json_file_path: self.source(),
                archive_dir: archive.then(|| self.archive_dir()),
                state_dir: self.state_dir(),
            },
            aws: AwsConfig {
                bucket_name: DEFAULT_TEST_BUCKET.to_string(),
                s3_key_prefix: "incoming".to_string(),
                ..Default::default()
            },
            database: DatabaseConfig::default(),
        }
    }
}

// ============================================================================
// PostgreSQL Test Container
// ============================================================================

pub struct TestPostgres {
    container: ContainerAsync<Postgres>,
    host: String,
    port: u16,
}

impl TestPostgres {
    pub async fn start() -> Result<Self> {
        info!("Starting PostgreSQL test container...");

        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get container host")?
            .to_string();
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        debug!("PostgreSQL at {}:{}", host, port);
        Ok(Self {
            container,
            host,
            port,
        })
    }

    /// Sink configuration for this container
    pub fn database_config(&self, schema: &str) -> DatabaseConfig {
        DatabaseConfig {
            host: self.host.clone(),
            port: self.port,
            user: "postgres".to_string(),
            password: "postgres".into(),
            database: "postgres".to_string(),
            schema: schema.to_string(),
            connect_timeout_secs: 10,
            ..Default::default()
        }
    }

    /// Independent pool for assertions
    pub async fn pool(&self) -> Result<sqlx::PgPool> {
        let options = sqlx::postgres::PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username("postgres")
            .password("postgres")
            .database("postgres");

        sqlx::postgres::PgPoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .context("Failed to connect to PostgreSQL")
    }
}

// ============================================================================
// MinIO Test Container
// ============================================================================

pub struct TestMinio {
    container: ContainerAsync<GenericImage>,
    endpoint: String,
}

impl TestMinio {
    /// Start MinIO and create [`DEFAULT_TEST_BUCKET`]
    pub async fn start() -> Result<Self> {
        info!("Starting MinIO test container...");

        let container = GenericImage::new("minio/minio", "latest")
            .with_exposed_port(9000.tcp())
            .with_wait_for(WaitFor::message_on_stdout("MinIO Object Storage Server"))
            .with_env_var("MINIO_ROOT_USER", MINIO_ACCESS_KEY)
            .with_env_var("MINIO_ROOT_PASSWORD", MINIO_SECRET_KEY)
            .with_cmd(vec!["server", "/data"])
            .start()
            .await
            .context("Failed to start MinIO container")?;

        let host = container
            .get_host()
            .await
            .context("Failed to get MinIO host")?;
        let port = container
            .get_host_port_ipv4(9000.tcp())
            .await
            .context("Failed to get MinIO port")?;

        let endpoint = format!("http://{}:{}", host, port);
        debug!("MinIO endpoint: {}", endpoint);

        let minio = Self {
            container,
            endpoint,
        };
        minio.create_bucket(DEFAULT_TEST_BUCKET).await?;
        Ok(minio)
    }

    /// Object store configuration for this container
    pub fn aws_config(&self) -> AwsConfig {
        AwsConfig {
            bucket_name: DEFAULT_TEST_BUCKET.to_string(),
            region_name: "us-east-1".to_string(),
            aws_access_key_id: MINIO_ACCESS_KEY.into(),
            aws_secret_access_key: MINIO_SECRET_KEY.into(),
            s3_key_prefix: "incoming".to_string(),
            endpoint_url: Some(self.endpoint.clone()),
            force_path_style: true,
        }
    }

    /// Raw SDK client for assertions
    pub fn client(&self) -> aws_sdk_s3::Client {
        let config = aws_sdk_s3::Config::builder()
            .endpoint_url(&self.endpoint)
            .region(aws_sdk_s3::config::Region::new("us-east-1"))
            .credentials_provider(aws_credential_types::Credentials::new(
                MINIO_ACCESS_KEY,
                MINIO_SECRET_KEY,
                None,
                None,
                "static",
            ))
            .force_path_style(true)
            .build();
        aws_sdk_s3::Client::from_conf(config)
    }

    async fn create_bucket(&self, bucket: &str) -> Result<()> {
        info!("Creating test bucket: {}", bucket);
        self.client()
            .create_bucket()
            .bucket(bucket)
            .send()
            .await
            .context("Failed to create S3 bucket")?;
        Ok(())
    }

    pub async fn object_exists(&self, key: &str) -> bool {
        self.client()
            .head_object()
            .bucket(DEFAULT_TEST_BUCKET)
            .key(key)
            .send()
            .await
            .is_ok()
    }
}
