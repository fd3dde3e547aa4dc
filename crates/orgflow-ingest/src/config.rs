//! Pipeline configuration
//!
//! One [`PipelineConfig`] value is loaded at startup and handed by reference to each
//! component constructor. Sources, lowest precedence first:
//!
//! 1. the configuration file (`.ini` or `.toml`, picked by extension)
//! 2. environment variables prefixed `ORGFLOW__`, with `__` between section and key
//!    (`ORGFLOW__DATABASE__HOST=db.internal`)
//!
//! ```ini
//! [local]
//! json_file_path = data_uploads/json_files/data.json
//!
//! [aws]
//! bucket_name = org-ingest
//! region_name = eu-west-1
//! s3_key_prefix = incoming
//!
//! [database]
//! host = localhost
//! user = loader
//! password = secret
//! database = company
//! ```

use crate::error::{PipelineError, Result};
use crate::sink::{is_valid_identifier, TablePolicy};
use crate::transform::FlatRow;
use orgflow_common::Secret;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "ORGFLOW";

/// Separator between section and key in environment overrides
pub const ENV_SEPARATOR: &str = "__";

/// Default handoff state directory.
pub const DEFAULT_STATE_DIR: &str = "./.orgflow/state";

/// Default AWS region when none is configured.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default PostgreSQL port.
pub const DEFAULT_DATABASE_PORT: u16 = 5432;

/// Default destination schema.
pub const DEFAULT_SCHEMA: &str = "public";

/// Default destination table.
pub const DEFAULT_TABLE: &str = "employee_details";

/// Default number of rows bound per INSERT statement.
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Default database connect timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Postgres accepts at most this many bind parameters in one statement.
pub const MAX_BIND_PARAMETERS: usize = 65_535;

/// Complete pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub local: LocalConfig,
    #[serde(default)]
    pub aws: AwsConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// Local filesystem settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalConfig {
    /// The JSON source document
    pub json_file_path: PathBuf,
    /// When set, the source is moved here after a successful run
    #[serde(default)]
    pub archive_dir: Option<PathBuf>,
    /// Where the file-backed handoff channel keeps per-run entries
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
}

/// Object store settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AwsConfig {
    #[serde(default)]
    pub bucket_name: String,
    #[serde(default = "default_region")]
    pub region_name: String,
    /// Empty means "use the default AWS credential chain"
    #[serde(default)]
    pub aws_access_key_id: Secret,
    #[serde(default)]
    pub aws_secret_access_key: Secret,
    #[serde(default)]
    pub s3_key_prefix: String,
    /// Custom endpoint for S3-compatible stores (MinIO, LocalStack)
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub force_path_style: bool,
}

/// Relational database settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub password: Secret,
    #[serde(default)]
    pub database: String,
    #[serde(default = "default_db_type")]
    pub db_type: String,
    #[serde(default = "default_schema")]
    pub schema: String,
    #[serde(default = "default_table")]
    pub table: String,
    #[serde(default)]
    pub table_policy: TablePolicy,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from(DEFAULT_STATE_DIR)
}

fn default_region() -> String {
    DEFAULT_REGION.to_string()
}

fn default_port() -> u16 {
    DEFAULT_DATABASE_PORT
}

fn default_db_type() -> String {
    "postgresql".to_string()
}

fn default_schema() -> String {
    DEFAULT_SCHEMA.to_string()
}

fn default_table() -> String {
    DEFAULT_TABLE.to_string()
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

impl Default for AwsConfig {
    fn default() -> Self {
        Self {
            bucket_name: String::new(),
            region_name: default_region(),
            aws_access_key_id: Secret::default(),
            aws_secret_access_key: Secret::default(),
            s3_key_prefix: String::new(),
            endpoint_url: None,
            force_path_style: false,
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: default_port(),
            user: String::new(),
            password: Secret::default(),
            database: String::new(),
            db_type: default_db_type(),
            schema: default_schema(),
            table: default_table(),
            table_policy: TablePolicy::default(),
            batch_size: default_batch_size(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl PipelineConfig {
    /// Load from a configuration file, then apply environment overrides.
    ///
    /// A `.env` file in the working directory is read first if present.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        dotenvy::dotenv().ok();

        let path = path.as_ref();
        if !path.exists() {
            return Err(PipelineError::config(format!(
                "Config file not found at: {}",
                path.display()
            )));
        }

        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(Self::environment())
            .build()?;

        let config: PipelineConfig = settings.try_deserialize()?;
        tracing::debug!(path = %path.display(), ?config, "Loaded pipeline configuration");
        Ok(config)
    }

    /// Parse configuration text in the given format, with environment overrides
    pub fn from_str_with_format(contents: &str, format: config::FileFormat) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from_str(contents, format))
            .add_source(Self::environment())
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    fn environment() -> config::Environment {
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator(ENV_SEPARATOR)
            .separator(ENV_SEPARATOR)
    }

    /// Validate every section
    pub fn validate(&self) -> Result<()> {
        self.local.validate()?;
        self.aws.validate()?;
        self.database.validate()
    }
}

impl LocalConfig {
    pub fn validate(&self) -> Result<()> {
        if self.json_file_path.as_os_str().is_empty() {
            return Err(PipelineError::config("local.json_file_path cannot be empty"));
        }
        if self.state_dir.as_os_str().is_empty() {
            return Err(PipelineError::config("local.state_dir cannot be empty"));
        }
        Ok(())
    }
}

impl AwsConfig {
    pub fn validate(&self) -> Result<()> {
        if self.bucket_name.trim().is_empty() {
            return Err(PipelineError::config("aws.bucket_name cannot be empty"));
        }
        if self.region_name.trim().is_empty() {
            return Err(PipelineError::config("aws.region_name cannot be empty"));
        }
        // Static credentials come as a pair or not at all
        if self.aws_access_key_id.is_empty() != self.aws_secret_access_key.is_empty() {
            return Err(PipelineError::config(
                "aws.aws_access_key_id and aws.aws_secret_access_key must be set together",
            ));
        }
        Ok(())
    }

    pub fn has_static_credentials(&self) -> bool {
        !self.aws_access_key_id.is_empty()
    }
}

impl DatabaseConfig {
    pub fn validate(&self) -> Result<()> {
        match self.db_type.to_lowercase().as_str() {
            "postgresql" | "postgres" => {},
            other => {
                return Err(PipelineError::config(format!(
                    "Unsupported database.db_type '{}': only postgresql is supported",
                    other
                )))
            },
        }

        for (name, value) in [
            ("database.host", &self.host),
            ("database.user", &self.user),
            ("database.database", &self.database),
        ] {
            if value.trim().is_empty() {
                return Err(PipelineError::config(format!("{} cannot be empty", name)));
            }
        }

        if self.port == 0 {
            return Err(PipelineError::config("database.port must be greater than 0"));
        }

        if !is_valid_identifier(&self.schema) {
            return Err(PipelineError::config(format!(
                "database.schema '{}' is not a valid SQL identifier",
                self.schema
            )));
        }
        if !is_valid_identifier(&self.table) {
            return Err(PipelineError::config(format!(
                "database.table '{}' is not a valid SQL identifier",
                self.table
            )));
        }

        let max_batch = MAX_BIND_PARAMETERS / FlatRow::COLUMNS.len();
        if self.batch_size == 0 || self.batch_size > max_batch {
            return Err(PipelineError::config(format!(
                "database.batch_size must be between 1 and {} (got {})",
                max_batch, self.batch_size
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use config::FileFormat;
    use serial_test::serial;

    const FULL_INI: &str = r#"
[local]
json_file_path = data_uploads/json_files/data.json
archive_dir = data_uploads/archive

[aws]
bucket_name = org-ingest
region_name = eu-west-1
aws_access_key_id = AKIAEXAMPLE
aws_secret_access_key = very-secret
s3_key_prefix = incoming

[database]
host = db.internal
port = 6543
user = loader
password = 007
database = company
db_type = postgresql
schema = staging
table_policy = additive
"#;

    #[test]
    #[serial]
    fn test_parse_ini() {
        let config = PipelineConfig::from_str_with_format(FULL_INI, FileFormat::Ini).unwrap();

        assert_eq!(
            config.local.json_file_path,
            PathBuf::from("data_uploads/json_files/data.json")
        );
        assert_eq!(config.local.archive_dir, Some(PathBuf::from("data_uploads/archive")));
        assert_eq!(config.local.state_dir, PathBuf::from(DEFAULT_STATE_DIR));
        assert_eq!(config.aws.bucket_name, "org-ingest");
        assert_eq!(config.aws.s3_key_prefix, "incoming");
        assert_eq!(config.aws.aws_secret_access_key.expose(), "very-secret");
        assert_eq!(config.database.port, 6543);
        assert_eq!(config.database.password.expose(), "007");
        assert_eq!(config.database.schema, "staging");
        assert_eq!(config.database.table, DEFAULT_TABLE);
        assert_eq!(config.database.table_policy, TablePolicy::Additive);
        assert_eq!(config.database.batch_size, DEFAULT_BATCH_SIZE);
        config.validate().unwrap();
    }

    #[test]
    #[serial]
    fn test_debug_output_redacts_credentials() {
        let config = PipelineConfig::from_str_with_format(FULL_INI, FileFormat::Ini).unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("very-secret"));
        assert!(!rendered.contains("AKIAEXAMPLE"));
    }

    #[test]
    #[serial]
    fn test_minimal_toml_uses_defaults() {
        let toml = r#"
[local]
json_file_path = "/tmp/data.json"
"#;
        let config = PipelineConfig::from_str_with_format(toml, FileFormat::Toml).unwrap();
        assert_eq!(config.aws.region_name, DEFAULT_REGION);
        assert_eq!(config.database.port, DEFAULT_DATABASE_PORT);
        assert_eq!(config.database.table_policy, TablePolicy::Destructive);
        config.local.validate().unwrap();
        assert!(config.aws.validate().is_err());
        assert!(config.database.validate().is_err());
    }

    #[test]
    #[serial]
    fn test_environment_overrides_file() {
        std::env::set_var("ORGFLOW__DATABASE__HOST", "override.internal");
        std::env::set_var("ORGFLOW__AWS__S3_KEY_PREFIX", "from-env");

        let config = PipelineConfig::from_str_with_format(FULL_INI, FileFormat::Ini).unwrap();
        assert_eq!(config.database.host, "override.internal");
        assert_eq!(config.aws.s3_key_prefix, "from-env");

        std::env::remove_var("ORGFLOW__DATABASE__HOST");
        std::env::remove_var("ORGFLOW__AWS__S3_KEY_PREFIX");
    }

    #[test]
    #[serial]
    fn test_load_missing_file() {
        let err = PipelineConfig::load("/nonexistent/config.ini").unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
    }

    #[test]
    #[serial]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.ini");
        std::fs::write(&path, FULL_INI).unwrap();

        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.aws.region_name, "eu-west-1");
    }

    #[test]
    fn test_database_validation() {
        let mut db = DatabaseConfig {
            host: "localhost".to_string(),
            user: "loader".to_string(),
            database: "company".to_string(),
            ..Default::default()
        };
        db.validate().unwrap();

        db.db_type = "mysql".to_string();
        assert!(db.validate().is_err());
        db.db_type = "postgres".to_string();

        db.table = "employee_details; DROP TABLE x".to_string();
        assert!(db.validate().is_err());
        db.table = DEFAULT_TABLE.to_string();

        db.batch_size = 0;
        assert!(db.validate().is_err());
        db.batch_size = MAX_BIND_PARAMETERS;
        assert!(db.validate().is_err());
        db.batch_size = 8191;
        db.validate().unwrap();
    }

    #[test]
    fn test_aws_credentials_must_be_paired() {
        let mut aws = AwsConfig {
            bucket_name: "bucket".to_string(),
            ..Default::default()
        };
        aws.validate().unwrap();
        assert!(!aws.has_static_credentials());

        aws.aws_access_key_id = "AKIA".into();
        assert!(aws.validate().is_err());

        aws.aws_secret_access_key = "secret".into();
        aws.validate().unwrap();
        assert!(aws.has_static_credentials());
    }
}
