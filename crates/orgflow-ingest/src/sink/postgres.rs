//! PostgreSQL sink
//!
//! Each `PgSink` holds a single-connection pool. The connection is opened lazily on
//! first use and released by [`RelationalSink::close`]. Connection parameters are
//! passed as a structured descriptor, never as a URL string, so credentials cannot
//! leak through a logged connection string.

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use sqlx::{PgConnection, Postgres, QueryBuilder};
use std::time::Duration;
use tracing::{debug, info, instrument};

use super::{RelationalSink, TablePolicy, TableSpec};
use crate::config::DatabaseConfig;
use crate::error::{PipelineError, Result};
use crate::transform::FlatRow;

pub struct PgSink {
    pool: PgPool,
    policy: TablePolicy,
    batch_size: usize,
}

impl PgSink {
    /// Build a sink from configuration. No connection is opened yet.
    pub fn new(config: &DatabaseConfig) -> Result<Self> {
        config.validate()?;

        let options = PgConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.user)
            .password(config.password.expose())
            .database(&config.database);

        debug!(
            host = %config.host,
            port = config.port,
            database = %config.database,
            user = %config.user,
            "Database sink configured"
        );

        Ok(Self::from_options(
            options,
            config.table_policy,
            config.batch_size,
            Duration::from_secs(config.connect_timeout_secs),
        ))
    }

    pub fn from_options(
        options: PgConnectOptions,
        policy: TablePolicy,
        batch_size: usize,
        connect_timeout: Duration,
    ) -> Self {
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .min_connections(0)
            .acquire_timeout(connect_timeout)
            .connect_lazy_with(options);

        Self {
            pool,
            policy,
            batch_size: batch_size.max(1),
        }
    }

    pub fn policy(&self) -> TablePolicy {
        self.policy
    }
}

async fn prepare_table(
    conn: &mut PgConnection,
    table: &TableSpec,
    policy: TablePolicy,
) -> std::result::Result<(), sqlx::Error> {
    // CREATE SCHEMA needs CREATE on the database even with IF NOT EXISTS, so only
    // issue it when the schema is missing
    let schema_exists: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM pg_namespace WHERE nspname = $1)")
            .bind(table.schema())
            .fetch_one(&mut *conn)
            .await?;
    if !schema_exists {
        let create_schema = format!("CREATE SCHEMA \"{}\"", table.schema());
        sqlx::query(&create_schema).execute(&mut *conn).await?;
    }

    if policy == TablePolicy::Destructive {
        let drop = format!("DROP TABLE IF EXISTS {}", table.quoted());
        sqlx::query(&drop).execute(&mut *conn).await?;
    }

    let create = format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        table.quoted(),
        table.column_definitions()
    );
    sqlx::query(&create).execute(&mut *conn).await?;

    Ok(())
}

async fn insert_rows(
    conn: &mut PgConnection,
    table: &TableSpec,
    rows: &[FlatRow],
    batch_size: usize,
) -> std::result::Result<u64, sqlx::Error> {
    let mut inserted = 0;

    for (batch, chunk) in rows.chunks(batch_size).enumerate() {
        let mut query_builder: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "INSERT INTO {} ({}) ",
            table.quoted(),
            table.column_list()
        ));

        query_builder.push_values(chunk, |mut b, row| {
            for value in row.values() {
                b.push_bind(value);
            }
        });

        let affected = query_builder.build().execute(&mut *conn).await?.rows_affected();
        inserted += affected;
        debug!(batch, rows = affected, "Inserted batch");
    }

    Ok(inserted)
}

#[async_trait]
impl RelationalSink for PgSink {
    #[instrument(skip(self), fields(table = %table, policy = %self.policy))]
    async fn ensure_table(&self, table: &TableSpec) -> Result<()> {
        let load_err = |e: sqlx::Error| PipelineError::load(table.to_string(), e);

        let mut conn = self.pool.acquire().await.map_err(load_err)?;
        prepare_table(&mut conn, table, self.policy)
            .await
            .map_err(load_err)
    }

    #[instrument(skip(self, rows), fields(table = %table, rows = rows.len()))]
    async fn append(&self, table: &TableSpec, rows: &[FlatRow]) -> Result<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let load_err = |e: sqlx::Error| PipelineError::load(table.to_string(), e);

        let mut tx = self.pool.begin().await.map_err(load_err)?;
        let inserted = insert_rows(&mut tx, table, rows, self.batch_size)
            .await
            .map_err(load_err)?;
        tx.commit().await.map_err(load_err)?;

        Ok(inserted)
    }

    #[instrument(skip(self, rows), fields(table = %table, policy = %self.policy, rows = rows.len()))]
    async fn load(&self, table: &TableSpec, rows: &[FlatRow]) -> Result<u64> {
        let load_err = |e: sqlx::Error| PipelineError::load(table.to_string(), e);

        let mut tx = self.pool.begin().await.map_err(load_err)?;

        prepare_table(&mut tx, table, self.policy)
            .await
            .map_err(load_err)?;
        let inserted = insert_rows(&mut tx, table, rows, self.batch_size)
            .await
            .map_err(load_err)?;

        tx.commit().await.map_err(load_err)?;

        info!(inserted, "Loaded rows into {}", table);
        Ok(inserted)
    }

    async fn row_count(&self, table: &TableSpec) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.quoted());
        sqlx::query_scalar::<_, i64>(&sql)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| PipelineError::load(table.to_string(), e))
    }

    async fn close(&self) {
        if !self.pool.is_closed() {
            self.pool.close().await;
            debug!("Database connection released");
        }
    }
}
