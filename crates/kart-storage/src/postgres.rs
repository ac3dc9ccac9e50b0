//! PostgreSQL storage implementation.

use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use sqlx::postgres::{PgPool, PgPoolCopyExt, PgPoolOptions};
use sqlx::Connection;
use tracing::{debug, instrument, warn};

use crate::error::{StorageError, StorageResult};
use crate::traits::{CouponClass, CouponCounts, CouponReader, IngestStore, StagingRow};

/// Default query timeout in seconds.
const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;

/// Transaction-local tuning applied before a partition merge.
///
/// `SET LOCAL` scopes every setting to the merge transaction, so pooled
/// connections go back to the pool with their defaults.
const AGGREGATION_TUNING: &str = "\
    SET LOCAL work_mem = '1GB';\
    SET LOCAL maintenance_work_mem = '2GB';\
    SET LOCAL temp_buffers = '1GB';\
    SET LOCAL synchronous_commit = OFF;\
    SET LOCAL enable_nestloop = OFF;\
    SET LOCAL random_page_cost = 1.1;";

const AGGREGATE_PARTITION_SQL: &str = r#"
    INSERT INTO coupons (code, file_sources, file_count)
    SELECT
        code,
        ARRAY_AGG(DISTINCT file_source ORDER BY file_source) AS file_sources,
        COUNT(DISTINCT file_source) AS file_count
    FROM coupon_staging
    WHERE partition_id = $1
    GROUP BY code
    ON CONFLICT (code) DO NOTHING
"#;

const COPY_STAGING_SQL: &str =
    "COPY coupon_staging (code, file_source, partition_id) FROM STDIN";

/// PostgreSQL configuration options.
#[derive(Clone)]
pub struct PostgresConfig {
    /// Database connection URL.
    pub database_url: String,
    /// Maximum number of connections in the pool.
    ///
    /// Must cover one connection per concurrent loader plus one per
    /// aggregation worker.
    pub max_connections: u32,
    /// Minimum number of connections in the pool.
    pub min_connections: u32,
    /// Connection timeout in seconds.
    pub connect_timeout_secs: u64,
    /// Timeout for validation-path queries in seconds.
    ///
    /// Ingestion statements are not bounded by this timeout since a single
    /// partition merge can legitimately run for minutes.
    pub query_timeout_secs: u64,
}

// Custom Debug implementation to hide credentials in database_url
impl std::fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("database_url", &"[REDACTED]")
            .field("max_connections", &self.max_connections)
            .field("min_connections", &self.min_connections)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("query_timeout_secs", &self.query_timeout_secs)
            .finish()
    }
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            database_url: "postgres://localhost/kart_db".to_string(),
            max_connections: 16,
            min_connections: 2,
            connect_timeout_secs: 30,
            query_timeout_secs: DEFAULT_QUERY_TIMEOUT_SECS,
        }
    }
}

/// PostgreSQL implementation of [`CouponReader`] and [`IngestStore`].
pub struct PostgresCouponStore {
    pool: PgPool,
    /// Timeout for validation-path queries.
    query_timeout: std::time::Duration,
}

/// Escapes a value for the PostgreSQL COPY text format.
fn escape_copy_value(value: &str, out: &mut String) {
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\t' => out.push_str("\\t"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            _ => out.push(ch),
        }
    }
}

/// Encodes staging rows as a COPY text-format payload.
fn encode_copy_rows(rows: &[StagingRow]) -> String {
    // code (<=10) + source + partition + separators
    let mut payload = String::with_capacity(rows.len() * 40);
    for row in rows {
        escape_copy_value(&row.code, &mut payload);
        payload.push('\t');
        escape_copy_value(&row.source_id, &mut payload);
        payload.push('\t');
        payload.push_str(&row.partition_id.to_string());
        payload.push('\n');
    }
    payload
}

/// SQL predicate selecting one coupon class.
fn class_query(class: CouponClass) -> &'static str {
    match class {
        CouponClass::Invalid => "SELECT code FROM coupons WHERE file_count = 1",
        CouponClass::Valid => "SELECT code FROM coupons WHERE file_count >= 2",
    }
}

fn query_error(context: &str) -> impl Fn(sqlx::Error) -> StorageError + '_ {
    move |e| StorageError::QueryError {
        message: format!("{context}: {e}"),
    }
}

impl PostgresCouponStore {
    /// Creates a new store from a connection pool with the default timeout.
    pub fn new(pool: PgPool) -> Self {
        Self::with_timeout(
            pool,
            std::time::Duration::from_secs(DEFAULT_QUERY_TIMEOUT_SECS),
        )
    }

    /// Creates a new store from a connection pool with a custom query timeout.
    pub fn with_timeout(pool: PgPool, query_timeout: std::time::Duration) -> Self {
        Self {
            pool,
            query_timeout,
        }
    }

    /// Creates a new store with the given configuration.
    #[instrument(skip(config))]
    pub async fn from_config(config: &PostgresConfig) -> StorageResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.database_url)
            .await
            .map_err(|e| StorageError::ConnectionError {
                message: e.to_string(),
            })?;

        Ok(Self::with_timeout(
            pool,
            std::time::Duration::from_secs(config.query_timeout_secs),
        ))
    }

    /// Creates a new store from a database URL.
    pub async fn from_url(database_url: &str) -> StorageResult<Self> {
        let config = PostgresConfig {
            database_url: database_url.to_string(),
            ..Default::default()
        };
        Self::from_config(&config).await
    }

    /// Wraps an async operation with a timeout and records metrics.
    ///
    /// # Metrics
    /// - `kart_storage_query_duration_seconds` - Histogram of query durations
    /// - `kart_storage_query_timeout_total` - Counter of timeout events
    async fn execute_with_timeout<T, F>(&self, operation: &str, future: F) -> StorageResult<T>
    where
        F: std::future::Future<Output = StorageResult<T>>,
    {
        let start = std::time::Instant::now();
        let result = tokio::time::timeout(self.query_timeout, future).await;

        let (status, final_result) = match result {
            Ok(Ok(value)) => ("success", Ok(value)),
            Ok(Err(e)) => ("error", Err(e)),
            Err(_elapsed) => (
                "timeout",
                Err(StorageError::QueryTimeout {
                    operation: operation.to_string(),
                    timeout: self.query_timeout,
                }),
            ),
        };

        record_query(operation, status, start.elapsed().as_secs_f64());
        if status == "timeout" {
            metrics::counter!(
                "kart_storage_query_timeout_total",
                "operation" => operation.to_string(),
                "backend" => "postgres"
            )
            .increment(1);
        }

        final_result
    }

    /// Runs an unbounded ingestion statement and records its duration.
    async fn execute_measured<T, F>(&self, operation: &str, future: F) -> StorageResult<T>
    where
        F: std::future::Future<Output = StorageResult<T>>,
    {
        let start = std::time::Instant::now();
        let result = future.await;
        let status = if result.is_ok() { "success" } else { "error" };
        record_query(operation, status, start.elapsed().as_secs_f64());
        result
    }

    /// Runs database migrations to create the coupon table.
    #[instrument(skip(self))]
    pub async fn run_migrations(&self) -> StorageResult<()> {
        debug!("Running database migrations");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS coupons (
                code VARCHAR(10) PRIMARY KEY,
                file_sources TEXT[] NOT NULL,
                file_count INT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(query_error("Failed to create coupons table"))?;

        // Supports the per-class counts and the filter build scan.
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_coupons_file_count ON coupons(file_count)")
            .execute(&self.pool)
            .await
            .map_err(query_error("Failed to create coupons index"))?;

        debug!("Database migrations completed successfully");
        Ok(())
    }

    /// Returns the connection pool for testing or advanced usage.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn record_query(operation: &str, status: &'static str, seconds: f64) {
    metrics::histogram!(
        "kart_storage_query_duration_seconds",
        "operation" => operation.to_string(),
        "backend" => "postgres",
        "status" => status
    )
    .record(seconds);
}

#[async_trait]
impl CouponReader for PostgresCouponStore {
    #[instrument(skip(self))]
    async fn coupon_counts(&self) -> StorageResult<CouponCounts> {
        // Full-table scan, so it is not bound by the per-lookup timeout.
        let (invalid, valid): (i64, i64) = self
            .execute_measured("coupon_counts", async {
                sqlx::query_as(
                    r#"
                    SELECT
                        COUNT(*) FILTER (WHERE file_count = 1) AS invalid_count,
                        COUNT(*) FILTER (WHERE file_count >= 2) AS valid_count
                    FROM coupons
                    "#,
                )
                .fetch_one(&self.pool)
                .await
                .map_err(query_error("Failed to count coupons"))
            })
            .await?;

        Ok(CouponCounts {
            invalid: invalid.max(0) as u64,
            valid: valid.max(0) as u64,
        })
    }

    fn stream_codes(&self, class: CouponClass) -> BoxStream<'_, StorageResult<String>> {
        sqlx::query_scalar::<_, String>(class_query(class))
            .fetch(&self.pool)
            .map(|row| row.map_err(query_error("Failed to read coupon code")))
            .boxed()
    }

    async fn ping(&self) -> StorageResult<()> {
        self.execute_with_timeout("ping", async {
            sqlx::query("SELECT 1")
                .execute(&self.pool)
                .await
                .map_err(query_error("Failed to ping database"))
        })
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn source_count(&self, code: &str) -> StorageResult<Option<u32>> {
        let code_owned = code.to_string();
        let count: Option<i32> = self
            .execute_with_timeout("source_count", async {
                sqlx::query_scalar("SELECT file_count FROM coupons WHERE code = $1")
                    .bind(&code_owned)
                    .fetch_optional(&self.pool)
                    .await
                    .map_err(query_error("Failed to get coupon file count"))
            })
            .await?;

        Ok(count.map(|c| c.max(0) as u32))
    }
}

#[async_trait]
impl IngestStore for PostgresCouponStore {
    #[instrument(skip(self))]
    async fn coupon_total(&self) -> StorageResult<u64> {
        let total: i64 = self
            .execute_measured("coupon_total", async {
                sqlx::query_scalar("SELECT COUNT(*) FROM coupons")
                    .fetch_one(&self.pool)
                    .await
                    .map_err(query_error("Failed to count coupons"))
            })
            .await?;
        Ok(total.max(0) as u64)
    }

    #[instrument(skip(self))]
    async fn truncate_coupons(&self) -> StorageResult<()> {
        self.execute_measured("truncate_coupons", async {
            sqlx::query("TRUNCATE TABLE coupons")
                .execute(&self.pool)
                .await
                .map_err(query_error("Failed to truncate coupons"))
        })
        .await?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn create_staging(&self) -> StorageResult<()> {
        self.drop_staging().await?;

        sqlx::query(
            r#"
            CREATE UNLOGGED TABLE coupon_staging (
                code         VARCHAR(10) NOT NULL,
                file_source  TEXT NOT NULL,
                partition_id INT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(query_error("Failed to create staging table"))?;

        sqlx::query("CREATE INDEX idx_staging_partition ON coupon_staging(partition_id)")
            .execute(&self.pool)
            .await
            .map_err(query_error("Failed to create staging index"))?;

        Ok(())
    }

    async fn copy_staging_rows(&self, rows: &[StagingRow]) -> StorageResult<u64> {
        if rows.is_empty() {
            return Ok(0);
        }
        let payload = encode_copy_rows(rows);

        self.execute_measured("copy_staging_rows", async {
            let copy_error = |e: sqlx::Error| StorageError::CopyError {
                message: e.to_string(),
            };
            let mut copy = self
                .pool
                .copy_in_raw(COPY_STAGING_SQL)
                .await
                .map_err(copy_error)?;
            if let Err(e) = copy.send(payload.as_bytes()).await {
                // Abort so the server discards the partial copy.
                let _ = copy.abort(e.to_string()).await;
                return Err(copy_error(e));
            }
            copy.finish().await.map_err(copy_error)
        })
        .await
    }

    #[instrument(skip(self))]
    async fn aggregate_partition(&self, partition_id: u32) -> StorageResult<u64> {
        self.execute_measured("aggregate_partition", async {
            let mut tx = self
                .pool
                .begin()
                .await
                .map_err(|e| StorageError::TransactionError {
                    message: format!("Failed to begin transaction: {e}"),
                })?;

            // Tuning runs in a savepoint so a rejected setting does not
            // poison the merge transaction.
            let mut savepoint =
                Connection::begin(&mut *tx)
                    .await
                    .map_err(|e| StorageError::TransactionError {
                        message: format!("Failed to open tuning savepoint: {e}"),
                    })?;
            match sqlx::Executor::execute(&mut *savepoint, sqlx::raw_sql(AGGREGATION_TUNING))
                .await
            {
                Ok(_) => {
                    savepoint
                        .commit()
                        .await
                        .map_err(|e| StorageError::TransactionError {
                            message: format!("Failed to release tuning savepoint: {e}"),
                        })?;
                }
                Err(e) => {
                    warn!(partition_id, error = %e, "Failed to apply aggregation tuning");
                    savepoint
                        .rollback()
                        .await
                        .map_err(|e| StorageError::TransactionError {
                            message: format!("Failed to roll back tuning savepoint: {e}"),
                        })?;
                }
            }

            let result = sqlx::query(AGGREGATE_PARTITION_SQL)
                .bind(partition_id as i32)
                .execute(&mut *tx)
                .await
                .map_err(query_error("Failed to aggregate partition"))?;

            tx.commit()
                .await
                .map_err(|e| StorageError::TransactionError {
                    message: format!("Failed to commit transaction: {e}"),
                })?;

            Ok(result.rows_affected())
        })
        .await
    }

    #[instrument(skip(self))]
    async fn drop_staging(&self) -> StorageResult<()> {
        sqlx::query("DROP TABLE IF EXISTS coupon_staging")
            .execute(&self.pool)
            .await
            .map_err(query_error("Failed to drop staging table"))?;
        Ok(())
    }

    #[instrument(skip(self))]
    async fn set_table_maintenance(&self, enabled: bool) -> StorageResult<()> {
        let statements: &[&str] = if enabled {
            &["ALTER TABLE coupons SET (autovacuum_enabled = true)"]
        } else {
            &[
                "ALTER TABLE coupon_staging SET (autovacuum_enabled = false)",
                "ALTER TABLE coupons SET (autovacuum_enabled = false)",
            ]
        };
        for statement in statements {
            sqlx::query(*statement)
                .execute(&self.pool)
                .await
                .map_err(query_error("Failed to toggle autovacuum"))?;
        }
        Ok(())
    }
}

impl std::fmt::Debug for PostgresCouponStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresCouponStore")
            .field("pool", &"PgPool")
            .field("query_timeout", &self.query_timeout)
            .finish()
    }
}
