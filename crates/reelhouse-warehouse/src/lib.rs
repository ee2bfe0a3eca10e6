//! # Reelhouse Warehouse
//!
//! DuckDB-based storage and transformation layer for the reelhouse ratings
//! pipeline.
//!
//! ## Overview
//!
//! This crate owns every table of the pipeline and the SQL that moves data
//! between them:
//!
//! - **Staging**: raw CSV rows loaded verbatim into `stg_movies` / `stg_ratings`
//! - **Cleaning**: deduplicated, filtered `stg_*_clean` tables
//! - **Quality gate**: invariants between raw and cleaned tables
//! - **Star schema**: dimensions, bridge and fact tables with surrogate keys
//! - **Reports**: fixed aggregate queries exported as CSV
//!
//! Every stage that writes replaces its tables inside one transaction through a
//! [`RebuildPlan`], so a failed stage never leaves half-built tables behind.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use reelhouse_warehouse::{clean, quality, star, Warehouse, WarehouseConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let warehouse = Warehouse::open(WarehouseConfig::default())?;
//!
//!     clean::clean_staging(&warehouse)?;
//!     quality::run_quality_gate(&warehouse)?.ensure_passed()?;
//!     let report = star::build_star_schema(&warehouse)?;
//!
//!     println!("built {} tables", report.tables.len());
//!     Ok(())
//! }
//! ```
//!
//! ## Tables
//!
//! | Table | Owner | Description |
//! |-------|-------|-------------|
//! | `stg_movies`, `stg_ratings` | staging | Raw CSV rows |
//! | `stg_movies_clean`, `stg_ratings_clean` | clean | Filtered, deduplicated rows |
//! | `dim_movies`, `dim_genres` | star | Dimensions with dense surrogate keys |
//! | `bridge_movie_genres` | star | Movie/genre many-to-many edges |
//! | `fact_ratings` | star | One row per rating of a known movie |
//! | `etl_run_log` | migrations | Stage outcomes per pipeline run |
//!
//! ## Views
//!
//! | View | Description |
//! |------|-------------|
//! | `vw_movie_ratings` | Average rating and rating count per title |
//! | `vw_genre_ratings` | Rating count per genre |

pub mod clean;
pub mod duckdb;
pub mod migrations;
pub mod models;
pub mod quality;
pub mod reports;
pub mod staging;
pub mod star;
pub mod views;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use ::duckdb::types::{TimeUnit, Value as DuckValue};
use ::duckdb::{params, Connection, ToSql};
use serde::Serialize;
use serde_json::{Number, Value};
use thiserror::Error;
use time::macros::format_description;
use time::OffsetDateTime;

pub use duckdb::{DuckDbConnectionManager, PooledConnection, IN_MEMORY};
pub use models::{
    BridgeMovieGenre, CleanMovie, CleanRating, DimGenre, DimMovie, FactRating, RawMovie, RawRating,
    StageRunRecord,
};
pub use quality::{QualityReport, ValidationError};

/// Names of the tables and views managed by this crate.
pub mod tables {
    pub const STG_MOVIES: &str = "stg_movies";
    pub const STG_RATINGS: &str = "stg_ratings";
    pub const STG_MOVIES_CLEAN: &str = "stg_movies_clean";
    pub const STG_RATINGS_CLEAN: &str = "stg_ratings_clean";
    pub const DIM_MOVIES: &str = "dim_movies";
    pub const DIM_GENRES: &str = "dim_genres";
    pub const BRIDGE_MOVIE_GENRES: &str = "bridge_movie_genres";
    pub const FACT_RATINGS: &str = "fact_ratings";
    pub const VW_MOVIE_RATINGS: &str = "vw_movie_ratings";
    pub const VW_GENRE_RATINGS: &str = "vw_genre_ratings";
    pub const ETL_RUN_LOG: &str = "etl_run_log";
}

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    /// I/O error (file system operations).
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Query was rejected due to policy violation.
    #[error("query rejected: {0}")]
    QueryRejected(String),

    /// Query execution timed out.
    #[error("query timed out after {timeout_ms}ms")]
    QueryTimeout { timeout_ms: u64 },

    /// A table or view an operation depends on does not exist.
    #[error("required relation '{relation}' does not exist")]
    MissingRelation { relation: String },

    /// A source file an operation reads from does not exist.
    #[error("source file not found: {}", path.display())]
    MissingSource { path: PathBuf },

    /// Rows reference keys that do not exist in their dimension.
    #[error("{orphan_rows} rows in '{relation}' reference missing dimension keys")]
    IntegrityViolation { relation: String, orphan_rows: i64 },

    /// A connection pool lock was poisoned by a panicking holder.
    #[error("duckdb connection pool lock poisoned")]
    PoolPoisoned,
}

/// Configuration for the warehouse database.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Root directory for reelhouse data.
    pub reelhouse_home: PathBuf,
    /// Path to the `DuckDB` database file, or [`IN_MEMORY`].
    pub db_path: PathBuf,
    /// Maximum number of idle connections kept in the pool.
    pub max_pool_size: usize,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        Self::for_home(resolve_reelhouse_home())
    }
}

impl WarehouseConfig {
    /// Configuration rooted at `reelhouse_home`.
    ///
    /// `REELHOUSE_DB_PATH` overrides the database location when set.
    pub fn for_home(reelhouse_home: impl Into<PathBuf>) -> Self {
        let reelhouse_home = reelhouse_home.into();
        let db_path = env::var_os("REELHOUSE_DB_PATH")
            .map(PathBuf::from)
            .filter(|path| !path.as_os_str().is_empty())
            .unwrap_or_else(|| reelhouse_home.join("warehouse.duckdb"));
        Self {
            reelhouse_home,
            db_path,
            max_pool_size: 4,
        }
    }

    /// Configuration for a throwaway in-memory database.
    pub fn in_memory() -> Self {
        Self {
            reelhouse_home: PathBuf::from("."),
            db_path: PathBuf::from(IN_MEMORY),
            max_pool_size: 2,
        }
    }
}

/// Guardrails for query execution to prevent resource exhaustion.
#[derive(Debug, Clone, Copy)]
pub struct QueryGuardrails {
    /// Maximum number of rows to return.
    pub max_rows: usize,
    /// Query timeout in milliseconds.
    pub query_timeout_ms: u64,
}

impl Default for QueryGuardrails {
    fn default() -> Self {
        Self {
            max_rows: 10_000,
            query_timeout_ms: 5_000,
        }
    }
}

impl QueryGuardrails {
    /// Convert to Duration for timeout enforcement.
    fn timeout(self) -> Duration {
        Duration::from_millis(self.query_timeout_ms.max(1))
    }

    /// Validate that guardrails are within acceptable bounds.
    fn validate(self) -> Result<(), WarehouseError> {
        if self.max_rows == 0 {
            return Err(WarehouseError::QueryRejected(String::from(
                "--max-rows must be greater than zero",
            )));
        }
        if self.query_timeout_ms == 0 {
            return Err(WarehouseError::QueryRejected(String::from(
                "--query-timeout-ms must be greater than zero",
            )));
        }
        Ok(())
    }
}

/// Column metadata for query results.
#[derive(Debug, Clone, Serialize)]
pub struct SqlColumn {
    /// Column name.
    pub name: String,
    /// Column data type.
    #[serde(rename = "type")]
    pub r#type: String,
}

/// Result of a SQL query execution.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResult {
    /// Column definitions.
    pub columns: Vec<SqlColumn>,
    /// Row data as JSON values.
    pub rows: Vec<Vec<Value>>,
    /// Number of rows returned.
    pub row_count: usize,
    /// Whether results were truncated due to max_rows limit.
    pub truncated: bool,
}

/// A table or view that a rebuild drops before recreating it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Relation {
    Table(&'static str),
    View(&'static str),
}

impl Relation {
    pub fn name(self) -> &'static str {
        match self {
            Self::Table(name) | Self::View(name) => name,
        }
    }

    fn drop_sql(self) -> String {
        match self {
            Self::Table(name) => format!("DROP TABLE IF EXISTS {name}"),
            Self::View(name) => format!("DROP VIEW IF EXISTS {name}"),
        }
    }
}

/// One statement batch inside a [`RebuildPlan`].
#[derive(Debug, Clone)]
pub struct RebuildStep {
    /// Short name used in logs.
    pub name: &'static str,
    /// SQL executed as a batch.
    pub sql: String,
    /// Table whose row count is reported once the step has run.
    pub counts: Option<&'static str>,
}

/// An idempotent, all-or-nothing replacement of a group of relations.
///
/// Drops run first, in order, followed by the steps. Everything executes in a
/// single transaction on one connection.
#[derive(Debug, Clone)]
pub struct RebuildPlan {
    label: &'static str,
    drops: Vec<Relation>,
    steps: Vec<RebuildStep>,
}

impl RebuildPlan {
    pub fn new(label: &'static str) -> Self {
        Self {
            label,
            drops: Vec::new(),
            steps: Vec::new(),
        }
    }

    pub fn drop_relation(mut self, relation: Relation) -> Self {
        self.drops.push(relation);
        self
    }

    /// Add a step that creates or fills `table` and report its row count.
    pub fn step(mut self, name: &'static str, table: &'static str, sql: impl Into<String>) -> Self {
        self.steps.push(RebuildStep {
            name,
            sql: sql.into(),
            counts: Some(table),
        });
        self
    }

    /// Add a step with no row count of its own (indexes, views).
    pub fn step_uncounted(mut self, name: &'static str, sql: impl Into<String>) -> Self {
        self.steps.push(RebuildStep {
            name,
            sql: sql.into(),
            counts: None,
        });
        self
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn drops(&self) -> &[Relation] {
        &self.drops
    }

    pub fn steps(&self) -> &[RebuildStep] {
        &self.steps
    }
}

/// Row count of one table after a rebuild step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TableCount {
    pub table: String,
    pub rows: i64,
}

/// The main warehouse interface.
#[derive(Clone)]
pub struct Warehouse {
    manager: DuckDbConnectionManager,
}

impl Warehouse {
    /// Open a throwaway in-memory warehouse.
    pub fn open_in_memory() -> Result<Self, WarehouseError> {
        Self::open(WarehouseConfig::in_memory())
    }

    /// Open a warehouse with the specified configuration.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if config.db_path.as_os_str() != IN_MEMORY {
            if let Some(parent) = config.db_path.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent)?;
                }
            }
        }

        let manager = DuckDbConnectionManager::open(config.db_path.clone(), config.max_pool_size)?;
        let warehouse = Self { manager };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    /// Apply schema migrations.
    pub fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        migrations::apply_migrations(&connection)?;
        Ok(())
    }

    /// Get the path to the database file.
    pub fn db_path(&self) -> &Path {
        self.manager.db_path()
    }

    pub(crate) fn connection(&self) -> Result<PooledConnection, WarehouseError> {
        self.manager.acquire()
    }

    /// Execute a read-only SQL query with guardrails.
    ///
    /// # Security
    /// Only a single SELECT-like statement is accepted. Tables are written
    /// exclusively through the pipeline stages.
    pub fn execute_query(
        &self,
        sql: &str,
        guardrails: QueryGuardrails,
    ) -> Result<QueryResult, WarehouseError> {
        guardrails.validate()?;
        let sql = normalize_sql(sql)?;
        enforce_read_only_query(sql)?;

        let connection = self.manager.acquire()?;
        execute_select_query(&connection, sql, guardrails, Instant::now())
    }

    /// Whether a table or view with this name exists.
    pub fn relation_exists(&self, name: &str) -> Result<bool, WarehouseError> {
        let connection = self.manager.acquire()?;
        relation_exists(&connection, name)
    }

    /// Fail with [`WarehouseError::MissingRelation`] for the first missing relation.
    pub fn require_relations(&self, names: &[&str]) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        for name in names {
            if !relation_exists(&connection, name)? {
                return Err(WarehouseError::MissingRelation {
                    relation: (*name).to_string(),
                });
            }
        }
        Ok(())
    }

    /// Count the rows of a table managed by this crate.
    pub fn row_count(&self, table: &str) -> Result<i64, WarehouseError> {
        let connection = self.manager.acquire()?;
        count_rows(&connection, table)
    }

    /// Replace a group of relations atomically.
    ///
    /// `verify` runs inside the transaction after the last step; returning an
    /// error rolls the whole plan back.
    pub fn rebuild<F>(&self, plan: &RebuildPlan, verify: F) -> Result<Vec<TableCount>, WarehouseError>
    where
        F: FnOnce(&Connection) -> Result<(), WarehouseError>,
    {
        let connection = self.manager.acquire()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<Vec<TableCount>, WarehouseError> {
            for relation in plan.drops() {
                tracing::debug!(plan = plan.label(), relation = relation.name(), "dropping");
                connection.execute_batch(relation.drop_sql().as_str())?;
            }

            let mut counts = Vec::new();
            for step in plan.steps() {
                let started = Instant::now();
                connection.execute_batch(step.sql.as_str())?;
                let elapsed_ms = started.elapsed().as_millis() as u64;
                match step.counts {
                    Some(table) => {
                        let rows = count_rows(&connection, table)?;
                        tracing::info!(plan = plan.label(), step = step.name, table, rows, elapsed_ms, "step complete");
                        counts.push(TableCount {
                            table: table.to_string(),
                            rows,
                        });
                    }
                    None => {
                        tracing::info!(plan = plan.label(), step = step.name, elapsed_ms, "step complete");
                    }
                }
            }

            verify(&connection)?;
            Ok(counts)
        })();

        if let Err(error) = &result {
            tracing::error!(plan = plan.label(), %error, "rebuild failed, rolling back");
        }
        finalize_transaction(&connection, result)
    }

    /// Append a stage outcome to the run log.
    pub fn record_stage(&self, record: &StageRunRecord) -> Result<(), WarehouseError> {
        let connection = self.manager.acquire()?;
        let params: [&dyn ToSql; 5] = [
            &record.run_id,
            &record.stage,
            &record.status,
            &record.detail,
            &record.latency_ms,
        ];
        connection.execute(
            "INSERT INTO etl_run_log (run_id, stage, status, detail, latency_ms, recorded_at) \
             VALUES (?, ?, ?, ?, ?, CURRENT_TIMESTAMP)",
            params.as_slice(),
        )?;
        Ok(())
    }

    /// Most recent run log entries, newest first.
    pub fn recent_stage_runs(&self, limit: usize) -> Result<Vec<StageRunRecord>, WarehouseError> {
        let connection = self.manager.acquire()?;
        let mut statement = connection.prepare(
            "SELECT run_id, stage, status, detail, latency_ms, CAST(recorded_at AS VARCHAR) \
             FROM etl_run_log ORDER BY rowid DESC LIMIT ?",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = statement.query_map(params![limit], |row| {
            Ok(StageRunRecord {
                run_id: row.get(0)?,
                stage: row.get(1)?,
                status: row.get(2)?,
                detail: row.get(3)?,
                latency_ms: row.get(4)?,
                recorded_at: row.get(5)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}

/// Finalize a transaction, committing on success or rolling back on failure.
fn finalize_transaction<T>(
    connection: &Connection,
    result: Result<T, WarehouseError>,
) -> Result<T, WarehouseError> {
    match result {
        Ok(value) => {
            connection.execute_batch("COMMIT")?;
            Ok(value)
        }
        Err(error) => {
            let _ = connection.execute_batch("ROLLBACK");
            Err(error)
        }
    }
}

pub(crate) fn relation_exists(connection: &Connection, name: &str) -> Result<bool, WarehouseError> {
    let count: i64 = connection.query_row(
        "SELECT COUNT(*) FROM information_schema.tables WHERE table_name = ?",
        params![name],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Table names come from [`tables`], never from user input.
pub(crate) fn count_rows(connection: &Connection, table: &str) -> Result<i64, WarehouseError> {
    let sql = format!("SELECT COUNT(*) FROM {table}");
    Ok(connection.query_row(sql.as_str(), [], |row| row.get(0))?)
}

/// Execute a SELECT query and collect results.
fn execute_select_query(
    connection: &Connection,
    sql: &str,
    guardrails: QueryGuardrails,
    started: Instant,
) -> Result<QueryResult, WarehouseError> {
    let mut statement = connection.prepare(sql)?;
    let _ = statement.query([] as [&dyn ToSql; 0])?;

    // Column metadata is only available once the statement has executed.
    let column_count = statement.column_count();
    let mut columns = Vec::with_capacity(column_count);
    for index in 0..column_count {
        let name = statement
            .column_name(index)
            .map(|name| name.to_string())
            .unwrap_or_else(|_| format!("column_{index}"));
        let dtype = statement.column_type(index);
        columns.push(SqlColumn {
            name,
            r#type: dtype.to_string(),
        });
    }

    let mut rows_cursor = statement.query([] as [&dyn ToSql; 0])?;
    let mut rows = Vec::new();
    let mut truncated = false;

    while let Some(row) = rows_cursor.next()? {
        ensure_timeout(started, guardrails.timeout())?;

        if rows.len() >= guardrails.max_rows {
            truncated = true;
            break;
        }

        rows.push(read_row(row, column_count)?);
    }

    ensure_timeout(started, guardrails.timeout())?;

    Ok(QueryResult {
        columns,
        row_count: rows.len(),
        rows,
        truncated,
    })
}

/// Read a single row from the result set.
fn read_row(row: &::duckdb::Row<'_>, column_count: usize) -> Result<Vec<Value>, ::duckdb::Error> {
    let mut output = Vec::with_capacity(column_count);
    for index in 0..column_count {
        let value: DuckValue = row.get(index)?;
        output.push(to_json_value(value));
    }
    Ok(output)
}

/// Convert a DuckDB value to a JSON value.
fn to_json_value(value: DuckValue) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(value) => Value::Bool(value),
        DuckValue::TinyInt(value) => Value::Number(Number::from(value)),
        DuckValue::SmallInt(value) => Value::Number(Number::from(value)),
        DuckValue::Int(value) => Value::Number(Number::from(value)),
        DuckValue::BigInt(value) => Value::Number(Number::from(value)),
        DuckValue::UTinyInt(value) => Value::Number(Number::from(value)),
        DuckValue::USmallInt(value) => Value::Number(Number::from(value)),
        DuckValue::UInt(value) => Value::Number(Number::from(value)),
        DuckValue::UBigInt(value) => Value::Number(Number::from(value)),
        DuckValue::HugeInt(value) => i64::try_from(value)
            .map(|value| Value::Number(Number::from(value)))
            .unwrap_or_else(|_| Value::String(value.to_string())),
        DuckValue::Float(value) => number_from_f64(value as f64),
        DuckValue::Double(value) => number_from_f64(value),
        DuckValue::Decimal(value) => value
            .to_string()
            .parse::<f64>()
            .map(number_from_f64)
            .unwrap_or(Value::Null),
        DuckValue::Timestamp(unit, value) => format_timestamp(unit, value),
        DuckValue::Text(value) => Value::String(value),
        DuckValue::Blob(value) => Value::String(hex::encode(value)),
        other => Value::String(format!("{other:?}")),
    }
}

/// Render a timestamp as `YYYY-MM-DD HH:MM:SS` in UTC.
fn format_timestamp(unit: TimeUnit, value: i64) -> Value {
    let nanos = match unit {
        TimeUnit::Second => i128::from(value) * 1_000_000_000,
        TimeUnit::Millisecond => i128::from(value) * 1_000_000,
        TimeUnit::Microsecond => i128::from(value) * 1_000,
        TimeUnit::Nanosecond => i128::from(value),
    };
    let format = format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    OffsetDateTime::from_unix_timestamp_nanos(nanos)
        .ok()
        .and_then(|timestamp| timestamp.format(&format).ok())
        .map(Value::String)
        .unwrap_or(Value::Null)
}

/// Convert an f64 to a JSON number, returning Null for NaN/Inf.
fn number_from_f64(value: f64) -> Value {
    Number::from_f64(value)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

/// Normalize a SQL query string.
fn normalize_sql(sql: &str) -> Result<&str, WarehouseError> {
    let normalized = sql.trim();
    if normalized.is_empty() {
        return Err(WarehouseError::QueryRejected(String::from(
            "query must not be empty",
        )));
    }
    Ok(normalized.trim_end_matches(';').trim())
}

/// Enforce that a query is read-only (SELECT/CTE only).
fn enforce_read_only_query(sql: &str) -> Result<(), WarehouseError> {
    if !is_select_like(sql) {
        return Err(WarehouseError::QueryRejected(String::from(
            "only SELECT/CTE queries are accepted; tables are written by pipeline stages",
        )));
    }
    if has_multiple_statements(sql) {
        return Err(WarehouseError::QueryRejected(String::from(
            "multiple SQL statements are not allowed",
        )));
    }
    Ok(())
}

/// Check if a SQL query starts with a SELECT-like keyword.
fn is_select_like(sql: &str) -> bool {
    let first_keyword = sql
        .split_whitespace()
        .next()
        .unwrap_or_default()
        .to_ascii_uppercase();
    matches!(
        first_keyword.as_str(),
        "SELECT" | "WITH" | "EXPLAIN" | "SHOW" | "DESCRIBE"
    )
}

/// Check if a SQL string contains multiple statements.
fn has_multiple_statements(sql: &str) -> bool {
    sql.split(';')
        .filter(|part| !part.trim().is_empty())
        .count()
        > 1
}

/// Ensure that the query has not exceeded the timeout.
fn ensure_timeout(started: Instant, timeout: Duration) -> Result<(), WarehouseError> {
    if started.elapsed() > timeout {
        return Err(WarehouseError::QueryTimeout {
            timeout_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
        });
    }
    Ok(())
}

/// Resolve the reelhouse home directory from environment or default.
fn resolve_reelhouse_home() -> PathBuf {
    if let Some(path) = env::var_os("REELHOUSE_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".reelhouse");
    }

    PathBuf::from(".reelhouse")
}

/// Escape a string for safe inclusion in SQL.
///
/// # Security Note
/// Only used for file paths handed to table functions such as `read_csv`,
/// which do not accept bound parameters for their path argument.
pub(crate) fn escape_sql_string(value: &str) -> String {
    value.replace('\'', "''")
}

/// Convert a path to a SQL-compatible string (forward slashes).
pub(crate) fn path_to_sql(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn initializes_run_log_on_disk() {
        let temp = tempdir().expect("tempdir");
        let reelhouse_home = temp.path().join("reelhouse-home");
        let db_path = reelhouse_home.join("warehouse.duckdb");

        let warehouse = Warehouse::open(WarehouseConfig {
            reelhouse_home,
            db_path: db_path.clone(),
            max_pool_size: 2,
        })
        .expect("warehouse open");

        assert!(db_path.exists());
        let query = warehouse
            .execute_query(
                "SELECT COUNT(*) AS c FROM information_schema.tables WHERE table_name = 'etl_run_log'",
                QueryGuardrails::default(),
            )
            .expect("query");
        assert_eq!(query.rows[0][0], Value::Number(Number::from(1)));
    }

    #[test]
    fn rejects_write_queries() {
        let warehouse = Warehouse::open_in_memory().expect("warehouse open");

        let error = warehouse
            .execute_query("CREATE TABLE test_write (id INTEGER)", QueryGuardrails::default())
            .expect_err("should reject");
        assert!(matches!(error, WarehouseError::QueryRejected(_)));

        let error = warehouse
            .execute_query("SELECT 1; DROP TABLE etl_run_log", QueryGuardrails::default())
            .expect_err("should reject");
        assert!(matches!(error, WarehouseError::QueryRejected(_)));
    }

    #[test]
    fn truncates_at_max_rows() {
        let warehouse = Warehouse::open_in_memory().expect("warehouse open");
        let result = warehouse
            .execute_query(
                "SELECT * FROM range(50) t(i)",
                QueryGuardrails {
                    max_rows: 10,
                    query_timeout_ms: 5_000,
                },
            )
            .expect("query");
        assert_eq!(result.row_count, 10);
        assert!(result.truncated);
    }

    #[test]
    fn converts_decimals_and_timestamps_to_json() {
        let warehouse = Warehouse::open_in_memory().expect("warehouse open");
        let result = warehouse
            .execute_query(
                "SELECT CAST(4.5 AS DECIMAL(2,1)) AS rating, epoch_ms(1000000) AS ts",
                QueryGuardrails::default(),
            )
            .expect("query");
        assert_eq!(result.rows[0][0], serde_json::json!(4.5));
        assert_eq!(result.rows[0][1], serde_json::json!("1970-01-01 00:16:40"));
    }

    #[test]
    fn failed_rebuild_rolls_back_every_step() {
        let warehouse = Warehouse::open_in_memory().expect("warehouse open");
        let first = RebuildPlan::new("test")
            .drop_relation(Relation::Table("kept"))
            .step("create kept", "kept", "CREATE TABLE kept AS SELECT 1 AS id");
        warehouse.rebuild(&first, |_| Ok(())).expect("initial build");

        let broken = RebuildPlan::new("test")
            .drop_relation(Relation::Table("kept"))
            .step("create kept", "kept", "CREATE TABLE kept AS SELECT 2 AS id UNION ALL SELECT 3")
            .step_uncounted("broken", "SELECT * FROM no_such_table");
        let error = warehouse
            .rebuild(&broken, |_| Ok(()))
            .expect_err("second step must fail");
        assert!(matches!(error, WarehouseError::DuckDb(_)));

        assert_eq!(warehouse.row_count("kept").expect("count"), 1);
    }

    #[test]
    fn verify_failure_rolls_back() {
        let warehouse = Warehouse::open_in_memory().expect("warehouse open");
        let plan = RebuildPlan::new("test").step(
            "create checked",
            "checked",
            "CREATE TABLE checked AS SELECT 1 AS id",
        );
        let error = warehouse
            .rebuild(&plan, |_| {
                Err(WarehouseError::IntegrityViolation {
                    relation: String::from("checked"),
                    orphan_rows: 1,
                })
            })
            .expect_err("verify must fail");
        assert!(matches!(error, WarehouseError::IntegrityViolation { .. }));
        assert!(!warehouse.relation_exists("checked").expect("exists"));
    }

    #[test]
    fn records_and_lists_stage_runs() {
        let warehouse = Warehouse::open_in_memory().expect("warehouse open");
        for stage in ["clean", "quality_check"] {
            warehouse
                .record_stage(&StageRunRecord::new("run-0001", stage, "ok", None, 12))
                .expect("record");
        }

        let runs = warehouse.recent_stage_runs(10).expect("list");
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].stage, "quality_check");
        assert_eq!(runs[1].stage, "clean");
        assert!(runs[0].recorded_at.is_some());
    }

    #[test]
    fn require_relations_names_the_missing_table() {
        let warehouse = Warehouse::open_in_memory().expect("warehouse open");
        let error = warehouse
            .require_relations(&[tables::ETL_RUN_LOG, tables::STG_MOVIES])
            .expect_err("stg_movies is missing");
        match error {
            WarehouseError::MissingRelation { relation } => assert_eq!(relation, "stg_movies"),
            other => panic!("unexpected error: {other}"),
        }
    }
}
