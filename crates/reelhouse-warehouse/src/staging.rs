//! Raw store: verbatim CSV rows in `stg_movies` and `stg_ratings`.
//!
//! No constraints are enforced here; filtering is the cleaner's job.

use std::path::{Path, PathBuf};

use ::duckdb::ToSql;
use serde::Serialize;

use crate::tables::{STG_MOVIES, STG_RATINGS};
use crate::{
    escape_sql_string, finalize_transaction, path_to_sql, RawMovie, RawRating, RebuildPlan,
    Relation, TableCount, Warehouse, WarehouseError,
};

const RAW_MOVIES_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS stg_movies (
    "movieId" BIGINT,
    title VARCHAR,
    genres VARCHAR
);
"#;

const RAW_RATINGS_DDL: &str = r#"
CREATE TABLE IF NOT EXISTS stg_ratings (
    "userId" BIGINT,
    "movieId" BIGINT,
    rating DOUBLE,
    "timestamp" BIGINT
);
"#;

/// Locations of the two source CSV files.
#[derive(Debug, Clone)]
pub struct RawSources {
    pub movies_csv: PathBuf,
    pub ratings_csv: PathBuf,
}

impl RawSources {
    /// `movies.csv` and `ratings.csv` inside `raw_dir`.
    pub fn in_dir(raw_dir: &Path) -> Self {
        Self {
            movies_csv: raw_dir.join("movies.csv"),
            ratings_csv: raw_dir.join("ratings.csv"),
        }
    }
}

/// Row counts of the freshly loaded raw tables.
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    pub tables: Vec<TableCount>,
}

/// Replace both raw tables with the contents of the source CSVs.
///
/// Column types are declared up front so an all-empty column is still typed
/// correctly and values that fail to parse become NULL rather than aborting
/// the load.
pub fn load_raw_csvs(warehouse: &Warehouse, sources: &RawSources) -> Result<LoadReport, WarehouseError> {
    for path in [&sources.movies_csv, &sources.ratings_csv] {
        if !path.is_file() {
            return Err(WarehouseError::MissingSource { path: path.clone() });
        }
    }

    let movies = escape_sql_string(path_to_sql(&sources.movies_csv).as_str());
    let ratings = escape_sql_string(path_to_sql(&sources.ratings_csv).as_str());

    let plan = RebuildPlan::new("load")
        .drop_relation(Relation::Table(STG_MOVIES))
        .drop_relation(Relation::Table(STG_RATINGS))
        .step(
            "load stg_movies",
            STG_MOVIES,
            format!(
                r#"
CREATE TABLE stg_movies AS
SELECT * FROM read_csv('{movies}',
    header = true,
    quote = '"',
    ignore_errors = true,
    columns = {{'movieId': 'BIGINT', 'title': 'VARCHAR', 'genres': 'VARCHAR'}});
"#
            ),
        )
        .step(
            "load stg_ratings",
            STG_RATINGS,
            format!(
                r#"
CREATE TABLE stg_ratings AS
SELECT * FROM read_csv('{ratings}',
    header = true,
    ignore_errors = true,
    columns = {{'userId': 'BIGINT', 'movieId': 'BIGINT', 'rating': 'DOUBLE', 'timestamp': 'BIGINT'}});
"#
            ),
        );

    let tables = warehouse.rebuild(&plan, |_| Ok(()))?;
    Ok(LoadReport { tables })
}

impl Warehouse {
    /// Create the raw tables if they do not exist yet.
    pub fn ensure_raw_tables(&self) -> Result<(), WarehouseError> {
        let connection = self.connection()?;
        connection.execute_batch(RAW_MOVIES_DDL)?;
        connection.execute_batch(RAW_RATINGS_DDL)?;
        Ok(())
    }

    /// Append raw movie rows using parameterized queries.
    ///
    /// # Security
    /// All values are passed as query parameters, never interpolated.
    pub fn ingest_raw_movies(&self, rows: &[RawMovie]) -> Result<(), WarehouseError> {
        if rows.is_empty() {
            return Ok(());
        }

        self.ensure_raw_tables()?;
        let connection = self.connection()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<(), WarehouseError> {
            let mut statement = connection
                .prepare(r#"INSERT INTO stg_movies ("movieId", title, genres) VALUES (?, ?, ?)"#)?;
            for row in rows {
                let params: [&dyn ToSql; 3] = [&row.movie_id, &row.title, &row.genres];
                statement.execute(params.as_slice())?;
            }
            Ok(())
        })();

        finalize_transaction(&connection, result)
    }

    /// Append raw rating rows using parameterized queries.
    pub fn ingest_raw_ratings(&self, rows: &[RawRating]) -> Result<(), WarehouseError> {
        if rows.is_empty() {
            return Ok(());
        }

        self.ensure_raw_tables()?;
        let connection = self.connection()?;
        connection.execute_batch("BEGIN TRANSACTION")?;
        let result = (|| -> Result<(), WarehouseError> {
            let mut statement = connection.prepare(
                r#"INSERT INTO stg_ratings ("userId", "movieId", rating, "timestamp") VALUES (?, ?, ?, ?)"#,
            )?;
            for row in rows {
                let params: [&dyn ToSql; 4] =
                    [&row.user_id, &row.movie_id, &row.rating, &row.timestamp];
                statement.execute(params.as_slice())?;
            }
            Ok(())
        })();

        finalize_transaction(&connection, result)
    }
}
