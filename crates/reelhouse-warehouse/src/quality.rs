//! Quality gate over the raw and cleaned staging tables.
//!
//! Every check always runs so a failing gate reports all of its findings.
//! Nothing here writes to the store.

use serde::Serialize;
use thiserror::Error;

use crate::clean::{MAX_RATING, MIN_RATING};
use crate::tables::{STG_MOVIES, STG_MOVIES_CLEAN, STG_RATINGS, STG_RATINGS_CLEAN};
use crate::{count_rows, Warehouse, WarehouseError};

const ORPHAN_RATINGS_SQL: &str = r#"
SELECT COUNT(*)
FROM stg_ratings_clean r
LEFT JOIN stg_movies_clean m ON r.movie_id = m.movie_id
WHERE m.movie_id IS NULL
"#;

const RATING_RANGE_SQL: &str = "SELECT MIN(rating), MAX(rating) FROM stg_ratings_clean";

/// A violated data-quality invariant.
#[derive(Debug, Clone, PartialEq, Error, Serialize)]
#[serde(tag = "check", rename_all = "snake_case")]
pub enum ValidationError {
    /// Cleaning produced more rows than it was given.
    #[error("row count inflated in '{table}': {raw} raw rows became {clean} clean rows")]
    RowCountInflation { table: String, raw: i64, clean: i64 },

    /// Clean ratings reference movies that are not in the clean movie table.
    #[error("{count} clean ratings reference unknown movies")]
    OrphanReferenceFound { count: i64 },

    /// A clean rating lies outside the valid rating range.
    #[error("clean ratings span [{min}, {max}], outside [0.5, 5.0]")]
    RatingOutOfRange { min: f64, max: f64 },
}

impl ValidationError {
    /// Stable name of the check that produced this failure.
    pub fn check_name(&self) -> &'static str {
        match self {
            Self::RowCountInflation { .. } => "row_count_inflation",
            Self::OrphanReferenceFound { .. } => "orphan_reference_found",
            Self::RatingOutOfRange { .. } => "rating_out_of_range",
        }
    }
}

/// Row counts and check results gathered by [`run_quality_gate`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualityReport {
    pub raw_movies: i64,
    pub clean_movies: i64,
    pub raw_ratings: i64,
    pub clean_ratings: i64,
    pub orphan_ratings: i64,
    /// `None` when there are no clean ratings.
    pub min_rating: Option<f64>,
    pub max_rating: Option<f64>,
    /// Failures in check order. Empty when the gate passes.
    pub failures: Vec<ValidationError>,
}

impl QualityReport {
    pub fn passed(&self) -> bool {
        self.failures.is_empty()
    }

    /// The first failure in check order, if any.
    pub fn ensure_passed(&self) -> Result<(), ValidationError> {
        match self.failures.first() {
            Some(failure) => Err(failure.clone()),
            None => Ok(()),
        }
    }
}

/// Run every check and collect the results.
///
/// Only store errors abort the gate. Check failures are logged and returned
/// in the report; callers decide whether to halt via
/// [`QualityReport::ensure_passed`].
pub fn run_quality_gate(warehouse: &Warehouse) -> Result<QualityReport, WarehouseError> {
    warehouse.require_relations(&[STG_MOVIES, STG_RATINGS, STG_MOVIES_CLEAN, STG_RATINGS_CLEAN])?;
    let connection = warehouse.connection()?;

    let raw_movies = count_rows(&connection, STG_MOVIES)?;
    let clean_movies = count_rows(&connection, STG_MOVIES_CLEAN)?;
    let raw_ratings = count_rows(&connection, STG_RATINGS)?;
    let clean_ratings = count_rows(&connection, STG_RATINGS_CLEAN)?;
    let orphan_ratings: i64 = connection.query_row(ORPHAN_RATINGS_SQL, [], |row| row.get(0))?;
    let (min_rating, max_rating): (Option<f64>, Option<f64>) =
        connection.query_row(RATING_RANGE_SQL, [], |row| Ok((row.get(0)?, row.get(1)?)))?;

    let mut failures = Vec::new();
    for (table, raw, clean) in [
        (STG_MOVIES_CLEAN, raw_movies, clean_movies),
        (STG_RATINGS_CLEAN, raw_ratings, clean_ratings),
    ] {
        if clean > raw {
            failures.push(ValidationError::RowCountInflation {
                table: table.to_string(),
                raw,
                clean,
            });
        }
    }

    if orphan_ratings > 0 {
        failures.push(ValidationError::OrphanReferenceFound {
            count: orphan_ratings,
        });
    }

    if let (Some(min), Some(max)) = (min_rating, max_rating) {
        if min < MIN_RATING || max > MAX_RATING {
            failures.push(ValidationError::RatingOutOfRange { min, max });
        }
    }

    for failure in &failures {
        tracing::error!(check = failure.check_name(), %failure, "quality check failed");
    }
    if failures.is_empty() {
        tracing::info!(clean_movies, clean_ratings, "quality gate passed");
    }

    Ok(QualityReport {
        raw_movies,
        clean_movies,
        raw_ratings,
        clean_ratings,
        orphan_ratings,
        min_rating,
        max_rating,
        failures,
    })
}
