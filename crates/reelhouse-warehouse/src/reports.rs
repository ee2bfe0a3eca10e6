//! Fixed analytics reports exported as CSV files.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::tables::{VW_GENRE_RATINGS, VW_MOVIE_RATINGS};
use crate::{count_rows, escape_sql_string, path_to_sql, Warehouse, WarehouseError};

/// One of the four analytics reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportKind {
    TopMovies,
    LeastMovies,
    TopGenres,
    LeastGenres,
}

impl ReportKind {
    pub const ALL: [ReportKind; 4] = [
        Self::TopMovies,
        Self::LeastMovies,
        Self::TopGenres,
        Self::LeastGenres,
    ];

    /// File name without extension.
    pub fn file_stem(self) -> &'static str {
        match self {
            Self::TopMovies => "top_10_movies",
            Self::LeastMovies => "least_10_movies",
            Self::TopGenres => "top_5_genres",
            Self::LeastGenres => "least_5_genres",
        }
    }

    pub fn limit(self) -> usize {
        match self {
            Self::TopMovies | Self::LeastMovies => 10,
            Self::TopGenres | Self::LeastGenres => 5,
        }
    }

    /// The report query, limit included.
    pub fn sql(self) -> &'static str {
        match self {
            Self::TopMovies => {
                "SELECT title, avg_rating FROM vw_movie_ratings \
                 ORDER BY avg_rating DESC, title ASC LIMIT 10"
            }
            Self::LeastMovies => {
                "SELECT title, avg_rating FROM vw_movie_ratings \
                 ORDER BY avg_rating ASC, title ASC LIMIT 10"
            }
            Self::TopGenres => {
                "SELECT genre_name, rating_count FROM vw_genre_ratings \
                 ORDER BY rating_count DESC, genre_name ASC LIMIT 5"
            }
            Self::LeastGenres => {
                "SELECT genre_name, rating_count FROM vw_genre_ratings \
                 ORDER BY rating_count ASC, genre_name ASC LIMIT 5"
            }
        }
    }
}

/// A report written to disk.
#[derive(Debug, Clone, Serialize)]
pub struct ReportExport {
    pub report: &'static str,
    pub path: PathBuf,
    pub rows: usize,
}

/// Run all four reports and write `<results_dir>/<name>.csv` for each.
///
/// Files are written by the store's `COPY ... TO` with a header row; fields
/// holding the delimiter, quotes or line breaks are quoted.
pub fn export_reports(
    warehouse: &Warehouse,
    results_dir: &Path,
) -> Result<Vec<ReportExport>, WarehouseError> {
    warehouse.require_relations(&[VW_MOVIE_RATINGS, VW_GENRE_RATINGS])?;
    fs::create_dir_all(results_dir)?;

    let connection = warehouse.connection()?;
    let mut exports = Vec::with_capacity(ReportKind::ALL.len());
    for kind in ReportKind::ALL {
        let path = results_dir.join(format!("{}.csv", kind.file_stem()));
        connection.execute_batch(
            format!(
                "COPY ({}) TO '{}' (FORMAT CSV, HEADER)",
                kind.sql(),
                escape_sql_string(path_to_sql(&path).as_str())
            )
            .as_str(),
        )?;
        let rows = count_rows(&connection, format!("({})", kind.sql()).as_str())?;
        let rows = usize::try_from(rows).unwrap_or_default();

        tracing::info!(report = kind.file_stem(), rows, path = %path.display(), "report exported");
        exports.push(ReportExport {
            report: kind.file_stem(),
            path,
            rows,
        });
    }
    Ok(exports)
}
