//! Cleaner: filters and deduplicates the raw tables.

use serde::Serialize;

use crate::tables::{STG_MOVIES, STG_MOVIES_CLEAN, STG_RATINGS, STG_RATINGS_CLEAN};
use crate::{CleanMovie, CleanRating, RebuildPlan, Relation, Warehouse, WarehouseError};

/// Inclusive bounds of a valid rating.
pub const MIN_RATING: f64 = 0.5;
pub const MAX_RATING: f64 = 5.0;

// A movie id that appears with more than one (title, genres) pair keeps the
// lexicographically smallest pair so the output is deterministic.
const CLEAN_MOVIES_SQL: &str = r#"
CREATE TABLE stg_movies_clean AS
SELECT movie_id, title, genres
FROM (
    SELECT DISTINCT "movieId" AS movie_id, title, genres
    FROM stg_movies
    WHERE "movieId" IS NOT NULL
      AND title IS NOT NULL
)
QUALIFY ROW_NUMBER() OVER (PARTITION BY movie_id ORDER BY title, genres NULLS LAST) = 1
ORDER BY movie_id;
"#;

const CLEAN_RATINGS_SQL: &str = r#"
CREATE TABLE stg_ratings_clean AS
SELECT DISTINCT
    "userId" AS user_id,
    "movieId" AS movie_id,
    rating,
    "timestamp"
FROM stg_ratings
WHERE "userId" IS NOT NULL
  AND "movieId" IS NOT NULL
  AND "timestamp" IS NOT NULL
  AND rating BETWEEN 0.5 AND 5.0;
"#;

/// Row counts before and after cleaning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CleanReport {
    pub raw_movies: i64,
    pub clean_movies: i64,
    pub raw_ratings: i64,
    pub clean_ratings: i64,
}

impl CleanReport {
    pub fn dropped_movies(&self) -> i64 {
        self.raw_movies - self.clean_movies
    }

    pub fn dropped_ratings(&self) -> i64 {
        self.raw_ratings - self.clean_ratings
    }
}

/// Rebuild `stg_movies_clean` and `stg_ratings_clean` from the raw tables.
///
/// Rows missing a required field are dropped, exact duplicates collapse to
/// one row, and ratings outside `[0.5, 5.0]` are removed. Referential
/// integrity between the two outputs is not enforced here; the quality gate
/// checks it.
pub fn clean_staging(warehouse: &Warehouse) -> Result<CleanReport, WarehouseError> {
    warehouse.require_relations(&[STG_MOVIES, STG_RATINGS])?;
    let raw_movies = warehouse.row_count(STG_MOVIES)?;
    let raw_ratings = warehouse.row_count(STG_RATINGS)?;

    let plan = RebuildPlan::new("clean")
        .drop_relation(Relation::Table(STG_MOVIES_CLEAN))
        .drop_relation(Relation::Table(STG_RATINGS_CLEAN))
        .step("clean movies", STG_MOVIES_CLEAN, CLEAN_MOVIES_SQL)
        .step("clean ratings", STG_RATINGS_CLEAN, CLEAN_RATINGS_SQL);
    let counts = warehouse.rebuild(&plan, |_| Ok(()))?;

    let count_of = |table: &str| {
        counts
            .iter()
            .find(|count| count.table == table)
            .map_or(0, |count| count.rows)
    };

    let report = CleanReport {
        raw_movies,
        clean_movies: count_of(STG_MOVIES_CLEAN),
        raw_ratings,
        clean_ratings: count_of(STG_RATINGS_CLEAN),
    };
    tracing::info!(
        dropped_movies = report.dropped_movies(),
        dropped_ratings = report.dropped_ratings(),
        "staging cleaned"
    );
    Ok(report)
}

impl Warehouse {
    /// Cleaned movies ordered by id.
    pub fn clean_movies(&self) -> Result<Vec<CleanMovie>, WarehouseError> {
        let connection = self.connection()?;
        let mut statement = connection
            .prepare("SELECT movie_id, title, genres FROM stg_movies_clean ORDER BY movie_id")?;
        let rows = statement.query_map([], |row| {
            Ok(CleanMovie {
                movie_id: row.get(0)?,
                title: row.get(1)?,
                genres: row.get(2)?,
            })
        })?;

        let mut movies = Vec::new();
        for row in rows {
            movies.push(row?);
        }
        Ok(movies)
    }

    /// Cleaned ratings in natural key order.
    pub fn clean_ratings(&self) -> Result<Vec<CleanRating>, WarehouseError> {
        let connection = self.connection()?;
        let mut statement = connection.prepare(
            r#"SELECT user_id, movie_id, rating, "timestamp" FROM stg_ratings_clean
               ORDER BY user_id, movie_id, "timestamp", rating"#,
        )?;
        let rows = statement.query_map([], |row| {
            Ok(CleanRating {
                user_id: row.get(0)?,
                movie_id: row.get(1)?,
                rating: row.get(2)?,
                timestamp: row.get(3)?,
            })
        })?;

        let mut ratings = Vec::new();
        for row in rows {
            ratings.push(row?);
        }
        Ok(ratings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{RawMovie, RawRating};

    fn seeded(movies: &[RawMovie], ratings: &[RawRating]) -> Warehouse {
        let warehouse = Warehouse::open_in_memory().expect("warehouse");
        warehouse.ensure_raw_tables().expect("raw tables");
        warehouse.ingest_raw_movies(movies).expect("movies");
        warehouse.ingest_raw_ratings(ratings).expect("ratings");
        warehouse
    }

    #[test]
    fn drops_incomplete_movies_and_collapses_duplicates() {
        let warehouse = seeded(
            &[
                RawMovie::new(1, "Toy Story (1995)", "Animation|Comedy"),
                RawMovie::new(1, "Toy Story (1995)", "Animation|Comedy"),
                RawMovie { movie_id: None, title: Some(String::from("Orphan")), genres: None },
                RawMovie { movie_id: Some(3), title: None, genres: Some(String::from("Drama")) },
                RawMovie { movie_id: Some(4), title: Some(String::from("No Genres")), genres: None },
            ],
            &[],
        );

        let report = clean_staging(&warehouse).expect("clean");
        assert_eq!(report.raw_movies, 5);
        assert_eq!(report.clean_movies, 2);
        assert_eq!(report.dropped_movies(), 3);

        let movies = warehouse.clean_movies().expect("movies");
        assert_eq!(
            movies,
            vec![
                CleanMovie {
                    movie_id: 1,
                    title: String::from("Toy Story (1995)"),
                    genres: Some(String::from("Animation|Comedy")),
                },
                CleanMovie { movie_id: 4, title: String::from("No Genres"), genres: None },
            ]
        );
    }

    #[test]
    fn conflicting_titles_keep_the_smallest_pair() {
        let warehouse = seeded(
            &[
                RawMovie::new(7, "Zulu", "War"),
                RawMovie::new(7, "Alpha", "Drama"),
            ],
            &[],
        );

        clean_staging(&warehouse).expect("clean");
        let movies = warehouse.clean_movies().expect("movies");
        assert_eq!(movies.len(), 1);
        assert_eq!(movies[0].title, "Alpha");
    }

    #[test]
    fn filters_ratings_by_range_and_required_fields() {
        let warehouse = seeded(
            &[RawMovie::new(1, "A", "Comedy")],
            &[
                RawRating::new(1, 1, 4.0, 100),
                RawRating::new(1, 1, 4.0, 100),
                RawRating::new(2, 1, 0.5, 101),
                RawRating::new(3, 1, 5.0, 102),
                RawRating::new(4, 1, 0.0, 103),
                RawRating::new(5, 1, 5.5, 104),
                RawRating { user_id: Some(6), movie_id: Some(1), rating: None, timestamp: Some(105) },
                RawRating { user_id: Some(7), movie_id: Some(1), rating: Some(3.0), timestamp: None },
                RawRating { user_id: None, movie_id: Some(1), rating: Some(3.0), timestamp: Some(106) },
            ],
        );

        let report = clean_staging(&warehouse).expect("clean");
        assert_eq!(report.raw_ratings, 9);
        assert_eq!(report.clean_ratings, 3);

        let ratings = warehouse.clean_ratings().expect("ratings");
        let users: Vec<i64> = ratings.iter().map(|rating| rating.user_id).collect();
        assert_eq!(users, vec![1, 2, 3]);
    }

    #[test]
    fn orphan_ratings_survive_cleaning() {
        let warehouse = seeded(
            &[RawMovie::new(1, "A", "Comedy")],
            &[RawRating::new(1, 99, 3.0, 100)],
        );

        let report = clean_staging(&warehouse).expect("clean");
        assert_eq!(report.clean_ratings, 1);
    }

    #[test]
    fn requires_raw_tables() {
        let warehouse = Warehouse::open_in_memory().expect("warehouse");
        let error = clean_staging(&warehouse).expect_err("nothing loaded");
        assert!(matches!(error, WarehouseError::MissingRelation { .. }));
    }
}
