//! Warehouse builder: the star schema over the cleaned staging tables.
//!
//! Dimensions are created before the bridge and fact tables that reference
//! them, and the whole build is a single [`RebuildPlan`]. Surrogate keys are
//! dense `ROW_NUMBER()` ranks so the same input always yields the same keys.

use ::duckdb::Connection;
use serde::Serialize;

use crate::tables::{
    BRIDGE_MOVIE_GENRES, DIM_GENRES, DIM_MOVIES, FACT_RATINGS, STG_MOVIES_CLEAN, STG_RATINGS_CLEAN,
};
use crate::views::{REPORT_VIEWS, REPORT_VIEWS_SQL};
use crate::{
    BridgeMovieGenre, DimGenre, DimMovie, FactRating, RebuildPlan, Relation, TableCount, Warehouse,
    WarehouseError,
};

const DIM_MOVIES_SQL: &str = r#"
CREATE TABLE dim_movies (
    movie_key BIGINT PRIMARY KEY,
    movie_id BIGINT NOT NULL,
    title VARCHAR NOT NULL
);

INSERT INTO dim_movies
SELECT
    ROW_NUMBER() OVER (ORDER BY movie_id) AS movie_key,
    movie_id,
    title
FROM stg_movies_clean;
"#;

const DIM_GENRES_SQL: &str = r#"
CREATE TABLE dim_genres (
    genre_key BIGINT PRIMARY KEY,
    genre VARCHAR NOT NULL
);

INSERT INTO dim_genres
SELECT
    ROW_NUMBER() OVER (ORDER BY genre) AS genre_key,
    genre
FROM (
    SELECT DISTINCT UNNEST(string_split(genres, '|')) AS genre
    FROM stg_movies_clean
) AS tokens
WHERE genre <> '';
"#;

// Duplicate tokens within one movie's genre list collapse to one edge.
const BRIDGE_MOVIE_GENRES_SQL: &str = r#"
CREATE TABLE bridge_movie_genres (
    movie_key BIGINT NOT NULL,
    genre_key BIGINT NOT NULL,
    PRIMARY KEY (movie_key, genre_key)
);

INSERT INTO bridge_movie_genres
SELECT DISTINCT
    m.movie_key,
    g.genre_key
FROM (
    SELECT movie_id, UNNEST(string_split(genres, '|')) AS genre
    FROM stg_movies_clean
) AS tokens
JOIN dim_movies m ON tokens.movie_id = m.movie_id
JOIN dim_genres g ON tokens.genre = g.genre;
"#;

const FACT_RATINGS_SQL: &str = r#"
CREATE TABLE fact_ratings (
    rating_key BIGINT PRIMARY KEY,
    movie_key BIGINT NOT NULL,
    user_id BIGINT NOT NULL,
    rating DECIMAL(2,1) NOT NULL,
    rating_timestamp TIMESTAMP NOT NULL
);

INSERT INTO fact_ratings
SELECT
    ROW_NUMBER() OVER (ORDER BY r."timestamp", r.user_id, r.movie_id, r.rating) AS rating_key,
    m.movie_key,
    r.user_id,
    CAST(r.rating AS DECIMAL(2,1)),
    epoch_ms(r."timestamp" * 1000) AS rating_timestamp
FROM stg_ratings_clean r
JOIN dim_movies m ON r.movie_id = m.movie_id;
"#;

const INDEXES_SQL: &str = r#"
CREATE INDEX idx_fact_ratings_movie_key ON fact_ratings(movie_key);
CREATE INDEX idx_bridge_genre_key ON bridge_movie_genres(genre_key);
"#;

const ORPHAN_BRIDGE_SQL: &str = r#"
SELECT COUNT(*)
FROM bridge_movie_genres b
LEFT JOIN dim_movies m ON b.movie_key = m.movie_key
LEFT JOIN dim_genres g ON b.genre_key = g.genre_key
WHERE m.movie_key IS NULL OR g.genre_key IS NULL
"#;

const ORPHAN_FACT_SQL: &str = r#"
SELECT COUNT(*)
FROM fact_ratings f
LEFT JOIN dim_movies m ON f.movie_key = m.movie_key
WHERE m.movie_key IS NULL
"#;

/// Row counts of the freshly built warehouse tables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildReport {
    pub tables: Vec<TableCount>,
}

impl BuildReport {
    pub fn rows(&self, table: &str) -> Option<i64> {
        self.tables
            .iter()
            .find(|count| count.table == table)
            .map(|count| count.rows)
    }
}

/// The full drop-and-recreate plan for the star schema.
pub fn star_schema_plan() -> RebuildPlan {
    let mut plan = RebuildPlan::new("build_warehouse");
    for view in REPORT_VIEWS.iter().rev() {
        plan = plan.drop_relation(*view);
    }

    plan.drop_relation(Relation::Table(FACT_RATINGS))
        .drop_relation(Relation::Table(BRIDGE_MOVIE_GENRES))
        .drop_relation(Relation::Table(DIM_GENRES))
        .drop_relation(Relation::Table(DIM_MOVIES))
        .step("dim_movies", DIM_MOVIES, DIM_MOVIES_SQL)
        .step("dim_genres", DIM_GENRES, DIM_GENRES_SQL)
        .step("bridge_movie_genres", BRIDGE_MOVIE_GENRES, BRIDGE_MOVIE_GENRES_SQL)
        .step("fact_ratings", FACT_RATINGS, FACT_RATINGS_SQL)
        .step_uncounted("indexes", INDEXES_SQL)
        .step_uncounted("report views", REPORT_VIEWS_SQL)
}

/// Build the star schema from the cleaned tables.
///
/// Must only run after the quality gate has passed. On any failure the
/// previous warehouse tables are left exactly as they were.
pub fn build_star_schema(warehouse: &Warehouse) -> Result<BuildReport, WarehouseError> {
    warehouse.require_relations(&[STG_MOVIES_CLEAN, STG_RATINGS_CLEAN])?;
    let tables = warehouse.rebuild(&star_schema_plan(), verify_integrity)?;
    Ok(BuildReport { tables })
}

/// Every bridge and fact key must resolve to a dimension row.
fn verify_integrity(connection: &Connection) -> Result<(), WarehouseError> {
    for (relation, sql) in [
        (BRIDGE_MOVIE_GENRES, ORPHAN_BRIDGE_SQL),
        (FACT_RATINGS, ORPHAN_FACT_SQL),
    ] {
        let orphan_rows: i64 = connection.query_row(sql, [], |row| row.get(0))?;
        if orphan_rows > 0 {
            return Err(WarehouseError::IntegrityViolation {
                relation: relation.to_string(),
                orphan_rows,
            });
        }
    }
    Ok(())
}

impl Warehouse {
    pub fn dim_movies(&self) -> Result<Vec<DimMovie>, WarehouseError> {
        let connection = self.connection()?;
        let mut statement =
            connection.prepare("SELECT movie_key, movie_id, title FROM dim_movies ORDER BY movie_key")?;
        let rows = statement.query_map([], |row| {
            Ok(DimMovie {
                movie_key: row.get(0)?,
                movie_id: row.get(1)?,
                title: row.get(2)?,
            })
        })?;

        let mut movies = Vec::new();
        for row in rows {
            movies.push(row?);
        }
        Ok(movies)
    }

    pub fn dim_genres(&self) -> Result<Vec<DimGenre>, WarehouseError> {
        let connection = self.connection()?;
        let mut statement =
            connection.prepare("SELECT genre_key, genre FROM dim_genres ORDER BY genre_key")?;
        let rows = statement.query_map([], |row| {
            Ok(DimGenre {
                genre_key: row.get(0)?,
                genre: row.get(1)?,
            })
        })?;

        let mut genres = Vec::new();
        for row in rows {
            genres.push(row?);
        }
        Ok(genres)
    }

    pub fn bridge_movie_genres(&self) -> Result<Vec<BridgeMovieGenre>, WarehouseError> {
        let connection = self.connection()?;
        let mut statement = connection.prepare(
            "SELECT movie_key, genre_key FROM bridge_movie_genres ORDER BY movie_key, genre_key",
        )?;
        let rows = statement.query_map([], |row| {
            Ok(BridgeMovieGenre {
                movie_key: row.get(0)?,
                genre_key: row.get(1)?,
            })
        })?;

        let mut edges = Vec::new();
        for row in rows {
            edges.push(row?);
        }
        Ok(edges)
    }

    pub fn fact_ratings(&self) -> Result<Vec<FactRating>, WarehouseError> {
        let connection = self.connection()?;
        let mut statement = connection.prepare(
            "SELECT rating_key, movie_key, user_id, CAST(rating AS DOUBLE), \
             strftime(rating_timestamp, '%Y-%m-%d %H:%M:%S') \
             FROM fact_ratings ORDER BY rating_key",
        )?;
        let rows = statement.query_map([], |row| {
            Ok(FactRating {
                rating_key: row.get(0)?,
                movie_key: row.get(1)?,
                user_id: row.get(2)?,
                rating: row.get(3)?,
                rating_timestamp: row.get(4)?,
            })
        })?;

        let mut facts = Vec::new();
        for row in rows {
            facts.push(row?);
        }
        Ok(facts)
    }
}
