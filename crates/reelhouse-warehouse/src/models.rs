use serde::{Deserialize, Serialize};

/// A movie row as loaded from `movies.csv`. Every field may be missing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawMovie {
    pub movie_id: Option<i64>,
    pub title: Option<String>,
    /// Pipe-delimited genre list, e.g. `Comedy|Drama`.
    pub genres: Option<String>,
}

impl RawMovie {
    pub fn new(movie_id: i64, title: impl Into<String>, genres: impl Into<String>) -> Self {
        Self {
            movie_id: Some(movie_id),
            title: Some(title.into()),
            genres: Some(genres.into()),
        }
    }
}

/// A rating row as loaded from `ratings.csv`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRating {
    pub user_id: Option<i64>,
    pub movie_id: Option<i64>,
    pub rating: Option<f64>,
    /// Unix seconds.
    pub timestamp: Option<i64>,
}

impl RawRating {
    pub fn new(user_id: i64, movie_id: i64, rating: f64, timestamp: i64) -> Self {
        Self {
            user_id: Some(user_id),
            movie_id: Some(movie_id),
            rating: Some(rating),
            timestamp: Some(timestamp),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CleanMovie {
    pub movie_id: i64,
    pub title: String,
    pub genres: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CleanRating {
    pub user_id: i64,
    pub movie_id: i64,
    pub rating: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimMovie {
    pub movie_key: i64,
    pub movie_id: i64,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DimGenre {
    pub genre_key: i64,
    pub genre: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeMovieGenre {
    pub movie_key: i64,
    pub genre_key: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FactRating {
    pub rating_key: i64,
    pub movie_key: i64,
    pub user_id: i64,
    pub rating: f64,
    /// `YYYY-MM-DD HH:MM:SS`, UTC.
    pub rating_timestamp: String,
}

/// One row of `etl_run_log`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageRunRecord {
    pub run_id: String,
    pub stage: String,
    /// `ok` or `failed`.
    pub status: String,
    /// JSON text describing the outcome.
    pub detail: Option<String>,
    pub latency_ms: i64,
    /// Set by the store; ignored on insert.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub recorded_at: Option<String>,
}

impl StageRunRecord {
    pub fn new(
        run_id: impl Into<String>,
        stage: impl Into<String>,
        status: impl Into<String>,
        detail: Option<String>,
        latency_ms: i64,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            stage: stage.into(),
            status: status.into(),
            detail,
            latency_ms,
            recorded_at: None,
        }
    }
}
