//! Database views for the analytics reports.

use crate::tables::{VW_GENRE_RATINGS, VW_MOVIE_RATINGS};
use crate::Relation;

/// Views created on top of the star schema, in creation order.
pub const REPORT_VIEWS: [Relation; 2] = [
    Relation::View(VW_MOVIE_RATINGS),
    Relation::View(VW_GENRE_RATINGS),
];

/// Creates the following views:
/// - `vw_movie_ratings`: Average rating and rating count per movie title
/// - `vw_genre_ratings`: Number of ratings per genre
///
/// A movie with several genres counts its ratings once for each genre.
pub const REPORT_VIEWS_SQL: &str = r"
CREATE OR REPLACE VIEW vw_movie_ratings AS
SELECT
    m.title,
    AVG(f.rating)::DOUBLE AS avg_rating,
    COUNT(*) AS rating_count
FROM fact_ratings f
JOIN dim_movies m ON f.movie_key = m.movie_key
GROUP BY m.title;

CREATE OR REPLACE VIEW vw_genre_ratings AS
SELECT
    g.genre AS genre_name,
    COUNT(*) AS rating_count
FROM fact_ratings f
JOIN bridge_movie_genres b ON f.movie_key = b.movie_key
JOIN dim_genres g ON b.genre_key = g.genre_key
GROUP BY g.genre;
";
