pub mod catalog;
pub mod client;
pub mod models;

pub use client::{MovieApi, TmdbClient, TmdbError};
pub use models::{MovieDetail, MovieSummary, ProviderPage, SearchResultPage};

use once_cell::sync::Lazy;
use std::env;

static IMG_BASE: Lazy<String> = Lazy::new(|| {
    env::var("TMDB_IMG_BASE").unwrap_or_else(|_| "https://image.tmdb.org/t/p".to_string())
});

const PLACEHOLDER: &str = "https://via.placeholder.com/342x513?text=No+Image";

/// The TMDB genre ids the browse page offers, with their display labels.
pub const GENRE_CATALOG: &[(u32, &str)] = &[
    (28, "Action"),
    (12, "Adventure"),
    (16, "Animation"),
    (35, "Comedy"),
    (80, "Crime"),
    (99, "Documentary"),
    (18, "Drama"),
    (10751, "Family"),
    (14, "Fantasy"),
    (36, "History"),
    (27, "Horror"),
    (10402, "Music"),
    (9648, "Mystery"),
    (10749, "Romance"),
    (878, "Sci-Fi"),
    (10770, "TV Movie"),
    (53, "Thriller"),
    (10752, "War"),
    (37, "Western"),
];

/// Display label for a genre id, falling back to `Genre {id}`.
pub fn genre_label(id: u32) -> String {
    GENRE_CATALOG
        .iter()
        .find(|(gid, _)| *gid == id)
        .map(|(_, label)| (*label).to_string())
        .unwrap_or_else(|| format!("Genre {id}"))
}

/// Resolve a raw poster path fragment to a display URL, or the placeholder
/// when the movie has no poster. Pure, no I/O.
pub fn poster_url(path: Option<&str>, size: &str) -> String {
    match path {
        Some(p) => format!("{}/{size}{p}", &*IMG_BASE),
        None => PLACEHOLDER.to_string(),
    }
}
