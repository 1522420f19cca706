use serde::{Deserialize, Serialize};

/// One movie as it appears in TMDB list responses. Fetched, reshaped for
/// display, never written back.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovieSummary {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub popularity: f64,
    #[serde(default)]
    pub vote_count: u64,
    #[serde(default)]
    pub vote_average: f64,
    #[serde(default)]
    pub overview: String,
}

/// One page of results as TMDB paginates them natively (~20 items).
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderPage {
    #[serde(default = "default_page")]
    pub page: u32,
    #[serde(default)]
    pub results: Vec<MovieSummary>,
    // TMDB omits these on some endpoints; the original treated a missing
    // total_pages as 1.
    #[serde(default = "default_page")]
    pub total_pages: u32,
    #[serde(default)]
    pub total_results: u64,
}

fn default_page() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Genre {
    pub id: u64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CastMember {
    pub name: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Credits {
    #[serde(default)]
    pub cast: Vec<CastMember>,
}

/// Full detail for one movie, credits appended provider-side in the same
/// round trip. Not cached across requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MovieDetail {
    pub id: u64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub overview: String,
    #[serde(default)]
    pub poster_path: Option<String>,
    #[serde(default)]
    pub release_date: Option<String>,
    #[serde(default)]
    pub runtime: Option<u32>,
    #[serde(default)]
    pub genres: Vec<Genre>,
    #[serde(default)]
    pub popularity: f64,
    #[serde(default)]
    pub vote_count: u64,
    #[serde(default)]
    pub vote_average: f64,
    #[serde(default)]
    pub credits: Credits,
}

/// The application's own 50-item page, stitched from up to 3 provider pages.
/// Serialized field names match the shape the web client already consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResultPage {
    pub results: Vec<MovieSummary>,
    pub app_page: u32,
    pub app_total_pages: u32,
    pub total_results: u64,
}

impl SearchResultPage {
    /// The defined "nothing to search for" page: not an error.
    pub fn empty() -> Self {
        Self {
            results: Vec::new(),
            app_page: 1,
            app_total_pages: 1,
            total_results: 0,
        }
    }
}
