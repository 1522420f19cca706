use async_trait::async_trait;
use reqwest::{header, Client, StatusCode};
use serde::de::DeserializeOwned;
use std::env;
use thiserror::Error;
use tracing::debug;

use super::models::{MovieDetail, ProviderPage};

const TMDB_BASE: &str = "https://api.themoviedb.org/3";

/// Number of credited cast members kept on a movie detail.
const CAST_LIMIT: usize = 6;

#[derive(Debug, Error)]
pub enum TmdbError {
    #[error("TMDB_API_KEY is not set")]
    MissingApiKey,
    #[error("TMDB {status}: {body}")]
    Upstream { status: StatusCode, body: String },
    #[error("TMDB request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("TMDB response decode failed: {0}")]
    Decode(#[from] serde_json::Error),
}

/// The seam between the aggregation logic and the live TMDB service.
/// Tests substitute fakes; production uses [`TmdbClient`].
#[async_trait]
pub trait MovieApi: Send + Sync {
    async fn search_page(&self, query: &str, page: u32) -> Result<ProviderPage, TmdbError>;
    async fn discover_page(&self, genre_id: u32, page: u32) -> Result<ProviderPage, TmdbError>;
    async fn movie_detail(&self, id: u64) -> Result<MovieDetail, TmdbError>;
}

#[derive(Debug, Clone)]
pub struct TmdbClient {
    client: Client,
    api_key: String,
}

impl TmdbClient {
    /// Fails before any network call when the credential is absent.
    pub fn from_env() -> Result<Self, TmdbError> {
        let api_key = env::var("TMDB_API_KEY").map_err(|_| TmdbError::MissingApiKey)?;
        Ok(Self {
            client: Client::new(),
            api_key,
        })
    }

    /// Authenticated GET against the v3 API. Parameters with an absent value
    /// are omitted. Caching is bypassed: every call hits the live service.
    async fn request<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, Option<String>)],
    ) -> Result<T, TmdbError> {
        let url = format!("{TMDB_BASE}{path}");
        let query: Vec<(&str, &str)> = params
            .iter()
            .filter_map(|(k, v)| v.as_deref().map(|v| (*k, v)))
            .collect();
        debug!("GET {} {:?}", path, query);

        let res = self
            .client
            .get(&url)
            .query(&[("api_key", self.api_key.as_str())])
            .query(&query)
            .header(header::CACHE_CONTROL, "no-store")
            .send()
            .await?;
        let status = res.status();
        let body = res.text().await?;
        if !status.is_success() {
            return Err(TmdbError::Upstream { status, body });
        }
        Ok(serde_json::from_str(&body)?)
    }
}

#[async_trait]
impl MovieApi for TmdbClient {
    async fn search_page(&self, query: &str, page: u32) -> Result<ProviderPage, TmdbError> {
        self.request(
            "/search/movie",
            &[
                ("query", Some(query.to_string())),
                ("page", Some(page.to_string())),
                ("include_adult", Some("false".to_string())),
            ],
        )
        .await
    }

    async fn discover_page(&self, genre_id: u32, page: u32) -> Result<ProviderPage, TmdbError> {
        self.request(
            "/discover/movie",
            &[
                ("with_genres", Some(genre_id.to_string())),
                ("sort_by", Some("popularity.desc".to_string())),
                ("include_adult", Some("false".to_string())),
                ("page", Some(page.to_string())),
            ],
        )
        .await
    }

    async fn movie_detail(&self, id: u64) -> Result<MovieDetail, TmdbError> {
        let mut detail: MovieDetail = self
            .request(
                &format!("/movie/{id}"),
                &[("append_to_response", Some("credits".to_string()))],
            )
            .await?;
        detail.credits.cast.truncate(CAST_LIMIT);
        Ok(detail)
    }
}
