use crate::auth::{AuthError, AuthService, GoogleTokenInfo, Session};
use crate::tmdb::{self, catalog, MovieApi, MovieDetail, MovieSummary, TmdbClient, TmdbError};
use crate::watchlist::{MemoryWatchlistStore, SavedMovie, WatchlistEntry, WatchlistStore};
use anyhow::Result;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::sse::{Event, KeepAlive, Sse},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use axum_extra::TypedHeader;
use futures::stream::{self, BoxStream, StreamExt};
use headers::{authorization::Bearer, Authorization};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::{env, net::SocketAddr, sync::Arc};
use tower_http::{limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing::{info, warn};

const MAX_BODY_BYTES: usize = 64 * 1024;
const DEFAULT_PORT: u16 = 3000;
const DETAIL_POSTER_SIZE: &str = "w500";

#[derive(Clone)]
pub struct AppState {
    pub movies: Arc<dyn MovieApi>,
    pub store: Arc<dyn WatchlistStore>,
    pub auth: Arc<AuthService>,
}

/// All external handles are constructed here once and injected; nothing in
/// the components below reaches for process globals.
pub async fn run_server() -> Result<()> {
    let movies: Arc<dyn MovieApi> = Arc::new(TmdbClient::from_env()?);
    let store: Arc<dyn WatchlistStore> = Arc::new(MemoryWatchlistStore::new());
    let auth = Arc::new(AuthService::from_env(Arc::new(GoogleTokenInfo::new()))?);

    let state = AppState {
        movies,
        store,
        auth,
    };
    let app = build_router(state);

    let port = env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(DEFAULT_PORT);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/search", get(search))
        .route("/api/genres", get(genres))
        .route("/api/discover", get(discover))
        .route("/api/movies/:id", get(movie))
        .route("/api/auth/register", post(register))
        .route("/api/auth/login", post(login))
        .route("/api/auth/google", post(google))
        .route("/api/auth/logout", post(logout))
        .route("/api/watchlist", get(watchlist_index).put(watchlist_add))
        .route("/api/watchlist/live", get(watchlist_live))
        .route(
            "/api/watchlist/:movie_id",
            get(watchlist_contains).delete(watchlist_remove),
        )
        .layer(RequestBodyLimitLayer::new(MAX_BODY_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Tmdb(#[from] TmdbError),
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error("not found")]
    NotFound,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            ApiError::Tmdb(TmdbError::MissingApiKey) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Tmdb(_) => StatusCode::BAD_GATEWAY,
            ApiError::Auth(AuthError::EmailTaken) => StatusCode::CONFLICT,
            ApiError::Auth(AuthError::WeakPassword) => StatusCode::BAD_REQUEST,
            ApiError::Auth(AuthError::MissingSecret) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Auth(_) => StatusCode::UNAUTHORIZED,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!("Request failed: {}", self);
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

async fn health() -> &'static str {
    "OK"
}

#[derive(Deserialize)]
struct SearchParams {
    q: Option<String>,
    page: Option<u32>,
}

async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<tmdb::SearchResultPage>, ApiError> {
    let query = params.q.unwrap_or_default();
    let page = params.page.unwrap_or(1);
    let result = catalog::search_movies(state.movies.as_ref(), &query, page).await?;
    Ok(Json(result))
}

async fn genres() -> Json<Vec<serde_json::Value>> {
    Json(
        tmdb::GENRE_CATALOG
            .iter()
            .map(|(id, label)| json!({ "id": id, "label": label }))
            .collect(),
    )
}

#[derive(Deserialize)]
struct DiscoverParams {
    genre: Option<String>,
    count: Option<usize>,
}

async fn discover(
    State(state): State<AppState>,
    Query(params): Query<DiscoverParams>,
) -> Result<Json<Vec<MovieSummary>>, ApiError> {
    // A missing or unparseable genre falls through to the aggregator's
    // defined no-op.
    let genre_id = params
        .genre
        .as_deref()
        .and_then(|g| g.trim().parse::<i64>().ok())
        .unwrap_or(0);
    let count = params.count.unwrap_or(catalog::APP_PAGE_SIZE);
    if genre_id > 0 {
        let label = tmdb::genre_label(genre_id as u32);
        info!("Sampling {} movies from {}", count, label);
    }
    let mut rng = StdRng::from_entropy();
    let result =
        catalog::discover_genre_random(state.movies.as_ref(), genre_id, count, &mut rng).await?;
    Ok(Json(result))
}

#[derive(Serialize)]
struct MovieResponse {
    #[serde(flatten)]
    detail: MovieDetail,
    poster: String,
}

async fn movie(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> Result<Json<MovieResponse>, ApiError> {
    // Any gateway failure shows as "not found", matching what the detail
    // page has always presented for a bad id.
    match state.movies.movie_detail(id).await {
        Ok(detail) => {
            let poster = tmdb::poster_url(detail.poster_path.as_deref(), DETAIL_POSTER_SIZE);
            Ok(Json(MovieResponse { detail, poster }))
        }
        Err(e) => {
            warn!("Movie {} fetch failed: {}", id, e);
            Err(ApiError::NotFound)
        }
    }
}

#[derive(Deserialize)]
struct EmailCredentials {
    email: String,
    password: String,
}

#[derive(Deserialize)]
struct GoogleCredentials {
    id_token: String,
}

#[derive(Serialize)]
struct AuthResponse {
    token: String,
    user: Session,
}

async fn register(
    State(state): State<AppState>,
    Json(creds): Json<EmailCredentials>,
) -> Result<Json<AuthResponse>, ApiError> {
    let (token, user) = state
        .auth
        .register_with_email(&creds.email, &creds.password)
        .await?;
    Ok(Json(AuthResponse { token, user }))
}

async fn login(
    State(state): State<AppState>,
    Json(creds): Json<EmailCredentials>,
) -> Result<Json<AuthResponse>, ApiError> {
    let (token, user) = state
        .auth
        .sign_in_with_email(&creds.email, &creds.password)
        .await?;
    Ok(Json(AuthResponse { token, user }))
}

async fn google(
    State(state): State<AppState>,
    Json(creds): Json<GoogleCredentials>,
) -> Result<Json<AuthResponse>, ApiError> {
    let (token, user) = state.auth.sign_in_with_google(&creds.id_token).await?;
    Ok(Json(AuthResponse { token, user }))
}

async fn logout(
    State(state): State<AppState>,
    TypedHeader(bearer): TypedHeader<Authorization<Bearer>>,
) -> Result<StatusCode, ApiError> {
    state.auth.sign_out(bearer.token()).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn require_session(
    state: &AppState,
    bearer: &Authorization<Bearer>,
) -> Result<Session, ApiError> {
    Ok(state.auth.authenticate(bearer.token()).await?)
}

async fn watchlist_index(
    State(state): State<AppState>,
    TypedHeader(bearer): TypedHeader<Authorization<Bearer>>,
) -> Result<Json<Vec<WatchlistEntry>>, ApiError> {
    let session = require_session(&state, &bearer).await?;
    Ok(Json(state.store.list(&session.user_id).await?))
}

/// Accepts a TMDB movie object as-is; the web client sends `poster_path`
/// and `release_date` straight from list responses.
#[derive(Deserialize)]
struct SaveMovieRequest {
    id: u64,
    #[serde(default, alias = "name")]
    title: String,
    #[serde(default, alias = "poster_path")]
    poster: Option<String>,
    #[serde(default, alias = "first_air_date")]
    release_date: Option<String>,
}

async fn watchlist_add(
    State(state): State<AppState>,
    TypedHeader(bearer): TypedHeader<Authorization<Bearer>>,
    Json(movie): Json<SaveMovieRequest>,
) -> Result<StatusCode, ApiError> {
    let session = require_session(&state, &bearer).await?;
    state
        .store
        .add(
            &session.user_id,
            SavedMovie {
                id: movie.id,
                title: movie.title,
                poster: movie.poster,
                release_date: movie.release_date,
            },
        )
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn watchlist_remove(
    State(state): State<AppState>,
    TypedHeader(bearer): TypedHeader<Authorization<Bearer>>,
    Path(movie_id): Path<u64>,
) -> Result<StatusCode, ApiError> {
    let session = require_session(&state, &bearer).await?;
    state.store.remove(&session.user_id, movie_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn watchlist_contains(
    State(state): State<AppState>,
    TypedHeader(bearer): TypedHeader<Authorization<Bearer>>,
    Path(movie_id): Path<u64>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let session = require_session(&state, &bearer).await?;
    let saved = state.store.contains(&session.user_id, movie_id).await?;
    Ok(Json(json!({ "saved": saved })))
}

/// Streams the full watchlist snapshot on every change. If the live channel
/// cannot be established the stream degrades to a single one-shot snapshot.
async fn watchlist_live(
    State(state): State<AppState>,
    TypedHeader(bearer): TypedHeader<Authorization<Bearer>>,
) -> Result<Sse<BoxStream<'static, Result<Event, Infallible>>>, ApiError> {
    let session = require_session(&state, &bearer).await?;

    let stream = match state.store.subscribe(&session.user_id).await {
        Ok(sub) => stream::unfold(sub, |mut sub| async move {
            let rows = sub.next().await?;
            let event = Event::default().json_data(&rows).ok()?;
            Some((Ok(event), sub))
        })
        .boxed(),
        Err(e) => {
            warn!(
                "Watchlist subscription failed, degrading to one-shot: {}",
                e
            );
            let rows = state
                .store
                .list(&session.user_id)
                .await
                .unwrap_or_default();
            stream::iter(Event::default().json_data(&rows).ok().map(Ok)).boxed()
        }
    };

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");
        term.recv().await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Shutdown signal received (Ctrl+C)");
        }
        _ = terminate => {
            info!("Shutdown signal received (SIGTERM)");
        }
    }
}
