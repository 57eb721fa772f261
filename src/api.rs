//! Read-only HTTP surface over the tracked data. No pipeline logic lives here.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;

use crate::metrics::Metrics;
use crate::store::{ChangeView, ItemView, Page, Source, Stats, Store};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn Store>,
    pub started: Instant,
}

impl AppState {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self {
            store,
            started: Instant::now(),
        }
    }
}

/// Build the API router. `/metrics` is mounted only when a recorder is given.
pub fn router(state: AppState, metrics: Option<&Metrics>) -> Router {
    let api = Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/api/headlines", get(list_headlines))
        .route("/api/headlines/{id}", get(get_headline))
        .route("/api/changes", get(list_changes))
        .route("/api/changes/{id}", get(get_change))
        .route("/api/sources", get(list_sources))
        .route("/api/stats", get(stats))
        .layer(CorsLayer::very_permissive())
        .with_state(state);

    match metrics {
        Some(m) => api.merge(m.router()),
        None => api,
    }
}

/// Store failure surfaced as a 500 with a JSON body.
struct ApiError(anyhow::Error);

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        Self(e)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        tracing::error!(target: "api", error = ?self.0, "request failed");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(ErrorBody {
                error: self.0.to_string(),
            }),
        )
            .into_response()
    }
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorBody {
            error: "Not found".into(),
        }),
    )
        .into_response()
}

/// Raw query values; anything unparsable falls back to the default.
#[derive(Deserialize)]
struct ListQuery {
    page: Option<String>,
    limit: Option<String>,
    source: Option<String>,
}

impl ListQuery {
    fn page(&self) -> Page {
        let num = |v: &Option<String>| v.as_deref().and_then(|s| s.trim().parse::<u32>().ok());
        Page::clamped(num(&self.page), num(&self.limit))
    }

    fn source(&self) -> Option<&str> {
        self.source.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
}

#[derive(Serialize)]
struct PageOut<T> {
    page: u32,
    limit: u32,
    data: Vec<T>,
}

async fn list_headlines(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<PageOut<ItemView>>, ApiError> {
    let page = q.page();
    let data = state.store.recent_items(page, q.source()).await?;
    Ok(Json(PageOut {
        page: page.page,
        limit: page.limit,
        data,
    }))
}

async fn get_headline(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let Ok(id) = id.parse::<i64>() else {
        return Ok(not_found());
    };
    Ok(match state.store.item_by_id(id).await? {
        Some(v) => Json(v).into_response(),
        None => not_found(),
    })
}

async fn list_changes(
    State(state): State<AppState>,
    Query(q): Query<ListQuery>,
) -> Result<Json<PageOut<ChangeView>>, ApiError> {
    let page = q.page();
    let data = state.store.recent_changes(page, q.source()).await?;
    Ok(Json(PageOut {
        page: page.page,
        limit: page.limit,
        data,
    }))
}

async fn get_change(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Response, ApiError> {
    let Ok(id) = id.parse::<i64>() else {
        return Ok(not_found());
    };
    Ok(match state.store.change_by_id(id).await? {
        Some(v) => Json(v).into_response(),
        None => not_found(),
    })
}

async fn list_sources(State(state): State<AppState>) -> Result<Json<Vec<Source>>, ApiError> {
    Ok(Json(state.store.enabled_sources().await?))
}

#[derive(Serialize)]
struct StatsOut {
    #[serde(flatten)]
    stats: Stats,
    uptime_seconds: u64,
}

async fn stats(State(state): State<AppState>) -> Result<Json<StatsOut>, ApiError> {
    let stats = state.store.stats().await?;
    Ok(Json(StatsOut {
        stats,
        uptime_seconds: state.started.elapsed().as_secs(),
    }))
}
