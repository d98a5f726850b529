//! HTTP surface: snapshot JSON API, listing page, and refresh status

mod templates;

use crate::services::{LastRefresh, QueryService, RefreshScheduler};
use crate::types::StatePopError;
use axum::{
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{Html, IntoResponse, Json, Response},
    routing::get,
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::warn;

#[derive(Clone)]
pub struct AppState {
    pub query: QueryService,
    pub scheduler: Option<Arc<RefreshScheduler>>,
}

/// Build the application router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_page))
        .route("/statePopulation", get(state_population))
        .route("/status", get(status))
        .with_state(state)
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        // Path only in the span; query strings stay out of logs
        .layer(
            tower_http::trace::TraceLayer::new_for_http().make_span_with(
                |request: &axum::http::Request<_>| {
                    tracing::info_span!(
                        "http_request",
                        method = %request.method(),
                        path = %request.uri().path(),
                    )
                },
            ),
        )
}

impl IntoResponse for StatePopError {
    fn into_response(self) -> Response {
        let status = match &self {
            StatePopError::NotFound(_) => StatusCode::NOT_FOUND,
            StatePopError::NoData => StatusCode::SERVICE_UNAVAILABLE,
            other => {
                warn!(error = %other, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

// --- Handlers ---

#[derive(Debug, Deserialize)]
struct StateQuery {
    state: Option<String>,
}

async fn state_population(
    State(state): State<AppState>,
    Query(params): Query<StateQuery>,
) -> Result<Response, StatePopError> {
    match params.state {
        Some(name) => {
            let entry = state.query.get_by_state(&name)?;
            Ok(Json(entry).into_response())
        }
        None => {
            let current = state.query.get_all()?;
            Ok(Json(&current.snapshot).into_response())
        }
    }
}

async fn index_page(State(state): State<AppState>) -> impl IntoResponse {
    match state.query.listing() {
        Ok(listing) => (
            StatusCode::OK,
            Html(templates::render_index(
                &listing.names,
                &listing.populations,
                listing.updated_at,
            )),
        ),
        Err(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Html(templates::render_no_data()),
        ),
    }
}

#[derive(Debug, Serialize)]
struct StatusBody {
    populated: bool,
    updated_at: Option<DateTime<Utc>>,
    state_count: usize,
    total_population: u64,
    refreshing: bool,
    last_refresh: Option<LastRefresh>,
}

async fn status(State(state): State<AppState>) -> Json<StatusBody> {
    let current = state.query.get_all().ok();
    let last_refresh = state
        .scheduler
        .as_ref()
        .and_then(|s| s.last_refresh())
        .map(|last| (*last).clone());
    Json(StatusBody {
        populated: current.is_some(),
        updated_at: current.as_ref().map(|c| c.updated_at),
        state_count: current.as_ref().map(|c| c.snapshot.len()).unwrap_or(0),
        total_population: current.as_ref().map(|c| c.snapshot.total()).unwrap_or(0),
        refreshing: state.scheduler.as_ref().is_some_and(|s| s.is_running()),
        last_refresh,
    })
}
