//! Admin HTTP surface
//!
//! # Endpoints
//!
//! - `GET /api/pqs` - tracked counts and promoted shapes
//! - `GET /api/pqs/:pqid` - one tracked shape of either kind
//! - `POST /api/pqs/clear` - wipe all tracked state and flush
//! - `POST /api/pqs/aggs` - union columns into a table's group-by override
//! - `GET /api/pqs/recommend/:table` - recommended group-by, measure and sort columns
//! - `GET /health` - service health
//! - `GET /metrics` - Prometheus metrics

use crate::error::Error;
use crate::hasher::Pqid;
use crate::metrics;
use crate::services::{ServiceStatus, SharedServiceManager};
use crate::tracker::{PqsTracker, QueryDetail, Summary};
use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

// =============================================================================
// Application State
// =============================================================================

/// State shared by every admin handler
pub struct AdminState {
    /// Tracker being administered
    pub tracker: Arc<PqsTracker>,
    /// Background services, when running inside the server
    pub services: Option<SharedServiceManager>,
}

// =============================================================================
// Response Types
// =============================================================================

/// Plain status reply
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpResponse {
    /// Human-readable outcome
    pub message: String,
    /// HTTP status repeated in the body
    #[serde(rename = "statusCode")]
    pub status_code: u16,
}

impl HttpResponse {
    fn new(status: StatusCode, message: impl Into<String>) -> (StatusCode, Json<Self>) {
        (
            status,
            Json(Self {
                message: message.into(),
                status_code: status.as_u16(),
            }),
        )
    }
}

/// Column recommendation for one table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecommendResponse {
    /// Table the recommendation is for
    pub table: String,
    /// Group-by columns in priority order
    pub group_by_cols: Vec<String>,
    /// Measure columns
    pub measure_cols: BTreeSet<String>,
    /// Sort columns by vote
    pub sort_cols: Vec<String>,
}

/// Health report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    /// `healthy` or `degraded`
    pub status: String,
    /// Crate version
    pub version: String,
    /// Status label of each background service
    pub services: BTreeMap<String, String>,
}

// =============================================================================
// Router
// =============================================================================

/// Build CORS layer from the allowed origins; empty allows any origin
pub fn build_cors_layer(cors_origins: &[String]) -> CorsLayer {
    if cors_origins.is_empty() {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any)
    } else {
        let origins: Vec<HeaderValue> =
            cors_origins.iter().filter_map(|o| o.parse().ok()).collect();
        CorsLayer::new()
            .allow_origin(origins)
            .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
            .allow_headers(Any)
    }
}

/// Build the admin router
pub fn router(state: Arc<AdminState>, cors_origins: &[String]) -> Router {
    Router::new()
        // Health and metrics
        .route("/health", get(health))
        .route("/metrics", get(prometheus_metrics))
        // Tracker admin
        .route("/api/pqs", get(get_summary))
        .route("/api/pqs/clear", post(clear))
        .route("/api/pqs/aggs", post(post_group_by_override))
        .route("/api/pqs/recommend/:table", get(get_recommendation))
        .route("/api/pqs/:pqid", get(get_by_id))
        .with_state(state)
        .layer(build_cors_layer(cors_origins))
}

// =============================================================================
// Handlers
// =============================================================================

async fn health(State(state): State<Arc<AdminState>>) -> Json<HealthResponse> {
    let statuses: BTreeMap<String, String> = state
        .services
        .as_ref()
        .map(|manager| {
            manager
                .status()
                .into_iter()
                .map(|(name, status)| (name.to_string(), status.label().to_string()))
                .collect()
        })
        .unwrap_or_default();

    let healthy = statuses
        .values()
        .all(|s| s == ServiceStatus::Running.label());

    Json(HealthResponse {
        status: if healthy { "healthy" } else { "degraded" }.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        services: statuses,
    })
}

async fn prometheus_metrics() -> Response {
    match metrics::gather_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "Failed to gather metrics");
            HttpResponse::new(StatusCode::INTERNAL_SERVER_ERROR, e).into_response()
        },
    }
}

async fn get_summary(State(state): State<Arc<AdminState>>) -> Json<Summary> {
    Json(state.tracker.summary())
}

async fn get_by_id(
    State(state): State<Arc<AdminState>>,
    Path(pqid): Path<String>,
) -> Result<Json<QueryDetail>, (StatusCode, Json<HttpResponse>)> {
    match state.tracker.require_by_id(&Pqid::from(pqid)) {
        Ok(detail) => Ok(Json(detail)),
        Err(e @ Error::NotFound(_)) => Err(HttpResponse::new(StatusCode::BAD_REQUEST, e.to_string())),
        Err(e) => Err(HttpResponse::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}

async fn clear(State(state): State<Arc<AdminState>>) -> (StatusCode, Json<HttpResponse>) {
    let tracker = state.tracker.clone();
    match tokio::task::spawn_blocking(move || tracker.clear()).await {
        Ok(Ok(())) => HttpResponse::new(StatusCode::OK, "All tracked queries cleared"),
        Ok(Err(e)) => {
            tracing::error!(error = %e, "Clear could not flush");
            HttpResponse::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
        },
        Err(e) => HttpResponse::new(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()),
    }
}

async fn post_group_by_override(
    State(state): State<Arc<AdminState>>,
    body: Bytes,
) -> (StatusCode, Json<HttpResponse>) {
    if body.is_empty() {
        return HttpResponse::new(StatusCode::BAD_REQUEST, "Empty post body");
    }
    let value: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, "Undecodable override body");
            return HttpResponse::new(StatusCode::BAD_REQUEST, e.to_string());
        },
    };

    match state.tracker.set_group_by_override_json(&value) {
        Ok(()) => HttpResponse::new(StatusCode::OK, "All OK"),
        Err(e) => {
            tracing::warn!(error = %e, "Rejected group-by override");
            HttpResponse::new(StatusCode::BAD_REQUEST, e.to_string())
        },
    }
}

async fn get_recommendation(
    State(state): State<Arc<AdminState>>,
    Path(table): Path<String>,
) -> Json<RecommendResponse> {
    let rec = state.tracker.recommend_columns(&table);
    let sort_cols = state.tracker.recommend_sort_columns(&table);
    Json(RecommendResponse {
        table,
        group_by_cols: rec.group_by_cols,
        measure_cols: rec.measure_cols,
        sort_cols,
    })
}
