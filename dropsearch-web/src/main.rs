//! # Dropsearch Web API
//!
//! HTTP boundary for Dropsearch. Serves search over the index and runs the
//! periodic Dropbox sync in the background.
//!
//! ## Configuration
//!
//! - `DROPSEARCH_HOST` - Server host (default: "127.0.0.1")
//! - `DROPSEARCH_PORT` - Server port (default: "3001")
//! - `DROPSEARCH_UI_URL` - Allowed CORS origin (any origin when unset)
//! - `DROPSEARCH_SYNC_ENABLED` - Run the sync scheduler (default: true)
//!
//! Everything else is read by `DropsearchConfig::from_env`.
//!
//! ## Endpoints
//!
//! - `GET /health`, `GET /api/health` - Liveness check
//! - `GET /api/search?query=&sort=asc|desc&limit=` - Search indexed files
//! - `GET /api/sync/status` - Scheduler statistics

use axum::{
    extract::{Query, State},
    http::{HeaderValue, Method, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use dropsearch_core::{
    Dropsearch, DropsearchConfig, DropsearchError, Scheduler, SearchEngine, SearchHit,
    SearchRequest, SortOrder,
};
use serde::Deserialize;
use std::{net::SocketAddr, str::FromStr, sync::Arc};
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Shared application state
#[derive(Clone)]
struct AppState {
    search: Arc<SearchEngine>,
    scheduler: Option<Arc<Scheduler>>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // Initialize tracing
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "dropsearch_core=info,dropsearch_web=info,tower_http=debug".into());
    let registry = tracing_subscriber::registry().with(filter);
    if std::env::var("DROPSEARCH_LOG_JSON").is_ok_and(|v| v == "1" || v == "true") {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }

    // Load configuration from environment
    let host = std::env::var("DROPSEARCH_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port = std::env::var("DROPSEARCH_PORT").unwrap_or_else(|_| "3001".to_string());
    let ui_url = std::env::var("DROPSEARCH_UI_URL").ok().filter(|u| !u.is_empty());
    let sync_enabled = std::env::var("DROPSEARCH_SYNC_ENABLED")
        .map(|v| !matches!(v.trim().to_ascii_lowercase().as_str(), "0" | "false" | "no" | "off"))
        .unwrap_or(true);

    let config = DropsearchConfig::from_env()?;
    info!(
        index = %config.elastic.index,
        staging = %config.staging_dir.display(),
        "Initializing Dropsearch"
    );
    let app = Dropsearch::with_config(config)?;

    let scheduler = if sync_enabled {
        let scheduler = Arc::new(app.scheduler());
        scheduler.start();
        Some(scheduler)
    } else {
        warn!("Sync scheduler disabled, serving search only");
        None
    };

    let state = AppState {
        search: app.search_engine(),
        scheduler: scheduler.clone(),
    };
    let router = router(state, cors_layer(ui_url.as_deref())?);

    // Bind and serve
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;
    info!("Starting Dropsearch API server on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
        })
        .await?;

    if let Some(scheduler) = scheduler {
        scheduler.stop();
    }
    info!("Server stopped");

    Ok(())
}

fn router(state: AppState, cors: CorsLayer) -> Router {
    Router::new()
        // Health check
        .route("/health", get(health_check))
        .route("/api/health", get(health_check))
        // Search
        .route("/api/search", get(search_files))
        // Sync
        .route("/api/sync/status", get(sync_status))
        // Apply middleware
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// CORS restricted to the UI origin when one is configured
fn cors_layer(ui_url: Option<&str>) -> anyhow::Result<CorsLayer> {
    let layer = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers(Any);
    Ok(match ui_url {
        Some(origin) => layer.allow_origin(HeaderValue::from_str(origin.trim_end_matches('/'))?),
        None => layer.allow_origin(Any),
    })
}

// ============================================================================
// Handlers
// ============================================================================

/// GET /health
async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// GET /api/search
///
/// ## Query Parameters
/// - `query` (optional): Search text; empty or missing browses all files
/// - `sort` (optional): `asc` or `desc` on creation time (default: desc)
/// - `limit` (optional): Maximum results, capped by the server
///
/// ## Response
/// JSON array of `{filename, url, text, createdAt, score?, highlight?}`
async fn search_files(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Result<Json<Vec<SearchHit>>, ApiError> {
    let request = params.into_request()?;
    let hits = state.search.search(&request).await?;
    Ok(Json(hits))
}

/// GET /api/sync/status
async fn sync_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    match &state.scheduler {
        Some(scheduler) => {
            let stats = scheduler.stats().await;
            Json(serde_json::to_value(stats).unwrap_or_default())
        }
        None => Json(serde_json::json!({ "running": false, "enabled": false })),
    }
}

// ============================================================================
// Request Types
// ============================================================================

#[derive(Debug, Default, Deserialize)]
struct SearchParams {
    query: Option<String>,
    sort: Option<String>,
    limit: Option<usize>,
}

impl SearchParams {
    fn into_request(self) -> Result<SearchRequest, ApiError> {
        let sort = match self.sort.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(s) => Some(SortOrder::from_str(s).map_err(ApiError::BadRequest)?),
        };
        if self.limit == Some(0) {
            return Err(ApiError::BadRequest("limit must be at least 1".into()));
        }

        Ok(SearchRequest {
            query: self.query.unwrap_or_default(),
            sort,
            limit: self.limit,
        })
    }
}

// ============================================================================
// Error Handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
enum ApiError {
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Search(#[from] DropsearchError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error) = match self {
            ApiError::BadRequest(msg) => (
                StatusCode::BAD_REQUEST,
                serde_json::json!({ "message": msg }),
            ),
            ApiError::Search(err) => {
                error!(error = %err, "Search request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    serde_json::json!({
                        "message": "Failed to process search request",
                        "details": err.to_string()
                    }),
                )
            }
        };

        let body = Json(serde_json::json!({
            "data": null,
            "error": error
        }));

        (status, body).into_response()
    }
}
