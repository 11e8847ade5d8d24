//! # HTTP API
//!
//! Versioned routes under `/api/v1` plus the generated OpenAPI document.

pub mod scans;

use axum::{http::header, response::IntoResponse, routing::get, Router};
use std::sync::Arc;
use utoipa::OpenApi;

use vigil_core::state::ScanStore;

/// Application state
pub struct AppState {
    pub store: Arc<dyn ScanStore>,
}

pub type SharedState = Arc<AppState>;

// === OpenAPI Definition ===

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Vigil API",
        version = "1.0.0",
        description = "Progress observer for Vigil security scans"
    ),
    paths(scans::health, scans::list_scans, scans::get_scan, scans::get_scan_result),
    components(
        schemas(
            scans::ApiResponse,
            scans::HealthResponse,
            scans::ScanListItem,
            scans::ScanListResponse,
            scans::ScanStatusResponse,
            scans::RunSummaryResponse,
            scans::ScanResultResponse
        )
    ),
    tags(
        (name = "health", description = "Liveness"),
        (name = "scans", description = "Scan progress and results")
    )
)]
pub struct ApiDoc;

async fn serve_openapi() -> impl IntoResponse {
    let spec = ApiDoc::openapi().to_json().unwrap_or_default();
    ([(header::CONTENT_TYPE, "application/json")], spec)
}

pub fn router(state: SharedState) -> Router {
    let scan_routes = Router::new()
        .route("/", get(scans::list_scans))
        .route("/:id", get(scans::get_scan))
        .route("/:id/result", get(scans::get_scan_result));

    Router::new()
        .nest("/api/v1/scans", scan_routes)
        .route("/api/v1/health", get(scans::health))
        .route("/api/v1/openapi.json", get(serve_openapi))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_openapi_lists_every_route() {
        let doc = ApiDoc::openapi();
        let paths: Vec<&String> = doc.paths.paths.keys().collect();
        for path in [
            "/api/v1/health",
            "/api/v1/scans",
            "/api/v1/scans/{id}",
            "/api/v1/scans/{id}/result",
        ] {
            assert!(paths.iter().any(|p| p.as_str() == path), "missing {}", path);
        }
    }
}
