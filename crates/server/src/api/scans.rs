//! # Scans API
//!
//! Read-only progress observer over the scan record store.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use serde::Serialize;
use std::collections::BTreeMap;
use utoipa::ToSchema;

use vigil_core::state::{RunSummary, ScanResult, ScanState};

use super::SharedState;

// === API Types ===

#[derive(Serialize, ToSchema)]
pub struct ApiResponse {
    pub success: bool,
    pub message: String,
}

#[derive(Serialize, ToSchema)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// One row of the scan list
#[derive(Debug, Serialize, ToSchema)]
pub struct ScanListItem {
    pub scan_id: String,
    pub kind: String,
    pub stage: String,
    pub progress: u8,
    pub completed_detectors: usize,
    pub total_detectors: usize,
    pub updated_at: String,
}

#[derive(Serialize, ToSchema)]
pub struct ScanListResponse {
    pub scans: Vec<ScanListItem>,
}

/// Live progress of one scan
#[derive(Debug, Serialize, ToSchema)]
pub struct ScanStatusResponse {
    pub scan_id: String,
    pub kind: String,
    pub stage: String,
    pub progress: u8,
    pub completed_detectors: usize,
    pub total_detectors: usize,
    /// detector name -> pending | succeeded | failed | skipped
    pub detectors: BTreeMap<String, String>,
    pub error: Option<String>,
    pub has_result: bool,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RunSummaryResponse {
    pub summary: String,
    pub total_detectors: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub total_findings: usize,
    pub duplicates_removed: usize,
    pub started_at: String,
    pub finished_at: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ScanResultResponse {
    pub scan_id: String,
    #[schema(value_type = Vec<Object>)]
    pub findings: Vec<serde_json::Value>,
    #[schema(value_type = Object)]
    pub findings_by_detector: serde_json::Value,
    pub summary: RunSummaryResponse,
    pub detected_profile: Option<String>,
}

type ApiError = (StatusCode, Json<ApiResponse>);

fn api_error(status: StatusCode, message: String) -> ApiError {
    (
        status,
        Json(ApiResponse {
            success: false,
            message,
        }),
    )
}

impl From<&ScanState> for ScanListItem {
    fn from(state: &ScanState) -> Self {
        Self {
            scan_id: state.scan_id.clone(),
            kind: state.kind.as_str().to_string(),
            stage: state.stage.as_str().to_string(),
            progress: state.progress,
            completed_detectors: state.completed_detectors,
            total_detectors: state.total_detectors,
            updated_at: state.updated_at.to_rfc3339(),
        }
    }
}

impl ScanStatusResponse {
    pub fn new(state: &ScanState, has_result: bool) -> Self {
        let detectors = state
            .detectors
            .iter()
            .map(|(name, status)| {
                let status = serde_json::to_value(status)
                    .ok()
                    .and_then(|v| v.as_str().map(str::to_string))
                    .unwrap_or_else(|| format!("{:?}", status).to_lowercase());
                (name.clone(), status)
            })
            .collect();

        Self {
            scan_id: state.scan_id.clone(),
            kind: state.kind.as_str().to_string(),
            stage: state.stage.as_str().to_string(),
            progress: state.progress,
            completed_detectors: state.completed_detectors,
            total_detectors: state.total_detectors,
            detectors,
            error: state.error.clone(),
            has_result,
            created_at: state.created_at.to_rfc3339(),
            updated_at: state.updated_at.to_rfc3339(),
        }
    }
}

impl From<&RunSummary> for RunSummaryResponse {
    fn from(summary: &RunSummary) -> Self {
        Self {
            summary: summary.summary.clone(),
            total_detectors: summary.total_detectors,
            succeeded: summary.succeeded,
            failed: summary.failed,
            skipped: summary.skipped,
            total_findings: summary.total_findings,
            duplicates_removed: summary.duplicates_removed,
            started_at: summary.started_at.to_rfc3339(),
            finished_at: summary.finished_at.to_rfc3339(),
        }
    }
}

impl TryFrom<&ScanResult> for ScanResultResponse {
    type Error = serde_json::Error;

    fn try_from(result: &ScanResult) -> Result<Self, Self::Error> {
        let findings = result
            .findings
            .iter()
            .map(serde_json::to_value)
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            scan_id: result.scan_id.clone(),
            findings,
            findings_by_detector: serde_json::to_value(&result.findings_by_detector)?,
            summary: RunSummaryResponse::from(&result.summary),
            detected_profile: result.detected_profile.clone(),
        })
    }
}

// === API Handlers ===

/// Liveness check
#[utoipa::path(
    get,
    path = "/api/v1/health",
    tag = "health",
    responses(
        (status = 200, description = "Server is up", body = HealthResponse)
    )
)]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// List stored scans, most recently updated first
#[utoipa::path(
    get,
    path = "/api/v1/scans",
    tag = "scans",
    responses(
        (status = 200, description = "Stored scans", body = ScanListResponse),
        (status = 500, description = "Store unavailable", body = ApiResponse)
    )
)]
pub async fn list_scans(State(state): State<SharedState>) -> Result<Json<ScanListResponse>, ApiError> {
    let scans = state.store.list().map_err(|e| {
        tracing::error!("Failed to list scans: {:#}", e);
        api_error(StatusCode::INTERNAL_SERVER_ERROR, format!("{:#}", e))
    })?;

    Ok(Json(ScanListResponse {
        scans: scans.iter().map(ScanListItem::from).collect(),
    }))
}

/// Progress and per-detector status of one scan
#[utoipa::path(
    get,
    path = "/api/v1/scans/{id}",
    tag = "scans",
    params(
        ("id" = String, Path, description = "Scan id")
    ),
    responses(
        (status = 200, description = "Scan progress", body = ScanStatusResponse),
        (status = 404, description = "Scan not found", body = ApiResponse)
    )
)]
pub async fn get_scan(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<ScanStatusResponse>, ApiError> {
    let record = state
        .store
        .load(&id)
        .map_err(|e| api_error(StatusCode::NOT_FOUND, format!("{:#}", e)))?;

    Ok(Json(ScanStatusResponse::new(&record.state, record.result.is_some())))
}

/// Final findings of a completed scan
#[utoipa::path(
    get,
    path = "/api/v1/scans/{id}/result",
    tag = "scans",
    params(
        ("id" = String, Path, description = "Scan id")
    ),
    responses(
        (status = 200, description = "Scan result", body = ScanResultResponse),
        (status = 404, description = "Scan or result not found", body = ApiResponse)
    )
)]
pub async fn get_scan_result(
    State(state): State<SharedState>,
    Path(id): Path<String>,
) -> Result<Json<ScanResultResponse>, ApiError> {
    let record = state
        .store
        .load(&id)
        .map_err(|e| api_error(StatusCode::NOT_FOUND, format!("{:#}", e)))?;

    let Some(result) = record.result else {
        return Err(api_error(
            StatusCode::NOT_FOUND,
            format!(
                "Scan '{}' has no result yet (stage: {})",
                id,
                record.state.stage.as_str()
            ),
        ));
    };

    ScanResultResponse::try_from(&result)
        .map(Json)
        .map_err(|e| api_error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use vigil_core::findings::Finding;
    use vigil_core::models::ScanKind;
    use vigil_core::state::DetectorStatus;

    #[test]
    fn test_status_response_reports_detector_statuses() {
        let mut state = ScanState::new("scan-1", ScanKind::Repository);
        state.register(["pattern_matcher", "static_analyzer"]);
        state
            .detectors
            .insert("static_analyzer".to_string(), DetectorStatus::Skipped);
        state.progress = 40;

        let response = ScanStatusResponse::new(&state, false);

        assert_eq!(response.kind, "repository");
        assert_eq!(response.stage, "init");
        assert_eq!(response.detectors["pattern_matcher"], "pending");
        assert_eq!(response.detectors["static_analyzer"], "skipped");
        assert_eq!(response.total_detectors, 2);
        assert!(!response.has_result);
    }

    #[test]
    fn test_result_response_flattens_findings() {
        let finding = Finding::new(serde_json::json!({ "title": "reentrancy" })).tagged("pattern_matcher");
        let now = Utc::now();
        let result = ScanResult {
            scan_id: "scan-1".to_string(),
            findings: vec![finding.clone()],
            findings_by_detector: BTreeMap::from([("pattern_matcher".to_string(), vec![finding])]),
            summary: RunSummary {
                summary: "vault".to_string(),
                kind: ScanKind::File,
                total_detectors: 1,
                succeeded: 1,
                failed: 0,
                skipped: 0,
                total_findings: 1,
                duplicates_removed: 0,
                started_at: now,
                finished_at: now,
            },
            detected_profile: None,
        };

        let response = ScanResultResponse::try_from(&result).unwrap();

        assert_eq!(response.findings[0]["title"], "reentrancy");
        assert_eq!(response.findings[0]["detector"], "pattern_matcher");
        assert_eq!(
            response.findings_by_detector["pattern_matcher"][0]["title"],
            "reentrancy"
        );
        assert_eq!(response.summary.total_findings, 1);
    }
}
