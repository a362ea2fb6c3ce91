//! Pawscan HTTP REST API
//!
//! Axum-based HTTP server exposing the scan pipeline. Each endpoint has a
//! thin axum handler that delegates to a pure inner function returning
//! `(StatusCode, serde_json::Value)`; the inner functions are directly
//! testable without axum dispatch machinery.
//!
//! Endpoints:
//! - GET    /health                    — health check with DB status
//! - GET    /version                   — server version info
//! - POST   /scans                     — multipart upload + analysis
//! - GET    /scans/:id                 — full persisted record surface
//! - GET    /scans/:id/status          — polling contract (non-cacheable)
//! - POST   /scans/:id/regenerate      — reset + re-dispatch age progression
//! - POST   /scans/:id/correct         — human breed correction
//! - POST   /corrections/:id/reteach   — re-run a failed teaching step
//! - DELETE /scans/:id                 — remove record + stored blobs

use std::sync::Arc;

use anyhow::Result;
use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use uuid::Uuid;

use pawscan_core::error::{ScanError, ServiceFailure};
use pawscan_core::models::correction::TeachStatus;
use pawscan_core::models::scan::ScanRecord;

use crate::subsystems::{analyze, corrections, simulate};
use crate::AppContext;

/// Build the Axum router with all endpoints.
pub fn build_router(state: Arc<AppContext>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/scans", post(upload_handler))
        .route("/scans/:id", get(scan_handler))
        .route("/scans/:id", delete(delete_handler))
        .route("/scans/:id/status", get(status_handler))
        .route("/scans/:id/regenerate", post(regenerate_handler))
        .route("/scans/:id/correct", post(correct_handler))
        .route("/corrections/:id/reteach", post(reteach_handler))
        // uploads are capped at 10 MB; leave room for multipart framing
        .layer(DefaultBodyLimit::max(12 * 1024 * 1024))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<AppContext>,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);
    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Pawscan HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request / Response shaping
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct CorrectRequest {
    pub breed: String,
}

/// HTTP status for a pipeline error.
pub fn status_for(e: &ScanError) -> StatusCode {
    match e {
        ScanError::Validation(_) => StatusCode::BAD_REQUEST,
        ScanError::NotADog => StatusCode::UNPROCESSABLE_ENTITY,
        ScanError::ExternalService {
            failure: ServiceFailure::RateLimited,
            ..
        } => StatusCode::SERVICE_UNAVAILABLE,
        ScanError::ExternalService { .. } | ScanError::Parse(_) => StatusCode::BAD_GATEWAY,
        ScanError::JobTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
        ScanError::Storage(_)
        | ScanError::Database(_)
        | ScanError::Config(_)
        | ScanError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Standard error body. Only the user-safe message leaves the server.
pub fn error_body(e: &ScanError) -> serde_json::Value {
    serde_json::json!({
        "error": e.user_message(),
        "status": "error",
    })
}

fn not_found(what: &str) -> (StatusCode, serde_json::Value) {
    (
        StatusCode::NOT_FOUND,
        serde_json::json!({
            "error": format!("{} not found", what),
            "status": "error",
        }),
    )
}

/// The persisted record surface consumed by UI/API layers.
pub fn scan_surface(record: &ScanRecord) -> serde_json::Value {
    serde_json::json!({
        "id": record.id,
        "breed": record.breed,
        "confidence": record.confidence,
        "alternatives": record.alternatives,
        "verification": record.verification,
        "method": record.method,
        "description": record.description,
        "origin": record.origin,
        "health_risks": record.health_risks,
        "simulation": record.simulation,
        "image": record.image_path,
        "created_at": record.created_at,
        "updated_at": record.updated_at,
    })
}

/// The polling contract body.
pub fn status_body(record: &ScanRecord) -> serde_json::Value {
    let sim = record.simulation();
    serde_json::json!({
        "status": sim.status.as_str(),
        "simulations": {
            "1_years": sim.one_year,
            "3_years": sim.three_years,
        },
        "original_image": record.image_path,
        "timestamp": record.updated_at,
    })
}

fn teaching_flag(status: TeachStatus) -> &'static str {
    match status {
        TeachStatus::Added | TeachStatus::Updated | TeachStatus::Skipped => "ok",
        TeachStatus::Pending | TeachStatus::Error => "failed",
    }
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

pub async fn health_inner(state: &AppContext) -> (StatusCode, serde_json::Value) {
    match pawscan_core::db::health_check(&state.pool).await {
        Ok(version) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "healthy",
                "version": env!("CARGO_PKG_VERSION"),
                "postgresql": version,
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "error": e.to_string(),
            }),
        ),
    }
}

pub fn version_inner() -> serde_json::Value {
    serde_json::json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": "pawscan/1",
    })
}

pub async fn upload_inner(
    state: &AppContext,
    user_id: Option<Uuid>,
    bytes: &[u8],
) -> (StatusCode, serde_json::Value) {
    match analyze::analyze_upload(state, user_id, bytes).await {
        Ok(record) => (StatusCode::CREATED, scan_surface(&record)),
        Err(e) => {
            tracing::warn!(error = %e, "Upload analysis failed");
            (status_for(&e), error_body(&e))
        }
    }
}

pub async fn scan_inner(state: &AppContext, id: Uuid) -> (StatusCode, serde_json::Value) {
    match analyze::fetch_scan(&state.pool, id).await {
        Ok(Some(record)) => (StatusCode::OK, scan_surface(&record)),
        Ok(None) => not_found("Scan"),
        Err(e) => {
            let e = ScanError::Database(e);
            (status_for(&e), error_body(&e))
        }
    }
}

pub async fn status_inner(state: &AppContext, id: Uuid) -> (StatusCode, serde_json::Value) {
    if let Some(cached) = state.status_cache.get(&id) {
        return (StatusCode::OK, cached);
    }

    match analyze::fetch_scan(&state.pool, id).await {
        Ok(Some(record)) => {
            let body = status_body(&record);
            state.status_cache.insert(id, body.clone()).await;
            (StatusCode::OK, body)
        }
        Ok(None) => not_found("Scan"),
        Err(e) => {
            let e = ScanError::Database(e);
            (status_for(&e), error_body(&e))
        }
    }
}

pub async fn regenerate_inner(state: &AppContext, id: Uuid) -> (StatusCode, serde_json::Value) {
    match simulate::regenerate(&state.pool, &state.status_cache, &state.jobs, id).await {
        Ok(true) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "ok",
                "simulation_status": "queued",
            }),
        ),
        Ok(false) => not_found("Scan"),
        Err(e) => (status_for(&e), error_body(&e)),
    }
}

pub async fn correct_inner(
    state: &AppContext,
    id: Uuid,
    req: CorrectRequest,
) -> (StatusCode, serde_json::Value) {
    let breed = req.breed.trim();
    if breed.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            serde_json::json!({
                "error": "breed field is required",
                "status": "error",
            }),
        );
    }

    let scan = match analyze::fetch_scan(&state.pool, id).await {
        Ok(Some(record)) => record,
        Ok(None) => return not_found("Scan"),
        Err(e) => {
            let e = ScanError::Database(e);
            return (status_for(&e), error_body(&e));
        }
    };

    match corrections::apply_correction(
        &state.pool,
        state.store.as_ref(),
        state.classifier.as_ref(),
        &scan,
        breed,
    )
    .await
    {
        Ok(report) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "ok",
                "correction_id": report.correction_id,
                "teaching": teaching_flag(report.teach_status),
                "teach_status": report.teach_status.as_str(),
            }),
        ),
        Err(e) => {
            tracing::error!(scan_id = %id, error = %e, "Correction failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({
                    "error": "The correction could not be saved. Please try again.",
                    "status": "error",
                }),
            )
        }
    }
}

pub async fn reteach_inner(state: &AppContext, id: Uuid) -> (StatusCode, serde_json::Value) {
    match corrections::reteach(&state.pool, state.store.as_ref(), state.classifier.as_ref(), id)
        .await
    {
        Ok(Some(status)) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "ok",
                "teaching": teaching_flag(status),
                "teach_status": status.as_str(),
            }),
        ),
        Ok(None) => not_found("Correction"),
        Err(e) => {
            tracing::error!(correction_id = %id, error = %e, "Re-teach failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                serde_json::json!({
                    "error": "Re-teach failed. Please try again.",
                    "status": "error",
                }),
            )
        }
    }
}

pub async fn delete_inner(state: &AppContext, id: Uuid) -> (StatusCode, serde_json::Value) {
    match analyze::delete_scan(state, id).await {
        Ok(true) => (StatusCode::OK, serde_json::json!({ "status": "ok" })),
        Ok(false) => not_found("Scan"),
        Err(e) => (status_for(&e), error_body(&e)),
    }
}

// ============================================================================
// Axum handler wrappers (thin — delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<AppContext>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn upload_handler(
    State(state): State<Arc<AppContext>>,
    mut multipart: Multipart,
) -> impl IntoResponse {
    let mut image: Option<Vec<u8>> = None;
    let mut user_id: Option<Uuid> = None;

    while let Ok(Some(field)) = multipart.next_field().await {
        match field.name() {
            Some("image") => match field.bytes().await {
                Ok(bytes) => image = Some(bytes.to_vec()),
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to read multipart image field");
                    return (
                        StatusCode::BAD_REQUEST,
                        Json(serde_json::json!({
                            "error": "The upload could not be read.",
                            "status": "error",
                        })),
                    );
                }
            },
            Some("user_id") => {
                user_id = field
                    .text()
                    .await
                    .ok()
                    .and_then(|t| Uuid::parse_str(t.trim()).ok());
            }
            _ => {}
        }
    }

    let Some(bytes) = image else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({
                "error": "Multipart field 'image' is required.",
                "status": "error",
            })),
        );
    };

    let (status, body) = upload_inner(&state, user_id, &bytes).await;
    (status, Json(body))
}

pub async fn scan_handler(
    State(state): State<Arc<AppContext>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = scan_inner(&state, id).await;
    (status, Json(body))
}

/// Responses are non-cacheable at the transport layer: clients poll this
/// endpoint every few seconds during generation.
pub async fn status_handler(
    State(state): State<Arc<AppContext>>,
    Path(id): Path<Uuid>,
) -> Response {
    let (status, body) = status_inner(&state, id).await;
    let mut response = (status, Json(body)).into_response();
    response
        .headers_mut()
        .insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    response
}

pub async fn regenerate_handler(
    State(state): State<Arc<AppContext>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = regenerate_inner(&state, id).await;
    (status, Json(body))
}

pub async fn correct_handler(
    State(state): State<Arc<AppContext>>,
    Path(id): Path<Uuid>,
    Json(req): Json<CorrectRequest>,
) -> impl IntoResponse {
    let (status, body) = correct_inner(&state, id, req).await;
    (status, Json(body))
}

pub async fn reteach_handler(
    State(state): State<Arc<AppContext>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = reteach_inner(&state, id).await;
    (status, Json(body))
}

pub async fn delete_handler(
    State(state): State<Arc<AppContext>>,
    Path(id): Path<Uuid>,
) -> impl IntoResponse {
    let (status, body) = delete_inner(&state, id).await;
    (status, Json(body))
}

// ============================================================================
// Unit Tests — pure shaping and mapping functions
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use pawscan_core::error::Service;

    fn record_with_simulation(simulation: serde_json::Value) -> ScanRecord {
        ScanRecord {
            id: Uuid::new_v4(),
            user_id: None,
            image_path: "uploads/test.jpg".to_string(),
            image_digest: "a".repeat(64),
            breed: "Beagle".to_string(),
            confidence: 88.0,
            alternatives: serde_json::json!([{"breed": "Harrier", "confidence": 30.0}]),
            verification: "pending".to_string(),
            method: "ml_gemini_confirmed".to_string(),
            description: Some("A merry little hound.".to_string()),
            origin: serde_json::json!({"region": "England"}),
            health_risks: serde_json::json!([]),
            simulation,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_version_inner_shape() {
        let v = version_inner();
        assert!(v["version"].is_string());
        assert_eq!(v["protocol"], "pawscan/1");
    }

    #[test]
    fn test_status_for_mapping() {
        assert_eq!(
            status_for(&ScanError::Validation("x".to_string())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(status_for(&ScanError::NotADog), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            status_for(&ScanError::ExternalService {
                service: Service::Identifier,
                failure: ServiceFailure::RateLimited,
            }),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_for(&ScanError::ExternalService {
                service: Service::Identifier,
                failure: ServiceFailure::Unavailable,
            }),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_for(&ScanError::Parse("bad json".to_string())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(status_for(&ScanError::JobTimeout(300)), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(
            status_for(&ScanError::Storage("disk".to_string())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_error_body_is_user_safe() {
        let e = ScanError::Parse("candidates[0].content missing".to_string());
        let body = error_body(&e);
        assert_eq!(body["status"], "error");
        assert!(!body["error"].as_str().unwrap().contains("candidates"));
    }

    #[test]
    fn test_status_body_polling_contract() {
        let record = record_with_simulation(serde_json::json!({
            "status": "generating",
            "1_years": null,
            "3_years": null,
        }));
        let body = status_body(&record);
        assert_eq!(body["status"], "generating");
        assert!(body["simulations"]["1_years"].is_null());
        assert!(body["simulations"]["3_years"].is_null());
        assert_eq!(body["original_image"], "uploads/test.jpg");
        assert!(body["timestamp"].is_string());
    }

    #[test]
    fn test_status_body_with_complete_paths() {
        let record = record_with_simulation(serde_json::json!({
            "status": "complete",
            "1_years": "sims/x_1_years.png",
            "3_years": "sims/x_3_years.png",
        }));
        let body = status_body(&record);
        assert_eq!(body["status"], "complete");
        assert_eq!(body["simulations"]["1_years"], "sims/x_1_years.png");
    }

    #[test]
    fn test_scan_surface_fields() {
        let record = record_with_simulation(serde_json::json!({"status": "queued"}));
        let surface = scan_surface(&record);
        for key in [
            "id",
            "breed",
            "confidence",
            "alternatives",
            "verification",
            "method",
            "description",
            "origin",
            "health_risks",
            "simulation",
            "image",
        ] {
            assert!(!surface[key].is_null() || key == "description", "missing {}", key);
        }
    }

    #[test]
    fn test_teaching_flag_split() {
        assert_eq!(teaching_flag(TeachStatus::Added), "ok");
        assert_eq!(teaching_flag(TeachStatus::Updated), "ok");
        assert_eq!(teaching_flag(TeachStatus::Skipped), "ok");
        assert_eq!(teaching_flag(TeachStatus::Error), "failed");
        assert_eq!(teaching_flag(TeachStatus::Pending), "failed");
    }
}
