use utoipa::OpenApi;
use crate::models::*;
use crate::services::persistence::FlushStatus;

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = HealthResponse)
    )
)]
#[allow(dead_code)]
pub async fn health_check_doc() {}

/// Relay diagnostics
#[utoipa::path(
    get,
    path = "/api/v1/diagnostics",
    responses(
        (status = 200, description = "Room, session, loop and system counters", body = DiagnosticsResponse)
    )
)]
#[allow(dead_code)]
pub async fn diagnostics_doc() {}

/// Document WebSocket
#[utoipa::path(
    get,
    path = "/ws/{doc_id}",
    params(
        ("doc_id" = String, Path, description = "Document identifier")
    ),
    responses(
        (status = 101, description = "Switching to the WebSocket protocol"),
        (status = 400, description = "Missing document id", body = ErrorResponse)
    )
)]
#[allow(dead_code)]
pub async fn websocket_doc() {}

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check_doc,
        diagnostics_doc,
        websocket_doc,
    ),
    components(
        schemas(HealthResponse, DiagnosticsResponse, FlushStatus, ErrorResponse)
    ),
    tags(
        (name = "api", description = "API endpoints")
    )
)]
pub struct ApiDoc;
