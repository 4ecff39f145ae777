use crate::{docs::ApiDoc, handlers::{diagnostics, health_check}, websocket::websocket_handler, AppState};
use axum::{http::{header, HeaderValue, Method}, routing::get, Json, Router};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{cors::{AllowOrigin, CorsLayer}, trace::TraceLayer};
use tracing::warn;
use utoipa::OpenApi;

/// Create the application router
pub fn create_router(state: Arc<AppState>, allowed_origins: &[String]) -> Router {
    let api_routes = Router::<Arc<AppState>>::new()
        .route("/v1/diagnostics", get(diagnostics));

    Router::new()
        .route("/health", get(health_check))
        .route("/ws/:doc_id", get(websocket_handler))
        .nest("/api", api_routes)
        .route("/api-docs/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .layer(cors_layer(allowed_origins))
        // Add tracing layer
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Explicit origins allow credentials; an empty list allows any origin without them.
fn cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::ORIGIN, header::CONTENT_TYPE, header::ACCEPT, header::AUTHORIZATION])
        .max_age(Duration::from_secs(3600));

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin {}", origin);
                None
            }
        })
        .collect();

    if origins.is_empty() {
        base.allow_origin(AllowOrigin::any())
    } else {
        base.allow_origin(AllowOrigin::list(origins)).allow_credentials(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::LocalBus;
    use crate::config::RelaySettings;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use tower::util::ServiceExt;

    fn app(origins: &[String]) -> Router {
        let state = Arc::new(AppState::new(RelaySettings::default(), Arc::new(LocalBus::default()), None));
        create_router(state, origins)
    }

    async fn get_json(app: Router, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn test_health_route() {
        let (status, body) = get_json(app(&[]), "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert!(body["time"].is_string());
    }

    #[tokio::test]
    async fn test_diagnostics_route_reports_counters() {
        let (status, body) = get_json(app(&[]), "/api/v1/diagnostics").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["n_rooms"], 0);
        assert_eq!(body["n_dropped"], 0);
        assert_eq!(body["persistence_enabled"], false);
    }

    #[tokio::test]
    async fn test_openapi_lists_paths() {
        let (status, body) = get_json(app(&[]), "/api-docs/openapi.json").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["paths"]["/health"].is_object());
        assert!(body["paths"]["/api/v1/diagnostics"].is_object());
    }

    #[tokio::test]
    async fn test_explicit_origin_is_echoed_with_credentials() {
        let response = app(&["https://app.example.com".to_string()])
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header("origin", "https://app.example.com")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let headers = response.headers();
        assert_eq!(headers["access-control-allow-origin"], "https://app.example.com");
        assert_eq!(headers["access-control-allow-credentials"], "true");
    }
}
