//! REST API module using Axum
//!
//! Two services share this module:
//! - prediction service: stateless window verdicts plus the `/api/v1`
//!   catalogue and training history (enveloped)
//! - data service: the stateful cycle accumulator the line-side relay
//!   feeds and the dashboard polls

pub mod envelope;
pub mod handlers;
mod routes;

pub use handlers::{DataState, PredictionState};

use axum::http::{header, HeaderValue, Method};
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build a CORS layer that is restrictive by default (same-origin only).
///
/// `origins` comes from `server.cors_origins`; entries that do not parse as
/// header values are dropped with a warning.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let base = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);
    if origins.is_empty() {
        return base;
    }

    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match o.trim().parse() {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "CORS: ignoring invalid origin");
                None
            }
        })
        .collect();
    tracing::info!(origins = ?origins, "CORS: allowing configured origins");
    base.allow_origin(allowed)
}

/// Router of the prediction service.
pub fn prediction_app(state: PredictionState, cors_origins: &[String]) -> Router {
    routes::prediction_routes(state)
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(cors_origins))
}

/// Router of the data service.
pub fn data_app(state: DataState, cors_origins: &[String]) -> Router {
    routes::data_routes(state)
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(cors_origins))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{header, Request};
    use tower::ServiceExt;

    use super::*;
    use crate::config::ServiceConfig;
    use crate::storage::{InMemoryArtifactStore, ModelRegistry};

    async fn allowed_origin(cors_origins: &[String], origin: &str) -> Option<HeaderValue> {
        let registry = Arc::new(ModelRegistry::new(Arc::new(InMemoryArtifactStore::new())));
        let response = prediction_app(PredictionState::new(registry), cors_origins)
            .oneshot(
                Request::builder()
                    .uri("/health")
                    .header(header::ORIGIN, origin)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).cloned()
    }

    #[tokio::test]
    async fn test_default_cors_is_same_origin_only() {
        let defaults = ServiceConfig::default().server.cors_origins;
        assert!(defaults.is_empty());
        assert_eq!(allowed_origin(&defaults, "http://dashboard.local").await, None);
    }

    #[tokio::test]
    async fn test_configured_origin_is_allowed() {
        let origins = vec!["http://dashboard.local".to_string(), "bad\norigin".to_string()];
        assert_eq!(
            allowed_origin(&origins, "http://dashboard.local").await,
            Some(HeaderValue::from_static("http://dashboard.local"))
        );
        assert_eq!(allowed_origin(&origins, "http://elsewhere.local").await, None);
    }
}
