//! Consistent response envelope for the `/api/v1` endpoints and for every
//! error response.
//!
//! Success bodies of `/api/v1` are wrapped in [`ApiResponse`]; every error,
//! on any route, is an [`ApiErrorResponse`]. The line-side contract routes
//! (`/predict`, `/data`, ...) keep their flat success bodies.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use serde::Serialize;

use crate::pipeline::PredictionError;
use crate::storage::RegistryError;

/// Metadata included in every enveloped response.
#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    pub timestamp: String,
    pub version: &'static str,
}

impl Default for ResponseMeta {
    fn default() -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339(),
            version: "1",
        }
    }
}

/// Successful response: `{ "data": T, "meta": { ... } }`
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub meta: ResponseMeta,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn ok(data: T) -> Response {
        let body = Self {
            data,
            meta: ResponseMeta::default(),
        };
        (StatusCode::OK, axum::Json(body)).into_response()
    }
}

/// Error detail inside [`ApiErrorResponse`].
#[derive(Debug, Serialize)]
pub struct ErrorDetail {
    pub code: String,
    pub message: String,
}

/// Error response: `{ "error": { "code": "...", "message": "..." }, "meta": { ... } }`
#[derive(Debug, Serialize)]
pub struct ApiErrorResponse {
    pub error: ErrorDetail,
    pub meta: ResponseMeta,
}

impl ApiErrorResponse {
    fn build(status: StatusCode, code: &str, msg: impl Into<String>) -> Response {
        let body = Self {
            error: ErrorDetail {
                code: code.to_string(),
                message: msg.into(),
            },
            meta: ResponseMeta::default(),
        };
        (status, axum::Json(body)).into_response()
    }

    pub fn not_found(msg: impl Into<String>) -> Response {
        Self::build(StatusCode::NOT_FOUND, "NOT_FOUND", msg)
    }

    pub fn bad_request(msg: impl Into<String>) -> Response {
        Self::build(StatusCode::BAD_REQUEST, "BAD_REQUEST", msg)
    }

    pub fn internal(msg: impl Into<String>) -> Response {
        Self::build(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg)
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Response {
        Self::build(StatusCode::SERVICE_UNAVAILABLE, "SERVICE_UNAVAILABLE", msg)
    }
}

impl IntoResponse for PredictionError {
    fn into_response(self) -> Response {
        let msg = self.to_string();
        match self {
            Self::Validation(_) => ApiErrorResponse::bad_request(msg),
            Self::ArtifactNotFound(_) => ApiErrorResponse::not_found(msg),
            Self::UpstreamUnavailable(_) => ApiErrorResponse::service_unavailable(msg),
            Self::Internal(_) => ApiErrorResponse::internal(msg),
        }
    }
}

impl IntoResponse for RegistryError {
    fn into_response(self) -> Response {
        PredictionError::from(self).into_response()
    }
}

/// Malformed JSON bodies are validation failures, not 422s.
pub fn json_rejection(rejection: &JsonRejection) -> Response {
    ApiErrorResponse::bad_request(rejection.body_text())
}

pub fn query_rejection(rejection: &QueryRejection) -> Response {
    ApiErrorResponse::bad_request(rejection.body_text())
}
