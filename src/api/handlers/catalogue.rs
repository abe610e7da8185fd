//! Model catalogue and training history

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use serde::Deserialize;
use tracing::warn;

use super::PredictionState;
use crate::api::envelope::{query_rejection, ApiErrorResponse, ApiResponse};
use crate::config::defaults::DEFAULT_REPORT_LIMIT;

/// GET /api/v1/models
pub async fn list_models(State(state): State<PredictionState>) -> Response {
    match state.registry().catalogue() {
        Ok(folders) => ApiResponse::ok(folders),
        Err(e) => {
            warn!(error = %e, "Failed to read model catalogue");
            e.into_response()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ReportQuery {
    pub folder: Option<String>,
    pub limit: Option<usize>,
}

/// GET /api/v1/training/reports?folder=&limit=
///
/// Newest first. `limit` defaults to 50.
pub async fn list_training_reports(
    State(state): State<PredictionState>,
    query: Result<Query<ReportQuery>, QueryRejection>,
) -> Response {
    let Query(query) = match query {
        Ok(q) => q,
        Err(rejection) => return query_rejection(&rejection),
    };
    let Some(store) = state.reports.as_ref() else {
        return ApiErrorResponse::service_unavailable("training report history is not available");
    };

    let limit = query.limit.unwrap_or(DEFAULT_REPORT_LIMIT);
    match store.list(query.folder.as_deref(), limit) {
        Ok(reports) => ApiResponse::ok(reports),
        Err(e) => {
            warn!(error = %e, "Failed to read training reports");
            ApiErrorResponse::internal(e.to_string())
        }
    }
}
