//! Data service handlers: the line-side relay pushes batches here and the
//! operator dashboard polls the snapshot.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{debug, warn};

use super::DataState;
use crate::api::envelope::{json_rejection, ApiErrorResponse};
use crate::pipeline::AccumulatorError;
use crate::types::{Ack, ConfigureModelRequest, CycleStateResponse, SubmitSamplesRequest};

/// POST /update_model
pub async fn update_model(
    State(state): State<DataState>,
    body: Result<Json<ConfigureModelRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return json_rejection(&rejection),
    };
    match request.into_key() {
        Ok(key) => {
            state.accumulator.configure(key);
            Json(Ack::new("Model information updated successfully")).into_response()
        }
        Err(msg) => ApiErrorResponse::bad_request(msg),
    }
}

/// POST /data
///
/// Always acknowledged once the body parses. Inference failures only show
/// up as the `Error` verdict in the snapshot.
pub async fn submit_samples(
    State(state): State<DataState>,
    body: Result<Json<SubmitSamplesRequest>, JsonRejection>,
) -> Response {
    let Json(batch) = match body {
        Ok(body) => body,
        Err(rejection) => return json_rejection(&rejection),
    };
    if batch.angle.len() != batch.torque.len() {
        debug!(
            angle = batch.angle.len(),
            torque = batch.torque.len(),
            "Batch channels differ in length"
        );
    }

    let outcome = state.accumulator.submit(batch).await;
    match outcome.failure {
        Some(AccumulatorError::NoModelConfigured) => {
            debug!("Batch accepted without a configured model");
        }
        Some(e) => warn!(error = %e, "Batch accepted, verdict unavailable"),
        None => {}
    }
    Json(Ack::new("Data received")).into_response()
}

/// GET /get_data
pub async fn current_state(State(state): State<DataState>) -> Json<CycleStateResponse> {
    Json(state.accumulator.snapshot().await)
}
