//! Stateless prediction handler

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{debug, warn};

use super::PredictionState;
use crate::api::envelope::{json_rejection, ApiErrorResponse};
use crate::pipeline::{PredictionError, Predictor};
use crate::types::{PredictRequest, PredictResponse, Verdict};

/// POST /predict
///
/// Body: `{model_folder, model_name, window_size, angle, par}`. Both channels
/// must hold exactly `window_size` samples; shape errors are reported before
/// any artifact is loaded.
pub async fn predict(
    State(state): State<PredictionState>,
    body: Result<Json<PredictRequest>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => return json_rejection(&rejection),
    };

    if let Err(msg) = request.validate() {
        debug!(error = %msg, "Rejected predict request");
        return ApiErrorResponse::bad_request(msg);
    }

    let key = request.key();
    match state.predictor.predict(&key, &request.angle, &request.par).await {
        Ok(prediction) => Json(PredictResponse {
            prediction: Verdict::from(prediction.label),
            probability: prediction.probability,
        })
        .into_response(),
        Err(e) => {
            if matches!(e, PredictionError::Internal(_)) {
                warn!(key = %key, error = %e, "Prediction failed");
            }
            e.into_response()
        }
    }
}
