//! API route definitions
//!
//! Prediction service:
//! - POST /predict - verdict for one window
//! - GET /api/v1/models - model catalogue
//! - GET /api/v1/training/reports - training evaluation history
//!
//! Data service:
//! - POST /update_model - select the online model
//! - POST /data - append one batch to the current cycle
//! - GET /get_data - current cycle snapshot
//!
//! Both expose GET /health.

use axum::routing::{get, post};
use axum::Router;

use super::handlers::{self, DataState, PredictionState};

pub fn prediction_routes(state: PredictionState) -> Router {
    Router::new()
        .route("/predict", post(handlers::predict))
        .route("/health", get(handlers::health))
        .nest("/api/v1", v1_routes())
        .with_state(state)
}

fn v1_routes() -> Router<PredictionState> {
    Router::new()
        .route("/models", get(handlers::list_models))
        .route("/training/reports", get(handlers::list_training_reports))
}

pub fn data_routes(state: DataState) -> Router {
    Router::new()
        .route("/update_model", post(handlers::update_model))
        .route("/data", post(handlers::submit_samples))
        .route("/get_data", get(handlers::current_state))
        .route("/health", get(handlers::health))
        .with_state(state)
}
