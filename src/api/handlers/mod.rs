//! API route handlers
//!
//! - `prediction`: stateless window verdicts
//! - `catalogue`: model catalogue and training report history
//! - `cycle`: configure-model, submit-samples and the current-state snapshot

mod catalogue;
mod cycle;
mod prediction;

pub use catalogue::*;
pub use cycle::*;
pub use prediction::*;

use std::sync::Arc;

use axum::Json;
use serde_json::{json, Value};

use crate::pipeline::{CycleAccumulator, LocalPredictor};
use crate::storage::{ModelRegistry, TrainingReportStore};

// ============================================================================
// API State
// ============================================================================

/// Shared state of the prediction service.
#[derive(Clone)]
pub struct PredictionState {
    pub predictor: LocalPredictor,
    /// Training history, when the report database could be opened
    pub reports: Option<TrainingReportStore>,
}

impl PredictionState {
    pub fn new(registry: Arc<ModelRegistry>) -> Self {
        Self {
            predictor: LocalPredictor::new(registry),
            reports: None,
        }
    }

    #[must_use]
    pub fn with_reports(mut self, reports: TrainingReportStore) -> Self {
        self.reports = Some(reports);
        self
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        self.predictor.registry()
    }
}

/// Shared state of the data service.
#[derive(Clone)]
pub struct DataState {
    pub accumulator: Arc<CycleAccumulator>,
}

impl DataState {
    pub fn new(accumulator: Arc<CycleAccumulator>) -> Self {
        Self { accumulator }
    }
}

/// Liveness probe shared by both services.
pub async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
