//! Cycle Accumulator
//!
//! Single-writer state of the cycle currently being tightened. Batches are
//! appended under one async mutex and the verdict for a batch is computed
//! before the lock is released, so append order and verdict order match.
//!
//! ```text
//! IDLE ──batch──▶ ACCUMULATING ──no batch for stale_timeout──▶ STALE
//!                      ▲                                         │
//!                      └───────────────── batch ─────────────────┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::predictor::{PredictionError, Predictor};
use crate::ml_engine::last_window;
use crate::storage::{ClosedCycle, DefectArchive};
use crate::types::{CycleStateResponse, RegistryKey, SubmitSamplesRequest, Verdict};

#[derive(Debug, Error)]
pub enum AccumulatorError {
    #[error("prediction unavailable: no model configured")]
    NoModelConfigured,
    #[error("prediction unavailable: {0}")]
    PredictionUnavailable(#[from] PredictionError),
}

/// What happened to one accepted batch.
#[derive(Debug)]
pub struct BatchOutcome {
    pub verdict: Verdict,
    /// A window was available and inference was attempted
    pub classified: bool,
    pub failure: Option<AccumulatorError>,
}

#[derive(Debug, Default)]
struct CycleState {
    angle: Vec<f64>,
    torque: Vec<f64>,
    identifier: String,
    timestamp: String,
    reset: bool,
    verdict: Verdict,
    cycle_count: u64,
    last_batch: Option<Instant>,
    /// Folder of the model that produced `verdict`
    verdict_folder: Option<String>,
}

impl CycleState {
    fn is_stale(&self, timeout: Duration) -> bool {
        self.last_batch.is_some_and(|t| t.elapsed() >= timeout)
    }
}

pub struct CycleAccumulator {
    state: Mutex<CycleState>,
    selected: ArcSwapOption<RegistryKey>,
    predictor: Arc<dyn Predictor>,
    stale_timeout: Duration,
    archive: Option<DefectArchive>,
}

impl CycleAccumulator {
    pub fn new(predictor: Arc<dyn Predictor>, stale_timeout: Duration) -> Self {
        Self {
            state: Mutex::new(CycleState::default()),
            selected: ArcSwapOption::empty(),
            predictor,
            stale_timeout,
            archive: None,
        }
    }

    /// Archive closed NOT OK cycles into `archive`.
    #[must_use]
    pub fn with_archive(mut self, archive: DefectArchive) -> Self {
        self.archive = Some(archive);
        self
    }

    /// Select the model used for every following batch.
    pub fn configure(&self, key: RegistryKey) {
        info!(key = %key, predictor = self.predictor.name(), "Online model configured");
        self.selected.store(Some(Arc::new(key)));
    }

    pub fn selected(&self) -> Option<RegistryKey> {
        self.selected.load_full().map(|k| (*k).clone())
    }

    /// Accept one batch, then classify the most recent complete window.
    pub async fn submit(&self, batch: SubmitSamplesRequest) -> BatchOutcome {
        let mut state = self.state.lock().await;
        let was_stale = state.is_stale(self.stale_timeout);
        let mut closed = None;

        if batch.reset {
            let old = std::mem::take(&mut *state);
            let cycle_count = old.cycle_count + 1;
            if old.verdict.is_defect() && !was_stale && !old.angle.is_empty() {
                closed = Some(old);
            }
            *state = CycleState {
                cycle_count,
                ..CycleState::default()
            };
        }

        state.angle.extend_from_slice(&batch.angle);
        state.torque.extend_from_slice(&batch.torque);
        state.reset = batch.reset;
        state.identifier = batch.identifier;
        state.timestamp = batch.timestamp;
        state.last_batch = Some(Instant::now());
        if was_stale {
            debug!(identifier = %state.identifier, "Stale cycle reactivated");
        }

        let outcome = self.classify(&mut state).await;
        drop(state);

        if let Some(old) = closed {
            self.archive_cycle(old).await;
        }
        outcome
    }

    async fn classify(&self, state: &mut CycleState) -> BatchOutcome {
        let Some(key) = self.selected.load_full() else {
            // Without a model there is no window size either
            state.verdict = Verdict::Error;
            return BatchOutcome {
                verdict: state.verdict,
                classified: false,
                failure: Some(AccumulatorError::NoModelConfigured),
            };
        };

        let Some(window) = last_window(&state.angle, &state.torque, key.window_size) else {
            return BatchOutcome {
                verdict: state.verdict,
                classified: false,
                failure: None,
            };
        };

        match self.predictor.predict(&key, window.angle, window.torque).await {
            Ok(prediction) => {
                state.verdict = prediction.label.into();
                state.verdict_folder = Some(key.model_folder.clone());
                debug!(
                    identifier = %state.identifier,
                    samples = state.angle.len(),
                    verdict = %state.verdict,
                    "Cycle classified"
                );
                BatchOutcome {
                    verdict: state.verdict,
                    classified: true,
                    failure: None,
                }
            }
            Err(e) => {
                warn!(key = %key, predictor = self.predictor.name(), error = %e, "Prediction failed");
                state.verdict = Verdict::Error;
                BatchOutcome {
                    verdict: state.verdict,
                    classified: true,
                    failure: Some(e.into()),
                }
            }
        }
    }

    async fn archive_cycle(&self, cycle: CycleState) {
        let Some(archive) = self.archive.clone() else {
            return;
        };
        let result = tokio::task::spawn_blocking(move || {
            archive.write(&ClosedCycle {
                identifier: &cycle.identifier,
                timestamp: &cycle.timestamp,
                model_folder: cycle.verdict_folder.as_deref().unwrap_or_default(),
                verdict: cycle.verdict,
                angle: &cycle.angle,
                torque: &cycle.torque,
            })
        })
        .await;
        match result {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!(error = %e, "Failed to archive defective cycle"),
            Err(e) => warn!(error = %e, "Archive task panicked"),
        }
    }

    /// Snapshot for the dashboard.
    pub async fn snapshot(&self) -> CycleStateResponse {
        let state = self.state.lock().await;
        CycleStateResponse {
            angle: state.angle.clone(),
            torque: state.torque.clone(),
            prediction: state.verdict,
            identifier: state.identifier.clone(),
            timestamp: state.timestamp.clone(),
            reset: state.reset,
            cycle_count: state.cycle_count,
            stale: state.is_stale(self.stale_timeout),
            alert: state.verdict.is_defect(),
        }
    }
}
