//! Online Pipeline
//!
//! ```text
//! relay ──batch──▶ CycleAccumulator ──latest window──▶ Predictor ──▶ verdict
//!                        │                              ├─ LocalPredictor  (registry)
//!                        └─ reset on NOT OK ─▶ archive  └─ RemotePredictor (HTTP)
//! ```

pub mod accumulator;
pub mod predictor;

pub use accumulator::{AccumulatorError, BatchOutcome, CycleAccumulator};
pub use predictor::{LocalPredictor, Prediction, PredictionError, Predictor, RemotePredictor};
