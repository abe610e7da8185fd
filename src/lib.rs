//! BOLTWATCH: bolt-tightening quality monitoring
//!
//! Classifies tightening cycles (angle and torque sampled over time) as OK
//! or NOT OK from fixed-size windows.
//!
//! ## Architecture
//!
//! - **ml_engine**: window segmentation, feature scaling, class balancing,
//!   gradient-boosted trees, the soft-voting ensemble and the training sweep
//! - **storage**: artifact stores, the model registry, training report
//!   history and the defect archive
//! - **pipeline**: predictors and the online cycle accumulator
//! - **api**: axum routers of the prediction and data services

pub mod api;
pub mod config;
pub mod ml_engine;
pub mod pipeline;
pub mod storage;
pub mod types;

pub use config::ServiceConfig;
pub use ml_engine::{SoftVotingEnsemble, TrainingPipeline};
pub use pipeline::{CycleAccumulator, LocalPredictor, Predictor, RemotePredictor};
pub use storage::ModelRegistry;
pub use types::{Label, RegistryKey, Verdict};
