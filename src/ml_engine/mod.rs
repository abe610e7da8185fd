//! ML Engine for tightening-cycle classification
//!
//! ## Architecture
//! - `segmenter`: disjoint fixed-length windows over a cycle
//! - `features`: flattening and the per-window-size scaler
//! - `balancer`: synthetic minority oversampling (training only)
//! - `boosting`: histogram gradient-boosted trees, depth-wise and leaf-wise
//! - `ensemble`: weighted soft voting over the boosted members
//! - `evaluation`: ROC AUC and per-class report on the held-out split
//! - `dataset`: cycle-file ingestion, relabeling and the train/test split
//! - `training`: the folder × window-size training sweep

pub mod balancer;
pub mod boosting;
pub mod dataset;
pub mod ensemble;
pub mod evaluation;
pub mod features;
pub mod segmenter;
pub mod training;

// Re-export public types
pub use balancer::{BalanceError, ClassBalancer, ClassCounts};
pub use boosting::{BoostedTrees, BoosterParams, FitError, GrowthPolicy};
pub use dataset::{DatasetError, Relabel, WindowDataset};
pub use ensemble::{Classifier, EnsembleError, EnsemblePrediction, EnsembleTrainer, SoftVotingEnsemble};
pub use evaluation::{roc_auc, ClassificationReport, EvaluationError};
pub use features::{FeatureError, Scaler};
pub use segmenter::{last_window, segment, window_count, Window};
pub use training::{MetricsRow, SweepSummary, TrainingError, TrainingPipeline, TrainingReport};
